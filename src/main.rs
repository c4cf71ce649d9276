//! Worker entrypoint: runs the event-driven sync consumer and the outbox
//! retry worker against the configured database.

use std::sync::Arc;

use anyhow::Context;
use tokio::time::Duration;
use tracing::info;

use fulfillment_api::{
    config::AppConfig,
    db,
    events::{self, outbox},
    logging,
    search::InMemorySearchIndex,
    services::AppServices,
    status::StatusRegistry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;
    logging::init_tracing(&config.log_level, config.log_json);

    info!(
        environment = %config.environment,
        "Starting fulfillment worker"
    );

    let pool = db::establish_connection_from_app_config(&config)
        .await
        .context("failed to connect to database")?;
    let pool = Arc::new(pool);

    StatusRegistry::seed(&*pool)
        .await
        .context("failed to seed order statuses")?;

    let index = Arc::new(InMemorySearchIndex::new());
    let (event_sender, event_receiver) = events::channel(config.event_channel_capacity);

    let services = AppServices::build(Arc::clone(&pool), index, Some(event_sender))
        .await
        .context("failed to wire services")?;

    let consumer = events::spawn_sync_consumer(
        event_receiver,
        Arc::clone(&services.sync),
        Arc::clone(&pool),
    );

    let outbox_worker = outbox::spawn_worker(
        Arc::clone(&pool),
        Arc::clone(&services.sync),
        outbox::OutboxConfig {
            poll_interval: Duration::from_millis(config.outbox_poll_interval_ms),
            batch_size: config.outbox_batch_size,
            max_attempts: config.outbox_max_attempts,
        },
    );

    info!("Fulfillment worker started; waiting for shutdown signal");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("Shutdown signal received; stopping workers");
    consumer.abort();
    outbox_worker.abort();

    Ok(())
}
