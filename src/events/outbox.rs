//! Durable retry queue for read-model synchronization.
//!
//! A failed sync after a committed relational write must not stay
//! silently stale: the failure is recorded in the `sync_outbox` table and
//! a background worker replays it with exponential backoff until it
//! delivers or exhausts its attempts.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::entities::sync_outbox::{self, Entity as SyncOutboxEntity};
use crate::errors::ServiceError;
use crate::services::sync::{ChangeKind, ReadModelSyncService, SyncAggregate};

const BASE_BACKOFF_SECS: u64 = 2; // exponential backoff base

#[derive(Debug, Clone, Copy)]
pub enum OutboxStatus {
    Pending,
    Processing,
    Delivered,
    Failed,
}

impl OutboxStatus {
    fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processing => "processing",
            OutboxStatus::Delivered => "delivered",
            OutboxStatus::Failed => "failed",
        }
    }
}

/// Worker cadence and bounds, derived from `AppConfig`.
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    pub poll_interval: Duration,
    pub batch_size: u64,
    pub max_attempts: i32,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            batch_size: 50,
            max_attempts: 8,
        }
    }
}

/// Records a failed synchronization for later replay.
pub async fn enqueue(
    db: &impl ConnectionTrait,
    aggregate: SyncAggregate,
    aggregate_id: i64,
    kind: ChangeKind,
) -> Result<(), ServiceError> {
    let now = Utc::now();
    let row = sync_outbox::ActiveModel {
        aggregate_type: Set(aggregate.to_string()),
        aggregate_id: Set(aggregate_id),
        change_kind: Set(kind.to_string()),
        status: Set(OutboxStatus::Pending.as_str().to_string()),
        attempts: Set(0),
        available_at: Set(now),
        created_at: Set(now),
        ..Default::default()
    };
    let inserted = row.insert(db).await?;
    info!(
        outbox_id = inserted.id,
        aggregate = %aggregate,
        aggregate_id,
        kind = %kind,
        "Queued sync retry"
    );
    Ok(())
}

/// Background worker that drains the outbox until the process stops.
pub fn spawn_worker(
    db: Arc<DatabaseConnection>,
    sync: Arc<ReadModelSyncService>,
    config: OutboxConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(e) = drain_once(&db, &sync, &config).await {
                error!(error = %e, "Outbox worker pass failed");
            }
            sleep(config.poll_interval).await;
        }
    })
}

/// Replays one batch of due outbox rows. Returns how many were claimed.
pub async fn drain_once(
    db: &DatabaseConnection,
    sync: &ReadModelSyncService,
    config: &OutboxConfig,
) -> Result<usize, ServiceError> {
    let now = Utc::now();
    let due = SyncOutboxEntity::find()
        .filter(sync_outbox::Column::Status.eq(OutboxStatus::Pending.as_str()))
        .filter(sync_outbox::Column::AvailableAt.lte(now))
        .order_by_asc(sync_outbox::Column::CreatedAt)
        .limit(config.batch_size)
        .all(db)
        .await?;

    let claimed = due.len();
    for row in due {
        let attempts = row.attempts + 1;
        let row_id = row.id;

        let mut active: sync_outbox::ActiveModel = row.clone().into();
        active.status = Set(OutboxStatus::Processing.as_str().to_string());
        active.attempts = Set(attempts);
        active.updated_at = Set(Some(Utc::now()));
        let row = active.update(db).await?;

        let result = match (
            row.aggregate_type.parse::<SyncAggregate>(),
            row.change_kind.parse::<ChangeKind>(),
        ) {
            (Ok(aggregate), Ok(kind)) => sync.apply(aggregate, row.aggregate_id, kind).await,
            _ => Err(ServiceError::InternalError(format!(
                "unrecognized outbox row: {} {}",
                row.aggregate_type, row.change_kind
            ))),
        };

        let mut active: sync_outbox::ActiveModel = row.into();
        match result {
            Ok(()) => {
                active.status = Set(OutboxStatus::Delivered.as_str().to_string());
                active.processed_at = Set(Some(Utc::now()));
                active.last_error = Set(None);
                debug!(outbox_id = row_id, "Outbox sync delivered");
            }
            Err(e) if e.is_retryable() && attempts < config.max_attempts => {
                let backoff = BASE_BACKOFF_SECS.saturating_pow(attempts as u32);
                active.status = Set(OutboxStatus::Pending.as_str().to_string());
                active.available_at = Set(Utc::now() + ChronoDuration::seconds(backoff as i64));
                active.last_error = Set(Some(e.to_string()));
                warn!(
                    outbox_id = row_id,
                    attempts,
                    backoff_secs = backoff,
                    error = %e,
                    "Outbox sync failed; retrying"
                );
            }
            Err(e) => {
                active.status = Set(OutboxStatus::Failed.as_str().to_string());
                active.last_error = Set(Some(e.to_string()));
                error!(
                    outbox_id = row_id,
                    attempts,
                    error = %e,
                    "Outbox sync abandoned"
                );
            }
        }
        active.updated_at = Set(Some(Utc::now()));
        active.update(db).await?;
    }

    Ok(claimed)
}
