// Core engines
pub mod delivery_orders;
pub mod sales_orders;
pub mod sync;

// Supporting services
pub mod audit;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::errors::ServiceError;
use crate::events::EventSender;
use crate::lookups::LookupService;
use crate::search::SearchIndex;
use crate::status::StatusRegistry;

/// Wired service set sharing one pool, index, status registry and event
/// channel.
#[derive(Clone)]
pub struct AppServices {
    pub sales_orders: Arc<sales_orders::SalesOrderService>,
    pub delivery_orders: Arc<delivery_orders::DeliveryOrderService>,
    pub sync: Arc<sync::ReadModelSyncService>,
    pub lookups: LookupService,
    pub statuses: Arc<StatusRegistry>,
}

impl AppServices {
    /// Loads the status registry and wires every service.
    pub async fn build(
        db: Arc<DatabaseConnection>,
        index: Arc<dyn SearchIndex>,
        event_sender: Option<EventSender>,
    ) -> Result<Self, ServiceError> {
        let statuses = Arc::new(StatusRegistry::load(&*db).await?);
        let lookups = LookupService::new(Arc::clone(&db));
        let sync = Arc::new(sync::ReadModelSyncService::new(
            Arc::clone(&db),
            index,
            lookups.clone(),
            Arc::clone(&statuses),
        ));

        let sales_orders = Arc::new(sales_orders::SalesOrderService::new(
            Arc::clone(&db),
            lookups.clone(),
            Arc::clone(&statuses),
            Arc::clone(&sync),
            event_sender.clone(),
        ));
        let delivery_orders = Arc::new(delivery_orders::DeliveryOrderService::new(
            Arc::clone(&db),
            lookups.clone(),
            Arc::clone(&statuses),
            Arc::clone(&sync),
            event_sender,
        ));

        Ok(Self {
            sales_orders,
            delivery_orders,
            sync,
            lookups,
            statuses,
        })
    }
}
