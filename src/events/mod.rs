use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::documents::{DeliveryOrderDocument, SalesOrderDocument};
use crate::errors::ServiceError;
use crate::services::sync::{ChangeKind, ReadModelSyncService, SyncAggregate};

pub mod outbox;

// Define the events emitted after each committed aggregate mutation.
// Create/update events carry the full mutated aggregate; delete events
// carry only identity and timestamps so the payload stays small.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    SalesOrderCreated {
        id: i64,
        snapshot: Box<SalesOrderDocument>,
    },
    SalesOrderUpdated {
        id: i64,
        snapshot: Box<SalesOrderDocument>,
    },
    SalesOrderDeleted {
        id: i64,
        code: String,
        deleted_at: DateTime<Utc>,
    },
    DeliveryOrderCreated {
        id: i64,
        sales_order_id: i64,
        snapshot: Box<DeliveryOrderDocument>,
    },
    DeliveryOrderUpdated {
        id: i64,
        sales_order_id: i64,
        snapshot: Box<DeliveryOrderDocument>,
    },
    DeliveryOrderDeleted {
        id: i64,
        sales_order_id: i64,
        code: String,
        deleted_at: DateTime<Utc>,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::SalesOrderCreated { .. } => "SalesOrderCreated",
            Event::SalesOrderUpdated { .. } => "SalesOrderUpdated",
            Event::SalesOrderDeleted { .. } => "SalesOrderDeleted",
            Event::DeliveryOrderCreated { .. } => "DeliveryOrderCreated",
            Event::DeliveryOrderUpdated { .. } => "DeliveryOrderUpdated",
            Event::DeliveryOrderDeleted { .. } => "DeliveryOrderDeleted",
        }
    }

    /// The synchronization this event maps to when consumed out-of-band.
    pub fn sync_target(&self) -> (SyncAggregate, i64, ChangeKind) {
        match self {
            Event::SalesOrderCreated { id, .. } => {
                (SyncAggregate::SalesOrder, *id, ChangeKind::Created)
            }
            Event::SalesOrderUpdated { id, .. } => {
                (SyncAggregate::SalesOrder, *id, ChangeKind::Updated)
            }
            Event::SalesOrderDeleted { id, .. } => {
                (SyncAggregate::SalesOrder, *id, ChangeKind::Deleted)
            }
            Event::DeliveryOrderCreated { id, .. } => {
                (SyncAggregate::DeliveryOrder, *id, ChangeKind::Created)
            }
            Event::DeliveryOrderUpdated { id, .. } => {
                (SyncAggregate::DeliveryOrder, *id, ChangeKind::Updated)
            }
            Event::DeliveryOrderDeleted { id, .. } => {
                (SyncAggregate::DeliveryOrder, *id, ChangeKind::Deleted)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Publishes an event to the in-process channel.
    pub async fn send(&self, event: Event) -> Result<(), ServiceError> {
        let name = event.name();
        self.sender.send(event).await.map_err(|_| {
            ServiceError::EventError(format!("channel closed before {name} was published"))
        })
    }
}

/// Builds the in-process event channel.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

/// Consumes events and re-drives the synchronization engine from them.
///
/// This is the out-of-band sync path. The write services already sync
/// directly after commit; replaying the same aggregate here is harmless
/// because re-indexing is idempotent per business code. A sync that fails
/// in the consumer is queued on the outbox like any other.
pub fn spawn_sync_consumer(
    mut receiver: mpsc::Receiver<Event>,
    sync: Arc<ReadModelSyncService>,
    db: Arc<DatabaseConnection>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            let (aggregate, id, kind) = event.sync_target();
            info!(event = event.name(), aggregate_id = id, "Consuming event");
            if let Err(e) = sync.apply(aggregate, id, kind).await {
                error!(
                    event = event.name(),
                    aggregate_id = id,
                    error = %e,
                    "Event-driven sync failed"
                );
                if let Err(e) = outbox::enqueue(&*db, aggregate, id, kind).await {
                    warn!(aggregate_id = id, error = %e, "Failed to queue sync retry");
                }
            }
        }
        info!("Event channel closed; sync consumer stopping");
    })
}
