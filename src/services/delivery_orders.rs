//! Quantity reconciliation engine.
//!
//! A delivery order ships against the detail lines of one sales order,
//! moving quantity from `residual_qty` to `sent_qty` line by line and
//! re-deriving line and order statuses. Deleting a delivery order
//! reverses the movement exactly. Order-level status is always recomputed
//! from the complete detail set, never accumulated incrementally.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::documents::DeliveryOrderDocument;
use crate::entities::{
    delivery_order::{self, Entity as DeliveryOrderEntity},
    delivery_order_detail::{self, Entity as DeliveryOrderDetailEntity},
    sales_order::{self, Entity as SalesOrderEntity},
    sales_order_detail::{self, Entity as SalesOrderDetailEntity},
};
use crate::errors::ServiceError;
use crate::events::{outbox, Event, EventSender};
use crate::lookups::LookupService;
use crate::services::audit::{AuditAction, DocumentLogService};
use crate::services::sync::{ChangeKind, ReadModelSyncService, SyncAggregate};
use crate::status::{derive_line_status, derive_order_status, StatusName, StatusRegistry, StatusScope};

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateDeliveryOrderRequest {
    pub sales_order_id: i64,
    pub warehouse_id: i64,
    pub order_date: NaiveDate,
    pub reference_code: Option<String>,
    pub driver_name: Option<String>,
    pub plate_number: Option<String>,
    pub note: Option<String>,
    #[validate(length(min = 1, message = "At least one detail line is required"))]
    pub details: Vec<DeliveryOrderLineRequest>,
}

impl CreateDeliveryOrderRequest {
    fn validate_lines(&self) -> Result<(), ServiceError> {
        self.validate()?;
        for line in &self.details {
            line.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct DeliveryOrderLineRequest {
    pub so_detail_id: i64,
    #[validate(range(min = 1, message = "Shipped quantity must be positive"))]
    pub qty: i32,
    pub note: Option<String>,
}

/// Field-level header update. Changing quantities is not possible here;
/// see [`DeliveryOrderService::update_delivery_order`].
#[derive(Debug, Default, Serialize, Deserialize, Validate)]
pub struct UpdateDeliveryOrderRequest {
    pub warehouse_id: Option<i64>,
    pub order_date: Option<NaiveDate>,
    pub reference_code: Option<String>,
    pub driver_name: Option<String>,
    pub plate_number: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize, Validate)]
pub struct UpdateDeliveryOrderDetailRequest {
    #[validate(range(min = 1, message = "Shipped quantity must be positive"))]
    pub qty: Option<i32>,
    pub note: Option<String>,
}

/// Identity-and-timestamp tombstone returned by the delete path and
/// carried on the delete event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryOrderTombstone {
    pub id: i64,
    pub sales_order_id: i64,
    pub code: String,
    pub deleted_at: chrono::DateTime<Utc>,
}

#[derive(Clone)]
pub struct DeliveryOrderService {
    db: Arc<DatabaseConnection>,
    lookups: LookupService,
    statuses: Arc<StatusRegistry>,
    sync: Arc<ReadModelSyncService>,
    audit: DocumentLogService,
    event_sender: Option<EventSender>,
}

impl DeliveryOrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        lookups: LookupService,
        statuses: Arc<StatusRegistry>,
        sync: Arc<ReadModelSyncService>,
        event_sender: Option<EventSender>,
    ) -> Self {
        Self {
            db,
            lookups,
            statuses,
            sync,
            audit: DocumentLogService::new(),
            event_sender,
        }
    }

    /// Creates a delivery order against a sales order, reconciling each
    /// referenced sales-order detail line.
    ///
    /// Lines are processed sequentially; the first failure aborts the
    /// transaction and nothing is written. The sales-order status is
    /// recomputed from all of its non-deleted details, not just the lines
    /// touched by this request.
    #[instrument(skip(self, request), fields(sales_order_id = request.sales_order_id))]
    pub async fn create_delivery_order(
        &self,
        request: CreateDeliveryOrderRequest,
    ) -> Result<DeliveryOrderDocument, ServiceError> {
        request.validate_lines()?;

        let db = &*self.db;
        let now = Utc::now();

        let sales_order = SalesOrderEntity::find_by_id(request.sales_order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("sales order", request.sales_order_id))?;
        if sales_order.is_deleted() {
            return Err(ServiceError::InvalidOperation(format!(
                "sales order {} is deleted",
                sales_order.code
            )));
        }

        // Resolve reference data before opening the transaction; a lookup
        // failure must not hold a write transaction open.
        let refs = self
            .lookups
            .fulfillment_refs(
                sales_order.agent_id,
                sales_order.store_id,
                request.warehouse_id,
            )
            .await?;

        let txn = db.begin().await?;

        let sequence = DeliveryOrderEntity::find()
            .filter(delivery_order::Column::SalesOrderId.eq(sales_order.id))
            .count(&txn)
            .await?
            + 1;
        let code = format!("DO/{}/{}-{}", refs.agent.code, sales_order.id, sequence);

        let order = delivery_order::ActiveModel {
            code: Set(code),
            sales_order_id: Set(sales_order.id),
            agent_id: Set(sales_order.agent_id),
            store_id: Set(sales_order.store_id),
            warehouse_id: Set(request.warehouse_id),
            order_date: Set(request.order_date),
            reference_code: Set(request.reference_code.clone()),
            driver_name: Set(request.driver_name.clone()),
            plate_number: Set(request.plate_number.clone()),
            status_id: Set(self.statuses.id(StatusScope::DeliveryOrder, StatusName::Open)),
            note: Set(request.note.clone()),
            is_synced: Set(false),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let mut details = Vec::with_capacity(request.details.len());
        for line in &request.details {
            let detail = self
                .reconcile_line(&txn, &sales_order, &order, line, now)
                .await?;
            details.push(detail);
        }

        let order_status = self.recompute_sales_order_status(&txn, &sales_order, now).await?;

        self.audit
            .record(
                &txn,
                AuditAction::Insert,
                "delivery_order",
                order.id,
                &serde_json::json!({ "order": &order, "details": &details }),
            )
            .await?;

        txn.commit().await?;

        info!(
            delivery_order_id = order.id,
            code = %order.code,
            lines = details.len(),
            sales_order_status = %order_status,
            "Delivery order created"
        );

        let document = self
            .finalize(SyncAggregate::DeliveryOrder, order.id, ChangeKind::Created)
            .await?;

        self.emit(Event::DeliveryOrderCreated {
            id: order.id,
            sales_order_id: order.sales_order_id,
            snapshot: Box::new(document.clone()),
        })
        .await;

        Ok(document)
    }

    /// Applies one request line: moves quantity from residual to sent on
    /// the sales-order detail and persists the new delivery-order detail.
    async fn reconcile_line(
        &self,
        txn: &sea_orm::DatabaseTransaction,
        sales_order: &sales_order::Model,
        order: &delivery_order::Model,
        line: &DeliveryOrderLineRequest,
        now: chrono::DateTime<Utc>,
    ) -> Result<delivery_order_detail::Model, ServiceError> {
        let so_detail = SalesOrderDetailEntity::find_by_id(line.so_detail_id)
            .one(txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("sales order detail", line.so_detail_id))?;

        if so_detail.sales_order_id != sales_order.id {
            return Err(ServiceError::InvalidOperation(format!(
                "sales order detail {} does not belong to sales order {}",
                so_detail.id, sales_order.code
            )));
        }
        if so_detail.is_deleted() {
            return Err(ServiceError::InvalidOperation(format!(
                "sales order detail {} is deleted",
                so_detail.id
            )));
        }
        if so_detail.residual_qty < line.qty {
            return Err(ServiceError::InsufficientResidual(format!(
                "sales order detail {} has {} remaining, requested {}",
                so_detail.id, so_detail.residual_qty, line.qty
            )));
        }

        let sent_qty = so_detail.sent_qty + line.qty;
        let residual_qty = so_detail.residual_qty - line.qty;
        let line_status = derive_line_status(sent_qty, residual_qty);

        let product_id = so_detail.product_id;
        let uom_id = so_detail.uom_id;

        let mut active: sales_order_detail::ActiveModel = so_detail.into();
        active.sent_qty = Set(sent_qty);
        active.residual_qty = Set(residual_qty);
        active.status_id = Set(self.statuses.id(StatusScope::SalesOrderDetail, line_status));
        active.updated_at = Set(Some(now));
        active.update(txn).await?;

        let detail_code = format!(
            "{}/{}-{}-{}",
            order.code, order.agent_id, product_id, uom_id
        );
        let detail = delivery_order_detail::ActiveModel {
            code: Set(detail_code),
            delivery_order_id: Set(order.id),
            so_detail_id: Set(line.so_detail_id),
            product_id: Set(product_id),
            uom_id: Set(uom_id),
            qty: Set(line.qty),
            note: Set(line.note.clone()),
            status_id: Set(self
                .statuses
                .id(StatusScope::DeliveryOrderDetail, StatusName::Open)),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(txn)
        .await?;

        Ok(detail)
    }

    /// Recomputes and persists the sales-order status from the complete
    /// non-deleted detail set. This is the single point where order-level
    /// status is derived.
    async fn recompute_sales_order_status(
        &self,
        txn: &sea_orm::DatabaseTransaction,
        sales_order: &sales_order::Model,
        now: chrono::DateTime<Utc>,
    ) -> Result<StatusName, ServiceError> {
        let all_details = SalesOrderDetailEntity::find()
            .filter(sales_order_detail::Column::SalesOrderId.eq(sales_order.id))
            .filter(sales_order_detail::Column::DeletedAt.is_null())
            .all(txn)
            .await?;

        let status = derive_order_status(
            all_details
                .iter()
                .map(|d| (d.sent_qty, d.residual_qty)),
        );

        let mut active: sales_order::ActiveModel = sales_order.clone().into();
        active.status_id = Set(self.statuses.id(StatusScope::SalesOrder, status));
        active.updated_at = Set(Some(now));
        active.update(txn).await?;

        Ok(status)
    }

    /// Deletes a delivery order, reversing its effect on every
    /// sales-order detail it shipped against (round-trip law: quantities
    /// return to their pre-create values).
    #[instrument(skip(self), fields(delivery_order_id = id))]
    pub async fn delete_delivery_order(
        &self,
        id: i64,
    ) -> Result<DeliveryOrderTombstone, ServiceError> {
        let db = &*self.db;
        let now = Utc::now();

        let order = DeliveryOrderEntity::find_by_id(id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("delivery order", id))?;
        if order.is_deleted() {
            return Err(ServiceError::InvalidOperation(format!(
                "delivery order {} is already deleted",
                order.code
            )));
        }

        let sales_order = SalesOrderEntity::find_by_id(order.sales_order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("sales order", order.sales_order_id))?;

        let txn = db.begin().await?;

        let details = DeliveryOrderDetailEntity::find()
            .filter(delivery_order_detail::Column::DeliveryOrderId.eq(order.id))
            .filter(delivery_order_detail::Column::DeletedAt.is_null())
            .all(&txn)
            .await?;

        for detail in details {
            let so_detail = SalesOrderDetailEntity::find_by_id(detail.so_detail_id)
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::not_found("sales order detail", detail.so_detail_id)
                })?;

            let sent_qty = so_detail.sent_qty - detail.qty;
            let residual_qty = so_detail.residual_qty + detail.qty;
            let line_status = derive_line_status(sent_qty, residual_qty);

            let mut active: sales_order_detail::ActiveModel = so_detail.into();
            active.sent_qty = Set(sent_qty);
            active.residual_qty = Set(residual_qty);
            active.status_id = Set(self.statuses.id(StatusScope::SalesOrderDetail, line_status));
            active.updated_at = Set(Some(now));
            active.update(&txn).await?;

            let mut active: delivery_order_detail::ActiveModel = detail.into();
            active.deleted_at = Set(Some(now));
            active.status_id = Set(self
                .statuses
                .id(StatusScope::DeliveryOrderDetail, StatusName::Cancelled));
            active.updated_at = Set(Some(now));
            active.update(&txn).await?;
        }

        let order_status = self.recompute_sales_order_status(&txn, &sales_order, now).await?;

        let mut active: delivery_order::ActiveModel = order.clone().into();
        active.deleted_at = Set(Some(now));
        active.status_id = Set(self
            .statuses
            .id(StatusScope::DeliveryOrder, StatusName::Cancelled));
        active.updated_at = Set(Some(now));
        active.update(&txn).await?;

        let tombstone = DeliveryOrderTombstone {
            id: order.id,
            sales_order_id: order.sales_order_id,
            code: order.code.clone(),
            deleted_at: now,
        };

        self.audit
            .record(
                &txn,
                AuditAction::Delete,
                "delivery_order",
                order.id,
                &tombstone,
            )
            .await?;

        txn.commit().await?;

        info!(
            delivery_order_id = order.id,
            code = %order.code,
            sales_order_status = %order_status,
            "Delivery order deleted and quantities reversed"
        );

        self.finalize(SyncAggregate::DeliveryOrder, order.id, ChangeKind::Deleted)
            .await?;

        self.emit(Event::DeliveryOrderDeleted {
            id: tombstone.id,
            sales_order_id: tombstone.sales_order_id,
            code: tombstone.code.clone(),
            deleted_at: tombstone.deleted_at,
        })
        .await;

        Ok(tombstone)
    }

    /// Field-level update of the header's mutable attributes.
    ///
    /// Deliberately does not re-run quantity reconciliation: editing a
    /// delivery order never touches the parent sales-order quantities.
    /// Quantity correction requires delete + recreate.
    #[instrument(skip(self, request), fields(delivery_order_id = id))]
    pub async fn update_delivery_order(
        &self,
        id: i64,
        request: UpdateDeliveryOrderRequest,
    ) -> Result<DeliveryOrderDocument, ServiceError> {
        request.validate()?;

        let db = &*self.db;
        let now = Utc::now();

        let order = DeliveryOrderEntity::find_by_id(id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("delivery order", id))?;
        if order.is_deleted() {
            return Err(ServiceError::InvalidOperation(format!(
                "delivery order {} is deleted",
                order.code
            )));
        }

        if let Some(warehouse_id) = request.warehouse_id {
            self.lookups.warehouse(warehouse_id).await?;
        }

        let txn = db.begin().await?;

        let mut active: delivery_order::ActiveModel = order.clone().into();
        if let Some(warehouse_id) = request.warehouse_id {
            active.warehouse_id = Set(warehouse_id);
        }
        if let Some(order_date) = request.order_date {
            active.order_date = Set(order_date);
        }
        if let Some(reference_code) = request.reference_code {
            active.reference_code = Set(Some(reference_code));
        }
        if let Some(driver_name) = request.driver_name {
            active.driver_name = Set(Some(driver_name));
        }
        if let Some(plate_number) = request.plate_number {
            active.plate_number = Set(Some(plate_number));
        }
        if let Some(note) = request.note {
            active.note = Set(Some(note));
        }
        active.updated_at = Set(Some(now));
        let updated = active.update(&txn).await?;

        self.audit
            .record(
                &txn,
                AuditAction::Update,
                "delivery_order",
                updated.id,
                &updated,
            )
            .await?;

        txn.commit().await?;

        let document = self
            .finalize(SyncAggregate::DeliveryOrder, updated.id, ChangeKind::Updated)
            .await?;

        self.emit(Event::DeliveryOrderUpdated {
            id: updated.id,
            sales_order_id: updated.sales_order_id,
            snapshot: Box::new(document.clone()),
        })
        .await;

        Ok(document)
    }

    /// Field-level update of one delivery-order detail line.
    ///
    /// A quantity edit here deliberately does not adjust the parent
    /// sales-order detail's `sent_qty`/`residual_qty`; relying on it for
    /// correction workflows will drift the two apart. Delete and recreate
    /// the delivery order to correct shipped quantities.
    #[instrument(skip(self, request), fields(detail_id = detail_id))]
    pub async fn update_delivery_order_detail(
        &self,
        detail_id: i64,
        request: UpdateDeliveryOrderDetailRequest,
    ) -> Result<DeliveryOrderDocument, ServiceError> {
        request.validate()?;

        let db = &*self.db;
        let now = Utc::now();

        let detail = DeliveryOrderDetailEntity::find_by_id(detail_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("delivery order detail", detail_id))?;
        if detail.is_deleted() {
            return Err(ServiceError::InvalidOperation(format!(
                "delivery order detail {} is deleted",
                detail.id
            )));
        }

        let order = DeliveryOrderEntity::find_by_id(detail.delivery_order_id)
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::not_found("delivery order", detail.delivery_order_id)
            })?;
        if order.is_deleted() {
            return Err(ServiceError::InvalidOperation(format!(
                "delivery order {} is deleted",
                order.code
            )));
        }

        let txn = db.begin().await?;

        let mut active: delivery_order_detail::ActiveModel = detail.into();
        if let Some(qty) = request.qty {
            active.qty = Set(qty);
        }
        if let Some(note) = request.note {
            active.note = Set(Some(note));
        }
        active.updated_at = Set(Some(now));
        let updated = active.update(&txn).await?;

        self.audit
            .record(
                &txn,
                AuditAction::Update,
                "delivery_order_detail",
                updated.id,
                &updated,
            )
            .await?;

        txn.commit().await?;

        let document = self
            .finalize(SyncAggregate::DeliveryOrder, order.id, ChangeKind::Updated)
            .await?;

        self.emit(Event::DeliveryOrderUpdated {
            id: order.id,
            sales_order_id: order.sales_order_id,
            snapshot: Box::new(document.clone()),
        })
        .await;

        Ok(document)
    }

    /// Fetches the enriched delivery-order aggregate.
    pub async fn get_delivery_order(
        &self,
        id: i64,
    ) -> Result<DeliveryOrderDocument, ServiceError> {
        self.sync.assemble_delivery_order_by_id(id).await
    }

    /// Lists delivery-order documents from the search index.
    pub async fn list_delivery_orders(
        &self,
        filter: &crate::search::SearchFilter,
    ) -> Result<crate::search::SearchPage<DeliveryOrderDocument>, ServiceError> {
        self.sync_index().query_delivery_orders(filter).await
    }

    fn sync_index(&self) -> Arc<dyn crate::search::SearchIndex> {
        self.sync.index()
    }

    /// Synchronizes the read model after a commit. A retryable failure is
    /// queued on the outbox and the response is served from relational
    /// state; the committed write is never rolled back by a sync failure.
    async fn finalize(
        &self,
        aggregate: SyncAggregate,
        id: i64,
        kind: ChangeKind,
    ) -> Result<DeliveryOrderDocument, ServiceError> {
        match self.sync.sync_delivery_order(id, kind).await {
            Ok(document) => Ok(document),
            Err(e) if e.is_retryable() => {
                warn!(
                    aggregate = %aggregate,
                    aggregate_id = id,
                    error = %e,
                    "Read-model sync failed after commit; queueing retry"
                );
                outbox::enqueue(&*self.db, aggregate, id, kind).await?;
                self.sync.assemble_delivery_order_by_id(id).await
            }
            Err(e) => Err(e),
        }
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            let name = event.name();
            if let Err(e) = sender.send(event).await {
                warn!(event = name, error = %e, "Failed to publish event");
            }
        }
    }
}
