//! Sales-order write path.
//!
//! Creates the aggregate the reconciliation engine ships against. Detail
//! lines start with `residual_qty == qty` and `sent_qty == 0`; statuses
//! start open. Every mutation records an audit entry inside its
//! transaction, emits an event and synchronizes the read model.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::documents::SalesOrderDocument;
use crate::entities::{
    sales_order::{self, Entity as SalesOrderEntity},
    sales_order_detail::{self, Entity as SalesOrderDetailEntity},
};
use crate::errors::ServiceError;
use crate::events::{outbox, Event, EventSender};
use crate::lookups::LookupService;
use crate::search::{SearchFilter, SearchPage};
use crate::services::audit::{AuditAction, DocumentLogService};
use crate::services::sync::{ChangeKind, ReadModelSyncService, SyncAggregate};
use crate::status::{StatusName, StatusRegistry, StatusScope};

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateSalesOrderRequest {
    pub agent_id: i64,
    pub store_id: i64,
    pub brand_id: Option<i64>,
    pub user_id: Option<i64>,
    pub salesman_id: Option<i64>,
    pub order_source_id: Option<i64>,
    pub order_date: NaiveDate,
    pub note: Option<String>,
    #[validate(length(min = 1, message = "At least one detail line is required"))]
    pub details: Vec<SalesOrderLineRequest>,
}

impl CreateSalesOrderRequest {
    fn validate_lines(&self) -> Result<(), ServiceError> {
        self.validate()?;
        for line in &self.details {
            line.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct SalesOrderLineRequest {
    pub product_id: i64,
    pub uom_id: i64,
    #[validate(range(min = 1, message = "Ordered quantity must be positive"))]
    pub qty: i32,
    pub price: Decimal,
    pub note: Option<String>,
}

/// Field-level header update; detail lines and quantities are immutable
/// after creation.
#[derive(Debug, Default, Serialize, Deserialize, Validate)]
pub struct UpdateSalesOrderRequest {
    pub order_date: Option<NaiveDate>,
    pub salesman_id: Option<i64>,
    pub order_source_id: Option<i64>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalesOrderTombstone {
    pub id: i64,
    pub code: String,
    pub deleted_at: chrono::DateTime<Utc>,
}

#[derive(Clone)]
pub struct SalesOrderService {
    db: Arc<DatabaseConnection>,
    lookups: LookupService,
    statuses: Arc<StatusRegistry>,
    sync: Arc<ReadModelSyncService>,
    audit: DocumentLogService,
    event_sender: Option<EventSender>,
}

impl SalesOrderService {
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

    /// Creates a sales order with its detail lines in one transaction.
    #[instrument(skip(self, request), fields(agent_id = request.agent_id, store_id = request.store_id))]
    pub async fn create_sales_order(
        &self,
        request: CreateSalesOrderRequest,
    ) -> Result<SalesOrderDocument, ServiceError> {
        request.validate_lines()?;

        let db = &*self.db;
        let now = Utc::now();

        // Resolve references up front; every id in the request must exist.
        let (agent, _store) = tokio::try_join!(
            self.lookups.agent(request.agent_id),
            self.lookups.store(request.store_id),
        )?;
        let detail_refs = self
            .lookups
            .detail_refs(
                request.details.iter().map(|l| l.product_id),
                request.details.iter().map(|l| l.uom_id),
            )
            .await?;

        let txn = db.begin().await?;

        let sequence = SalesOrderEntity::find()
            .filter(sales_order::Column::AgentId.eq(request.agent_id))
            .count(&txn)
            .await?
            + 1;
        let code = format!("SO/{}/{}", agent.code, sequence);

        let total: Decimal = request
            .details
            .iter()
            .map(|l| l.price * Decimal::from(l.qty))
            .sum();

        let order = sales_order::ActiveModel {
            code: Set(code),
            agent_id: Set(request.agent_id),
            store_id: Set(request.store_id),
            brand_id: Set(request.brand_id),
            user_id: Set(request.user_id),
            salesman_id: Set(request.salesman_id),
            order_source_id: Set(request.order_source_id),
            order_date: Set(request.order_date),
            status_id: Set(self.statuses.id(StatusScope::SalesOrder, StatusName::Open)),
            total: Set(total),
            note: Set(request.note.clone()),
            is_synced: Set(false),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let mut details = Vec::with_capacity(request.details.len());
        for (position, line) in request.details.iter().enumerate() {
            // Existence was checked by the lookup batch above.
            detail_refs.product(line.product_id)?;
            detail_refs.uom(line.uom_id)?;

            let detail = sales_order_detail::ActiveModel {
                code: Set(format!("{}/{}", order.code, position + 1)),
                sales_order_id: Set(order.id),
                product_id: Set(line.product_id),
                uom_id: Set(line.uom_id),
                qty: Set(line.qty),
                sent_qty: Set(0),
                residual_qty: Set(line.qty),
                price: Set(line.price),
                total: Set(line.price * Decimal::from(line.qty)),
                note: Set(line.note.clone()),
                status_id: Set(self
                    .statuses
                    .id(StatusScope::SalesOrderDetail, StatusName::Open)),
                created_at: Set(now),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
            details.push(detail);
        }

        self.audit
            .record(
                &txn,
                AuditAction::Insert,
                "sales_order",
                order.id,
                &serde_json::json!({ "order": &order, "details": &details }),
            )
            .await?;

        txn.commit().await?;

        info!(
            sales_order_id = order.id,
            code = %order.code,
            lines = details.len(),
            "Sales order created"
        );

        let document = self
            .finalize(order.id, ChangeKind::Created)
            .await?;

        self.emit(Event::SalesOrderCreated {
            id: order.id,
            snapshot: Box::new(document.clone()),
        })
        .await;

        Ok(document)
    }

    /// Field-level update of the header's mutable attributes.
    #[instrument(skip(self, request), fields(sales_order_id = id))]
    pub async fn update_sales_order(
        &self,
        id: i64,
        request: UpdateSalesOrderRequest,
    ) -> Result<SalesOrderDocument, ServiceError> {
        request.validate()?;

        let db = &*self.db;
        let now = Utc::now();

        let order = SalesOrderEntity::find_by_id(id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("sales order", id))?;
        if order.is_deleted() {
            return Err(ServiceError::InvalidOperation(format!(
                "sales order {} is deleted",
                order.code
            )));
        }

        if let Some(salesman_id) = request.salesman_id {
            self.lookups.salesman(salesman_id).await?;
        }
        if let Some(order_source_id) = request.order_source_id {
            self.lookups.order_source(order_source_id).await?;
        }

        let txn = db.begin().await?;

        let mut active: sales_order::ActiveModel = order.into();
        if let Some(order_date) = request.order_date {
            active.order_date = Set(order_date);
        }
        if let Some(salesman_id) = request.salesman_id {
            active.salesman_id = Set(Some(salesman_id));
        }
        if let Some(order_source_id) = request.order_source_id {
            active.order_source_id = Set(Some(order_source_id));
        }
        if let Some(note) = request.note {
            active.note = Set(Some(note));
        }
        active.updated_at = Set(Some(now));
        let updated = active.update(&txn).await?;

        self.audit
            .record(&txn, AuditAction::Update, "sales_order", updated.id, &updated)
            .await?;

        txn.commit().await?;

        let document = self
            .finalize(updated.id, ChangeKind::Updated)
            .await?;

        self.emit(Event::SalesOrderUpdated {
            id: updated.id,
            snapshot: Box::new(document.clone()),
        })
        .await;

        Ok(document)
    }

    /// Soft-deletes a sales order and its detail lines.
    ///
    /// Rejected while any detail has shipped quantity; the delivery
    /// orders must be deleted (reversing their shipments) first.
    #[instrument(skip(self), fields(sales_order_id = id))]
    pub async fn delete_sales_order(&self, id: i64) -> Result<SalesOrderTombstone, ServiceError> {
        let db = &*self.db;
        let now = Utc::now();

        let order = SalesOrderEntity::find_by_id(id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("sales order", id))?;
        if order.is_deleted() {
            return Err(ServiceError::InvalidOperation(format!(
                "sales order {} is already deleted",
                order.code
            )));
        }

        let details = SalesOrderDetailEntity::find()
            .filter(sales_order_detail::Column::SalesOrderId.eq(id))
            .filter(sales_order_detail::Column::DeletedAt.is_null())
            .all(db)
            .await?;
        if details.iter().any(|d| d.sent_qty > 0) {
            return Err(ServiceError::InvalidOperation(format!(
                "sales order {} has shipped quantity; delete its delivery orders first",
                order.code
            )));
        }

        let txn = db.begin().await?;

        for detail in details {
            let mut active: sales_order_detail::ActiveModel = detail.into();
            active.deleted_at = Set(Some(now));
            active.status_id = Set(self
                .statuses
                .id(StatusScope::SalesOrderDetail, StatusName::Cancelled));
            active.updated_at = Set(Some(now));
            active.update(&txn).await?;
        }

        let mut active: sales_order::ActiveModel = order.clone().into();
        active.deleted_at = Set(Some(now));
        active.status_id = Set(self.statuses.id(StatusScope::SalesOrder, StatusName::Cancelled));
        active.updated_at = Set(Some(now));
        active.update(&txn).await?;

        let tombstone = SalesOrderTombstone {
            id: order.id,
            code: order.code.clone(),
            deleted_at: now,
        };

        self.audit
            .record(&txn, AuditAction::Delete, "sales_order", order.id, &tombstone)
            .await?;

        txn.commit().await?;

        info!(sales_order_id = order.id, code = %order.code, "Sales order deleted");

        self.finalize(order.id, ChangeKind::Deleted).await?;

        self.emit(Event::SalesOrderDeleted {
            id: tombstone.id,
            code: tombstone.code.clone(),
            deleted_at: tombstone.deleted_at,
        })
        .await;

        Ok(tombstone)
    }

    /// Fetches the enriched sales-order aggregate from relational state.
    pub async fn get_sales_order(&self, id: i64) -> Result<SalesOrderDocument, ServiceError> {
        self.sync.assemble_sales_order_by_id(id).await
    }

    /// Lists sales-order documents from the search index.
    pub async fn list_sales_orders(
        &self,
        filter: &SearchFilter,
    ) -> Result<SearchPage<SalesOrderDocument>, ServiceError> {
        self.sync.index().query_sales_orders(filter).await
    }

    async fn finalize(
        &self,
        id: i64,
        kind: ChangeKind,
    ) -> Result<SalesOrderDocument, ServiceError> {
        match self.sync.sync_sales_order(id, kind).await {
            Ok(document) => Ok(document),
            Err(e) if e.is_retryable() => {
                warn!(
                    sales_order_id = id,
                    error = %e,
                    "Read-model sync failed after commit; queueing retry"
                );
                outbox::enqueue(&*self.db, SyncAggregate::SalesOrder, id, kind).await?;
                self.sync.assemble_sales_order_by_id(id).await
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
