//! Read-model synchronization engine.
//!
//! Keeps the search-index documents consistent with the relational
//! store. Every transition follows the same cycle: fetch the existing
//! document (a missing document is benign on create and a logged warning
//! otherwise), enrich the relational state through the lookup
//! coordinator, merge field by field, and re-index the full document
//! keyed by business code. A delivery-order transition cascades into a
//! sales-order update so the embedded delivery-orders array stays
//! current; the cascade is fail-fast.
//!
//! The cycle runs after the relational transaction has committed and is
//! not atomic with it. A failure here leaves the index stale until the
//! outbox worker replays the sync; the relational write always stands.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder,
};
use strum::{Display, EnumString};
use tracing::{info, instrument, warn};

use crate::documents::{
    merge, AgentRef, BrandRef, DeliveryOrderDetailDocument, DeliveryOrderDocument, NamedRef,
    ProductRef, SalesOrderDetailDocument, SalesOrderDocument, SalesOrderSummary, StatusRef,
    StoreRef, UomRef, WarehouseRef,
};
use crate::entities::{
    agent, brand, delivery_order::{self, Entity as DeliveryOrderEntity},
    delivery_order_detail::{self, Entity as DeliveryOrderDetailEntity},
    order_source, product,
    sales_order::{self, Entity as SalesOrderEntity},
    sales_order_detail::{self, Entity as SalesOrderDetailEntity},
    salesman, store, uom, user, warehouse,
};
use crate::errors::ServiceError;
use crate::lookups::{DetailRefs, LookupService, SalesOrderRefs};
use crate::search::SearchIndex;
use crate::status::StatusRegistry;

/// Aggregate types the engine synchronizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum SyncAggregate {
    SalesOrder,
    DeliveryOrder,
}

/// Relational change driving a synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// Mutation the cascade applies to the parent document's embedded
/// delivery-orders array.
enum EmbeddedChange {
    Upsert(DeliveryOrderDocument),
    Remove(i64),
}

#[derive(Clone)]
pub struct ReadModelSyncService {
    db: Arc<DatabaseConnection>,
    index: Arc<dyn SearchIndex>,
    lookups: LookupService,
    statuses: Arc<StatusRegistry>,
}

impl ReadModelSyncService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        index: Arc<dyn SearchIndex>,
        lookups: LookupService,
        statuses: Arc<StatusRegistry>,
    ) -> Self {
        Self {
            db,
            index,
            lookups,
            statuses,
        }
    }

    /// The search index this engine writes to.
    pub fn index(&self) -> Arc<dyn SearchIndex> {
        Arc::clone(&self.index)
    }

    /// Dispatches a synchronization by aggregate type. Used by the event
    /// consumer and the outbox worker.
    pub async fn apply(
        &self,
        aggregate: SyncAggregate,
        id: i64,
        kind: ChangeKind,
    ) -> Result<(), ServiceError> {
        match aggregate {
            SyncAggregate::SalesOrder => self.sync_sales_order(id, kind).await.map(|_| ()),
            SyncAggregate::DeliveryOrder => self.sync_delivery_order(id, kind).await.map(|_| ()),
        }
    }

    /// Runs one synchronization cycle for a sales order and returns the
    /// document that was indexed.
    #[instrument(skip(self), fields(sales_order_id = id, kind = %kind))]
    pub async fn sync_sales_order(
        &self,
        id: i64,
        kind: ChangeKind,
    ) -> Result<SalesOrderDocument, ServiceError> {
        self.sync_sales_order_inner(id, kind, None).await
    }

    async fn sync_sales_order_inner(
        &self,
        id: i64,
        kind: ChangeKind,
        embedded: Option<EmbeddedChange>,
    ) -> Result<SalesOrderDocument, ServiceError> {
        let db = &*self.db;
        let started_at = Utc::now();

        let order = SalesOrderEntity::find_by_id(id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("sales order", id))?;

        let (mut doc, rebuild_embedded) = match self.index.get_sales_order(id).await? {
            Some(existing) => (existing, false),
            None => {
                if kind != ChangeKind::Created {
                    warn!(
                        sales_order_id = id,
                        "Sales order document missing from index; rebuilding"
                    );
                }
                (SalesOrderDocument::default(), true)
            }
        };

        let fresh = self.assemble_sales_order_header(&order).await?;
        merge::overlay_sales_order(&mut doc, fresh);

        if rebuild_embedded {
            doc.delivery_orders = self.assemble_embedded_delivery_orders(order.id).await?;
        }
        match embedded {
            Some(EmbeddedChange::Upsert(child)) => {
                merge::upsert_embedded_delivery_order(&mut doc, child)
            }
            Some(EmbeddedChange::Remove(child_id)) => {
                merge::remove_embedded_delivery_order(&mut doc, child_id)
            }
            None => {}
        }

        self.index.upsert_sales_order(&doc).await?;
        self.mark_sales_order_synced(order, started_at).await?;

        info!(sales_order_id = id, code = %doc.code, "Sales order document synchronized");
        Ok(doc)
    }

    /// Runs one synchronization cycle for a delivery order, then cascades
    /// into its parent sales order. Returns the indexed document.
    #[instrument(skip(self), fields(delivery_order_id = id, kind = %kind))]
    pub async fn sync_delivery_order(
        &self,
        id: i64,
        kind: ChangeKind,
    ) -> Result<DeliveryOrderDocument, ServiceError> {
        let db = &*self.db;
        let started_at = Utc::now();

        let order = DeliveryOrderEntity::find_by_id(id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("delivery order", id))?;

        let mut doc = match self.index.get_delivery_order(id).await? {
            Some(existing) => existing,
            None => {
                if kind != ChangeKind::Created {
                    warn!(
                        delivery_order_id = id,
                        "Delivery order document missing from index; rebuilding"
                    );
                }
                DeliveryOrderDocument::default()
            }
        };

        let fresh = self.assemble_delivery_order(&order).await?;
        merge::overlay_delivery_order(&mut doc, fresh);

        self.index.upsert_delivery_order(&doc).await?;
        self.mark_delivery_order_synced(order.clone(), started_at)
            .await?;

        // Cascade: refresh the embedded copy inside the parent document.
        // The parent cycle also re-reads every sales-order detail, so the
        // reversed quantities after a delete land in the read model too.
        let change = match kind {
            ChangeKind::Deleted => EmbeddedChange::Remove(id),
            _ => EmbeddedChange::Upsert(doc.clone()),
        };
        self.sync_sales_order_inner(order.sales_order_id, ChangeKind::Updated, Some(change))
            .await?;

        info!(delivery_order_id = id, code = %doc.code, "Delivery order document synchronized");
        Ok(doc)
    }

    /// Builds a fresh, fully-enriched delivery-order document from
    /// relational state, without touching the index.
    pub async fn assemble_delivery_order_by_id(
        &self,
        id: i64,
    ) -> Result<DeliveryOrderDocument, ServiceError> {
        let order = DeliveryOrderEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("delivery order", id))?;
        self.assemble_delivery_order(&order).await
    }

    /// Builds a fresh, fully-enriched sales-order document (embedded
    /// delivery orders included) from relational state.
    pub async fn assemble_sales_order_by_id(
        &self,
        id: i64,
    ) -> Result<SalesOrderDocument, ServiceError> {
        let order = SalesOrderEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("sales order", id))?;
        let mut doc = self.assemble_sales_order_header(&order).await?;
        doc.delivery_orders = self.assemble_embedded_delivery_orders(order.id).await?;
        Ok(doc)
    }

    async fn assemble_sales_order_header(
        &self,
        order: &sales_order::Model,
    ) -> Result<SalesOrderDocument, ServiceError> {
        let refs = self.lookups.sales_order_refs(order).await?;
        let details = SalesOrderDetailEntity::find()
            .filter(sales_order_detail::Column::SalesOrderId.eq(order.id))
            .order_by_asc(sales_order_detail::Column::Id)
            .all(&*self.db)
            .await?;
        let detail_refs = self
            .lookups
            .detail_refs(
                details.iter().map(|d| d.product_id),
                details.iter().map(|d| d.uom_id),
            )
            .await?;

        let details = details
            .iter()
            .map(|d| self.sales_order_detail_document(d, &detail_refs))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(self.sales_order_document(order, &refs, details))
    }

    async fn assemble_delivery_order(
        &self,
        order: &delivery_order::Model,
    ) -> Result<DeliveryOrderDocument, ServiceError> {
        let refs = self.lookups.delivery_order_refs(order).await?;
        let details = DeliveryOrderDetailEntity::find()
            .filter(delivery_order_detail::Column::DeliveryOrderId.eq(order.id))
            .order_by_asc(delivery_order_detail::Column::Id)
            .all(&*self.db)
            .await?;
        let detail_refs = self
            .lookups
            .detail_refs(
                details.iter().map(|d| d.product_id),
                details.iter().map(|d| d.uom_id),
            )
            .await?;

        let parent = SalesOrderEntity::find_by_id(order.sales_order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("sales order", order.sales_order_id))?;
        let parent_refs = self.lookups.sales_order_refs(&parent).await?;
        let summary = self.sales_order_summary(&parent, &parent_refs);

        let details = details
            .iter()
            .map(|d| self.delivery_order_detail_document(d, &detail_refs))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(DeliveryOrderDocument {
            id: order.id,
            code: order.code.clone(),
            sales_order_id: order.sales_order_id,
            sales_order: Some(summary),
            agent: agent_ref(&refs.agent),
            store: store_ref(&refs.store),
            warehouse: warehouse_ref(&refs.warehouse),
            status: self.status_ref(order.status_id),
            order_date: Some(order.order_date),
            reference_code: order.reference_code.clone(),
            driver_name: order.driver_name.clone(),
            plate_number: order.plate_number.clone(),
            note: order.note.clone(),
            details,
            created_at: Some(order.created_at),
            updated_at: order.updated_at,
            deleted_at: order.deleted_at,
        })
    }

    /// Rebuilds the full embedded delivery-orders array for a sales-order
    /// document that is being indexed for the first time.
    async fn assemble_embedded_delivery_orders(
        &self,
        sales_order_id: i64,
    ) -> Result<Vec<DeliveryOrderDocument>, ServiceError> {
        let orders = DeliveryOrderEntity::find()
            .filter(delivery_order::Column::SalesOrderId.eq(sales_order_id))
            .filter(delivery_order::Column::DeletedAt.is_null())
            .order_by_asc(delivery_order::Column::Id)
            .all(&*self.db)
            .await?;

        let mut embedded = Vec::with_capacity(orders.len());
        for order in &orders {
            let mut doc = self.assemble_delivery_order(order).await?;
            doc.sales_order = None;
            embedded.push(doc);
        }
        Ok(embedded)
    }

    fn sales_order_document(
        &self,
        order: &sales_order::Model,
        refs: &SalesOrderRefs,
        details: Vec<SalesOrderDetailDocument>,
    ) -> SalesOrderDocument {
        SalesOrderDocument {
            id: order.id,
            code: order.code.clone(),
            agent: agent_ref(&refs.agent),
            store: store_ref(&refs.store),
            brand: refs.brand.as_ref().map(brand_ref),
            salesman: refs.salesman.as_ref().map(salesman_ref),
            order_source: refs.order_source.as_ref().map(order_source_ref),
            user: refs.user.as_ref().map(user_ref),
            status: self.status_ref(order.status_id),
            order_date: Some(order.order_date),
            total: order.total,
            note: order.note.clone(),
            details,
            delivery_orders: Vec::new(),
            created_at: Some(order.created_at),
            updated_at: order.updated_at,
            deleted_at: order.deleted_at,
        }
    }

    fn sales_order_summary(
        &self,
        order: &sales_order::Model,
        refs: &SalesOrderRefs,
    ) -> SalesOrderSummary {
        SalesOrderSummary {
            id: order.id,
            code: order.code.clone(),
            agent: agent_ref(&refs.agent),
            store: store_ref(&refs.store),
            status: self.status_ref(order.status_id),
            order_date: Some(order.order_date),
            total: order.total,
            created_at: Some(order.created_at),
        }
    }

    fn sales_order_detail_document(
        &self,
        detail: &sales_order_detail::Model,
        refs: &DetailRefs,
    ) -> Result<SalesOrderDetailDocument, ServiceError> {
        let product = refs.product(detail.product_id)?;
        let uom = refs.uom(detail.uom_id)?;
        Ok(SalesOrderDetailDocument {
            id: detail.id,
            code: detail.code.clone(),
            product: product_ref(product, refs.category_name(product.category_id)),
            uom: uom_ref(uom),
            qty: detail.qty,
            sent_qty: detail.sent_qty,
            residual_qty: detail.residual_qty,
            price: detail.price,
            total: detail.total,
            note: detail.note.clone(),
            status: self.status_ref(detail.status_id),
            deleted_at: detail.deleted_at,
        })
    }

    fn delivery_order_detail_document(
        &self,
        detail: &delivery_order_detail::Model,
        refs: &DetailRefs,
    ) -> Result<DeliveryOrderDetailDocument, ServiceError> {
        let product = refs.product(detail.product_id)?;
        let uom = refs.uom(detail.uom_id)?;
        Ok(DeliveryOrderDetailDocument {
            id: detail.id,
            code: detail.code.clone(),
            so_detail_id: detail.so_detail_id,
            product: product_ref(product, refs.category_name(product.category_id)),
            uom: uom_ref(uom),
            qty: detail.qty,
            note: detail.note.clone(),
            status: self.status_ref(detail.status_id),
            deleted_at: detail.deleted_at,
        })
    }

    fn status_ref(&self, id: i32) -> StatusRef {
        StatusRef {
            id,
            name: self
                .statuses
                .name_of(id)
                .map(|n| n.to_string())
                .unwrap_or_default(),
        }
    }

    async fn mark_sales_order_synced(
        &self,
        order: sales_order::Model,
        started_at: chrono::DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let mut active: sales_order::ActiveModel = order.into();
        active.is_synced = Set(true);
        active.sync_started_at = Set(Some(started_at));
        active.sync_finished_at = Set(Some(Utc::now()));
        active.update(&*self.db).await?;
        Ok(())
    }

    async fn mark_delivery_order_synced(
        &self,
        order: delivery_order::Model,
        started_at: chrono::DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let mut active: delivery_order::ActiveModel = order.into();
        active.is_synced = Set(true);
        active.sync_started_at = Set(Some(started_at));
        active.sync_finished_at = Set(Some(Utc::now()));
        active.update(&*self.db).await?;
        Ok(())
    }
}

fn agent_ref(model: &agent::Model) -> AgentRef {
    AgentRef {
        id: model.id,
        code: model.code.clone(),
        name: model.name.clone(),
    }
}

fn store_ref(model: &store::Model) -> StoreRef {
    StoreRef {
        id: model.id,
        code: model.code.clone(),
        name: model.name.clone(),
        province_id: model.province_id,
        city_id: model.city_id,
        district_id: model.district_id,
        village_id: model.village_id,
    }
}

fn brand_ref(model: &brand::Model) -> BrandRef {
    BrandRef {
        id: model.id,
        code: model.code.clone(),
        name: model.name.clone(),
    }
}

fn warehouse_ref(model: &warehouse::Model) -> WarehouseRef {
    WarehouseRef {
        id: model.id,
        code: model.code.clone(),
        name: model.name.clone(),
    }
}

fn uom_ref(model: &uom::Model) -> UomRef {
    UomRef {
        id: model.id,
        code: model.code.clone(),
        name: model.name.clone(),
    }
}

fn product_ref(model: &product::Model, category_name: Option<String>) -> ProductRef {
    ProductRef {
        id: model.id,
        code: model.code.clone(),
        name: model.name.clone(),
        category_id: model.category_id,
        category_name,
    }
}

fn salesman_ref(model: &salesman::Model) -> NamedRef {
    NamedRef {
        id: model.id,
        name: model.name.clone(),
    }
}

fn order_source_ref(model: &order_source::Model) -> NamedRef {
    NamedRef {
        id: model.id,
        name: model.name.clone(),
    }
}

fn user_ref(model: &user::Model) -> NamedRef {
    NamedRef {
        id: model.id,
        name: model.name.clone(),
    }
}
