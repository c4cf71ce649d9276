//! Read-model synchronization tests: enrichment into documents, the
//! delivery-order → sales-order cascade, idempotent re-indexing,
//! never-synced tolerance, and the durable outbox retry.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use common::TestApp;
use sea_orm::EntityTrait;

use fulfillment_api::{
    documents::{DeliveryOrderDocument, SalesOrderDocument},
    entities::{sales_order, sync_outbox},
    errors::ServiceError,
    events::outbox::{self, OutboxConfig},
    search::{SearchFilter, SearchIndex, SearchPage},
    services::{
        delivery_orders::{CreateDeliveryOrderRequest, DeliveryOrderLineRequest},
        sync::ChangeKind,
        AppServices,
    },
    status::StatusName,
};

fn ship_request(sales_order_id: i64, so_detail_id: i64, qty: i32) -> CreateDeliveryOrderRequest {
    CreateDeliveryOrderRequest {
        sales_order_id,
        warehouse_id: 1,
        order_date: NaiveDate::from_ymd_opt(2024, 3, 12).unwrap(),
        reference_code: Some("REF-88".into()),
        driver_name: None,
        plate_number: None,
        note: None,
        details: vec![DeliveryOrderLineRequest {
            so_detail_id,
            qty,
            note: None,
        }],
    }
}

#[tokio::test]
async fn sales_order_document_embeds_resolved_names() {
    let app = TestApp::new().await;
    let so = app.seed_sales_order(&[100]).await;

    let doc = app.index.get_sales_order(so.id).await.unwrap().unwrap();
    assert_eq!(doc.code, so.code);
    assert_eq!(doc.agent.name, "North Distribution");
    assert_eq!(doc.store.name, "Mega Grocery");
    assert_eq!(doc.store.province_id, Some(31));
    assert_eq!(doc.brand.as_ref().unwrap().name, "Aquamarine");
    assert_eq!(doc.salesman.as_ref().unwrap().name, "Dian Prasetyo");
    assert_eq!(doc.status.name, "open");

    let line = &doc.details[0];
    assert_eq!(line.product.name, "Sparkling Water 330ml");
    assert_eq!(line.product.category_name.as_deref(), Some("Beverage"));
    assert_eq!(line.uom.code, "CTN");
    assert_eq!(line.qty, 100);
    assert_eq!(line.residual_qty, 100);

    // Sync bookkeeping landed on the relational header.
    let row = sales_order::Entity::find_by_id(so.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert!(row.is_synced);
    assert!(row.sync_started_at.is_some());
    assert!(row.sync_finished_at.is_some());
}

#[tokio::test]
async fn delivery_order_sync_cascades_into_the_parent_document() {
    let app = TestApp::new().await;
    let so = app.seed_sales_order(&[100]).await;
    let line_id = so.details[0].id;

    let delivery = app
        .services
        .delivery_orders
        .create_delivery_order(ship_request(so.id, line_id, 40))
        .await
        .unwrap();

    // The standalone delivery-order document carries its parent summary.
    let do_doc = app
        .index
        .get_delivery_order(delivery.id)
        .await
        .unwrap()
        .unwrap();
    let summary = do_doc.sales_order.as_ref().unwrap();
    assert_eq!(summary.code, so.code);
    assert_eq!(summary.status.name, "partial");
    assert_eq!(do_doc.warehouse.name, "Central Warehouse");

    // The parent document gained a parent-stripped embedded copy and the
    // reconciled quantities.
    let so_doc = app.index.get_sales_order(so.id).await.unwrap().unwrap();
    assert_eq!(so_doc.status.name, "partial");
    assert_eq!(so_doc.details[0].sent_qty, 40);
    assert_eq!(so_doc.details[0].residual_qty, 60);
    assert_eq!(so_doc.delivery_orders.len(), 1);
    assert_eq!(so_doc.delivery_orders[0].id, delivery.id);
    assert!(so_doc.delivery_orders[0].sales_order.is_none());

    // Deleting the shipment removes the embedded copy and reverses the
    // quantities in the read model.
    app.services
        .delivery_orders
        .delete_delivery_order(delivery.id)
        .await
        .unwrap();

    let so_doc = app.index.get_sales_order(so.id).await.unwrap().unwrap();
    assert!(so_doc.delivery_orders.is_empty());
    assert_eq!(so_doc.details[0].sent_qty, 0);
    assert_eq!(so_doc.details[0].residual_qty, 100);
    assert_eq!(so_doc.status.name, "open");

    // The deleted order's own document is kept, marked deleted.
    let do_doc = app
        .index
        .get_delivery_order(delivery.id)
        .await
        .unwrap()
        .unwrap();
    assert!(do_doc.deleted_at.is_some());
    assert_eq!(do_doc.status.name, "cancelled");
}

#[tokio::test]
async fn reindexing_identical_state_is_idempotent() {
    let app = TestApp::new().await;
    let so = app.seed_sales_order(&[100]).await;

    let before = app.index.get_sales_order(so.id).await.unwrap().unwrap();
    app.services
        .sync
        .sync_sales_order(so.id, ChangeKind::Updated)
        .await
        .unwrap();
    app.services
        .sync
        .sync_sales_order(so.id, ChangeKind::Updated)
        .await
        .unwrap();

    assert_eq!(app.index.sales_order_count(), 1);
    let after = app.index.get_sales_order(so.id).await.unwrap().unwrap();
    assert_eq!(before.details, after.details);
    assert_eq!(before.delivery_orders, after.delivery_orders);
    assert_eq!(before.code, after.code);
}

#[tokio::test]
async fn deleting_against_a_never_synced_parent_still_reverses_quantities() {
    let app = TestApp::new().await;
    let so = app.seed_sales_order(&[100]).await;
    let line_id = so.details[0].id;

    let delivery = app
        .services
        .delivery_orders
        .create_delivery_order(ship_request(so.id, line_id, 40))
        .await
        .unwrap();

    // Service set whose index never saw these aggregates.
    let (services, fresh_index) = app.with_empty_index().await;
    services
        .delivery_orders
        .delete_delivery_order(delivery.id)
        .await
        .unwrap();

    // Relational reversal happened despite the missing documents.
    let detail = fulfillment_api::entities::sales_order_detail::Entity::find_by_id(line_id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(detail.sent_qty, 0);
    assert_eq!(detail.residual_qty, 100);

    // And the missing parent document was rebuilt rather than erroring.
    let rebuilt = fresh_index.get_sales_order(so.id).await.unwrap().unwrap();
    assert_eq!(rebuilt.code, so.code);
    assert_eq!(rebuilt.status.name, "open");
    assert!(rebuilt.delivery_orders.is_empty());
}

#[tokio::test]
async fn list_queries_serve_from_the_index_without_joins() {
    let app = TestApp::new().await;
    let so = app.seed_sales_order(&[100]).await;
    app.services
        .delivery_orders
        .create_delivery_order(ship_request(so.id, so.details[0].id, 40))
        .await
        .unwrap();

    let page = app
        .services
        .sales_orders
        .list_sales_orders(&SearchFilter {
            agent_id: Some(1),
            keyword: Some("sparkling".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].code, so.code);

    let none = app
        .services
        .sales_orders
        .list_sales_orders(&SearchFilter {
            agent_id: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(none.total, 0);

    let deliveries = app
        .services
        .delivery_orders
        .list_delivery_orders(&SearchFilter {
            warehouse_id: Some(1),
            status_id: Some(app.services.statuses.id(
                fulfillment_api::status::StatusScope::DeliveryOrder,
                StatusName::Open,
            )),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(deliveries.total, 1);
}

/// Index double whose writes always fail, for exercising the outbox path.
#[derive(Debug, Default)]
struct FailingIndex;

#[async_trait]
impl SearchIndex for FailingIndex {
    async fn get_sales_order(&self, _id: i64) -> Result<Option<SalesOrderDocument>, ServiceError> {
        Ok(None)
    }

    async fn upsert_sales_order(&self, _doc: &SalesOrderDocument) -> Result<(), ServiceError> {
        Err(ServiceError::SearchIndexError("index unavailable".into()))
    }

    async fn query_sales_orders(
        &self,
        filter: &SearchFilter,
    ) -> Result<SearchPage<SalesOrderDocument>, ServiceError> {
        Ok(SearchPage {
            items: Vec::new(),
            total: 0,
            page: filter.page(),
            per_page: filter.per_page(),
        })
    }

    async fn get_delivery_order(
        &self,
        _id: i64,
    ) -> Result<Option<DeliveryOrderDocument>, ServiceError> {
        Ok(None)
    }

    async fn upsert_delivery_order(
        &self,
        _doc: &DeliveryOrderDocument,
    ) -> Result<(), ServiceError> {
        Err(ServiceError::SearchIndexError("index unavailable".into()))
    }

    async fn query_delivery_orders(
        &self,
        filter: &SearchFilter,
    ) -> Result<SearchPage<DeliveryOrderDocument>, ServiceError> {
        Ok(SearchPage {
            items: Vec::new(),
            total: 0,
            page: filter.page(),
            per_page: filter.per_page(),
        })
    }
}

#[tokio::test]
async fn failed_sync_is_queued_and_replayed_by_the_outbox_worker() {
    let app = TestApp::new().await;

    // Services wired against a broken index: the relational write must
    // still succeed and the sync failure must become an outbox row.
    let failing: Arc<dyn SearchIndex> = Arc::new(FailingIndex);
    let broken_services = AppServices::build(Arc::clone(&app.db), failing, None)
        .await
        .unwrap();

    let details = vec![fulfillment_api::services::sales_orders::SalesOrderLineRequest {
        product_id: 1,
        uom_id: 1,
        qty: 10,
        price: rust_decimal_macros::dec!(12.00),
        note: None,
    }];
    let so = broken_services
        .sales_orders
        .create_sales_order(
            fulfillment_api::services::sales_orders::CreateSalesOrderRequest {
                agent_id: 1,
                store_id: 1,
                brand_id: None,
                user_id: None,
                salesman_id: None,
                order_source_id: None,
                order_date: NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
                note: None,
                details,
            },
        )
        .await
        .expect("relational write must survive a sync failure");

    let rows = sync_outbox::Entity::find().all(&*app.db).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, "pending");
    assert_eq!(rows[0].aggregate_type, "sales_order");
    assert_eq!(rows[0].aggregate_id, so.id);

    // The healthy worker replays the queued sync against the real index.
    let drained = outbox::drain_once(&app.db, &app.services.sync, &OutboxConfig::default())
        .await
        .unwrap();
    assert_eq!(drained, 1);

    let rows = sync_outbox::Entity::find().all(&*app.db).await.unwrap();
    assert_eq!(rows[0].status, "delivered");
    assert!(rows[0].processed_at.is_some());

    let doc = app.index.get_sales_order(so.id).await.unwrap().unwrap();
    assert_eq!(doc.code, so.code);
}
