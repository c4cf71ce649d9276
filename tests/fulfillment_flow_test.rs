//! End-to-end reconciliation tests: shipping against a sales order moves
//! quantity from residual to sent, statuses derive from the full detail
//! set, and deleting a delivery order reverses the movement exactly.

mod common;

use chrono::NaiveDate;
use common::TestApp;
use sea_orm::EntityTrait;

use fulfillment_api::{
    entities::{delivery_order_detail, sales_order, sales_order_detail},
    errors::ServiceError,
    services::delivery_orders::{
        CreateDeliveryOrderRequest, DeliveryOrderLineRequest, UpdateDeliveryOrderDetailRequest,
        UpdateDeliveryOrderRequest,
    },
    status::StatusName,
};

fn ship_request(sales_order_id: i64, so_detail_id: i64, qty: i32) -> CreateDeliveryOrderRequest {
    CreateDeliveryOrderRequest {
        sales_order_id,
        warehouse_id: 1,
        order_date: NaiveDate::from_ymd_opt(2024, 3, 12).unwrap(),
        reference_code: None,
        driver_name: Some("Budi".into()),
        plate_number: Some("B 1234 XY".into()),
        note: None,
        details: vec![DeliveryOrderLineRequest {
            so_detail_id,
            qty,
            note: None,
        }],
    }
}

async fn detail_quantities(app: &TestApp, detail_id: i64) -> (i32, i32, i32) {
    let detail = sales_order_detail::Entity::find_by_id(detail_id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    (detail.qty, detail.sent_qty, detail.residual_qty)
}

async fn order_status_name(app: &TestApp, order_id: i64) -> StatusName {
    let order = sales_order::Entity::find_by_id(order_id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    app.services
        .statuses
        .name_of(order.status_id)
        .expect("known status")
}

#[tokio::test]
async fn partial_then_full_shipment_then_reversal() {
    let app = TestApp::new().await;
    let so = app.seed_sales_order(&[100]).await;
    let line_id = so.details[0].id;

    assert_eq!(detail_quantities(&app, line_id).await, (100, 0, 100));
    assert_eq!(order_status_name(&app, so.id).await, StatusName::Open);

    // Ship 40 of 100: line and order go partial.
    let first = app
        .services
        .delivery_orders
        .create_delivery_order(ship_request(so.id, line_id, 40))
        .await
        .unwrap();
    assert_eq!(detail_quantities(&app, line_id).await, (100, 40, 60));
    assert_eq!(order_status_name(&app, so.id).await, StatusName::Partial);
    assert_eq!(first.details.len(), 1);
    assert_eq!(first.details[0].qty, 40);
    assert_eq!(first.agent.name, "North Distribution");
    assert_eq!(first.warehouse.code, "WH-01");

    // Ship the remaining 60: line closes, order closes.
    let second = app
        .services
        .delivery_orders
        .create_delivery_order(ship_request(so.id, line_id, 60))
        .await
        .unwrap();
    assert_eq!(detail_quantities(&app, line_id).await, (100, 100, 0));
    assert_eq!(order_status_name(&app, so.id).await, StatusName::Closed);

    let line = sales_order_detail::Entity::find_by_id(line_id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        app.services.statuses.name_of(line.status_id),
        Some(StatusName::Closed)
    );

    // Delete the second shipment: quantities revert, order goes partial.
    app.services
        .delivery_orders
        .delete_delivery_order(second.id)
        .await
        .unwrap();
    assert_eq!(detail_quantities(&app, line_id).await, (100, 40, 60));
    assert_eq!(order_status_name(&app, so.id).await, StatusName::Partial);

    // Delete the first shipment too: everything reverts to open.
    app.services
        .delivery_orders
        .delete_delivery_order(first.id)
        .await
        .unwrap();
    assert_eq!(detail_quantities(&app, line_id).await, (100, 0, 100));
    assert_eq!(order_status_name(&app, so.id).await, StatusName::Open);
}

#[tokio::test]
async fn quantity_conservation_holds_through_every_step() {
    let app = TestApp::new().await;
    let so = app.seed_sales_order(&[30, 50]).await;
    let first_line = so.details[0].id;
    let second_line = so.details[1].id;

    for (line_id, qty) in [(first_line, 10), (second_line, 50), (first_line, 5)] {
        app.services
            .delivery_orders
            .create_delivery_order(ship_request(so.id, line_id, qty))
            .await
            .unwrap();

        for id in [first_line, second_line] {
            let (qty, sent, residual) = detail_quantities(&app, id).await;
            assert_eq!(sent + residual, qty, "sent + residual must equal qty");
            assert!(residual >= 0);
        }
    }

    // One line closed, one still open quantity: order stays partial.
    assert_eq!(detail_quantities(&app, second_line).await, (50, 50, 0));
    assert_eq!(order_status_name(&app, so.id).await, StatusName::Partial);
}

#[tokio::test]
async fn insufficient_residual_rejects_without_writing() {
    let app = TestApp::new().await;
    let so = app.seed_sales_order(&[100]).await;
    let line_id = so.details[0].id;

    let result = app
        .services
        .delivery_orders
        .create_delivery_order(ship_request(so.id, line_id, 150))
        .await;
    assert!(matches!(result, Err(ServiceError::InsufficientResidual(_))));

    // The aborted transaction left nothing behind.
    assert_eq!(detail_quantities(&app, line_id).await, (100, 0, 100));
    assert_eq!(order_status_name(&app, so.id).await, StatusName::Open);
    let do_details = delivery_order_detail::Entity::find()
        .all(&*app.db)
        .await
        .unwrap();
    assert!(do_details.is_empty());
}

#[tokio::test]
async fn over_shipment_across_two_orders_is_rejected() {
    let app = TestApp::new().await;
    let so = app.seed_sales_order(&[100]).await;
    let line_id = so.details[0].id;

    app.services
        .delivery_orders
        .create_delivery_order(ship_request(so.id, line_id, 70))
        .await
        .unwrap();

    // Only 30 remain; 40 must fail.
    let result = app
        .services
        .delivery_orders
        .create_delivery_order(ship_request(so.id, line_id, 40))
        .await;
    assert!(matches!(result, Err(ServiceError::InsufficientResidual(_))));
    assert_eq!(detail_quantities(&app, line_id).await, (100, 70, 30));
}

#[tokio::test]
async fn shipping_a_foreign_detail_line_is_rejected() {
    let app = TestApp::new().await;
    let first = app.seed_sales_order(&[10]).await;
    let second = app.seed_sales_order(&[20]).await;

    let result = app
        .services
        .delivery_orders
        .create_delivery_order(ship_request(first.id, second.details[0].id, 5))
        .await;
    assert!(matches!(result, Err(ServiceError::InvalidOperation(_))));
}

#[tokio::test]
async fn unknown_warehouse_fails_enrichment_before_any_write() {
    let app = TestApp::new().await;
    let so = app.seed_sales_order(&[10]).await;

    let mut request = ship_request(so.id, so.details[0].id, 5);
    request.warehouse_id = 99;
    let result = app
        .services
        .delivery_orders
        .create_delivery_order(request)
        .await;
    assert!(matches!(result, Err(ServiceError::NotFound(_))));
    assert_eq!(detail_quantities(&app, so.details[0].id).await, (10, 0, 10));
}

#[tokio::test]
async fn header_and_detail_updates_do_not_rerun_reconciliation() {
    let app = TestApp::new().await;
    let so = app.seed_sales_order(&[100]).await;
    let line_id = so.details[0].id;

    let delivery = app
        .services
        .delivery_orders
        .create_delivery_order(ship_request(so.id, line_id, 40))
        .await
        .unwrap();

    let updated = app
        .services
        .delivery_orders
        .update_delivery_order(
            delivery.id,
            UpdateDeliveryOrderRequest {
                driver_name: Some("Siti".into()),
                note: Some("rescheduled".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.driver_name.as_deref(), Some("Siti"));

    // Editing the shipped quantity is a field update only: the parent
    // sales-order line keeps its reconciled quantities.
    let do_detail_id = delivery.details[0].id;
    app.services
        .delivery_orders
        .update_delivery_order_detail(
            do_detail_id,
            UpdateDeliveryOrderDetailRequest {
                qty: Some(10),
                note: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(detail_quantities(&app, line_id).await, (100, 40, 60));
    let do_detail = delivery_order_detail::Entity::find_by_id(do_detail_id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(do_detail.qty, 10);
}

#[tokio::test]
async fn deleting_a_sales_order_with_shipments_is_rejected() {
    let app = TestApp::new().await;
    let so = app.seed_sales_order(&[100]).await;
    let line_id = so.details[0].id;

    app.services
        .delivery_orders
        .create_delivery_order(ship_request(so.id, line_id, 40))
        .await
        .unwrap();

    let result = app.services.sales_orders.delete_sales_order(so.id).await;
    assert!(matches!(result, Err(ServiceError::InvalidOperation(_))));

    // After reversing the shipment the delete goes through.
    let delivery = app
        .services
        .delivery_orders
        .list_delivery_orders(&Default::default())
        .await
        .unwrap();
    app.services
        .delivery_orders
        .delete_delivery_order(delivery.items[0].id)
        .await
        .unwrap();

    let tombstone = app
        .services
        .sales_orders
        .delete_sales_order(so.id)
        .await
        .unwrap();
    assert_eq!(tombstone.id, so.id);

    let order = sales_order::Entity::find_by_id(so.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert!(order.deleted_at.is_some());
    assert_eq!(
        app.services.statuses.name_of(order.status_id),
        Some(StatusName::Cancelled)
    );
}

#[tokio::test]
async fn delivery_order_codes_derive_from_agent_and_parent() {
    let app = TestApp::new().await;
    let so = app.seed_sales_order(&[100]).await;
    let line_id = so.details[0].id;

    let delivery = app
        .services
        .delivery_orders
        .create_delivery_order(ship_request(so.id, line_id, 40))
        .await
        .unwrap();

    assert_eq!(delivery.code, format!("DO/AG-NORTH/{}-1", so.id));
    // Detail code derives from the order code, agent, product and uom.
    assert_eq!(
        delivery.details[0].code,
        format!("{}/1-1-1", delivery.code)
    );
}

#[tokio::test]
async fn audit_trail_records_every_mutation() {
    let app = TestApp::new().await;
    let so = app.seed_sales_order(&[100]).await;
    let delivery = app
        .services
        .delivery_orders
        .create_delivery_order(ship_request(so.id, so.details[0].id, 40))
        .await
        .unwrap();
    app.services
        .delivery_orders
        .delete_delivery_order(delivery.id)
        .await
        .unwrap();

    let entries = fulfillment_api::entities::document_log::Entity::find()
        .all(&*app.db)
        .await
        .unwrap();
    let actions: Vec<(String, String)> = entries
        .iter()
        .map(|e| (e.entity.clone(), e.action.clone()))
        .collect();
    assert!(actions.contains(&("sales_order".into(), "insert".into())));
    assert!(actions.contains(&("delivery_order".into(), "insert".into())));
    assert!(actions.contains(&("delivery_order".into(), "delete".into())));
}
