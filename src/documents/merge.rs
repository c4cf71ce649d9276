//! Field-by-field merge helpers for the synchronization engine.
//!
//! Every sync cycle is a full-document re-index: the engine fetches the
//! current document, overlays fresh relational state onto it field by
//! field, then writes the whole document back. The overlay is explicit
//! assignment, not a generic patch, so a field the relational side no
//! longer carries cannot survive by accident. The embedded
//! delivery-orders array inside a sales-order document is the one
//! exception: it is owned by the cascade helpers below, since a direct
//! sales-order sync must not clobber entries maintained by child
//! delivery-order syncs.

use super::{DeliveryOrderDocument, SalesOrderDocument};

/// Overlays fresh sales-order state onto `doc`, preserving the embedded
/// delivery-orders array.
pub fn overlay_sales_order(doc: &mut SalesOrderDocument, fresh: SalesOrderDocument) {
    doc.id = fresh.id;
    doc.code = fresh.code;
    doc.agent = fresh.agent;
    doc.store = fresh.store;
    doc.brand = fresh.brand;
    doc.salesman = fresh.salesman;
    doc.order_source = fresh.order_source;
    doc.user = fresh.user;
    doc.status = fresh.status;
    doc.order_date = fresh.order_date;
    doc.total = fresh.total;
    doc.note = fresh.note;
    doc.details = fresh.details;
    doc.created_at = fresh.created_at;
    doc.updated_at = fresh.updated_at;
    doc.deleted_at = fresh.deleted_at;
}

/// Overlays fresh delivery-order state onto `doc`, including the detail
/// array and the parent summary.
pub fn overlay_delivery_order(doc: &mut DeliveryOrderDocument, fresh: DeliveryOrderDocument) {
    doc.id = fresh.id;
    doc.code = fresh.code;
    doc.sales_order_id = fresh.sales_order_id;
    doc.sales_order = fresh.sales_order;
    doc.agent = fresh.agent;
    doc.store = fresh.store;
    doc.warehouse = fresh.warehouse;
    doc.status = fresh.status;
    doc.order_date = fresh.order_date;
    doc.reference_code = fresh.reference_code;
    doc.driver_name = fresh.driver_name;
    doc.plate_number = fresh.plate_number;
    doc.note = fresh.note;
    doc.details = fresh.details;
    doc.created_at = fresh.created_at;
    doc.updated_at = fresh.updated_at;
    doc.deleted_at = fresh.deleted_at;
}

/// Replaces (or appends) one delivery order inside its parent document's
/// embedded array. The embedded copy is always parent-stripped.
pub fn upsert_embedded_delivery_order(
    parent: &mut SalesOrderDocument,
    mut child: DeliveryOrderDocument,
) {
    child.sales_order = None;
    match parent.delivery_orders.iter_mut().find(|d| d.id == child.id) {
        Some(slot) => *slot = child,
        None => parent.delivery_orders.push(child),
    }
    parent.delivery_orders.sort_by_key(|d| d.id);
}

/// Drops one delivery order from its parent document's embedded array.
/// Removing an id that was never embedded is a no-op.
pub fn remove_embedded_delivery_order(parent: &mut SalesOrderDocument, delivery_order_id: i64) {
    parent.delivery_orders.retain(|d| d.id != delivery_order_id);
}
