//! Read-model document types.
//!
//! Denormalized, nested copies of the relational aggregates with resolved
//! reference names embedded, so list and search queries never join at
//! read time. A delivery-order document embeds a parent-stripped
//! sales-order summary; a sales-order document embeds the delivery-order
//! documents shipped against it.

pub mod merge;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Resolved agent reference embedded in documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRef {
    pub id: i64,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreRef {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub province_id: Option<i64>,
    pub city_id: Option<i64>,
    pub district_id: Option<i64>,
    pub village_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandRef {
    pub id: i64,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRef {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub category_id: Option<i64>,
    pub category_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UomRef {
    pub id: i64,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseRef {
    pub id: i64,
    pub code: String,
    pub name: String,
}

/// Generic resolved reference (salesman, order source, user).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedRef {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRef {
    pub id: i32,
    pub name: String,
}

/// Sales order detail line as embedded in the sales-order document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SalesOrderDetailDocument {
    pub id: i64,
    pub code: String,
    pub product: ProductRef,
    pub uom: UomRef,
    pub qty: i32,
    pub sent_qty: i32,
    pub residual_qty: i32,
    pub price: Decimal,
    pub total: Decimal,
    pub note: Option<String>,
    pub status: StatusRef,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Delivery order detail line as embedded in the delivery-order document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryOrderDetailDocument {
    pub id: i64,
    pub code: String,
    pub so_detail_id: i64,
    pub product: ProductRef,
    pub uom: UomRef,
    pub qty: i32,
    pub note: Option<String>,
    pub status: StatusRef,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Parent-stripped sales order summary embedded in delivery-order
/// documents. Carries no detail or delivery-order arrays so the two
/// document types cannot recurse into each other.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SalesOrderSummary {
    pub id: i64,
    pub code: String,
    pub agent: AgentRef,
    pub store: StoreRef,
    pub status: StatusRef,
    pub order_date: Option<NaiveDate>,
    pub total: Decimal,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryOrderDocument {
    pub id: i64,
    pub code: String,
    pub sales_order_id: i64,
    /// Present on standalone documents; stripped to `None` when this
    /// document is embedded inside its parent sales-order document.
    pub sales_order: Option<SalesOrderSummary>,
    pub agent: AgentRef,
    pub store: StoreRef,
    pub warehouse: WarehouseRef,
    pub status: StatusRef,
    pub order_date: Option<NaiveDate>,
    pub reference_code: Option<String>,
    pub driver_name: Option<String>,
    pub plate_number: Option<String>,
    pub note: Option<String>,
    pub details: Vec<DeliveryOrderDetailDocument>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SalesOrderDocument {
    pub id: i64,
    pub code: String,
    pub agent: AgentRef,
    pub store: StoreRef,
    pub brand: Option<BrandRef>,
    pub salesman: Option<NamedRef>,
    pub order_source: Option<NamedRef>,
    pub user: Option<NamedRef>,
    pub status: StatusRef,
    pub order_date: Option<NaiveDate>,
    pub total: Decimal,
    pub note: Option<String>,
    pub details: Vec<SalesOrderDetailDocument>,
    /// Delivery orders shipped against this sales order, parent-stripped.
    pub delivery_orders: Vec<DeliveryOrderDocument>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SalesOrderDocument {
    /// The parent-stripped form embedded inside delivery-order documents.
    pub fn summary(&self) -> SalesOrderSummary {
        SalesOrderSummary {
            id: self.id,
            code: self.code.clone(),
            agent: self.agent.clone(),
            store: self.store.clone(),
            status: self.status.clone(),
            order_date: self.order_date,
            total: self.total,
            created_at: self.created_at,
        }
    }
}
