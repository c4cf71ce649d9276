//! Search-index seam for the read model.
//!
//! The engines speak to the index through [`SearchIndex`]; the in-memory
//! engine in [`memory`] evaluates the full filter set and is the default
//! backend (and the test double). Upserts are keyed by business code so
//! re-indexing the same aggregate is idempotent.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::documents::{DeliveryOrderDocument, SalesOrderDocument};
use crate::errors::ServiceError;

pub use memory::InMemorySearchIndex;

const DEFAULT_PAGE: u64 = 1;
const DEFAULT_PER_PAGE: u64 = 20;

/// Filter specification for list/search queries against the read model.
///
/// All filters are conjunctive. `keyword` matches a fixed field set:
/// business code, agent name, store name, and embedded product names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchFilter {
    pub page: u64,
    pub per_page: u64,
    pub keyword: Option<String>,
    pub order_date_from: Option<NaiveDate>,
    pub order_date_to: Option<NaiveDate>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub agent_id: Option<i64>,
    pub store_id: Option<i64>,
    pub brand_id: Option<i64>,
    pub product_id: Option<i64>,
    pub category_id: Option<i64>,
    pub warehouse_id: Option<i64>,
    pub salesman_id: Option<i64>,
    pub order_source_id: Option<i64>,
    pub status_id: Option<i32>,
    pub province_id: Option<i64>,
    pub city_id: Option<i64>,
    pub district_id: Option<i64>,
    pub village_id: Option<i64>,
    pub include_deleted: bool,
}

impl Default for SearchFilter {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            per_page: DEFAULT_PER_PAGE,
            keyword: None,
            order_date_from: None,
            order_date_to: None,
            created_from: None,
            created_to: None,
            agent_id: None,
            store_id: None,
            brand_id: None,
            product_id: None,
            category_id: None,
            warehouse_id: None,
            salesman_id: None,
            order_source_id: None,
            status_id: None,
            province_id: None,
            city_id: None,
            district_id: None,
            village_id: None,
            include_deleted: false,
        }
    }
}

impl SearchFilter {
    /// Page number clamped to 1-based indexing.
    pub fn page(&self) -> u64 {
        self.page.max(1)
    }

    /// Page size clamped to at least one row.
    pub fn per_page(&self) -> u64 {
        self.per_page.max(1)
    }
}

/// One page of query results plus the unpaginated total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPage<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Read-model document store.
///
/// `get_*` by surrogate id returns `Ok(None)` for unknown documents;
/// "not found" is a state here, not an error, because the sync engine
/// must tolerate aggregates that were never indexed.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn get_sales_order(&self, id: i64) -> Result<Option<SalesOrderDocument>, ServiceError>;
    async fn upsert_sales_order(&self, doc: &SalesOrderDocument) -> Result<(), ServiceError>;
    async fn query_sales_orders(
        &self,
        filter: &SearchFilter,
    ) -> Result<SearchPage<SalesOrderDocument>, ServiceError>;

    async fn get_delivery_order(
        &self,
        id: i64,
    ) -> Result<Option<DeliveryOrderDocument>, ServiceError>;
    async fn upsert_delivery_order(&self, doc: &DeliveryOrderDocument)
        -> Result<(), ServiceError>;
    async fn query_delivery_orders(
        &self,
        filter: &SearchFilter,
    ) -> Result<SearchPage<DeliveryOrderDocument>, ServiceError>;
}
