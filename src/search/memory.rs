//! In-memory search-index engine.
//!
//! Documents are held in maps keyed by business code, mirroring the
//! upsert-by-code contract of the index. Query evaluation walks the
//! documents, applies the conjunctive filter set, sorts newest-first and
//! paginates.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::documents::{DeliveryOrderDocument, SalesOrderDocument};
use crate::errors::ServiceError;

use super::{SearchFilter, SearchIndex, SearchPage};

#[derive(Debug, Clone, Default)]
pub struct InMemorySearchIndex {
    sales_orders: Arc<RwLock<HashMap<String, SalesOrderDocument>>>,
    delivery_orders: Arc<RwLock<HashMap<String, DeliveryOrderDocument>>>,
}

impl InMemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sales-order documents currently indexed.
    pub fn sales_order_count(&self) -> usize {
        self.sales_orders.read().unwrap().len()
    }

    pub fn delivery_order_count(&self) -> usize {
        self.delivery_orders.read().unwrap().len()
    }
}

fn keyword_matches(keyword: &str, haystacks: &[&str]) -> bool {
    let needle = keyword.to_lowercase();
    haystacks
        .iter()
        .any(|h| h.to_lowercase().contains(&needle))
}

fn matches_opt<T: PartialEq>(filter: Option<T>, value: T) -> bool {
    filter.map_or(true, |f| f == value)
}

fn matches_opt_of<T: PartialEq>(filter: Option<T>, value: Option<T>) -> bool {
    filter.map_or(true, |f| value.map_or(false, |v| v == f))
}

fn sales_order_matches(doc: &SalesOrderDocument, filter: &SearchFilter) -> bool {
    if !filter.include_deleted && doc.deleted_at.is_some() {
        return false;
    }
    if let Some(keyword) = &filter.keyword {
        let mut fields: Vec<&str> = vec![&doc.code, &doc.agent.name, &doc.store.name];
        fields.extend(doc.details.iter().map(|d| d.product.name.as_str()));
        if !keyword_matches(keyword, &fields) {
            return false;
        }
    }
    if let Some(from) = filter.order_date_from {
        if doc.order_date.map_or(true, |d| d < from) {
            return false;
        }
    }
    if let Some(to) = filter.order_date_to {
        if doc.order_date.map_or(true, |d| d > to) {
            return false;
        }
    }
    if let Some(from) = filter.created_from {
        if doc.created_at.map_or(true, |c| c < from) {
            return false;
        }
    }
    if let Some(to) = filter.created_to {
        if doc.created_at.map_or(true, |c| c > to) {
            return false;
        }
    }

    let live_details = || doc.details.iter().filter(|d| d.deleted_at.is_none());

    matches_opt(filter.agent_id, doc.agent.id)
        && matches_opt(filter.store_id, doc.store.id)
        && matches_opt(filter.status_id, doc.status.id)
        && matches_opt_of(filter.brand_id, doc.brand.as_ref().map(|b| b.id))
        && matches_opt_of(filter.salesman_id, doc.salesman.as_ref().map(|s| s.id))
        && matches_opt_of(
            filter.order_source_id,
            doc.order_source.as_ref().map(|s| s.id),
        )
        && matches_opt_of(filter.province_id, doc.store.province_id)
        && matches_opt_of(filter.city_id, doc.store.city_id)
        && matches_opt_of(filter.district_id, doc.store.district_id)
        && matches_opt_of(filter.village_id, doc.store.village_id)
        && filter
            .product_id
            .map_or(true, |pid| live_details().any(|d| d.product.id == pid))
        && filter.category_id.map_or(true, |cid| {
            live_details().any(|d| d.product.category_id == Some(cid))
        })
}

fn delivery_order_matches(doc: &DeliveryOrderDocument, filter: &SearchFilter) -> bool {
    if !filter.include_deleted && doc.deleted_at.is_some() {
        return false;
    }
    if let Some(keyword) = &filter.keyword {
        let mut fields: Vec<&str> = vec![&doc.code, &doc.agent.name, &doc.store.name];
        if let Some(so) = &doc.sales_order {
            fields.push(&so.code);
        }
        fields.extend(doc.details.iter().map(|d| d.product.name.as_str()));
        if !keyword_matches(keyword, &fields) {
            return false;
        }
    }
    if let Some(from) = filter.order_date_from {
        if doc.order_date.map_or(true, |d| d < from) {
            return false;
        }
    }
    if let Some(to) = filter.order_date_to {
        if doc.order_date.map_or(true, |d| d > to) {
            return false;
        }
    }
    if let Some(from) = filter.created_from {
        if doc.created_at.map_or(true, |c| c < from) {
            return false;
        }
    }
    if let Some(to) = filter.created_to {
        if doc.created_at.map_or(true, |c| c > to) {
            return false;
        }
    }

    let live_details = || doc.details.iter().filter(|d| d.deleted_at.is_none());

    matches_opt(filter.agent_id, doc.agent.id)
        && matches_opt(filter.store_id, doc.store.id)
        && matches_opt(filter.warehouse_id, doc.warehouse.id)
        && matches_opt(filter.status_id, doc.status.id)
        && matches_opt_of(filter.province_id, doc.store.province_id)
        && matches_opt_of(filter.city_id, doc.store.city_id)
        && matches_opt_of(filter.district_id, doc.store.district_id)
        && matches_opt_of(filter.village_id, doc.store.village_id)
        && filter
            .product_id
            .map_or(true, |pid| live_details().any(|d| d.product.id == pid))
        && filter.category_id.map_or(true, |cid| {
            live_details().any(|d| d.product.category_id == Some(cid))
        })
}

fn paginate<T>(mut hits: Vec<T>, filter: &SearchFilter, sort_key: impl Fn(&T) -> i64) -> SearchPage<T> {
    // Newest documents first, stable across re-index because the
    // surrogate id breaks creation-time ties.
    hits.sort_by_key(|doc| std::cmp::Reverse(sort_key(doc)));

    let total = hits.len() as u64;
    let page = filter.page();
    let per_page = filter.per_page();
    let offset = ((page - 1) * per_page) as usize;

    let items = hits
        .into_iter()
        .skip(offset)
        .take(per_page as usize)
        .collect();

    SearchPage {
        items,
        total,
        page,
        per_page,
    }
}

#[async_trait]
impl SearchIndex for InMemorySearchIndex {
    async fn get_sales_order(&self, id: i64) -> Result<Option<SalesOrderDocument>, ServiceError> {
        let store = self.sales_orders.read().unwrap();
        Ok(store.values().find(|doc| doc.id == id).cloned())
    }

    async fn upsert_sales_order(&self, doc: &SalesOrderDocument) -> Result<(), ServiceError> {
        if doc.code.is_empty() {
            return Err(ServiceError::SearchIndexError(
                "sales order document has no business code".into(),
            ));
        }
        let mut store = self.sales_orders.write().unwrap();
        store.insert(doc.code.clone(), doc.clone());
        Ok(())
    }

    async fn query_sales_orders(
        &self,
        filter: &SearchFilter,
    ) -> Result<SearchPage<SalesOrderDocument>, ServiceError> {
        let store = self.sales_orders.read().unwrap();
        let hits: Vec<SalesOrderDocument> = store
            .values()
            .filter(|doc| sales_order_matches(doc, filter))
            .cloned()
            .collect();
        Ok(paginate(hits, filter, |doc| doc.id))
    }

    async fn get_delivery_order(
        &self,
        id: i64,
    ) -> Result<Option<DeliveryOrderDocument>, ServiceError> {
        let store = self.delivery_orders.read().unwrap();
        Ok(store.values().find(|doc| doc.id == id).cloned())
    }

    async fn upsert_delivery_order(
        &self,
        doc: &DeliveryOrderDocument,
    ) -> Result<(), ServiceError> {
        if doc.code.is_empty() {
            return Err(ServiceError::SearchIndexError(
                "delivery order document has no business code".into(),
            ));
        }
        let mut store = self.delivery_orders.write().unwrap();
        store.insert(doc.code.clone(), doc.clone());
        Ok(())
    }

    async fn query_delivery_orders(
        &self,
        filter: &SearchFilter,
    ) -> Result<SearchPage<DeliveryOrderDocument>, ServiceError> {
        let store = self.delivery_orders.read().unwrap();
        let hits: Vec<DeliveryOrderDocument> = store
            .values()
            .filter(|doc| delivery_order_matches(doc, filter))
            .cloned()
            .collect();
        Ok(paginate(hits, filter, |doc| doc.id))
    }
}
