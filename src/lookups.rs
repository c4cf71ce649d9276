//! Lookup repositories and the enrichment coordinator.
//!
//! Every write or sync path resolves a handful of reference entities
//! before persisting or indexing. Lookups for one aggregate are
//! dispatched concurrently and joined; the join is cancellation-aware,
//! so the first failure drops the outstanding sibling lookups instead of
//! leaving them running against the pool.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use futures::future;
use sea_orm::{DatabaseConnection, EntityTrait};

use crate::entities::{
    agent::{self, Entity as AgentEntity},
    brand::{self, Entity as BrandEntity},
    category::{self, Entity as CategoryEntity},
    delivery_order::{self},
    order_source::{self, Entity as OrderSourceEntity},
    product::{self, Entity as ProductEntity},
    sales_order::{self},
    salesman::{self, Entity as SalesmanEntity},
    store::{self, Entity as StoreEntity},
    uom::{self, Entity as UomEntity},
    user::{self, Entity as UserEntity},
    warehouse::{self, Entity as WarehouseEntity},
};
use crate::errors::ServiceError;

/// Joins a set of homogeneous lookup futures. Fails fast: the first
/// error is returned and the remaining futures are dropped (cancelled).
pub async fn gather<T, F>(tasks: Vec<F>) -> Result<Vec<T>, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    future::try_join_all(tasks).await
}

/// Reference entities resolved for a sales order header.
#[derive(Debug, Clone)]
pub struct SalesOrderRefs {
    pub agent: agent::Model,
    pub store: store::Model,
    pub brand: Option<brand::Model>,
    pub salesman: Option<salesman::Model>,
    pub order_source: Option<order_source::Model>,
    pub user: Option<user::Model>,
}

/// Reference entities resolved for a delivery order header.
#[derive(Debug, Clone)]
pub struct DeliveryOrderRefs {
    pub agent: agent::Model,
    pub store: store::Model,
    pub warehouse: warehouse::Model,
}

/// Reference entities resolved for a batch of detail lines, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct DetailRefs {
    pub products: HashMap<i64, product::Model>,
    pub uoms: HashMap<i64, uom::Model>,
    pub categories: HashMap<i64, category::Model>,
}

impl DetailRefs {
    pub fn product(&self, id: i64) -> Result<&product::Model, ServiceError> {
        self.products
            .get(&id)
            .ok_or_else(|| ServiceError::not_found("product", id))
    }

    pub fn uom(&self, id: i64) -> Result<&uom::Model, ServiceError> {
        self.uoms
            .get(&id)
            .ok_or_else(|| ServiceError::not_found("uom", id))
    }

    pub fn category_name(&self, id: Option<i64>) -> Option<String> {
        id.and_then(|id| self.categories.get(&id))
            .map(|c| c.name.clone())
    }
}

/// Key-by-id accessors over the reference tables.
#[derive(Clone)]
pub struct LookupService {
    db: Arc<DatabaseConnection>,
}

impl LookupService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn agent(&self, id: i64) -> Result<agent::Model, ServiceError> {
        AgentEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("agent", id))
    }

    pub async fn store(&self, id: i64) -> Result<store::Model, ServiceError> {
        StoreEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("store", id))
    }

    pub async fn brand(&self, id: i64) -> Result<brand::Model, ServiceError> {
        BrandEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("brand", id))
    }

    pub async fn product(&self, id: i64) -> Result<product::Model, ServiceError> {
        ProductEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("product", id))
    }

    pub async fn category(&self, id: i64) -> Result<category::Model, ServiceError> {
        CategoryEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("category", id))
    }

    pub async fn uom(&self, id: i64) -> Result<uom::Model, ServiceError> {
        UomEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("uom", id))
    }

    pub async fn warehouse(&self, id: i64) -> Result<warehouse::Model, ServiceError> {
        WarehouseEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("warehouse", id))
    }

    pub async fn salesman(&self, id: i64) -> Result<salesman::Model, ServiceError> {
        SalesmanEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("salesman", id))
    }

    pub async fn order_source(&self, id: i64) -> Result<order_source::Model, ServiceError> {
        OrderSourceEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("order source", id))
    }

    pub async fn user(&self, id: i64) -> Result<user::Model, ServiceError> {
        UserEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("user", id))
    }

    async fn brand_opt(&self, id: Option<i64>) -> Result<Option<brand::Model>, ServiceError> {
        match id {
            Some(id) => self.brand(id).await.map(Some),
            None => Ok(None),
        }
    }

    async fn salesman_opt(&self, id: Option<i64>) -> Result<Option<salesman::Model>, ServiceError> {
        match id {
            Some(id) => self.salesman(id).await.map(Some),
            None => Ok(None),
        }
    }

    async fn order_source_opt(
        &self,
        id: Option<i64>,
    ) -> Result<Option<order_source::Model>, ServiceError> {
        match id {
            Some(id) => self.order_source(id).await.map(Some),
            None => Ok(None),
        }
    }

    async fn user_opt(&self, id: Option<i64>) -> Result<Option<user::Model>, ServiceError> {
        match id {
            Some(id) => self.user(id).await.map(Some),
            None => Ok(None),
        }
    }

    /// Resolves every reference a sales-order header carries, concurrently.
    pub async fn sales_order_refs(
        &self,
        order: &sales_order::Model,
    ) -> Result<SalesOrderRefs, ServiceError> {
        let (agent, store, brand, salesman, order_source, user) = tokio::try_join!(
            self.agent(order.agent_id),
            self.store(order.store_id),
            self.brand_opt(order.brand_id),
            self.salesman_opt(order.salesman_id),
            self.order_source_opt(order.order_source_id),
            self.user_opt(order.user_id),
        )?;

        Ok(SalesOrderRefs {
            agent,
            store,
            brand,
            salesman,
            order_source,
            user,
        })
    }

    /// Resolves every reference a delivery-order header carries, concurrently.
    pub async fn delivery_order_refs(
        &self,
        order: &delivery_order::Model,
    ) -> Result<DeliveryOrderRefs, ServiceError> {
        self.fulfillment_refs(order.agent_id, order.store_id, order.warehouse_id)
            .await
    }

    /// Same resolution as [`Self::delivery_order_refs`], usable before
    /// the delivery-order row exists.
    pub async fn fulfillment_refs(
        &self,
        agent_id: i64,
        store_id: i64,
        warehouse_id: i64,
    ) -> Result<DeliveryOrderRefs, ServiceError> {
        let (agent, store, warehouse) = tokio::try_join!(
            self.agent(agent_id),
            self.store(store_id),
            self.warehouse(warehouse_id),
        )?;

        Ok(DeliveryOrderRefs {
            agent,
            store,
            warehouse,
        })
    }

    /// Resolves the products and units of measure a batch of detail lines
    /// references, then the categories those products point at. Each id is
    /// fetched once even when many lines share it.
    pub async fn detail_refs(
        &self,
        product_ids: impl IntoIterator<Item = i64>,
        uom_ids: impl IntoIterator<Item = i64>,
    ) -> Result<DetailRefs, ServiceError> {
        let product_ids: BTreeSet<i64> = product_ids.into_iter().collect();
        let uom_ids: BTreeSet<i64> = uom_ids.into_iter().collect();

        let (products, uoms) = tokio::try_join!(
            gather(product_ids.iter().map(|id| self.product(*id)).collect()),
            gather(uom_ids.iter().map(|id| self.uom(*id)).collect()),
        )?;

        let products: HashMap<i64, product::Model> =
            products.into_iter().map(|m| (m.id, m)).collect();
        let uoms: HashMap<i64, uom::Model> = uoms.into_iter().map(|m| (m.id, m)).collect();

        let category_ids: BTreeSet<i64> =
            products.values().filter_map(|p| p.category_id).collect();
        let categories = gather(category_ids.iter().map(|id| self.category(*id)).collect())
            .await?
            .into_iter()
            .map(|m| (m.id, m))
            .collect();

        Ok(DetailRefs {
            products,
            uoms,
            categories,
        })
    }
}
