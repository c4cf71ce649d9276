use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Shared status enumeration keyed by `(name, type)`, e.g.
/// `("partial", "sales_order_detail")`. Looked up, never mutated, by the
/// write paths; resolved once at startup into the status registry.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_statuses")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    #[sea_orm(column_name = "type")]
    pub scope: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
