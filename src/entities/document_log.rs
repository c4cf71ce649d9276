use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Audit trail row: one entry per aggregate mutation, carrying the
/// correlation ID of the originating request and a snapshot of the
/// mutated aggregate. Written inside the mutating transaction.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "document_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub request_id: Option<String>,
    /// "insert", "update" or "delete"
    pub action: String,
    /// Aggregate type, e.g. "sales_order"
    pub entity: String,
    pub entity_id: i64,
    pub snapshot: Json,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
