//! Order status vocabulary and derivation rules.
//!
//! Statuses live in the `order_statuses` table keyed by `(name, type)`
//! and are resolved once at startup into an in-memory registry. Engine
//! code only ever names statuses through [`StatusScope`] and
//! [`StatusName`]; no raw status id appears outside this module.

use std::collections::HashMap;

use sea_orm::{ActiveValue::Set, ConnectionTrait, EntityTrait, PaginatorTrait};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use tracing::warn;

use crate::entities::order_status::{self, Entity as OrderStatusEntity};
use crate::errors::ServiceError;

/// Which aggregate a status row applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum StatusScope {
    SalesOrder,
    SalesOrderDetail,
    DeliveryOrder,
    DeliveryOrderDetail,
}

/// Status names shared by every scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum StatusName {
    Open,
    Partial,
    Closed,
    Cancelled,
}

/// In-memory resolution of `(scope, name)` to `order_statuses.id` and
/// back. Loaded once; the table is never written by the engines.
#[derive(Debug, Clone)]
pub struct StatusRegistry {
    by_key: HashMap<(StatusScope, StatusName), i32>,
    by_id: HashMap<i32, (StatusScope, StatusName)>,
}

impl StatusRegistry {
    /// Loads every status row and indexes it both ways. Rows with names
    /// or scopes outside the vocabulary are skipped with a warning;
    /// a missing `(scope, name)` combination is a startup error.
    pub async fn load(db: &impl ConnectionTrait) -> Result<Self, ServiceError> {
        let rows = OrderStatusEntity::find().all(db).await?;

        let mut by_key = HashMap::new();
        let mut by_id = HashMap::new();
        for row in rows {
            match (
                row.scope.parse::<StatusScope>(),
                row.name.parse::<StatusName>(),
            ) {
                (Ok(scope), Ok(name)) => {
                    by_key.insert((scope, name), row.id);
                    by_id.insert(row.id, (scope, name));
                }
                _ => {
                    warn!(
                        status_id = row.id,
                        name = %row.name,
                        scope = %row.scope,
                        "Skipping order status outside the known vocabulary"
                    );
                }
            }
        }

        for scope in StatusScope::iter() {
            for name in StatusName::iter() {
                if !by_key.contains_key(&(scope, name)) {
                    return Err(ServiceError::InternalError(format!(
                        "order status {}/{} is not present in the database",
                        scope, name
                    )));
                }
            }
        }

        Ok(Self { by_key, by_id })
    }

    /// Inserts the full status vocabulary when the table is empty.
    pub async fn seed(db: &impl ConnectionTrait) -> Result<(), ServiceError> {
        let existing = OrderStatusEntity::find().count(db).await?;
        if existing > 0 {
            return Ok(());
        }

        let rows: Vec<order_status::ActiveModel> = StatusScope::iter()
            .flat_map(|scope| {
                StatusName::iter().map(move |name| order_status::ActiveModel {
                    name: Set(name.to_string()),
                    scope: Set(scope.to_string()),
                    ..Default::default()
                })
            })
            .collect();

        OrderStatusEntity::insert_many(rows).exec(db).await?;
        Ok(())
    }

    /// Resolves a status id. Infallible after a successful `load`, since
    /// load verifies the full vocabulary is present.
    pub fn id(&self, scope: StatusScope, name: StatusName) -> i32 {
        self.by_key[&(scope, name)]
    }

    pub fn decode(&self, id: i32) -> Option<(StatusScope, StatusName)> {
        self.by_id.get(&id).copied()
    }

    /// Status name for an id, ignoring scope.
    pub fn name_of(&self, id: i32) -> Option<StatusName> {
        self.by_id.get(&id).map(|(_, name)| *name)
    }
}

/// Per-line status after a reconciliation step.
pub fn derive_line_status(sent_qty: i32, residual_qty: i32) -> StatusName {
    if residual_qty == 0 {
        StatusName::Closed
    } else if sent_qty > 0 {
        StatusName::Partial
    } else {
        StatusName::Open
    }
}

/// Order-level status derived from the full detail set. Always recomputed
/// from every non-deleted line; never accumulated incrementally.
pub fn derive_order_status<I>(lines: I) -> StatusName
where
    I: IntoIterator<Item = (i32, i32)>,
{
    let mut any_line = false;
    let mut total_sent = 0i64;
    let mut total_residual = 0i64;
    for (sent, residual) in lines {
        any_line = true;
        total_sent += i64::from(sent);
        total_residual += i64::from(residual);
    }

    if any_line && total_residual == 0 {
        StatusName::Closed
    } else if total_sent > 0 {
        StatusName::Partial
    } else {
        StatusName::Open
    }
}
