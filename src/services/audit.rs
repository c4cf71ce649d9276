use chrono::Utc;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ConnectionTrait};
use serde::Serialize;
use strum::Display;

use crate::entities::document_log;
use crate::errors::ServiceError;
use crate::logging::current_request_id;

/// Kind of mutation being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum AuditAction {
    Insert,
    Update,
    Delete,
}

/// Writer for the document log (audit trail).
///
/// Entries are written inside the caller's transaction so the trail can
/// never record a mutation that did not commit, and a mutation can never
/// commit without its trail entry. A failure here is fatal to the
/// surrounding operation.
#[derive(Debug, Clone, Default)]
pub struct DocumentLogService;

impl DocumentLogService {
    pub fn new() -> Self {
        Self
    }

    /// Records one aggregate mutation with the current request's
    /// correlation ID and a JSON snapshot of the mutated aggregate.
    pub async fn record<C, S>(
        &self,
        db: &C,
        action: AuditAction,
        entity: &str,
        entity_id: i64,
        snapshot: &S,
    ) -> Result<(), ServiceError>
    where
        C: ConnectionTrait,
        S: Serialize,
    {
        let snapshot = serde_json::to_value(snapshot)?;
        let entry = document_log::ActiveModel {
            request_id: Set(current_request_id().map(|rid| rid.as_str().to_string())),
            action: Set(action.to_string()),
            entity: Set(entity.to_string()),
            entity_id: Set(entity_id),
            snapshot: Set(snapshot),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        entry
            .insert(db)
            .await
            .map_err(|e| ServiceError::AuditLogError(e.to_string()))?;
        Ok(())
    }
}
