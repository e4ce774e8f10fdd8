//! Append-only audit trail for entries and batches.

use crate::models::{Actor, AuditAction, AuditLogEntry, EntityType, FinancialAuditLog};
use crate::services::clock::Clock;
use crate::services::database::{db_error, Database};
use crate::services::metrics::record_error;
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

const AUDIT_COLUMNS: &str = "a.id, a.entity_type, a.entity_id, a.action, a.changes, \
     a.performed_by, a.ip_address, a.user_agent, a.created_at";

#[derive(Clone)]
pub struct AuditTrail {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl AuditTrail {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Append one audit row.
    #[instrument(skip(self, changes, actor), fields(entity_type = %entity_type, entity_id = %entity_id, action = %action))]
    pub async fn record<C>(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        action: AuditAction,
        changes: &C,
        actor: Option<&Actor>,
    ) -> Result<FinancialAuditLog, AppError>
    where
        C: Serialize + ?Sized,
    {
        let changes = serde_json::to_value(changes).map_err(|e| {
            AppError::InternalError(anyhow::anyhow!("Failed to serialize audit changes: {}", e))
        })?;
        let now = self.clock.now();

        self.db
            .run("record_audit", async {
                let sql = format!(
                    r#"
                    INSERT INTO financial_audit_logs AS a (
                        entity_type, entity_id, action, changes,
                        performed_by, ip_address, user_agent, created_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    RETURNING {AUDIT_COLUMNS}
                    "#
                );
                sqlx::query_as::<_, FinancialAuditLog>(&sql)
                    .bind(entity_type.as_str())
                    .bind(entity_id)
                    .bind(action.as_str())
                    .bind(&changes)
                    .bind(actor.map(|a| a.user_id))
                    .bind(actor.and_then(|a| a.ip_address.as_deref()))
                    .bind(actor.and_then(|a| a.user_agent.as_deref()))
                    .bind(now)
                    .fetch_one(self.db.pool())
                    .await
                    .map_err(db_error("Failed to record audit log"))
            })
            .await
    }

    /// Append one row per entity in a single statement. Used for bulk writes
    /// where every affected row gets the same change set.
    #[instrument(skip(self, entity_ids, changes, actor), fields(entity_type = %entity_type, action = %action, count = entity_ids.len()))]
    pub async fn record_many<C>(
        &self,
        entity_type: EntityType,
        entity_ids: &[Uuid],
        action: AuditAction,
        changes: &C,
        actor: Option<&Actor>,
    ) -> Result<u64, AppError>
    where
        C: Serialize + ?Sized,
    {
        if entity_ids.is_empty() {
            return Ok(0);
        }
        let changes = serde_json::to_value(changes).map_err(|e| {
            AppError::InternalError(anyhow::anyhow!("Failed to serialize audit changes: {}", e))
        })?;
        let now = self.clock.now();

        self.db
            .run("record_audit_many", async {
                let result = sqlx::query(
                    r#"
                    INSERT INTO financial_audit_logs (
                        entity_type, entity_id, action, changes,
                        performed_by, ip_address, user_agent, created_at
                    )
                    SELECT $1, ids.id, $3, $4, $5, $6, $7, $8
                    FROM UNNEST($2::uuid[]) AS ids(id)
                    "#,
                )
                .bind(entity_type.as_str())
                .bind(entity_ids)
                .bind(action.as_str())
                .bind(&changes)
                .bind(actor.map(|a| a.user_id))
                .bind(actor.and_then(|a| a.ip_address.as_deref()))
                .bind(actor.and_then(|a| a.user_agent.as_deref()))
                .bind(now)
                .execute(self.db.pool())
                .await
                .map_err(db_error("Failed to record audit logs"))?;
                Ok(result.rows_affected())
            })
            .await
    }

    /// Record after the primary write committed. A failure here is logged
    /// and counted, never returned.
    pub async fn record_best_effort<C>(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        action: AuditAction,
        changes: &C,
        actor: Option<&Actor>,
    ) where
        C: Serialize + ?Sized,
    {
        if let Err(e) = self
            .record(entity_type, entity_id, action, changes, actor)
            .await
        {
            warn!(
                entity_type = %entity_type,
                entity_id = %entity_id,
                action = %action,
                error = %e,
                "Failed to write audit log"
            );
            record_error("audit_write");
        }
    }

    pub async fn record_many_best_effort<C>(
        &self,
        entity_type: EntityType,
        entity_ids: &[Uuid],
        action: AuditAction,
        changes: &C,
        actor: Option<&Actor>,
    ) where
        C: Serialize + ?Sized,
    {
        if let Err(e) = self
            .record_many(entity_type, entity_ids, action, changes, actor)
            .await
        {
            warn!(
                entity_type = %entity_type,
                action = %action,
                count = entity_ids.len(),
                error = %e,
                "Failed to write audit logs"
            );
            record_error("audit_write");
        }
    }

    /// Audit rows for one entity, newest first.
    #[instrument(skip(self), fields(entity_type = %entity_type, entity_id = %entity_id))]
    pub async fn history(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
    ) -> Result<Vec<AuditLogEntry>, AppError> {
        self.db
            .run("audit_history", async {
                let sql = format!(
                    r#"
                    SELECT {AUDIT_COLUMNS}, u.name AS performed_by_name
                    FROM financial_audit_logs a
                    LEFT JOIN users u ON u.id = a.performed_by
                    WHERE a.entity_type = $1 AND a.entity_id = $2
                    ORDER BY a.created_at DESC, a.id DESC
                    "#
                );
                sqlx::query_as::<_, AuditLogEntry>(&sql)
                    .bind(entity_type.as_str())
                    .bind(entity_id)
                    .fetch_all(self.db.pool())
                    .await
                    .map_err(db_error("Failed to load audit history"))
            })
            .await
    }
}
