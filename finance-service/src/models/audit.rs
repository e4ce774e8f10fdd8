//! Audit trail rows. Immutable once written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Entities the ledger audits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    FinancialEntry,
    PaymentBatch,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FinancialEntry => "financial_entry",
            Self::PaymentBatch => "payment_batch",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    StatusUpdate,
    BulkStatusUpdate,
    Overdue,
    Delete,
    AddEntries,
    RemoveEntry,
    Approve,
    Pay,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::StatusUpdate => "status_update",
            Self::BulkStatusUpdate => "bulk_status_update",
            Self::Overdue => "overdue",
            Self::Delete => "delete",
            Self::AddEntries => "add_entries",
            Self::RemoveEntry => "remove_entry",
            Self::Approve => "approve",
            Self::Pay => "pay",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FinancialAuditLog {
    pub id: i64,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub action: String,
    pub changes: serde_json::Value,
    pub performed_by: Option<Uuid>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Audit row with the performer's display name.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AuditLogEntry {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub log: FinancialAuditLog,
    pub performed_by_name: Option<String>,
}
