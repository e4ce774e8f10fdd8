//! Domain models for finance-service.

mod audit;
mod batch;
mod common;
mod entry;
mod report;

pub use audit::{AuditAction, AuditLogEntry, EntityType, FinancialAuditLog};
pub use batch::{
    BatchDetails, BatchFilter, BatchStatus, BatchSummary, CreateBatch, PaymentBatch, UpdateBatch,
};
pub use common::{
    check_payment_reference, parse_date_param, Actor, Page, Pagination, DEFAULT_PAGE_LIMIT,
    MAX_PAGE_LIMIT, MAX_REFERENCE_LEN,
};
pub use entry::{
    CreateEntry, EntryDetails, EntryFilter, EntryStatus, EntryType, FinancialEntry, UpdateEntry,
};
pub use report::{
    CashFlowRow, DailyTotal, DashboardSummary, GroupBy, ReportWindow, TechnicianPayment,
};

/// Raised when a stored or supplied enum label is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}
