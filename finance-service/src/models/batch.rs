//! Payment batch model.

use super::{EntryDetails, ParseEnumError};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Batch lifecycle: `draft -> approved -> paid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Draft,
    Approved,
    Paid,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Approved => "approved",
            Self::Paid => "paid",
        }
    }

    /// Membership may change until the batch is paid.
    pub fn accepts_membership_changes(self) -> bool {
        !matches!(self, Self::Paid)
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "approved" => Ok(Self::Approved),
            "paid" => Ok(Self::Paid),
            other => Err(ParseEnumError {
                kind: "batch status",
                value: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for BatchStatus {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Stored payment batch. `total_amount` and `entries_count` are derived from
/// the linked entries and never written from caller input.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PaymentBatch {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub technician_id: Option<Uuid>,
    #[sqlx(try_from = "String")]
    pub status: BatchStatus,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub total_amount: Decimal,
    pub entries_count: i32,
    pub created_by: Uuid,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Batch with the people it references resolved.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct BatchSummary {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub batch: PaymentBatch,
    pub technician_name: Option<String>,
    pub created_by_name: Option<String>,
    pub approved_by_name: Option<String>,
}

/// Batch with its linked entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDetails {
    #[serde(flatten)]
    pub summary: BatchSummary,
    pub entries: Vec<EntryDetails>,
}

fn validate_period(start: NaiveDate, end: NaiveDate) -> Result<(), ValidationError> {
    if start > end {
        let mut err = ValidationError::new("period_order");
        err.message = Some("period_start must not be after period_end".into());
        return Err(err);
    }
    Ok(())
}

fn validate_create_period(input: &CreateBatch) -> Result<(), ValidationError> {
    validate_period(input.period_start, input.period_end)
}

fn validate_update_period(input: &UpdateBatch) -> Result<(), ValidationError> {
    validate_period(input.period_start, input.period_end)
}

/// Input for creating a batch. New batches start as empty drafts.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_create_period"))]
pub struct CreateBatch {
    #[validate(length(min = 1, max = 255, message = "Batch name is required"))]
    pub name: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    pub technician_id: Option<Uuid>,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
}

/// Editable batch fields. Only drafts may be edited.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_update_period"))]
pub struct UpdateBatch {
    #[validate(length(min = 1, max = 255, message = "Batch name is required"))]
    pub name: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    pub technician_id: Option<Uuid>,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
}

/// Listing filter. `period_from`/`period_to` select batches whose period
/// overlaps the given range.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchFilter {
    pub status: Option<BatchStatus>,
    pub technician_id: Option<Uuid>,
    pub period_from: Option<NaiveDate>,
    pub period_to: Option<NaiveDate>,
}
