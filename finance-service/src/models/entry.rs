//! Financial entry model: one income or expense line.

use super::ParseEnumError;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Entry direction from the business's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Income,
    Expense,
}

impl EntryType {
    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "income" => Ok(Self::Income),
            "expense" => Ok(Self::Expense),
            other => Err(ParseEnumError {
                kind: "entry type",
                value: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for EntryType {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Entry status.
///
/// `pending -> paid | overdue | cancelled`, `overdue -> paid | cancelled`.
/// `paid` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Paid,
    Overdue,
    Cancelled,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Overdue => "overdue",
            Self::Cancelled => "cancelled",
        }
    }

    /// Statuses an entry may currently hold for a write to `self` to be
    /// accepted. Re-writing the current status is always allowed.
    pub fn allowed_predecessors(self) -> &'static [EntryStatus] {
        match self {
            Self::Pending => &[Self::Pending],
            Self::Overdue => &[Self::Pending, Self::Overdue],
            Self::Paid => &[Self::Pending, Self::Overdue, Self::Paid],
            Self::Cancelled => &[Self::Pending, Self::Overdue, Self::Cancelled],
        }
    }

    /// Labels of [`Self::allowed_predecessors`], ready to bind as `varchar[]`.
    pub fn predecessor_labels(self) -> Vec<&'static str> {
        self.allowed_predecessors()
            .iter()
            .map(EntryStatus::as_str)
            .collect()
    }

    pub fn can_transition_to(self, next: EntryStatus) -> bool {
        next.allowed_predecessors().contains(&self)
    }

    /// Only open entries may be grouped into a payment batch.
    pub fn is_batchable(self) -> bool {
        matches!(self, Self::Pending | Self::Overdue)
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "overdue" => Ok(Self::Overdue),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(ParseEnumError {
                kind: "entry status",
                value: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for EntryStatus {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Stored financial entry.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FinancialEntry {
    pub id: Uuid,
    #[sqlx(try_from = "String")]
    pub entry_type: EntryType,
    pub category: String,
    pub subcategory: Option<String>,
    pub description: String,
    pub amount: Decimal,
    pub entry_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub payment_date: Option<NaiveDate>,
    #[sqlx(try_from = "String")]
    pub status: EntryStatus,
    pub ticket_id: Option<Uuid>,
    pub technician_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
    pub payment_method: Option<String>,
    pub payment_reference: Option<String>,
    pub attachments: Vec<String>,
    pub created_by: Uuid,
    pub updated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

/// Entry with its references resolved for display.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EntryDetails {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub entry: FinancialEntry,
    pub ticket_title: Option<String>,
    pub technician_name: Option<String>,
    pub client_name: Option<String>,
    pub created_by_name: Option<String>,
}

fn validate_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(ValidationError::new("negative_amount"));
    }
    if amount.normalize().scale() > 2 {
        return Err(ValidationError::new("amount_precision"));
    }
    Ok(())
}

/// Input for creating an entry.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateEntry {
    pub entry_type: EntryType,
    #[validate(length(min = 1, max = 100))]
    pub category: String,
    #[validate(length(max = 100))]
    pub subcategory: Option<String>,
    #[validate(length(min = 1, max = 2000))]
    pub description: String,
    #[validate(custom(function = "validate_amount"))]
    pub amount: Decimal,
    pub entry_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub payment_date: Option<NaiveDate>,
    /// Defaults to `pending`.
    #[serde(default)]
    pub status: Option<EntryStatus>,
    pub ticket_id: Option<Uuid>,
    pub technician_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
    #[validate(length(max = 50))]
    pub payment_method: Option<String>,
    #[validate(length(max = 255))]
    pub payment_reference: Option<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
}

impl CreateEntry {
    /// Minimal pending entry; the remaining fields default to empty.
    pub fn new(
        entry_type: EntryType,
        category: impl Into<String>,
        description: impl Into<String>,
        amount: Decimal,
        entry_date: NaiveDate,
    ) -> Self {
        Self {
            entry_type,
            category: category.into(),
            subcategory: None,
            description: description.into(),
            amount,
            entry_date,
            due_date: None,
            payment_date: None,
            status: None,
            ticket_id: None,
            technician_id: None,
            client_id: None,
            payment_method: None,
            payment_reference: None,
            attachments: Vec::new(),
        }
    }
}

/// Full replacement of an entry's mutable fields.
///
/// `version` is the version the caller read; the write only lands if the row
/// still carries it.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdateEntry {
    #[validate(range(min = 1))]
    pub version: i32,
    pub entry_type: EntryType,
    #[validate(length(min = 1, max = 100))]
    pub category: String,
    #[validate(length(max = 100))]
    pub subcategory: Option<String>,
    #[validate(length(min = 1, max = 2000))]
    pub description: String,
    #[validate(custom(function = "validate_amount"))]
    pub amount: Decimal,
    pub entry_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub payment_date: Option<NaiveDate>,
    pub status: EntryStatus,
    pub ticket_id: Option<Uuid>,
    pub technician_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
    #[validate(length(max = 50))]
    pub payment_method: Option<String>,
    #[validate(length(max = 255))]
    pub payment_reference: Option<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
}

impl From<&FinancialEntry> for UpdateEntry {
    /// Start an edit from a freshly read entry.
    fn from(entry: &FinancialEntry) -> Self {
        Self {
            version: entry.version,
            entry_type: entry.entry_type,
            category: entry.category.clone(),
            subcategory: entry.subcategory.clone(),
            description: entry.description.clone(),
            amount: entry.amount,
            entry_date: entry.entry_date,
            due_date: entry.due_date,
            payment_date: entry.payment_date,
            status: entry.status,
            ticket_id: entry.ticket_id,
            technician_id: entry.technician_id,
            client_id: entry.client_id,
            payment_method: entry.payment_method.clone(),
            payment_reference: entry.payment_reference.clone(),
            attachments: entry.attachments.clone(),
        }
    }
}

/// Listing filter. Date bounds are inclusive on `entry_date`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryFilter {
    pub entry_type: Option<EntryType>,
    pub status: Option<EntryStatus>,
    pub category: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub technician_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
    pub ticket_id: Option<Uuid>,
}
