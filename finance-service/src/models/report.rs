//! Reporting shapes.

use super::{parse_date_param, EntryDetails, EntryType};
use chrono::{Datelike, Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use sqlx::FromRow;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Inclusive `entry_date` window. A missing bound is open-ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportWindow {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl ReportWindow {
    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Build a window from raw query parameters. Malformed dates and
    /// inverted ranges are rejected instead of silently widening the report.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self, AppError> {
        let window = Self {
            start: parse_date_param("start_date", start)?,
            end: parse_date_param("end_date", end)?,
        };
        if let (Some(s), Some(e)) = (window.start, window.end) {
            if s > e {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "start_date {} is after end_date {}",
                    s,
                    e
                )));
            }
        }
        Ok(window)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub total_income: Decimal,
    pub total_expense: Decimal,
    pub balance: Decimal,
    pub income_by_category: BTreeMap<String, Decimal>,
    pub expense_by_category: BTreeMap<String, Decimal>,
    /// Not scoped by the report window.
    pub pending_count: i64,
    /// Not scoped by the report window.
    pub overdue_count: i64,
    pub recent_entries: Vec<EntryDetails>,
}

/// Cash-flow bucket size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    #[default]
    Day,
    Week,
    Month,
}

impl GroupBy {
    /// Unknown values fall back to `Day`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "week" => Self::Week,
            "month" => Self::Month,
            _ => Self::Day,
        }
    }

    /// First day of the bucket containing `date`. Weeks start on Monday.
    pub fn period_start(self, date: NaiveDate) -> NaiveDate {
        match self {
            Self::Day => date,
            Self::Week => date - Duration::days(date.weekday().num_days_from_monday() as i64),
            Self::Month => date.with_day(1).unwrap_or(date),
        }
    }

    /// Display label of the bucket containing `date`.
    pub fn period_label(self, date: NaiveDate) -> String {
        match self {
            Self::Day => date.format("%Y-%m-%d").to_string(),
            Self::Week => {
                let week = date.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            Self::Month => date.format("%Y-%m").to_string(),
        }
    }
}

/// Per-day, per-type sum as returned by the database.
#[derive(Debug, Clone, FromRow)]
pub struct DailyTotal {
    pub entry_date: NaiveDate,
    #[sqlx(try_from = "String")]
    pub entry_type: EntryType,
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashFlowRow {
    pub period: String,
    pub period_start: NaiveDate,
    pub income: Decimal,
    pub expense: Decimal,
    pub balance: Decimal,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TechnicianPayment {
    pub technician_id: Uuid,
    pub technician_name: Option<String>,
    pub total_amount: Decimal,
    pub entries_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_core::error::ErrorKind;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn group_by_defaults_to_day() {
        assert_eq!(GroupBy::parse("week"), GroupBy::Week);
        assert_eq!(GroupBy::parse("MONTH"), GroupBy::Month);
        assert_eq!(GroupBy::parse("fortnight"), GroupBy::Day);
        assert_eq!(GroupBy::parse(""), GroupBy::Day);
    }

    #[test]
    fn weeks_start_on_monday() {
        // 2024-01-07 is a Sunday.
        assert_eq!(GroupBy::Week.period_start(date(2024, 1, 7)), date(2024, 1, 1));
        assert_eq!(GroupBy::Week.period_start(date(2024, 1, 8)), date(2024, 1, 8));
    }

    #[test]
    fn week_labels_use_iso_year() {
        // 2024-12-30 belongs to ISO week 1 of 2025.
        assert_eq!(GroupBy::Week.period_label(date(2024, 12, 30)), "2025-W01");
        assert_eq!(GroupBy::Week.period_label(date(2024, 1, 5)), "2024-W01");
    }

    #[test]
    fn month_buckets() {
        assert_eq!(GroupBy::Month.period_start(date(2024, 2, 29)), date(2024, 2, 1));
        assert_eq!(GroupBy::Month.period_label(date(2024, 2, 29)), "2024-02");
        assert_eq!(GroupBy::Day.period_label(date(2024, 2, 29)), "2024-02-29");
    }

    #[test]
    fn window_parse_accepts_open_bounds() {
        let window = ReportWindow::parse(Some("2024-01-01"), None).unwrap();
        assert_eq!(window.start, Some(date(2024, 1, 1)));
        assert_eq!(window.end, None);
    }

    #[test]
    fn window_parse_rejects_typos() {
        let err = ReportWindow::parse(Some("2024-01-01"), Some("2024-1-3x")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn window_parse_rejects_inverted_range() {
        let err = ReportWindow::parse(Some("2024-02-01"), Some("2024-01-01")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
