//! Reporting engine: dashboard, cash flow and technician payouts.
//!
//! Soft-deleted and cancelled entries never count towards money totals.

use crate::models::{
    CashFlowRow, DailyTotal, DashboardSummary, EntryDetails, EntryType, GroupBy, ReportWindow,
    TechnicianPayment,
};
use crate::services::database::{db_error, Database};
use crate::services::entries::{DETAIL_COLUMNS, DETAIL_JOINS, ENTRY_COLUMNS};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::FromRow;
use std::collections::BTreeMap;
use tracing::{info, instrument};
use uuid::Uuid;

const RECENT_ENTRIES_LIMIT: i64 = 10;

/// Window predicate on `e.entry_date`; binds `$1` (start) and `$2` (end).
const WINDOW: &str = "($1::date IS NULL OR e.entry_date >= $1) \
     AND ($2::date IS NULL OR e.entry_date <= $2)";

#[derive(Debug, Clone, FromRow)]
struct CategoryTotal {
    #[sqlx(try_from = "String")]
    entry_type: EntryType,
    category: String,
    total: Decimal,
}

#[derive(Clone)]
pub struct ReportingEngine {
    db: Database,
    technician_payment_categories: Vec<String>,
}

impl ReportingEngine {
    pub fn new(db: Database, technician_payment_categories: Vec<String>) -> Self {
        Self {
            db,
            technician_payment_categories,
        }
    }

    /// Totals, per-category breakdown, open counts and recent activity, all
    /// read from one snapshot.
    #[instrument(skip(self), fields(start = ?window.start, end = ?window.end))]
    pub async fn dashboard(&self, window: ReportWindow) -> Result<DashboardSummary, AppError> {
        self.db
            .run("report_dashboard", async {
                let mut tx = self.db.begin_snapshot().await?;

                let totals_sql = format!(
                    r#"
                    SELECT e.entry_type, e.category, SUM(e.amount) AS total
                    FROM financial_entries e
                    WHERE e.deleted_at IS NULL AND e.status <> 'cancelled' AND {WINDOW}
                    GROUP BY e.entry_type, e.category
                    "#
                );
                let totals = sqlx::query_as::<_, CategoryTotal>(&totals_sql)
                    .bind(window.start)
                    .bind(window.end)
                    .fetch_all(&mut *tx)
                    .await
                    .map_err(db_error("Failed to total entries by category"))?;

                let (pending_count, overdue_count): (i64, i64) = sqlx::query_as(
                    r#"
                    SELECT COUNT(*) FILTER (WHERE status = 'pending'),
                           COUNT(*) FILTER (WHERE status = 'overdue')
                    FROM financial_entries
                    WHERE deleted_at IS NULL
                    "#,
                )
                .fetch_one(&mut *tx)
                .await
                .map_err(db_error("Failed to count open entries"))?;

                let recent_sql = format!(
                    r#"
                    SELECT {ENTRY_COLUMNS}, {DETAIL_COLUMNS}
                    FROM financial_entries e
                    {DETAIL_JOINS}
                    WHERE e.deleted_at IS NULL AND {WINDOW}
                    ORDER BY e.created_at DESC, e.id DESC
                    LIMIT $3
                    "#
                );
                let recent_entries = sqlx::query_as::<_, EntryDetails>(&recent_sql)
                    .bind(window.start)
                    .bind(window.end)
                    .bind(RECENT_ENTRIES_LIMIT)
                    .fetch_all(&mut *tx)
                    .await
                    .map_err(db_error("Failed to load recent entries"))?;

                tx.commit()
                    .await
                    .map_err(db_error("Failed to close read snapshot"))?;

                let summary = summarize(totals, pending_count, overdue_count, recent_entries);
                info!(
                    total_income = %summary.total_income,
                    total_expense = %summary.total_expense,
                    "Dashboard computed"
                );
                Ok(summary)
            })
            .await
    }

    /// Income and expense per period, oldest first. Periods with no
    /// activity are omitted.
    #[instrument(skip(self), fields(start = ?window.start, end = ?window.end, group_by = ?group_by))]
    pub async fn cash_flow(
        &self,
        window: ReportWindow,
        group_by: GroupBy,
    ) -> Result<Vec<CashFlowRow>, AppError> {
        self.db
            .run("report_cash_flow", async {
                let sql = format!(
                    r#"
                    SELECT e.entry_date, e.entry_type, SUM(e.amount) AS total
                    FROM financial_entries e
                    WHERE e.deleted_at IS NULL AND e.status <> 'cancelled' AND {WINDOW}
                    GROUP BY e.entry_date, e.entry_type
                    "#
                );
                let daily = sqlx::query_as::<_, DailyTotal>(&sql)
                    .bind(window.start)
                    .bind(window.end)
                    .fetch_all(self.db.pool())
                    .await
                    .map_err(db_error("Failed to total entries by day"))?;

                Ok(merge_cash_flow(daily, group_by))
            })
            .await
    }

    /// Payouts per technician over the configured payout categories,
    /// largest first.
    #[instrument(skip(self), fields(start = ?window.start, end = ?window.end))]
    pub async fn technician_payments(
        &self,
        window: ReportWindow,
        technician_id: Option<Uuid>,
    ) -> Result<Vec<TechnicianPayment>, AppError> {
        self.db
            .run("report_technician_payments", async {
                let sql = format!(
                    r#"
                    SELECT e.technician_id AS technician_id,
                           tech.name AS technician_name,
                           SUM(e.amount) AS total_amount,
                           COUNT(*) AS entries_count
                    FROM financial_entries e
                    LEFT JOIN technicians tech ON tech.id = e.technician_id
                    WHERE e.deleted_at IS NULL
                      AND e.status <> 'cancelled'
                      AND e.technician_id IS NOT NULL
                      AND e.category = ANY($3)
                      AND ($4::uuid IS NULL OR e.technician_id = $4)
                      AND {WINDOW}
                    GROUP BY e.technician_id, tech.name
                    ORDER BY total_amount DESC, e.technician_id
                    "#
                );
                sqlx::query_as::<_, TechnicianPayment>(&sql)
                    .bind(window.start)
                    .bind(window.end)
                    .bind(&self.technician_payment_categories)
                    .bind(technician_id)
                    .fetch_all(self.db.pool())
                    .await
                    .map_err(db_error("Failed to total technician payments"))
            })
            .await
    }
}

fn summarize(
    totals: Vec<CategoryTotal>,
    pending_count: i64,
    overdue_count: i64,
    recent_entries: Vec<EntryDetails>,
) -> DashboardSummary {
    let mut income_by_category = BTreeMap::new();
    let mut expense_by_category = BTreeMap::new();

    for row in totals {
        let bucket = match row.entry_type {
            EntryType::Income => &mut income_by_category,
            EntryType::Expense => &mut expense_by_category,
        };
        *bucket.entry(row.category).or_insert(Decimal::ZERO) += row.total;
    }

    let total_income: Decimal = income_by_category.values().copied().sum();
    let total_expense: Decimal = expense_by_category.values().copied().sum();

    DashboardSummary {
        total_income,
        total_expense,
        balance: total_income - total_expense,
        income_by_category,
        expense_by_category,
        pending_count,
        overdue_count,
        recent_entries,
    }
}

/// Fold per-day totals into `group_by` buckets, sorted by period start.
fn merge_cash_flow(daily: Vec<DailyTotal>, group_by: GroupBy) -> Vec<CashFlowRow> {
    let mut buckets: BTreeMap<NaiveDate, (Decimal, Decimal)> = BTreeMap::new();

    for row in daily {
        let (income, expense) = buckets
            .entry(group_by.period_start(row.entry_date))
            .or_insert((Decimal::ZERO, Decimal::ZERO));
        match row.entry_type {
            EntryType::Income => *income += row.total,
            EntryType::Expense => *expense += row.total,
        }
    }

    buckets
        .into_iter()
        .map(|(period_start, (income, expense))| CashFlowRow {
            period: group_by.period_label(period_start),
            period_start,
            income,
            expense,
            balance: income - expense,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn daily(d: NaiveDate, entry_type: EntryType, total: Decimal) -> DailyTotal {
        DailyTotal {
            entry_date: d,
            entry_type,
            total,
        }
    }

    #[test]
    fn daily_rows_fill_missing_side_with_zero() {
        let rows = merge_cash_flow(
            vec![
                daily(date(2024, 1, 2), EntryType::Expense, dec!(40)),
                daily(date(2024, 1, 1), EntryType::Income, dec!(100)),
            ],
            GroupBy::Day,
        );

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].period, "2024-01-01");
        assert_eq!(rows[0].expense, Decimal::ZERO);
        assert_eq!(rows[0].balance, dec!(100));
        assert_eq!(rows[1].period, "2024-01-02");
        assert_eq!(rows[1].income, Decimal::ZERO);
        assert_eq!(rows[1].balance, dec!(-40));
    }

    #[test]
    fn weekly_rows_merge_days_of_the_same_week() {
        // Monday 2024-01-01 through Sunday 2024-01-07, then Monday 2024-01-08.
        let rows = merge_cash_flow(
            vec![
                daily(date(2024, 1, 1), EntryType::Income, dec!(100)),
                daily(date(2024, 1, 7), EntryType::Income, dec!(50)),
                daily(date(2024, 1, 3), EntryType::Expense, dec!(30)),
                daily(date(2024, 1, 8), EntryType::Income, dec!(10)),
            ],
            GroupBy::Week,
        );

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].period, "2024-W01");
        assert_eq!(rows[0].period_start, date(2024, 1, 1));
        assert_eq!(rows[0].income, dec!(150));
        assert_eq!(rows[0].expense, dec!(30));
        assert_eq!(rows[0].balance, dec!(120));
        assert_eq!(rows[1].period, "2024-W02");
    }

    #[test]
    fn monthly_rows_are_sorted_ascending() {
        let rows = merge_cash_flow(
            vec![
                daily(date(2024, 3, 15), EntryType::Income, dec!(5)),
                daily(date(2024, 1, 31), EntryType::Income, dec!(7)),
                daily(date(2024, 1, 1), EntryType::Expense, dec!(2)),
            ],
            GroupBy::Month,
        );

        let periods: Vec<_> = rows.iter().map(|r| r.period.as_str()).collect();
        assert_eq!(periods, vec!["2024-01", "2024-03"]);
        assert_eq!(rows[0].balance, dec!(5));
    }

    #[test]
    fn empty_input_yields_no_rows() {
        assert!(merge_cash_flow(vec![], GroupBy::Day).is_empty());
    }

    #[test]
    fn summary_balance_is_income_minus_expense() {
        let totals = vec![
            CategoryTotal {
                entry_type: EntryType::Income,
                category: "service".to_string(),
                total: dec!(300.50),
            },
            CategoryTotal {
                entry_type: EntryType::Income,
                category: "parts".to_string(),
                total: dec!(99.50),
            },
            CategoryTotal {
                entry_type: EntryType::Expense,
                category: "technician_payment".to_string(),
                total: dec!(120),
            },
        ];

        let summary = summarize(totals, 3, 1, vec![]);

        assert_eq!(summary.total_income, dec!(400.00));
        assert_eq!(summary.total_expense, dec!(120));
        assert_eq!(summary.balance, dec!(280.00));
        assert_eq!(summary.income_by_category.len(), 2);
        assert_eq!(summary.expense_by_category["technician_payment"], dec!(120));
        assert!(!summary.expense_by_category.contains_key("service"));
        assert_eq!(summary.pending_count, 3);
        assert_eq!(summary.overdue_count, 1);
    }

    #[test]
    fn empty_summary_is_all_zero() {
        let summary = summarize(vec![], 0, 0, vec![]);
        assert_eq!(summary.balance, Decimal::ZERO);
        assert!(summary.income_by_category.is_empty());
    }
}
