//! Reporting engine integration tests.
//!
//! Each test works inside its own calendar year so date-windowed reports only
//! see the rows it created. Open-entry counts are global, so the whole file
//! runs serially.
//!
//! Run with: TEST_DATABASE_URL=postgres://... cargo test -p finance-service -- --ignored

mod common;

use common::{date, spawn_ledger, unique_year};
use finance_service::models::{CreateEntry, EntryStatus, EntryType, GroupBy, ReportWindow};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serial_test::serial;

#[tokio::test]
#[ignore]
#[serial]
async fn dashboard_balance_is_income_minus_expense() {
    let t = spawn_ledger().await;
    let year = unique_year();

    t.entry(EntryType::Income, "service", dec!(500.00), date(year, 3, 1))
        .await;
    t.entry(EntryType::Income, "parts", dec!(120.25), date(year, 3, 2))
        .await;
    t.entry(EntryType::Expense, "technician_payment", dec!(200.00), date(year, 3, 3))
        .await;
    let cancelled = t
        .entry(EntryType::Expense, "fuel", dec!(999.00), date(year, 3, 4))
        .await;
    t.ledger
        .entries
        .update_status(cancelled.id, EntryStatus::Cancelled, None, None, &t.actor)
        .await
        .unwrap();
    let deleted = t
        .entry(EntryType::Income, "service", dec!(1000.00), date(year, 3, 5))
        .await;
    t.ledger.entries.delete(deleted.id, &t.actor).await.unwrap();

    let summary = t
        .ledger
        .reports
        .dashboard(ReportWindow::between(date(year, 1, 1), date(year, 12, 31)))
        .await
        .unwrap();

    assert_eq!(summary.total_income, dec!(620.25));
    assert_eq!(summary.total_expense, dec!(200.00));
    assert_eq!(summary.balance, summary.total_income - summary.total_expense);
    assert_eq!(summary.income_by_category["service"], dec!(500.00));
    assert_eq!(summary.income_by_category["parts"], dec!(120.25));
    assert!(!summary.expense_by_category.contains_key("fuel"));

    // Cancelled entries still show up as recent activity; deleted ones do not.
    assert_eq!(summary.recent_entries.len(), 4);
    assert!(summary
        .recent_entries
        .iter()
        .all(|e| e.entry.id != deleted.id));
}

#[tokio::test]
#[ignore]
#[serial]
async fn dashboard_recent_entries_are_capped() {
    let t = spawn_ledger().await;
    let year = unique_year();

    for day in 1..=12 {
        t.entry(EntryType::Income, "service", dec!(1), date(year, 4, day))
            .await;
    }

    let summary = t
        .ledger
        .reports
        .dashboard(ReportWindow::between(date(year, 4, 1), date(year, 4, 30)))
        .await
        .unwrap();

    assert_eq!(summary.recent_entries.len(), 10);
    assert_eq!(summary.total_income, dec!(12));
    assert_eq!(summary.recent_entries[0].technician_name.as_deref(), Some("Alex Tech"));
}

#[tokio::test]
#[ignore]
#[serial]
async fn dashboard_counts_open_entries_regardless_of_window() {
    let t = spawn_ledger().await;
    let year = unique_year();

    let empty_window = ReportWindow::between(date(year, 1, 1), date(year, 1, 31));
    let before = t.ledger.reports.dashboard(empty_window).await.unwrap();

    let overdue = t
        .entry(EntryType::Income, "service", dec!(10), date(year, 6, 1))
        .await;
    t.ledger
        .entries
        .update_status(overdue.id, EntryStatus::Overdue, None, None, &t.actor)
        .await
        .unwrap();
    t.entry(EntryType::Income, "service", dec!(10), date(year, 6, 2))
        .await;

    let after = t.ledger.reports.dashboard(empty_window).await.unwrap();

    assert_eq!(after.pending_count, before.pending_count + 1);
    assert_eq!(after.overdue_count, before.overdue_count + 1);
    assert_eq!(after.total_income, Decimal::ZERO);
    assert!(after.recent_entries.is_empty());
}

#[tokio::test]
#[ignore]
#[serial]
async fn cash_flow_groups_by_month() {
    let t = spawn_ledger().await;
    let year = unique_year();

    t.entry(EntryType::Income, "service", dec!(100), date(year, 1, 5))
        .await;
    t.entry(EntryType::Income, "service", dec!(50), date(year, 1, 20))
        .await;
    t.entry(EntryType::Expense, "parts", dec!(30), date(year, 1, 21))
        .await;
    t.entry(EntryType::Expense, "parts", dec!(45), date(year, 3, 2))
        .await;

    let window = ReportWindow::between(date(year, 1, 1), date(year, 12, 31));
    let rows = t
        .ledger
        .reports
        .cash_flow(window, GroupBy::Month)
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].period, format!("{}-01", year));
    assert_eq!(rows[0].income, dec!(150));
    assert_eq!(rows[0].expense, dec!(30));
    assert_eq!(rows[0].balance, dec!(120));
    assert_eq!(rows[1].period, format!("{}-03", year));
    assert_eq!(rows[1].income, Decimal::ZERO);
    assert_eq!(rows[1].balance, dec!(-45));

    let daily = t
        .ledger
        .reports
        .cash_flow(window, GroupBy::parse("bogus"))
        .await
        .unwrap();
    assert_eq!(daily.len(), 4);
    assert!(daily.windows(2).all(|w| w[0].period_start < w[1].period_start));
}

#[tokio::test]
#[ignore]
#[serial]
async fn technician_payments_sum_payout_categories() {
    let t = spawn_ledger().await;
    let other = spawn_ledger().await;
    let year = unique_year();

    t.entry(EntryType::Expense, "technician_payment", dec!(80), date(year, 5, 1))
        .await;
    t.entry(EntryType::Expense, "technician_payment", dec!(20), date(year, 5, 2))
        .await;
    t.entry(EntryType::Expense, "fuel", dec!(500), date(year, 5, 3))
        .await;
    other
        .entry(EntryType::Expense, "technician_payment", dec!(300), date(year, 5, 4))
        .await;

    let mut unassigned = CreateEntry::new(
        EntryType::Expense,
        "technician_payment",
        "No technician",
        dec!(1000),
        date(year, 5, 5),
    );
    unassigned.technician_id = None;
    t.ledger.entries.create(&unassigned, &t.actor).await.unwrap();

    let window = ReportWindow::between(date(year, 1, 1), date(year, 12, 31));
    let rows = t
        .ledger
        .reports
        .technician_payments(window, None)
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].technician_id, other.technician_id);
    assert_eq!(rows[0].total_amount, dec!(300));
    assert_eq!(rows[1].technician_id, t.technician_id);
    assert_eq!(rows[1].total_amount, dec!(100));
    assert_eq!(rows[1].entries_count, 2);
    assert_eq!(rows[1].technician_name.as_deref(), Some("Alex Tech"));

    let only_mine = t
        .ledger
        .reports
        .technician_payments(window, Some(t.technician_id))
        .await
        .unwrap();
    assert_eq!(only_mine.len(), 1);
    assert_eq!(only_mine[0].total_amount, dec!(100));
}
