//! Common test utilities for finance-service integration tests.

#![allow(dead_code)]

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use finance_service::models::{Actor, CreateEntry, EntryType, FinancialEntry};
use finance_service::services::{Clock, Database, FixedClock, Ledger};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use std::sync::{Arc, Once};
use std::time::Duration;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,finance_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// A ledger wired to the test database with a pinned clock and freshly
/// seeded reference rows, so tests never see each other's people.
pub struct TestLedger {
    pub ledger: Ledger,
    pub db: Database,
    pub clock: FixedClock,
    pub actor: Actor,
    pub approver: Actor,
    pub technician_id: Uuid,
    pub client_id: Uuid,
    pub ticket_id: Uuid,
}

pub fn database_url() -> String {
    std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must point at a scratch Postgres database")
}

pub fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// A year no other test run is likely to use, so date-windowed reports only
/// see this test's rows.
pub fn unique_year() -> i32 {
    2100 + (Uuid::new_v4().as_u128() % 7000) as i32
}

pub async fn spawn_ledger() -> TestLedger {
    spawn_ledger_at(at(2024, 6, 15)).await
}

pub async fn spawn_ledger_at(now: DateTime<Utc>) -> TestLedger {
    init_tracing();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url())
        .await
        .expect("Failed to connect to test database");

    let db = Database::from_pool(pool, Duration::from_secs(10));
    db.run_migrations()
        .await
        .expect("Failed to run migrations");

    let clock = FixedClock::new(now);
    let ledger = Ledger::new(
        db.clone(),
        Arc::new(clock.clone()),
        vec!["technician_payment".to_string()],
    );

    let actor = Actor::new(seed_named(&db, "users", "Dana Clerk").await)
        .with_client("10.0.0.7", "integration-test");
    let approver = Actor::new(seed_named(&db, "users", "Sam Approver").await);
    let technician_id = seed_named(&db, "technicians", "Alex Tech").await;
    let client_id = seed_named(&db, "clients", "Acme Plumbing").await;

    let ticket_id = Uuid::new_v4();
    sqlx::query("INSERT INTO tickets (id, title) VALUES ($1, $2)")
        .bind(ticket_id)
        .bind("Leaking boiler")
        .execute(db.pool())
        .await
        .expect("Failed to seed ticket");

    TestLedger {
        ledger,
        db,
        clock,
        actor,
        approver,
        technician_id,
        client_id,
        ticket_id,
    }
}

async fn seed_named(db: &Database, table: &str, name: &str) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(&format!("INSERT INTO {} (id, name) VALUES ($1, $2)", table))
        .bind(id)
        .bind(name)
        .execute(db.pool())
        .await
        .unwrap_or_else(|e| panic!("Failed to seed {}: {}", table, e));
    id
}

impl TestLedger {
    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Create a pending entry for this test's technician.
    pub async fn entry(
        &self,
        entry_type: EntryType,
        category: &str,
        amount: Decimal,
        entry_date: NaiveDate,
    ) -> FinancialEntry {
        let mut input = CreateEntry::new(entry_type, category, "integration test entry", amount, entry_date);
        input.technician_id = Some(self.technician_id);
        self.ledger
            .entries
            .create(&input, &self.actor)
            .await
            .expect("Failed to create entry")
    }
}
