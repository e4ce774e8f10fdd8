//! Services for finance-service.

pub mod audit;
pub mod batches;
pub mod clock;
pub mod database;
pub mod entries;
pub mod metrics;
pub mod reports;
pub mod sweeper;

pub use audit::AuditTrail;
pub use batches::BatchEngine;
pub use clock::{Clock, FixedClock, SystemClock};
pub use database::Database;
pub use entries::EntryStore;
pub use reports::ReportingEngine;

use std::sync::Arc;

/// The ledger's services wired to one database and clock.
#[derive(Clone)]
pub struct Ledger {
    pub entries: EntryStore,
    pub batches: BatchEngine,
    pub audit: AuditTrail,
    pub reports: ReportingEngine,
}

impl Ledger {
    pub fn new(
        db: Database,
        clock: Arc<dyn Clock>,
        technician_payment_categories: Vec<String>,
    ) -> Self {
        let audit = AuditTrail::new(db.clone(), clock.clone());
        Self {
            entries: EntryStore::new(db.clone(), clock.clone(), audit.clone()),
            batches: BatchEngine::new(db.clone(), clock, audit.clone()),
            reports: ReportingEngine::new(db, technician_payment_categories),
            audit,
        }
    }
}
