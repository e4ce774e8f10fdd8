//! Finance Service - income/expense ledger, payment batches, audit trail
//! and financial reporting for field-service operations.

pub mod config;
pub mod models;
pub mod services;
pub mod startup;
