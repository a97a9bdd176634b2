pub mod service;

pub use service::{LedgerRules, LedgerService, Reconciliation};
