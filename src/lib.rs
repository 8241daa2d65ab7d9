//! Bank Ledger - double-entry transfers and referral-driven interest accrual
//!
//! All balance changes go through atomic units on PostgreSQL; a unit either commits
//! every row it wrote or none of them.
//!
//! # Modules
//!
//! - [`executor`] - Transaction executor with deadline/signal cancellation
//! - [`transfer`] - Transfer engine (transfer row, two entries, two balance updates)
//! - [`accrual`] - Monthly referral rate recomputation
//! - [`referral`] - Referral code issue and redemption
//! - [`account`] - Account creation, lookups and statements
//! - [`repository`] - SQL queries, generic over the executor
//! - [`store`] - Facade wiring everything over one pool
//! - [`error`] - Closed error taxonomy

pub mod account;
pub mod accrual;
pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod logging;
pub mod models;
pub mod referral;
pub mod repository;
pub mod store;
pub mod transfer;

// Convenient re-exports at crate root
pub use accrual::{AccrualEngine, AccrualOutcome, AccrualPolicy, AccrualReport, RateDecision};
pub use config::AppConfig;
pub use db::Database;
pub use error::{ConflictKind, ErrorKind, LedgerError, ValidationError};
pub use executor::{CancelHandle, Cancellation, TxExecutor};
pub use models::{Account, Currency, Entry, NewAccount, Page, ReferralCode, ReferralHistory, Transfer};
pub use referral::{Redemption, ReferralService};
pub use store::Store;
pub use transfer::{TransferEngine, TransferParams, TransferResult};
