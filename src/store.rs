//! Store facade
//!
//! Wires the services over one connection pool:
//!
//! ```text
//! Database ──▶ TxExecutor ──┬──▶ TransferEngine
//!                           ├──▶ AccrualEngine
//!                           └──▶ ReferralService
//!          └──────────────────▶ AccountService (single-statement reads/writes)
//! ```

use std::time::Duration;

use crate::account::AccountService;
use crate::accrual::{AccrualEngine, AccrualPolicy};
use crate::config::{AppConfig, ConfigError};
use crate::db::Database;
use crate::executor::{Cancellation, TxExecutor};
use crate::referral::ReferralService;
use crate::transfer::TransferEngine;

pub struct Store {
    db: Database,
    accounts: AccountService,
    transfers: TransferEngine,
    accrual: AccrualEngine,
    referrals: ReferralService,
    tx_timeout: Option<Duration>,
}

impl Store {
    pub fn new(db: Database, policy: AccrualPolicy, signup_bonus: i64) -> Self {
        let executor = TxExecutor::new(db.pool().clone());
        Self {
            accounts: AccountService::new(db.pool().clone()),
            transfers: TransferEngine::new(executor.clone()),
            accrual: AccrualEngine::new(executor.clone(), policy),
            referrals: ReferralService::new(executor, signup_bonus),
            db,
            tx_timeout: None,
        }
    }

    /// Build from application config, validating the accrual section
    pub fn from_config(db: Database, config: &AppConfig) -> Result<Self, ConfigError> {
        let policy = config.accrual.policy()?;
        let mut store = Self::new(db, policy, config.referral.signup_bonus);
        store.accrual = store
            .accrual
            .with_batch_concurrency(config.accrual.batch_concurrency);
        store.tx_timeout = config.tx_timeout();
        Ok(store)
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn accounts(&self) -> &AccountService {
        &self.accounts
    }

    pub fn transfers(&self) -> &TransferEngine {
        &self.transfers
    }

    pub fn accrual(&self) -> &AccrualEngine {
        &self.accrual
    }

    pub fn referrals(&self) -> &ReferralService {
        &self.referrals
    }

    /// Cancellation carrying the configured per-transaction timeout, if any
    pub fn default_cancellation(&self) -> Cancellation {
        match self.tx_timeout {
            Some(timeout) => Cancellation::with_timeout(timeout),
            None => Cancellation::none(),
        }
    }
}
