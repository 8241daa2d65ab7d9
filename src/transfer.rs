//! Transfer Engine
//!
//! Moves funds between two accounts as one atomic unit:
//!
//! ```text
//! INSERT transfer(from, to, amount)
//! INSERT entry(from, -amount), entry(to, +amount)
//! UPDATE balance += delta   -- lower account id first, then the higher one
//! ```
//!
//! # Deadlock avoidance
//!
//! Balance updates lock rows in ascending id order whatever the direction of the
//! transfer, so two opposite transfers between the same pair request the locks in the
//! same order and cannot wait on each other.

use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use tracing::info;

use crate::error::{LedgerError, ValidationError};
use crate::executor::{Cancellation, TxExecutor};
use crate::models::{Account, Entry, Transfer};
use crate::repository::{AccountRepository, EntryRepository, TransferRepository};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferParams {
    pub from_account_id: i64,
    pub to_account_id: i64,
    /// Minor units, strictly positive
    pub amount: i64,
}

impl TransferParams {
    pub fn new(from_account_id: i64, to_account_id: i64, amount: i64) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
        }
    }

    /// Checked before the transaction begins
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.amount <= 0 {
            return Err(ValidationError::NonPositiveAmount);
        }
        if self.from_account_id == self.to_account_id {
            return Err(ValidationError::SameAccount);
        }
        Ok(())
    }
}

/// Everything a committed transfer wrote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferResult {
    pub transfer: Transfer,
    pub from_account: Account,
    pub to_account: Account,
    pub from_entry: Entry,
    pub to_entry: Entry,
}

/// A balance change to apply to one account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BalanceDelta {
    account_id: i64,
    delta: i64,
}

/// Both deltas, lowest account id first
fn lock_order(params: &TransferParams) -> [BalanceDelta; 2] {
    let debit = BalanceDelta {
        account_id: params.from_account_id,
        delta: -params.amount,
    };
    let credit = BalanceDelta {
        account_id: params.to_account_id,
        delta: params.amount,
    };
    if debit.account_id < credit.account_id {
        [debit, credit]
    } else {
        [credit, debit]
    }
}

pub struct TransferEngine {
    executor: TxExecutor,
}

impl TransferEngine {
    pub fn new(executor: TxExecutor) -> Self {
        Self { executor }
    }

    /// Execute one transfer. Any failure rolls back the whole unit; a partially
    /// applied transfer is never visible.
    pub async fn transfer(
        &self,
        params: TransferParams,
        cancel: &Cancellation,
    ) -> Result<TransferResult, LedgerError> {
        params.validate()?;

        let result = self
            .executor
            .execute(cancel, move |conn| Box::pin(transfer_in_tx(conn, params)))
            .await?;

        info!(
            transfer_id = result.transfer.id,
            from_account_id = params.from_account_id,
            to_account_id = params.to_account_id,
            amount = params.amount,
            "Transfer committed"
        );
        Ok(result)
    }
}

async fn transfer_in_tx(
    conn: &mut PgConnection,
    params: TransferParams,
) -> Result<TransferResult, LedgerError> {
    let transfer = TransferRepository::create(
        &mut *conn,
        params.from_account_id,
        params.to_account_id,
        params.amount,
    )
    .await?;

    let from_entry = EntryRepository::create(&mut *conn, params.from_account_id, -params.amount)
        .await?;
    let to_entry = EntryRepository::create(&mut *conn, params.to_account_id, params.amount).await?;

    let [first, second] = lock_order(&params);
    let first_account = apply_delta(conn, first).await?;
    let second_account = apply_delta(conn, second).await?;

    let (from_account, to_account) = if first.account_id == params.from_account_id {
        (first_account, second_account)
    } else {
        (second_account, first_account)
    };

    Ok(TransferResult {
        transfer,
        from_account,
        to_account,
        from_entry,
        to_entry,
    })
}

async fn apply_delta(conn: &mut PgConnection, change: BalanceDelta) -> Result<Account, LedgerError> {
    AccountRepository::add_balance(conn, change.account_id, change.delta)
        .await?
        .ok_or_else(|| LedgerError::not_found("account", change.account_id))
}
