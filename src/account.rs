//! Account lookups and creation, plus statement reads over entries and transfers

use chrono::Utc;
use sqlx::PgPool;
use tracing::info;

use crate::error::LedgerError;
use crate::models::{Account, Entry, NewAccount, Page, Transfer};
use crate::repository::{AccountRepository, EntryRepository, TransferRepository};

pub struct AccountService {
    pool: PgPool,
}

impl AccountService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, account: NewAccount) -> Result<Account, LedgerError> {
        account.validate()?;
        let created = AccountRepository::create(&self.pool, &account, Utc::now())
            .await
            .map_err(LedgerError::from_account_insert)?;

        info!(
            account_id = created.id,
            currency = %created.currency,
            "Account created"
        );
        Ok(created)
    }

    pub async fn get(&self, id: i64) -> Result<Account, LedgerError> {
        AccountRepository::get(&self.pool, id)
            .await?
            .ok_or_else(|| LedgerError::not_found("account", id))
    }

    /// Login lookup
    pub async fn get_by_email(&self, email: &str) -> Result<Account, LedgerError> {
        AccountRepository::get_by_email(&self.pool, email)
            .await?
            .ok_or_else(|| LedgerError::not_found("account", email))
    }

    pub async fn list(&self, page: Page) -> Result<Vec<Account>, LedgerError> {
        Ok(AccountRepository::list(&self.pool, page).await?)
    }

    pub async fn entry(&self, id: i64) -> Result<Entry, LedgerError> {
        EntryRepository::get(&self.pool, id)
            .await?
            .ok_or_else(|| LedgerError::not_found("entry", id))
    }

    pub async fn entries(&self, account_id: i64, page: Page) -> Result<Vec<Entry>, LedgerError> {
        Ok(EntryRepository::list_for_account(&self.pool, account_id, page).await?)
    }

    /// Net of all entries ever booked against the account
    pub async fn entry_total(&self, account_id: i64) -> Result<i64, LedgerError> {
        Ok(EntryRepository::sum_for_account(&self.pool, account_id).await?)
    }

    pub async fn transfer(&self, id: i64) -> Result<Transfer, LedgerError> {
        TransferRepository::get(&self.pool, id)
            .await?
            .ok_or_else(|| LedgerError::not_found("transfer", id))
    }

    pub async fn transfers(
        &self,
        account_id: i64,
        page: Page,
    ) -> Result<Vec<Transfer>, LedgerError> {
        Ok(TransferRepository::list_for_account(&self.pool, account_id, page).await?)
    }
}
