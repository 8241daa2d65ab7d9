//! Referral code lifecycle
//!
//! ```text
//! issue ──▶ unused ──redeem──▶ used (+ referral_history row)
//! ```
//!
//! There is no way back from used. Redemption locks the code row, so two concurrent
//! redemptions of one code resolve to one success and one conflict.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use tracing::info;

use crate::error::{ConflictKind, LedgerError, ValidationError};
use crate::executor::{Cancellation, TxExecutor};
use crate::models::{Account, NewAccount, ReferralCode, ReferralHistory};
use crate::repository::{
    AccountRepository, ReferralCodeRepository, ReferralHistoryRepository,
};

/// Rows written by a redemption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redemption {
    pub referral_code: ReferralCode,
    pub referral_history: ReferralHistory,
}

pub struct ReferralService {
    executor: TxExecutor,
    signup_bonus: i64,
}

impl ReferralService {
    pub fn new(executor: TxExecutor, signup_bonus: i64) -> Self {
        Self {
            executor,
            signup_bonus,
        }
    }

    /// Issue a fresh code. A referrer holds at most one unused code at a time.
    pub async fn issue(
        &self,
        referrer_account_id: i64,
        cancel: &Cancellation,
    ) -> Result<ReferralCode, LedgerError> {
        let code = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        let issued = self
            .executor
            .execute(cancel, move |conn| {
                Box::pin(issue_in_tx(conn, referrer_account_id, code, now))
            })
            .await?;

        info!(
            referrer_account_id,
            referral_code_id = issued.id,
            "Referral code issued"
        );
        Ok(issued)
    }

    /// Mark a code used on behalf of `referred_account_id` and record the history row
    pub async fn redeem(
        &self,
        code: &str,
        referred_account_id: i64,
        cancel: &Cancellation,
    ) -> Result<Redemption, LedgerError> {
        let code = code.to_string();
        let now = Utc::now();

        let redemption = self
            .executor
            .execute(cancel, move |conn| {
                Box::pin(redeem_in_tx(conn, code, referred_account_id, now))
            })
            .await?;

        info!(
            referrer_account_id = redemption.referral_code.referrer_account_id,
            referred_account_id,
            referral_code_id = redemption.referral_code.id,
            "Referral code redeemed"
        );
        Ok(redemption)
    }

    /// Open an account with the sign-up bonus as its opening balance and redeem `code`
    /// for it, all in one unit. An invalid or used code leaves no account behind.
    pub async fn open_account_with_code(
        &self,
        account: NewAccount,
        code: &str,
        cancel: &Cancellation,
    ) -> Result<(Account, Redemption), LedgerError> {
        let account = account.with_balance(self.signup_bonus);
        account.validate()?;
        let code = code.to_string();
        let now = Utc::now();

        let (opened, redemption) = self
            .executor
            .execute(cancel, move |conn| {
                Box::pin(open_with_code_in_tx(conn, account, code, now))
            })
            .await?;

        info!(
            account_id = opened.id,
            referrer_account_id = redemption.referral_code.referrer_account_id,
            signup_bonus = opened.balance,
            "Account opened with referral code"
        );
        Ok((opened, redemption))
    }

    pub async fn codes_for_referrer(
        &self,
        referrer_account_id: i64,
    ) -> Result<Vec<ReferralCode>, LedgerError> {
        Ok(ReferralCodeRepository::list_for_referrer(self.executor.pool(), referrer_account_id)
            .await?)
    }

    pub async fn history_for_referrer(
        &self,
        referrer_account_id: i64,
    ) -> Result<Vec<ReferralHistory>, LedgerError> {
        Ok(
            ReferralHistoryRepository::list_for_referrer(
                self.executor.pool(),
                referrer_account_id,
            )
            .await?,
        )
    }
}

async fn issue_in_tx(
    conn: &mut PgConnection,
    referrer_account_id: i64,
    code: String,
    now: DateTime<Utc>,
) -> Result<ReferralCode, LedgerError> {
    // Serializes concurrent issues for the same referrer
    AccountRepository::get_for_update(&mut *conn, referrer_account_id)
        .await?
        .ok_or_else(|| LedgerError::not_found("account", referrer_account_id))?;

    if ReferralCodeRepository::has_unused(&mut *conn, referrer_account_id).await? {
        return Err(ConflictKind::UnusedCodeOutstanding.into());
    }

    Ok(ReferralCodeRepository::create(conn, &code, referrer_account_id, now).await?)
}

async fn redeem_in_tx(
    conn: &mut PgConnection,
    code: String,
    referred_account_id: i64,
    now: DateTime<Utc>,
) -> Result<Redemption, LedgerError> {
    let found = ReferralCodeRepository::get_by_code_for_update(&mut *conn, &code)
        .await?
        .ok_or_else(|| LedgerError::not_found("referral code", &code))?;

    if found.is_used {
        return Err(ConflictKind::ReferralCodeAlreadyUsed.into());
    }
    if found.referrer_account_id == referred_account_id {
        return Err(ValidationError::SelfReferral.into());
    }

    let referral_code = ReferralCodeRepository::mark_used(&mut *conn, found.id, now)
        .await?
        .ok_or(ConflictKind::ReferralCodeAlreadyUsed)?;

    let referral_history = ReferralHistoryRepository::create(
        conn,
        referral_code.referrer_account_id,
        referred_account_id,
        referral_code.id,
        referral_code.created_at,
    )
    .await?;

    Ok(Redemption {
        referral_code,
        referral_history,
    })
}

async fn open_with_code_in_tx(
    conn: &mut PgConnection,
    account: NewAccount,
    code: String,
    now: DateTime<Utc>,
) -> Result<(Account, Redemption), LedgerError> {
    let opened = AccountRepository::create(&mut *conn, &account, now)
        .await
        .map_err(LedgerError::from_account_insert)?;
    let redemption = redeem_in_tx(conn, code, opened.id, now).await?;
    Ok((opened, redemption))
}
