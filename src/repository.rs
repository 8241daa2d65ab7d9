//! Repository layer for database operations
//!
//! Every query is generic over [`PgExecutor`], so the same call runs against the pool
//! or against the connection of an open transaction.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use crate::models::{Account, Entry, NewAccount, Page, ReferralCode, ReferralHistory, Transfer};

/// Account queries
pub struct AccountRepository;

impl AccountRepository {
    pub async fn create<'e, E: PgExecutor<'e>>(
        executor: E,
        account: &NewAccount,
        created_at: DateTime<Utc>,
    ) -> Result<Account, sqlx::Error> {
        sqlx::query_as::<_, Account>(
            r#"INSERT INTO accounts (owner, email, balance, currency, created_at)
               VALUES ($1, $2, $3, $4, $5)
               RETURNING id, owner, email, balance, currency, extra_interest,
                         extra_interest_start_date, extra_interest_duration, created_at"#,
        )
        .bind(&account.owner)
        .bind(&account.email)
        .bind(account.balance)
        .bind(account.currency.as_str())
        .bind(created_at)
        .fetch_one(executor)
        .await
    }

    pub async fn get<'e, E: PgExecutor<'e>>(
        executor: E,
        id: i64,
    ) -> Result<Option<Account>, sqlx::Error> {
        sqlx::query_as::<_, Account>(
            r#"SELECT id, owner, email, balance, currency, extra_interest,
                      extra_interest_start_date, extra_interest_duration, created_at
               FROM accounts WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    /// Read an account and hold its row lock until the transaction ends.
    ///
    /// `NO KEY UPDATE` still conflicts with itself, so concurrent accrual runs queue up,
    /// but it lets inserts referencing the account (entries, referral rows) proceed.
    pub async fn get_for_update<'e, E: PgExecutor<'e>>(
        executor: E,
        id: i64,
    ) -> Result<Option<Account>, sqlx::Error> {
        sqlx::query_as::<_, Account>(
            r#"SELECT id, owner, email, balance, currency, extra_interest,
                      extra_interest_start_date, extra_interest_duration, created_at
               FROM accounts WHERE id = $1
               FOR NO KEY UPDATE"#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    pub async fn get_by_email<'e, E: PgExecutor<'e>>(
        executor: E,
        email: &str,
    ) -> Result<Option<Account>, sqlx::Error> {
        sqlx::query_as::<_, Account>(
            r#"SELECT id, owner, email, balance, currency, extra_interest,
                      extra_interest_start_date, extra_interest_duration, created_at
               FROM accounts WHERE email = $1"#,
        )
        .bind(email)
        .fetch_optional(executor)
        .await
    }

    pub async fn list<'e, E: PgExecutor<'e>>(
        executor: E,
        page: Page,
    ) -> Result<Vec<Account>, sqlx::Error> {
        sqlx::query_as::<_, Account>(
            r#"SELECT id, owner, email, balance, currency, extra_interest,
                      extra_interest_start_date, extra_interest_duration, created_at
               FROM accounts ORDER BY id LIMIT $1 OFFSET $2"#,
        )
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(executor)
        .await
    }

    /// Atomic in-place increment. The row lock taken by the UPDATE serializes
    /// concurrent increments; the balance is never read back into the caller first.
    pub async fn add_balance<'e, E: PgExecutor<'e>>(
        executor: E,
        id: i64,
        delta: i64,
    ) -> Result<Option<Account>, sqlx::Error> {
        sqlx::query_as::<_, Account>(
            r#"UPDATE accounts SET balance = balance + $1
               WHERE id = $2
               RETURNING id, owner, email, balance, currency, extra_interest,
                         extra_interest_start_date, extra_interest_duration, created_at"#,
        )
        .bind(delta)
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    pub async fn update_extra_interest<'e, E: PgExecutor<'e>>(
        executor: E,
        id: i64,
        rate: f64,
        start_date: DateTime<Utc>,
        duration_months: i32,
    ) -> Result<Option<Account>, sqlx::Error> {
        sqlx::query_as::<_, Account>(
            r#"UPDATE accounts
               SET extra_interest = $1,
                   extra_interest_start_date = $2,
                   extra_interest_duration = $3
               WHERE id = $4
               RETURNING id, owner, email, balance, currency, extra_interest,
                         extra_interest_start_date, extra_interest_duration, created_at"#,
        )
        .bind(rate)
        .bind(start_date)
        .bind(duration_months)
        .bind(id)
        .fetch_optional(executor)
        .await
    }
}

/// Ledger entry queries
pub struct EntryRepository;

impl EntryRepository {
    pub async fn create<'e, E: PgExecutor<'e>>(
        executor: E,
        account_id: i64,
        amount: i64,
    ) -> Result<Entry, sqlx::Error> {
        sqlx::query_as::<_, Entry>(
            r#"INSERT INTO entries (account_id, amount) VALUES ($1, $2)
               RETURNING id, account_id, amount, created_at"#,
        )
        .bind(account_id)
        .bind(amount)
        .fetch_one(executor)
        .await
    }

    pub async fn get<'e, E: PgExecutor<'e>>(
        executor: E,
        id: i64,
    ) -> Result<Option<Entry>, sqlx::Error> {
        sqlx::query_as::<_, Entry>(
            "SELECT id, account_id, amount, created_at FROM entries WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    pub async fn list_for_account<'e, E: PgExecutor<'e>>(
        executor: E,
        account_id: i64,
        page: Page,
    ) -> Result<Vec<Entry>, sqlx::Error> {
        sqlx::query_as::<_, Entry>(
            r#"SELECT id, account_id, amount, created_at FROM entries
               WHERE account_id = $1 ORDER BY id LIMIT $2 OFFSET $3"#,
        )
        .bind(account_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(executor)
        .await
    }

    /// Sum of all entries for an account (statement reconciliation)
    pub async fn sum_for_account<'e, E: PgExecutor<'e>>(
        executor: E,
        account_id: i64,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT FROM entries WHERE account_id = $1",
        )
        .bind(account_id)
        .fetch_one(executor)
        .await
    }
}

/// Transfer record queries
pub struct TransferRepository;

impl TransferRepository {
    pub async fn create<'e, E: PgExecutor<'e>>(
        executor: E,
        from_account_id: i64,
        to_account_id: i64,
        amount: i64,
    ) -> Result<Transfer, sqlx::Error> {
        sqlx::query_as::<_, Transfer>(
            r#"INSERT INTO transfers (from_account_id, to_account_id, amount)
               VALUES ($1, $2, $3)
               RETURNING id, from_account_id, to_account_id, amount, created_at"#,
        )
        .bind(from_account_id)
        .bind(to_account_id)
        .bind(amount)
        .fetch_one(executor)
        .await
    }

    pub async fn get<'e, E: PgExecutor<'e>>(
        executor: E,
        id: i64,
    ) -> Result<Option<Transfer>, sqlx::Error> {
        sqlx::query_as::<_, Transfer>(
            r#"SELECT id, from_account_id, to_account_id, amount, created_at
               FROM transfers WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    /// Transfers where the account is either side
    pub async fn list_for_account<'e, E: PgExecutor<'e>>(
        executor: E,
        account_id: i64,
        page: Page,
    ) -> Result<Vec<Transfer>, sqlx::Error> {
        sqlx::query_as::<_, Transfer>(
            r#"SELECT id, from_account_id, to_account_id, amount, created_at
               FROM transfers
               WHERE from_account_id = $1 OR to_account_id = $1
               ORDER BY id LIMIT $2 OFFSET $3"#,
        )
        .bind(account_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(executor)
        .await
    }
}

/// Referral code queries
pub struct ReferralCodeRepository;

impl ReferralCodeRepository {
    pub async fn create<'e, E: PgExecutor<'e>>(
        executor: E,
        code: &str,
        referrer_account_id: i64,
        created_at: DateTime<Utc>,
    ) -> Result<ReferralCode, sqlx::Error> {
        sqlx::query_as::<_, ReferralCode>(
            r#"INSERT INTO referral_codes (referral_code, referrer_account_id, created_at)
               VALUES ($1, $2, $3)
               RETURNING id, referral_code, referrer_account_id, is_used, created_at, used_at"#,
        )
        .bind(code)
        .bind(referrer_account_id)
        .bind(created_at)
        .fetch_one(executor)
        .await
    }

    pub async fn get_by_code_for_update<'e, E: PgExecutor<'e>>(
        executor: E,
        code: &str,
    ) -> Result<Option<ReferralCode>, sqlx::Error> {
        sqlx::query_as::<_, ReferralCode>(
            r#"SELECT id, referral_code, referrer_account_id, is_used, created_at, used_at
               FROM referral_codes WHERE referral_code = $1
               FOR UPDATE"#,
        )
        .bind(code)
        .fetch_optional(executor)
        .await
    }

    /// Flip a code to used. Matches only unused rows, so a code is used at most once.
    pub async fn mark_used<'e, E: PgExecutor<'e>>(
        executor: E,
        id: i64,
        used_at: DateTime<Utc>,
    ) -> Result<Option<ReferralCode>, sqlx::Error> {
        sqlx::query_as::<_, ReferralCode>(
            r#"UPDATE referral_codes SET is_used = TRUE, used_at = $1
               WHERE id = $2 AND is_used = FALSE
               RETURNING id, referral_code, referrer_account_id, is_used, created_at, used_at"#,
        )
        .bind(used_at)
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    pub async fn has_unused<'e, E: PgExecutor<'e>>(
        executor: E,
        referrer_account_id: i64,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS (
                   SELECT 1 FROM referral_codes
                   WHERE referrer_account_id = $1 AND is_used = FALSE
               )"#,
        )
        .bind(referrer_account_id)
        .fetch_one(executor)
        .await
    }

    pub async fn list_for_referrer<'e, E: PgExecutor<'e>>(
        executor: E,
        referrer_account_id: i64,
    ) -> Result<Vec<ReferralCode>, sqlx::Error> {
        sqlx::query_as::<_, ReferralCode>(
            r#"SELECT id, referral_code, referrer_account_id, is_used, created_at, used_at
               FROM referral_codes WHERE referrer_account_id = $1
               ORDER BY created_at DESC"#,
        )
        .bind(referrer_account_id)
        .fetch_all(executor)
        .await
    }

    /// Used codes created inside `[start, end]`, both ends inclusive
    pub async fn count_used_in_window<'e, E: PgExecutor<'e>>(
        executor: E,
        referrer_account_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"SELECT COUNT(*) FROM referral_codes
               WHERE referrer_account_id = $1
                 AND is_used = TRUE
                 AND created_at >= $2
                 AND created_at <= $3"#,
        )
        .bind(referrer_account_id)
        .bind(start)
        .bind(end)
        .fetch_one(executor)
        .await
    }

    /// Referrers with at least one used code inside `[start, end]`
    pub async fn referrers_used_in_window<'e, E: PgExecutor<'e>>(
        executor: E,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<i64>, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"SELECT DISTINCT referrer_account_id FROM referral_codes
               WHERE is_used = TRUE
                 AND created_at >= $1
                 AND created_at <= $2
               ORDER BY referrer_account_id"#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(executor)
        .await
    }
}

/// Referral audit trail queries. Append-only: there is no update or delete.
pub struct ReferralHistoryRepository;

impl ReferralHistoryRepository {
    pub async fn create<'e, E: PgExecutor<'e>>(
        executor: E,
        referrer_account_id: i64,
        referred_account_id: i64,
        referral_code_id: i64,
        referral_date: DateTime<Utc>,
    ) -> Result<ReferralHistory, sqlx::Error> {
        sqlx::query_as::<_, ReferralHistory>(
            r#"INSERT INTO referral_history
                   (referrer_account_id, referred_account_id, referral_code_id, referral_date)
               VALUES ($1, $2, $3, $4)
               RETURNING id, referrer_account_id, referred_account_id, referral_code_id,
                         referral_date, created_at"#,
        )
        .bind(referrer_account_id)
        .bind(referred_account_id)
        .bind(referral_code_id)
        .bind(referral_date)
        .fetch_one(executor)
        .await
    }

    pub async fn list_for_referrer<'e, E: PgExecutor<'e>>(
        executor: E,
        referrer_account_id: i64,
    ) -> Result<Vec<ReferralHistory>, sqlx::Error> {
        sqlx::query_as::<_, ReferralHistory>(
            r#"SELECT id, referrer_account_id, referred_account_id, referral_code_id,
                      referral_date, created_at
               FROM referral_history WHERE referrer_account_id = $1
               ORDER BY id"#,
        )
        .bind(referrer_account_id)
        .fetch_all(executor)
        .await
    }
}
