//! Referral Accrual Engine
//!
//! Recomputes a referrer's bonus rate once per cycle. Each run is one atomic unit
//! that starts by locking the referrer row, so runs for the same referrer queue up and
//! the later ones see the already-updated rate.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use sqlx::PgConnection;
use tracing::{debug, info, warn};

use super::policy::{AccrualPolicy, AccrualWindow, RateDecision};
use crate::error::LedgerError;
use crate::executor::{Cancellation, TxExecutor};
use crate::models::Account;
use crate::repository::{AccountRepository, ReferralCodeRepository};

const DEFAULT_BATCH_CONCURRENCY: usize = 8;

/// Result of one accrual run
#[derive(Debug, Clone, PartialEq)]
pub struct AccrualOutcome {
    /// Account row after the run (unchanged unless `decision` is `Apply`)
    pub account: Account,
    pub used_count: i64,
    pub decision: RateDecision,
}

/// Summary of a batch run over all referrers active in the window
#[derive(Debug, Default)]
pub struct AccrualReport {
    pub updated: Vec<Account>,
    pub unchanged: Vec<i64>,
    pub failed: Vec<(i64, LedgerError)>,
}

impl AccrualReport {
    fn record(&mut self, referrer_account_id: i64, result: Result<AccrualOutcome, LedgerError>) {
        match result {
            Ok(outcome) if outcome.decision.new_rate().is_some() => {
                self.updated.push(outcome.account)
            }
            Ok(_) => self.unchanged.push(referrer_account_id),
            Err(e) => self.failed.push((referrer_account_id, e)),
        }
    }

    pub fn total(&self) -> usize {
        self.updated.len() + self.unchanged.len() + self.failed.len()
    }
}

pub struct AccrualEngine {
    executor: TxExecutor,
    policy: AccrualPolicy,
    batch_concurrency: usize,
}

impl AccrualEngine {
    pub fn new(executor: TxExecutor, policy: AccrualPolicy) -> Self {
        Self {
            executor,
            policy,
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
        }
    }

    pub fn with_batch_concurrency(mut self, batch_concurrency: usize) -> Self {
        self.batch_concurrency = batch_concurrency.max(1);
        self
    }

    pub fn policy(&self) -> &AccrualPolicy {
        &self.policy
    }

    /// Accrue for the cycle that ends before the current instant
    pub async fn accrue(
        &self,
        referrer_account_id: i64,
        cancel: &Cancellation,
    ) -> Result<Account, LedgerError> {
        self.accrue_at(referrer_account_id, Utc::now(), cancel)
            .await
    }

    /// Accrue as if the run happened at `now`
    pub async fn accrue_at(
        &self,
        referrer_account_id: i64,
        now: DateTime<Utc>,
        cancel: &Cancellation,
    ) -> Result<Account, LedgerError> {
        self.run_at(referrer_account_id, now, cancel)
            .await
            .map(|outcome| outcome.account)
    }

    /// Same as [`accrue_at`](Self::accrue_at) but also reports the count and the decision
    pub async fn run_at(
        &self,
        referrer_account_id: i64,
        now: DateTime<Utc>,
        cancel: &Cancellation,
    ) -> Result<AccrualOutcome, LedgerError> {
        let policy = self.policy;
        let window = policy.window_for(now)?;
        let effective_from = policy.next_month_start(now)?;

        self.executor
            .execute(cancel, move |conn| {
                Box::pin(accrue_in_tx(
                    conn,
                    referrer_account_id,
                    policy,
                    window,
                    effective_from,
                ))
            })
            .await
    }

    /// Run the monthly accrual for every referrer with a used code in the window.
    /// Each referrer gets its own atomic unit; one failure does not stop the others.
    pub async fn accrue_all_at(
        &self,
        now: DateTime<Utc>,
        cancel: &Cancellation,
    ) -> Result<AccrualReport, LedgerError> {
        let window = self.policy.window_for(now)?;
        let referrers = cancel
            .guard(async {
                ReferralCodeRepository::referrers_used_in_window(
                    self.executor.pool(),
                    window.start,
                    window.end,
                )
                .await
                .map_err(LedgerError::from)
            })
            .await?;

        info!(
            referrers = referrers.len(),
            window_start = %window.start,
            window_end = %window.end,
            "Starting accrual batch"
        );

        let results: Vec<(i64, Result<AccrualOutcome, LedgerError>)> = stream::iter(referrers)
            .map(|id| async move { (id, self.run_at(id, now, cancel).await) })
            .buffer_unordered(self.batch_concurrency)
            .collect()
            .await;

        let mut report = AccrualReport::default();
        for (id, result) in results {
            if let Err(e) = &result {
                warn!(referrer_account_id = id, error = %e, "Accrual failed");
            }
            report.record(id, result);
        }

        info!(
            updated = report.updated.len(),
            unchanged = report.unchanged.len(),
            failed = report.failed.len(),
            "Accrual batch finished"
        );
        Ok(report)
    }
}

/// Body of one accrual unit, run on the transaction's connection
async fn accrue_in_tx(
    conn: &mut PgConnection,
    referrer_account_id: i64,
    policy: AccrualPolicy,
    window: AccrualWindow,
    effective_from: DateTime<Utc>,
) -> Result<AccrualOutcome, LedgerError> {
    let account = AccountRepository::get_for_update(&mut *conn, referrer_account_id)
        .await?
        .ok_or_else(|| LedgerError::not_found("account", referrer_account_id))?;

    let used_count = ReferralCodeRepository::count_used_in_window(
        &mut *conn,
        referrer_account_id,
        window.start,
        window.end,
    )
    .await?;

    let decision = policy.decide(used_count, account.extra_interest);
    let Some(rate) = decision.new_rate() else {
        debug!(
            referrer_account_id,
            used_count,
            decision = decision.as_str(),
            "Extra interest left unchanged"
        );
        return Ok(AccrualOutcome {
            account,
            used_count,
            decision,
        });
    };

    let account = AccountRepository::update_extra_interest(
        &mut *conn,
        referrer_account_id,
        rate,
        effective_from,
        policy.duration_months(),
    )
    .await?
    .ok_or_else(|| LedgerError::not_found("account", referrer_account_id))?;

    info!(
        referrer_account_id,
        used_count,
        rate,
        effective_from = %effective_from,
        "Extra interest updated"
    );

    Ok(AccrualOutcome {
        account,
        used_count,
        decision,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: i64, rate: Option<f64>) -> Account {
        Account {
            id,
            owner: "referrer".to_string(),
            email: format!("r{}@x.io", id),
            balance: 0,
            currency: "YEN".to_string(),
            extra_interest: rate,
            extra_interest_start_date: None,
            extra_interest_duration: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_report_buckets() {
        let mut report = AccrualReport::default();
        report.record(
            1,
            Ok(AccrualOutcome {
                account: account(1, Some(3.0)),
                used_count: 3,
                decision: RateDecision::Apply(3.0),
            }),
        );
        report.record(
            2,
            Ok(AccrualOutcome {
                account: account(2, Some(10.0)),
                used_count: 4,
                decision: RateDecision::AtMaximum,
            }),
        );
        report.record(3, Err(LedgerError::not_found("account", 3)));

        assert_eq!(report.updated.len(), 1);
        assert_eq!(report.updated[0].id, 1);
        assert_eq!(report.unchanged, vec![2]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.total(), 3);
    }
}
