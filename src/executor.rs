//! Transaction Executor
//!
//! Runs a caller-supplied unit of work inside one PostgreSQL transaction:
//!
//! ```text
//! BEGIN → unit(conn) ─ Ok  → COMMIT   (commit error surfaced as-is)
//!                    └ Err → ROLLBACK (rollback error appended to the unit error)
//! ```
//!
//! No retries happen here; at most one attempt per call.

use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::error::LedgerError;

/// External cancellation for a unit of work: an optional deadline and/or an optional
/// signal flipped by a [`CancelHandle`].
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    deadline: Option<Instant>,
    signal: Option<watch::Receiver<bool>>,
}

/// Sending half of a cancellation signal
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        // send_replace never fails, even with no receivers left
        self.0.send_replace(true);
    }
}

impl Cancellation {
    /// Never fires
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            signal: None,
        }
    }

    /// A cancellation fired through the returned handle
    pub fn signal() -> (CancelHandle, Self) {
        let (tx, rx) = watch::channel(false);
        (
            CancelHandle(tx),
            Self {
                deadline: None,
                signal: Some(rx),
            },
        )
    }

    /// Add (or tighten) a deadline
    pub fn and_timeout(mut self, timeout: Duration) -> Self {
        let at = Instant::now() + timeout;
        self.deadline = Some(self.deadline.map_or(at, |d| d.min(at)));
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, zero once it has passed
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// False for [`Cancellation::none`]: nothing can ever fire
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some() || self.signal.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
            || self.signal.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once the deadline passes or the signal fires
    pub async fn fired(&self) {
        let deadline = self.deadline;
        let signal = self.signal.clone();

        let timer = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        let flag = async move {
            match signal {
                Some(mut rx) => {
                    let outcome = rx.wait_for(|cancelled| *cancelled).await.map(|_| ());
                    if outcome.is_err() {
                        // Handle dropped without cancelling
                        std::future::pending::<()>().await;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = timer => {}
            _ = flag => {}
        }
    }

    /// Run `work` until it finishes or cancellation fires, whichever comes first.
    /// On cancellation `work` is dropped, which aborts any in-flight storage call.
    pub async fn guard<T, F>(&self, work: F) -> Result<T, LedgerError>
    where
        F: Future<Output = Result<T, LedgerError>>,
    {
        tokio::select! {
            biased;
            outcome = work => outcome,
            _ = self.fired() => Err(LedgerError::Cancelled),
        }
    }
}

/// Executes units of work atomically against a pool
#[derive(Clone)]
pub struct TxExecutor {
    pool: PgPool,
}

impl TxExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Begin, run `unit` with the transaction's connection, then commit or roll back.
    ///
    /// The error returned from a failed unit reaches the caller unchanged, unless the
    /// rollback also fails, in which case it is wrapped in
    /// [`LedgerError::RollbackFailed`] together with the rollback error.
    ///
    /// When `cancel` fires the unit is dropped, the statement still running on the
    /// server is interrupted, and the rollback runs before `Cancelled` is returned.
    pub async fn execute<T, F>(&self, cancel: &Cancellation, unit: F) -> Result<T, LedgerError>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T, LedgerError>> + Send,
    {
        if cancel.is_cancelled() {
            return Err(LedgerError::Cancelled);
        }

        let mut tx = cancel
            .guard(async { self.pool.begin().await.map_err(LedgerError::from) })
            .await?;

        let backend_pid = match cancel.guard(bind_to_cancellation(&mut *tx, cancel)).await {
            Ok(pid) => pid,
            Err(err) => return Err(Self::rollback(tx, err).await),
        };

        let outcome = match cancel.guard(unit(&mut *tx)).await {
            // Server-side timeouts are only ever set from the cancellation
            Err(err) if cancel.is_armed() && err.is_statement_aborted() => {
                Err(LedgerError::Cancelled)
            }
            other => other,
        };

        match outcome {
            Ok(value) => {
                tx.commit().await?;
                debug!("Transaction committed");
                Ok(value)
            }
            Err(err) => {
                if let (LedgerError::Cancelled, Some(pid)) = (&err, backend_pid) {
                    self.interrupt_backend(pid).await;
                }
                Err(Self::rollback(tx, err).await)
            }
        }
    }

    /// Abort whatever statement the backend is still running for a dropped unit, so the
    /// rollback does not wait for it (e.g. on a row lock held elsewhere). A cancel
    /// request reaching an idle backend is ignored by the server.
    async fn interrupt_backend(&self, backend_pid: i32) {
        match sqlx::query_scalar::<_, bool>("SELECT pg_cancel_backend($1)")
            .bind(backend_pid)
            .fetch_one(&self.pool)
            .await
        {
            Ok(sent) => debug!(backend_pid, sent, "Cancel request sent to backend"),
            Err(e) => warn!(backend_pid, error = %e, "Cancel request failed"),
        }
    }

    async fn rollback(tx: Transaction<'static, Postgres>, err: LedgerError) -> LedgerError {
        match tx.rollback().await {
            Ok(()) => {
                warn!(error = %err, code = err.code(), "Transaction rolled back");
                err
            }
            Err(rb_err) => {
                error!(error = %err, rollback_error = %rb_err, "Rollback failed");
                err.with_rollback_failure(rb_err)
            }
        }
    }
}

/// Tie the open transaction to `cancel`.
///
/// With a deadline, `lock_timeout` and `statement_timeout` are set for this transaction
/// only, to the time left, so the server gives up on its own. Returns the backend pid
/// used to interrupt a running statement when the cancellation fires; `None` when
/// nothing can fire.
async fn bind_to_cancellation(
    conn: &mut PgConnection,
    cancel: &Cancellation,
) -> Result<Option<i32>, LedgerError> {
    if !cancel.is_armed() {
        return Ok(None);
    }

    let pid = match cancel.remaining() {
        Some(remaining) => {
            if remaining.is_zero() {
                return Err(LedgerError::Cancelled);
            }
            let limit = server_timeout(remaining);
            let (pid, _, _) = sqlx::query_as::<_, (i32, String, String)>(
                r#"SELECT pg_backend_pid(),
                          set_config('lock_timeout', $1, true),
                          set_config('statement_timeout', $1, true)"#,
            )
            .bind(&limit)
            .fetch_one(&mut *conn)
            .await?;
            pid
        }
        None => {
            sqlx::query_scalar::<_, i32>("SELECT pg_backend_pid()")
                .fetch_one(&mut *conn)
                .await?
        }
    };
    Ok(Some(pid))
}

/// Postgres timeout setting for `remaining`. Never `0ms`, which disables the timeout.
fn server_timeout(remaining: Duration) -> String {
    format!("{}ms", remaining.as_millis().max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    async fn slow_ok() -> Result<u32, LedgerError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(1)
    }

    #[tokio::test]
    async fn test_guard_passes_through_result() {
        let cancel = Cancellation::none();
        let out = cancel.guard(async { Ok::<_, LedgerError>(7) }).await;
        assert_eq!(out.unwrap(), 7);

        let err = cancel
            .guard(async { Err::<u32, _>(LedgerError::not_found("account", 1)) })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_guard_times_out() {
        let cancel = Cancellation::with_timeout(Duration::from_millis(20));
        let err = cancel.guard(slow_ok()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_guard_signal_cancels() {
        let (handle, cancel) = Cancellation::signal();
        assert!(!cancel.is_cancelled());

        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { cancel.guard(slow_ok()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, LedgerError::Cancelled));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_dropped_handle_never_cancels() {
        let (handle, cancel) = Cancellation::signal();
        drop(handle);

        let cancel = cancel.and_timeout(Duration::from_secs(5));
        let out = cancel
            .guard(async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, LedgerError>("done")
            })
            .await;
        assert_eq!(out.unwrap(), "done");
    }

    #[test]
    fn test_server_timeout_never_zero() {
        assert_eq!(server_timeout(Duration::from_millis(1500)), "1500ms");
        assert_eq!(server_timeout(Duration::from_micros(300)), "1ms");
    }

    #[test]
    fn test_armed_and_remaining() {
        assert!(!Cancellation::none().is_armed());
        assert_eq!(Cancellation::none().remaining(), None);

        let (_handle, signal) = Cancellation::signal();
        assert!(signal.is_armed());
        assert_eq!(signal.remaining(), None);

        let timed = Cancellation::with_timeout(Duration::from_secs(60));
        assert!(timed.is_armed());
        assert!(timed.remaining().unwrap() > Duration::from_secs(59));

        let expired = Cancellation::with_timeout(Duration::ZERO);
        assert_eq!(expired.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn test_and_timeout_keeps_earliest_deadline() {
        let near = Cancellation::with_timeout(Duration::from_millis(10));
        let first = near.deadline().unwrap();
        let widened = near.and_timeout(Duration::from_secs(60));
        assert_eq!(widened.deadline(), Some(first));
    }
}
