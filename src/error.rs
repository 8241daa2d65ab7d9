//! Ledger Error Types
//!
//! A closed set of error kinds. Callers branch on [`LedgerError::kind`], never on
//! message text.

use thiserror::Error;

/// Postgres SQLSTATE codes the ledger recognises
const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const CHECK_VIOLATION: &str = "23514";
const QUERY_CANCELED: &str = "57014";
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Coarse error classification for callers mapping to transport responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Storage,
    Cancelled,
}

/// Rejected input, detected before any storage work starts
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Amount must be greater than zero")]
    NonPositiveAmount,

    #[error("Source and destination accounts are the same")]
    SameAccount,

    #[error("Referrer cannot redeem their own referral code")]
    SelfReferral,

    #[error("Opening balance must not be negative")]
    NegativeBalance,

    #[error("Owner must not be empty")]
    EmptyOwner,

    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    #[error("Invalid page: page_id must be >= 1 and page_size within 5..=10")]
    InvalidPage,

    #[error("Date outside the supported calendar range")]
    CalendarOutOfRange,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    #[error("Referral code is already used")]
    ReferralCodeAlreadyUsed,

    #[error("Referrer still holds an unused referral code")]
    UnusedCodeOutstanding,

    #[error("Email is already registered")]
    DuplicateEmail,
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("Conflict: {0}")]
    Conflict(#[from] ConflictKind),

    #[error("Database error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Operation cancelled before completion")]
    Cancelled,

    /// The unit failed and the rollback issued for it failed as well
    #[error("tx err: {cause}, rb err: {rollback}")]
    RollbackFailed {
        cause: Box<LedgerError>,
        rollback: sqlx::Error,
    },
}

impl LedgerError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        LedgerError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Attach a rollback failure without losing the unit's own error
    pub fn with_rollback_failure(self, rollback: sqlx::Error) -> Self {
        LedgerError::RollbackFailed {
            cause: Box::new(self),
            rollback,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Validation(_) => ErrorKind::Validation,
            LedgerError::NotFound { .. } => ErrorKind::NotFound,
            LedgerError::Conflict(_) => ErrorKind::Conflict,
            LedgerError::Storage(_) => ErrorKind::Storage,
            LedgerError::Cancelled => ErrorKind::Cancelled,
            // The rollback failure is a storage problem whatever the cause was
            LedgerError::RollbackFailed { .. } => ErrorKind::Storage,
        }
    }

    /// The error that started the failure, looking through rollback wrappers
    pub fn root_cause(&self) -> &LedgerError {
        match self {
            LedgerError::RollbackFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Validation(v) => match v {
                ValidationError::NonPositiveAmount => "INVALID_AMOUNT",
                ValidationError::SameAccount => "SAME_ACCOUNT",
                ValidationError::SelfReferral => "SELF_REFERRAL",
                ValidationError::NegativeBalance => "NEGATIVE_BALANCE",
                ValidationError::EmptyOwner => "EMPTY_OWNER",
                ValidationError::UnsupportedCurrency(_) => "UNSUPPORTED_CURRENCY",
                ValidationError::InvalidPage => "INVALID_PAGE",
                ValidationError::CalendarOutOfRange => "CALENDAR_OUT_OF_RANGE",
            },
            LedgerError::NotFound { .. } => "NOT_FOUND",
            LedgerError::Conflict(c) => match c {
                ConflictKind::ReferralCodeAlreadyUsed => "REFERRAL_CODE_USED",
                ConflictKind::UnusedCodeOutstanding => "UNUSED_CODE_OUTSTANDING",
                ConflictKind::DuplicateEmail => "DUPLICATE_EMAIL",
            },
            LedgerError::Storage(_) => "DATABASE_ERROR",
            LedgerError::Cancelled => "CANCELLED",
            LedgerError::RollbackFailed { .. } => "ROLLBACK_FAILED",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Cancelled => 503,
            ErrorKind::Storage => {
                if self.is_constraint_violation() {
                    422
                } else {
                    500
                }
            }
        }
    }

    /// True when the database rejected a row because of a check, foreign-key or
    /// unique constraint (e.g. a debit that would make a balance negative)
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self.root_cause().sqlstate().as_deref(),
            Some(UNIQUE_VIOLATION | FOREIGN_KEY_VIOLATION | CHECK_VIOLATION)
        )
    }

    /// True when the server aborted the statement: `statement_timeout`, `lock_timeout`
    /// or a `pg_cancel_backend` request
    pub fn is_statement_aborted(&self) -> bool {
        matches!(
            self.root_cause().sqlstate().as_deref(),
            Some(QUERY_CANCELED | LOCK_NOT_AVAILABLE)
        )
    }

    fn sqlstate(&self) -> Option<String> {
        match self {
            LedgerError::Storage(sqlx::Error::Database(db)) => db.code().map(|c| c.into_owned()),
            _ => None,
        }
    }

    /// Map a unique violation on `accounts.email` to a conflict, leave anything else as is
    pub(crate) fn from_account_insert(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.code().as_deref() == Some(UNIQUE_VIOLATION)
                && db.constraint().is_some_and(|c| c.contains("email"))
            {
                return LedgerError::Conflict(ConflictKind::DuplicateEmail);
            }
        }
        LedgerError::Storage(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            LedgerError::from(ValidationError::SameAccount).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            LedgerError::not_found("account", 7).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            LedgerError::from(ConflictKind::ReferralCodeAlreadyUsed).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            LedgerError::from(sqlx::Error::PoolTimedOut).kind(),
            ErrorKind::Storage
        );
        assert_eq!(LedgerError::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            LedgerError::from(ValidationError::NonPositiveAmount).code(),
            "INVALID_AMOUNT"
        );
        assert_eq!(
            LedgerError::from(ValidationError::NegativeBalance).code(),
            "NEGATIVE_BALANCE"
        );
        assert_eq!(
            LedgerError::from(ConflictKind::DuplicateEmail).code(),
            "DUPLICATE_EMAIL"
        );
        assert_eq!(LedgerError::not_found("transfer", 1).code(), "NOT_FOUND");
    }

    #[test]
    fn test_http_status() {
        assert_eq!(
            LedgerError::from(ValidationError::SameAccount).http_status(),
            400
        );
        assert_eq!(LedgerError::not_found("account", 1).http_status(), 404);
        assert_eq!(
            LedgerError::from(ConflictKind::ReferralCodeAlreadyUsed).http_status(),
            409
        );
        assert_eq!(LedgerError::from(sqlx::Error::PoolClosed).http_status(), 500);
        assert_eq!(LedgerError::Cancelled.http_status(), 503);
    }

    #[test]
    fn test_rollback_failure_keeps_unit_cause() {
        let err = LedgerError::from(ConflictKind::ReferralCodeAlreadyUsed)
            .with_rollback_failure(sqlx::Error::PoolClosed);

        assert_eq!(err.kind(), ErrorKind::Storage);
        assert_eq!(err.code(), "ROLLBACK_FAILED");
        assert_eq!(err.root_cause().kind(), ErrorKind::Conflict);

        let text = err.to_string();
        assert!(text.contains("Referral code is already used"));
        assert!(text.contains("rb err"));
    }

    #[test]
    fn test_not_found_display() {
        let err = LedgerError::not_found("account", 42);
        assert_eq!(err.to_string(), "account not found: 42");
    }

    #[test]
    fn test_non_database_errors_are_not_constraint_violations() {
        assert!(!LedgerError::from(sqlx::Error::RowNotFound).is_constraint_violation());
        assert!(!LedgerError::Cancelled.is_constraint_violation());
        assert!(!LedgerError::from(sqlx::Error::PoolTimedOut).is_statement_aborted());
        assert!(!LedgerError::Cancelled.is_statement_aborted());
    }
}
