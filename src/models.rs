//! Row types for accounts, the double-entry ledger and referral bookkeeping

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Currencies an account may be opened in. No conversion between them exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Yen,
    Eur,
    Usd,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Yen => "YEN",
            Currency::Eur => "EUR",
            Currency::Usd => "USD",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "YEN" => Ok(Currency::Yen),
            "EUR" => Ok(Currency::Eur),
            "USD" => Ok(Currency::Usd),
            _ => Err(ValidationError::UnsupportedCurrency(s.to_string())),
        }
    }
}

/// Bank account. Balance is in minor units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: i64,
    pub owner: String,
    pub email: String,
    pub balance: i64,
    pub currency: String,
    /// Referral bonus rate in percent, 0.0..=10.0
    pub extra_interest: Option<f64>,
    pub extra_interest_start_date: Option<DateTime<Utc>>,
    /// Months the bonus rate stays in effect
    pub extra_interest_duration: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// One signed balance change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Entry {
    pub id: i64,
    pub account_id: i64,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Transfer {
    pub id: i64,
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ReferralCode {
    pub id: i64,
    pub referral_code: String,
    pub referrer_account_id: i64,
    pub is_used: bool,
    pub created_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

/// Audit row written once per redemption, never updated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ReferralHistory {
    pub id: i64,
    pub referrer_account_id: i64,
    pub referred_account_id: i64,
    pub referral_code_id: i64,
    pub referral_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub owner: String,
    pub email: String,
    pub currency: Currency,
    pub balance: i64,
}

impl NewAccount {
    pub fn new(owner: impl Into<String>, email: impl Into<String>, currency: Currency) -> Self {
        Self {
            owner: owner.into(),
            email: email.into(),
            currency,
            balance: 0,
        }
    }

    pub fn with_balance(mut self, balance: i64) -> Self {
        self.balance = balance;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.owner.trim().is_empty() {
            return Err(ValidationError::EmptyOwner);
        }
        if self.balance < 0 {
            return Err(ValidationError::NegativeBalance);
        }
        Ok(())
    }
}

/// 1-based page with 5..=10 rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page_id: i64,
    pub page_size: i64,
}

impl Page {
    pub const MIN_SIZE: i64 = 5;
    pub const MAX_SIZE: i64 = 10;

    pub fn new(page_id: i64, page_size: i64) -> Result<Self, ValidationError> {
        if page_id < 1 || !(Self::MIN_SIZE..=Self::MAX_SIZE).contains(&page_size) {
            return Err(ValidationError::InvalidPage);
        }
        // The row offset must fit the OFFSET parameter
        (page_id - 1)
            .checked_mul(page_size)
            .ok_or(ValidationError::InvalidPage)?;
        Ok(Self { page_id, page_size })
    }

    pub fn limit(&self) -> i64 {
        self.page_size
    }

    pub fn offset(&self) -> i64 {
        (self.page_id - 1) * self.page_size
    }
}
