//! Referral-driven interest accrual
//!
//! Once per cycle (cutoff on the 21st, Asia/Tokyo) a referrer's bonus rate is set from
//! the number of their referral codes used in the previous cycle:
//!
//! ```text
//! [21st 00:00:00 of last month, 20th 23:59:59 of this month]
//!     count == 0        → unchanged
//!     rate  >= cap      → unchanged (stays at cap)
//!     count == rate     → unchanged
//!     otherwise         → rate = min(count, cap), effective 1st of next month, 9 months
//! ```

pub mod engine;
pub mod policy;

pub use engine::{AccrualEngine, AccrualOutcome, AccrualReport};
pub use policy::{AccrualPolicy, AccrualWindow, RateDecision};
