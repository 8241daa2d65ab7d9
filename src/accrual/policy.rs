//! Accrual calendar and rate rules
//!
//! Pure functions, no storage access. All calendar arithmetic happens in the policy's
//! fixed zone; the host's local zone is never consulted.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Offset, TimeZone, Utc};

use crate::error::ValidationError;

/// Day of month on which a new accrual cycle starts
pub const CUTOFF_DAY: u32 = 21;

/// Upper bound for the referral bonus rate (percent)
pub const MAX_EXTRA_INTEREST: f64 = 10.0;

/// Months a newly granted rate stays in effect
pub const ACCRUAL_DURATION_MONTHS: i32 = 9;

const TOKYO_UTC_OFFSET_HOURS: i32 = 9;

/// Inclusive time range `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccrualWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl AccrualWindow {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }
}

/// Outcome of the rate rule for one referrer
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateDecision {
    /// No used codes in the window
    NoReferrals,
    /// Current rate already at the cap
    AtMaximum,
    /// Count equals the current rate
    Unchanged,
    /// Persist this rate with a new effective date
    Apply(f64),
}

impl RateDecision {
    pub fn new_rate(&self) -> Option<f64> {
        match self {
            RateDecision::Apply(rate) => Some(*rate),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RateDecision::NoReferrals => "NO_REFERRALS",
            RateDecision::AtMaximum => "AT_MAXIMUM",
            RateDecision::Unchanged => "UNCHANGED",
            RateDecision::Apply(_) => "APPLY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccrualPolicy {
    zone: FixedOffset,
    max_rate: f64,
    duration_months: i32,
}

impl Default for AccrualPolicy {
    fn default() -> Self {
        Self::tokyo()
    }
}

impl AccrualPolicy {
    /// Returns `None` when the offset is out of range
    pub fn new(utc_offset_hours: i32, max_rate: f64, duration_months: i32) -> Option<Self> {
        let zone = FixedOffset::east_opt(utc_offset_hours.checked_mul(3600)?)?;
        Some(Self {
            zone,
            max_rate,
            duration_months,
        })
    }

    /// Asia/Tokyo (+09:00, no daylight saving), 10% cap, 9 months
    pub fn tokyo() -> Self {
        Self {
            zone: FixedOffset::east_opt(TOKYO_UTC_OFFSET_HOURS * 3600).unwrap_or_else(|| Utc.fix()),
            max_rate: MAX_EXTRA_INTEREST,
            duration_months: ACCRUAL_DURATION_MONTHS,
        }
    }

    pub fn zone(&self) -> FixedOffset {
        self.zone
    }

    pub fn max_rate(&self) -> f64 {
        self.max_rate
    }

    pub fn duration_months(&self) -> i32 {
        self.duration_months
    }

    /// The previous cycle seen from `now`:
    /// `[21st 00:00:00 of last month, 20th 23:59:59 of this month]`.
    pub fn window_for(&self, now: DateTime<Utc>) -> Result<AccrualWindow, ValidationError> {
        let local = now.with_timezone(&self.zone);
        let (year, month) = (local.year(), local.month());
        let (prev_year, prev_month) = previous_month(year, month);

        Ok(AccrualWindow {
            start: self.local_instant(prev_year, prev_month, CUTOFF_DAY, 0, 0, 0)?,
            end: self.local_instant(year, month, CUTOFF_DAY - 1, 23, 59, 59)?,
        })
    }

    /// Midnight on the first day of the month after `now`
    pub fn next_month_start(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, ValidationError> {
        let local = now.with_timezone(&self.zone);
        let (year, month) = next_month(local.year(), local.month());
        self.local_instant(year, month, 1, 0, 0, 0)
    }

    /// Rate rule. `used_count` is the number of used codes in the window.
    pub fn decide(&self, used_count: i64, current_rate: Option<f64>) -> RateDecision {
        if used_count <= 0 {
            return RateDecision::NoReferrals;
        }

        let current = current_rate.unwrap_or(0.0);
        if current >= self.max_rate {
            return RateDecision::AtMaximum;
        }

        // TODO: product review pending on whether count == rate should really be a no-op
        if used_count as f64 == current {
            return RateDecision::Unchanged;
        }

        RateDecision::Apply((used_count as f64).min(self.max_rate))
    }

    fn local_instant(
        &self,
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        min: u32,
        sec: u32,
    ) -> Result<DateTime<Utc>, ValidationError> {
        NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|date| date.and_hms_opt(hour, min, sec))
            .and_then(|naive| self.zone.from_local_datetime(&naive).single())
            .map(|local| local.with_timezone(&Utc))
            .ok_or(ValidationError::CalendarOutOfRange)
    }
}

fn previous_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn jst(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        FixedOffset::east_opt(9 * 3600)
            .unwrap()
            .with_ymd_and_hms(y, m, d, h, mi, s)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_window_mid_year() {
        let policy = AccrualPolicy::tokyo();
        let window = policy.window_for(jst(2024, 7, 21, 9, 0, 0)).unwrap();

        assert_eq!(window.start, jst(2024, 6, 21, 0, 0, 0));
        assert_eq!(window.end, jst(2024, 7, 20, 23, 59, 59));
        assert_eq!(
            window.start,
            Utc.with_ymd_and_hms(2024, 6, 20, 15, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_window_january_rolls_back_year() {
        let policy = AccrualPolicy::tokyo();
        let window = policy.window_for(jst(2025, 1, 21, 0, 0, 0)).unwrap();

        assert_eq!(window.start, jst(2024, 12, 21, 0, 0, 0));
        assert_eq!(window.end, jst(2025, 1, 20, 23, 59, 59));
    }

    #[test]
    fn test_window_uses_fixed_zone_not_utc_date() {
        // 2024-07-31T16:00Z is already August 1st in Tokyo
        let policy = AccrualPolicy::tokyo();
        let now = Utc.with_ymd_and_hms(2024, 7, 31, 16, 0, 0).unwrap();
        let window = policy.window_for(now).unwrap();

        assert_eq!(window.start, jst(2024, 7, 21, 0, 0, 0));
        assert_eq!(window.end, jst(2024, 8, 20, 23, 59, 59));
    }

    #[test]
    fn test_window_boundaries_inclusive() {
        let policy = AccrualPolicy::tokyo();
        let window = policy.window_for(jst(2024, 7, 21, 0, 0, 0)).unwrap();

        let start = jst(2024, 6, 21, 0, 0, 0);
        let end = jst(2024, 7, 20, 23, 59, 59);
        assert!(window.contains(start));
        assert!(window.contains(end));
        assert!(!window.contains(start - Duration::seconds(1)));
        assert!(!window.contains(end + Duration::seconds(1)));

        let counted = [start, end, start - Duration::seconds(1), end + Duration::seconds(1)]
            .iter()
            .filter(|t| window.contains(**t))
            .count() as i64;
        assert_eq!(counted, 2);
        assert_eq!(policy.decide(counted, None), RateDecision::Apply(2.0));
    }

    #[test]
    fn test_next_month_start() {
        let policy = AccrualPolicy::tokyo();
        assert_eq!(
            policy.next_month_start(jst(2024, 7, 21, 10, 0, 0)).unwrap(),
            jst(2024, 8, 1, 0, 0, 0)
        );
        assert_eq!(
            policy.next_month_start(jst(2024, 12, 21, 0, 0, 0)).unwrap(),
            jst(2025, 1, 1, 0, 0, 0)
        );
    }

    #[test]
    fn test_decide_no_referrals() {
        let policy = AccrualPolicy::tokyo();
        assert_eq!(policy.decide(0, None), RateDecision::NoReferrals);
        assert_eq!(policy.decide(0, Some(4.0)), RateDecision::NoReferrals);
    }

    #[test]
    fn test_decide_at_maximum() {
        let policy = AccrualPolicy::tokyo();
        assert_eq!(policy.decide(3, Some(10.0)), RateDecision::AtMaximum);
        assert_eq!(policy.decide(25, Some(10.0)), RateDecision::AtMaximum);
    }

    #[test]
    fn test_decide_caps_count() {
        let policy = AccrualPolicy::tokyo();
        assert_eq!(policy.decide(10, None), RateDecision::Apply(10.0));
        assert_eq!(policy.decide(37, Some(2.0)), RateDecision::Apply(10.0));
    }

    #[test]
    fn test_decide_count_equal_to_rate_is_noop() {
        let policy = AccrualPolicy::tokyo();
        assert_eq!(policy.decide(4, Some(4.0)), RateDecision::Unchanged);
        assert_eq!(policy.decide(5, Some(4.0)), RateDecision::Apply(5.0));
        assert_eq!(policy.decide(3, Some(4.0)), RateDecision::Apply(3.0));
    }

    #[test]
    fn test_new_rejects_bad_offset() {
        assert!(AccrualPolicy::new(25, 10.0, 9).is_none());
        let utc = AccrualPolicy::new(0, 5.0, 3).unwrap();
        assert_eq!(utc.zone().local_minus_utc(), 0);
        assert_eq!(utc.decide(8, None), RateDecision::Apply(5.0));
    }
}
