//! Loan policy configuration and overdue fee computation.
//!
//! The policy values (loan period, per-day fine) come from configuration
//! outside the engine; [`FeeCalculator`] is the pure mapping from overdue
//! duration to a fee amount.

use crate::money::Money;
use chrono::Duration;
use std::str::FromStr;

/// Lending policy supplied by the fee policy source.
///
/// The engine consumes this as plain configuration; it applies the same
/// policy to every book.
#[derive(Debug, Clone)]
pub struct LendingPolicy {
    /// How long a checkout lasts before the book is due back.
    pub loan_period: Duration,

    /// Fine charged per started day past the due date.
    pub daily_fine: Money,
}

impl LendingPolicy {
    /// Creates a policy with the given loan period in days and daily fine.
    pub fn new(loan_period_days: i64, daily_fine: Money) -> Self {
        LendingPolicy {
            loan_period: Duration::days(loan_period_days),
            daily_fine,
        }
    }
}

impl Default for LendingPolicy {
    /// The conventional policy: 14-day loans, 0.50 per day overdue.
    fn default() -> Self {
        LendingPolicy::new(14, Money::from_str("0.50").expect("valid default fine"))
    }
}

/// Pure overdue-duration to fee mapping.
///
/// A started day counts as a full day: returning one hour late costs one
/// day's fine. On-time returns (zero or negative overdue duration) cost
/// nothing.
#[derive(Debug, Clone)]
pub struct FeeCalculator {
    daily_fine: Money,
}

impl FeeCalculator {
    const SECONDS_PER_DAY: i64 = 86_400;

    /// Creates a calculator charging `daily_fine` per started overdue day.
    pub fn new(daily_fine: Money) -> Self {
        FeeCalculator { daily_fine }
    }

    /// Computes the fee for a checkout returned `overdue` past its due date.
    pub fn fee_for(&self, overdue: Duration) -> Money {
        let seconds = overdue.num_seconds();
        if seconds <= 0 {
            return Money::ZERO;
        }

        // Round up to whole days.
        let days = (seconds + Self::SECONDS_PER_DAY - 1) / Self::SECONDS_PER_DAY;
        self.daily_fine * days
    }
}
