//! Financial precision utilities for pool and ledger math.
//!
//! # Design Philosophy
//!
//! - All internal calculations use i64 cents (1/100 of a dollar)
//! - Conversion to/from f64 dollars happens only at API boundaries
//! - Rounding is explicit and documented
//!
//! # Usage
//!
//! ```rust
//! use pick4_core::utils::money::Money;
//!
//! // Create from dollars
//! let entry_fee = Money::from_dollars(10.00);
//! assert_eq!(entry_fee.cents(), 1000);
//!
//! // Arithmetic operations (in cents, no precision loss)
//! let pot = Money::from_cents(2400) + Money::from_cents(800);
//! assert_eq!(pot.cents(), 3200);
//!
//! // Split a pot among winners, floored to the cent
//! let (per_winner, remainder) = pot.split_even(3);
//! assert_eq!(per_winner.cents(), 1066);
//! assert_eq!(remainder.cents(), 2);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

/// Money value stored as cents (i64) for precision.
///
/// Prevents floating-point drift in pool splits, payouts, and the
/// transaction ledger by using integer arithmetic internally.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money {
    /// Value in cents (1/100 of a dollar)
    cents: i64,
}

impl Money {
    /// Create from cents directly (no conversion)
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Create from dollars (rounds to nearest cent)
    #[inline]
    pub fn from_dollars(dollars: f64) -> Self {
        Self {
            cents: (dollars * 100.0).round() as i64,
        }
    }

    /// Create zero value
    #[inline]
    pub const fn zero() -> Self {
        Self { cents: 0 }
    }

    /// Get value in cents
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.cents
    }

    /// Get value as dollars (for display/API)
    #[inline]
    pub fn as_dollars(&self) -> f64 {
        self.cents as f64 / 100.0
    }

    /// Check if value is zero
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.cents == 0
    }

    /// Check if value is positive
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.cents > 0
    }

    /// Check if value is negative
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.cents < 0
    }

    /// Take an integer percentage of this amount, floored to the cent.
    ///
    /// Used for the pool split: the floor keeps each share exact and
    /// lets the caller assign the leftover cents deterministically.
    #[inline]
    pub const fn percent_floor(&self, pct: i64) -> Self {
        Self {
            cents: self.cents * pct / 100,
        }
    }

    /// Divide evenly among `n` recipients, floored to the cent.
    ///
    /// Returns (per-recipient share, undistributed remainder).
    /// `n == 0` returns (zero, self).
    pub const fn split_even(&self, n: i64) -> (Self, Self) {
        if n <= 0 {
            return (Self::zero(), *self);
        }
        let share = self.cents / n;
        (
            Self { cents: share },
            Self {
                cents: self.cents - share * n,
            },
        )
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Self {
            cents: self.cents + other.cents,
        }
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.cents += other.cents;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Self {
            cents: self.cents - other.cents,
        }
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.cents -= other.cents;
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: i64) -> Self {
        Self {
            cents: self.cents * rhs,
        }
    }
}

impl Div<i64> for Money {
    type Output = Self;

    #[inline]
    fn div(self, rhs: i64) -> Self {
        Self {
            cents: self.cents / rhs,
        }
    }
}

impl Neg for Money {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Self { cents: -self.cents }
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, m| acc + m)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.cents < 0 {
            write!(f, "-${:.2}", (-self.cents) as f64 / 100.0)
        } else {
            write!(f, "${:.2}", self.cents as f64 / 100.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_from_dollars() {
        assert_eq!(Money::from_dollars(1.23).cents(), 123);
        assert_eq!(Money::from_dollars(0.01).cents(), 1);
        assert_eq!(Money::from_dollars(-5.50).cents(), -550);
    }

    #[test]
    fn test_money_arithmetic() {
        let a = Money::from_cents(100);
        let b = Money::from_cents(35);

        assert_eq!((a + b).cents(), 135);
        assert_eq!((a - b).cents(), 65);
        assert_eq!((a * 3).cents(), 300);
        assert_eq!((a / 2).cents(), 50);
        assert_eq!((-a).cents(), -100);
    }

    #[test]
    fn test_money_display() {
        assert_eq!(Money::from_cents(123).to_string(), "$1.23");
        assert_eq!(Money::from_cents(-456).to_string(), "-$4.56");
        assert_eq!(Money::from_cents(5).to_string(), "$0.05");
    }

    #[test]
    fn test_percent_floor() {
        // $10.01 at 10% floors to $1.00, not $1.001
        assert_eq!(Money::from_cents(1001).percent_floor(10).cents(), 100);
        assert_eq!(Money::from_cents(1000).percent_floor(80).cents(), 800);
        assert_eq!(Money::from_cents(1).percent_floor(10).cents(), 0);
    }

    #[test]
    fn test_split_even() {
        let pot = Money::from_cents(1000);

        let (share, rem) = pot.split_even(4);
        assert_eq!(share.cents(), 250);
        assert!(rem.is_zero());

        let (share, rem) = pot.split_even(3);
        assert_eq!(share.cents(), 333);
        assert_eq!(rem.cents(), 1);
        assert_eq!((share * 3 + rem).cents(), 1000);

        let (share, rem) = pot.split_even(0);
        assert!(share.is_zero());
        assert_eq!(rem, pot);
    }

    #[test]
    fn test_sum() {
        let total: Money = [100, 250, 5].iter().map(|c| Money::from_cents(*c)).sum();
        assert_eq!(total.cents(), 355);
    }

    #[test]
    fn test_precision_no_accumulation() {
        // This would fail with f64 due to floating-point errors
        let mut total = Money::zero();
        for _ in 0..1000 {
            total = total + Money::from_cents(1);
        }
        assert_eq!(total.cents(), 1000);
        assert_eq!(total.as_dollars(), 10.0);
    }
}
