//! Fixed-point currency amounts.
//!
//! All amounts are carried end-to-end as integer minor units (cents,
//! centavos) so the settled-amount comparison never depends on floating
//! point rounding.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An amount of money in the gateway's minor currency unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MinorUnits(i64);

impl MinorUnits {
    /// Zero.
    pub const ZERO: Self = Self(0);

    /// Wraps a raw minor-unit count.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw minor-unit count.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Returns `true` when the amount is strictly positive.
    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Adds two amounts, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    /// Multiplies by a unit count, returning `None` on overflow.
    #[must_use]
    pub fn checked_mul(self, quantity: u32) -> Option<Self> {
        self.0.checked_mul(i64::from(quantity)).map(Self)
    }
}

impl fmt::Display for MinorUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl From<i64> for MinorUnits {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_two_decimal_places() {
        assert_eq!(MinorUnits::new(30_000).to_string(), "300.00");
        assert_eq!(MinorUnits::new(5).to_string(), "0.05");
        assert_eq!(MinorUnits::new(-1_050).to_string(), "-10.50");
    }

    #[test]
    fn checked_mul_detects_overflow() {
        assert_eq!(
            MinorUnits::new(10_000).checked_mul(3),
            Some(MinorUnits::new(30_000))
        );
        assert_eq!(MinorUnits::new(i64::MAX).checked_mul(2), None);
    }

    #[test]
    fn checked_add_detects_overflow() {
        assert_eq!(MinorUnits::new(i64::MAX).checked_add(MinorUnits::new(1)), None);
        assert_eq!(
            MinorUnits::ZERO.checked_add(MinorUnits::new(7)),
            Some(MinorUnits::new(7))
        );
    }

    #[test]
    fn positivity() {
        assert!(MinorUnits::new(1).is_positive());
        assert!(!MinorUnits::ZERO.is_positive());
    }
}
