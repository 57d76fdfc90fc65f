//! Money, compared by value.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Monetary amount in the smallest currency unit (cents).
///
/// Prices and purchase totals are snapshotted as `Money`, never live-linked.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    /// Construct a non-negative amount.
    pub fn from_cents(cents: i64) -> Result<Self, DomainError> {
        if cents < 0 {
            return Err(DomainError::validation("price cannot be negative"));
        }
        Ok(Self(cents))
    }

    pub fn cents(self) -> i64 {
        self.0
    }

    /// Multiply by a quantity, failing instead of wrapping.
    pub fn times(self, quantity: u32) -> Result<Self, DomainError> {
        self.0
            .checked_mul(i64::from(quantity))
            .map(Self)
            .ok_or_else(|| DomainError::validation("purchase total overflows"))
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}
