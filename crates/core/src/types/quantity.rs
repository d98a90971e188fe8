//! Clamped cart quantities.
//!
//! Every stored quantity is an integer in `[1, 99]`. Out-of-range or
//! non-positive requests are clamped at construction, never stored raw.

use serde::{Deserialize, Deserializer, Serialize};

/// Maximum quantity for a single cart line.
pub const MAX_QUANTITY: u32 = 99;

/// A cart quantity, always in `[1, 99]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Quantity(u32);

impl Quantity {
    /// The minimum quantity (1).
    pub const ONE: Self = Self(1);

    /// Create a quantity, clamping to `[1, 99]`.
    #[must_use]
    pub fn clamped(raw: i64) -> Self {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Self(raw.clamp(1, i64::from(MAX_QUANTITY)) as u32)
    }

    /// The underlying value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Add another quantity, clamping the result to the maximum.
    #[must_use]
    pub fn saturating_add(self, other: Self) -> Self {
        Self::clamped(i64::from(self.0) + i64::from(other.0))
    }
}

impl Default for Quantity {
    fn default() -> Self {
        Self::ONE
    }
}

impl std::fmt::Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Persisted carts may carry quantities written by older clients; clamp on
// the way in rather than rejecting the row.
impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = i64::deserialize(deserializer)?;
        Ok(Self::clamped(raw))
    }
}
