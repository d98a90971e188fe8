//! Currency-tagged decimal amounts with feed-tolerant parsing.
//!
//! Catalog feeds have shipped prices in three shapes over the years: plain
//! numbers (`19.5`), display strings (`"$1,950.00"`), and minor-unit
//! integers (`1950` meaning cents). All three normalize into a single
//! [`Money`] value in major units.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Fallback currency code when the source carries none.
pub const DEFAULT_CURRENCY: &str = "USD";

/// A price with currency information, in major units (dollars, not cents).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// Amount in the currency's standard unit (e.g., dollars, not cents).
    pub amount: Decimal,
    /// ISO 4217 currency code, `"USD"` when the source omitted it.
    pub currency: String,
}

impl Money {
    /// Create a price from an already-normalized major-unit amount.
    #[must_use]
    pub fn new(amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }

    /// Create a USD price from minor units (cents).
    #[must_use]
    pub fn from_cents(cents: i64) -> Self {
        Self::new(Decimal::new(cents, 2), DEFAULT_CURRENCY)
    }

    /// Create a price from a raw numeric source value.
    ///
    /// Integral values >= 1000 are treated as minor units (cents) and
    /// converted to major units; everything else is taken as-is. A hoodie is
    /// never $1,950 in this catalog, but 1950 cents is common.
    #[must_use]
    pub fn from_raw(raw: Decimal, currency: impl Into<String>) -> Self {
        Self::new(normalize_raw(raw), currency)
    }

    /// Parse a price from a display string such as `"$1,950.00"` or `"19.50"`.
    ///
    /// Currency symbols, commas, and other decoration are stripped; the same
    /// minor-unit normalization as [`Money::from_raw`] applies. Returns
    /// `None` when nothing numeric remains.
    #[must_use]
    pub fn parse(text: &str, currency: impl Into<String>) -> Option<Self> {
        let cleaned: String = text
            .trim()
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
            .collect();
        if cleaned.is_empty() {
            return None;
        }
        let raw = cleaned.parse::<Decimal>().ok()?;
        Some(Self::from_raw(raw, currency))
    }

    /// The amount in minor units (cents), rounded to the nearest cent.
    #[must_use]
    pub fn to_cents(&self) -> i64 {
        let cents = (self.amount * Decimal::new(100, 0)).round();
        cents.try_into().unwrap_or(i64::MAX)
    }

    /// True for a zero amount.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2} {}", self.amount, self.currency)
    }
}

/// Minor-unit heuristic shared by all source shapes.
fn normalize_raw(raw: Decimal) -> Decimal {
    if raw >= Decimal::new(1000, 0) && raw.fract().is_zero() {
        raw / Decimal::new(100, 0)
    } else {
        raw
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_number_passthrough() {
        let m = Money::from_raw(Decimal::new(195, 1), DEFAULT_CURRENCY); // 19.5
        assert_eq!(m.to_cents(), 1950);
        assert_eq!(m.amount, Decimal::new(195, 1));
    }

    #[test]
    fn test_integral_over_threshold_is_cents() {
        let m = Money::from_raw(Decimal::new(1950, 0), DEFAULT_CURRENCY);
        assert_eq!(m.amount, Decimal::new(195, 1)); // 19.50
        assert_eq!(m.to_cents(), 1950);
    }

    #[test]
    fn test_integral_under_threshold_is_major() {
        // 999 is taken as $999, not cents
        let m = Money::from_raw(Decimal::new(999, 0), DEFAULT_CURRENCY);
        assert_eq!(m.to_cents(), 99_900);
    }

    #[test]
    fn test_fractional_over_threshold_is_major() {
        // 1950.50 has a fractional part, so it stays major units
        let m = Money::from_raw(Decimal::new(19_505, 1), DEFAULT_CURRENCY);
        assert_eq!(m.to_cents(), 195_050);
    }

    #[test]
    fn test_parse_symbols_and_commas() {
        let m = Money::parse("$1,950.00", DEFAULT_CURRENCY).unwrap();
        assert_eq!(m.to_cents(), 195_000);

        let m = Money::parse("  19.50 ", DEFAULT_CURRENCY).unwrap();
        assert_eq!(m.to_cents(), 1950);
    }

    #[test]
    fn test_parse_rejects_non_numeric() {
        assert!(Money::parse("", DEFAULT_CURRENCY).is_none());
        assert!(Money::parse("free", DEFAULT_CURRENCY).is_none());
    }

    #[test]
    fn test_parse_is_idempotent_per_source() {
        let a = Money::parse("$19.50", DEFAULT_CURRENCY).unwrap();
        let b = Money::parse("$19.50", DEFAULT_CURRENCY).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_from_cents() {
        let m = Money::from_cents(500);
        assert_eq!(m.amount, Decimal::new(5, 0));
        assert_eq!(m.currency, "USD");
    }

    #[test]
    fn test_display() {
        let m = Money::from_cents(1950);
        assert_eq!(m.to_string(), "19.50 USD");
    }
}
