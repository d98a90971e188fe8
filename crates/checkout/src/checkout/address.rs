//! Shipping address intake and local validation.
//!
//! Validation runs before any network call; a failing address never leaves
//! the process. Errors are field-level so the rendering layer can mark the
//! exact inputs.

use serde::Serialize;

use crate::error::FieldError;

/// A shipping address as entered by the shopper.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    pub name: String,
    pub email: String,
    pub line1: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub line2: String,
    pub city: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub state: String,
    pub zip: String,
    pub country: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub phone: String,
}

impl ShippingAddress {
    /// Validate all fields, collecting every failure rather than stopping
    /// at the first.
    ///
    /// Required everywhere: line 1, city, postal code, country, valid
    /// email. US addresses additionally need a 2-letter state and a 5 or
    /// 5+4 digit ZIP. A phone, when given, needs at least 7 digits.
    ///
    /// # Errors
    ///
    /// Returns every [`FieldError`] found, in field order.
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();

        if self.line1.trim().is_empty() {
            errors.push(field("line1", "address line 1 is required"));
        }
        if self.city.trim().is_empty() {
            errors.push(field("city", "city is required"));
        }
        if self.zip.trim().is_empty() {
            errors.push(field("zip", "postal code is required"));
        }
        if self.country.trim().is_empty() {
            errors.push(field("country", "country is required"));
        }
        if !is_plausible_email(self.email.trim()) {
            errors.push(field("email", "email looks invalid"));
        }

        if self.is_us() {
            if !is_two_letter_state(self.state.trim()) {
                errors.push(field("state", "state must be a 2-letter code"));
            }
            if !self.zip.trim().is_empty() && !is_us_zip(self.zip.trim()) {
                errors.push(field("zip", "ZIP must be 5 digits (or 5+4)"));
            }
        }

        let phone_digits = self.phone.chars().filter(char::is_ascii_digit).count();
        if !self.phone.trim().is_empty() && phone_digits < 7 {
            errors.push(field("phone", "phone number looks too short"));
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// True for US-country spellings the storefront accepts.
    #[must_use]
    pub fn is_us(&self) -> bool {
        matches!(
            self.country.trim().to_ascii_uppercase().as_str(),
            "US" | "USA" | "UNITED STATES"
        )
    }
}

fn field(field: &'static str, message: &str) -> FieldError {
    FieldError {
        field,
        message: message.to_string(),
    }
}

/// Cheap plausibility check, not RFC 5322: one `@`, something on each side,
/// a dot inside the domain.
fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains('@')
}

fn is_two_letter_state(state: &str) -> bool {
    state.len() == 2 && state.chars().all(|c| c.is_ascii_alphabetic())
}

fn is_us_zip(zip: &str) -> bool {
    let all_digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    match zip.split_once('-') {
        None => zip.len() == 5 && all_digits(zip),
        Some((five, four)) => five.len() == 5 && four.len() == 4 && all_digits(five) && all_digits(four),
    }
}
