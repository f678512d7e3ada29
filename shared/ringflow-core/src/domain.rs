//! Core domain types used across all microservices

use serde::{Deserialize, Serialize};
use std::fmt;

/// Dialable phone number extracted from operator-supplied text.
///
/// Keeps both the raw field as it appeared in the source material and the
/// normalized form used for dialing (digits only, leading `+` preserved).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhoneNumber {
    raw: String,
    normalized: String,
}

impl PhoneNumber {
    /// Parse a single candidate field into a phone number.
    ///
    /// Accepts digits with common formatting characters and an optional
    /// leading `+`. Fields containing letters are not numbers.
    pub fn parse(field: &str) -> Option<Self> {
        let trimmed = field.trim();
        if trimmed.is_empty() || trimmed.chars().any(|c| c.is_ascii_alphabetic()) {
            return None;
        }

        let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
        if !(7..=15).contains(&digits.len()) {
            return None;
        }

        let normalized = if trimmed.starts_with('+') {
            format!("+{}", digits)
        } else {
            digits
        };

        Some(Self {
            raw: trimmed.to_string(),
            normalized,
        })
    }

    /// Extract the first dialable number from a free-form source line,
    /// e.g. `"Jane Doe, +1 (415) 555-0187, renewal"`.
    pub fn extract(line: &str) -> Option<Self> {
        line.split([',', ';', '\t']).find_map(Self::parse)
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The normalized form handed to the telephony layer.
    pub fn dialable(&self) -> &str {
        &self.normalized
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.normalized)
    }
}
