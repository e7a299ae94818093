//! Email address value type.
//!
//! # Invariants
//! - Addresses built through `normalize`/`parse` are trimmed and lowercase.
//! - The forgotten sentinel passes syntax validation, so erased subscribers
//!   remain valid rows.

use crate::model::validation::ValidationError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Address written over a subscriber's email when they are forgotten.
pub const FORGOTTEN_EMAIL: &str = "forgotten@example.invalid";

const MAX_EMAIL_CHARS: usize = 254;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^[a-z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?)+$",
    )
    .expect("valid email regex")
});

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmailAddress(String);

impl EmailAddress {
    /// Trims and lowercases without checking syntax.
    pub fn normalize(raw: &str) -> Self {
        Self(raw.trim().to_lowercase())
    }

    /// Normalizes, then rejects addresses with invalid syntax.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let address = Self::normalize(raw);
        if address.0.is_empty() {
            return Err(ValidationError::single("email", "is required"));
        }
        if !address.is_valid_syntax() {
            return Err(ValidationError::single(
                "email",
                "must be a valid email address",
            ));
        }
        Ok(address)
    }

    pub fn forgotten() -> Self {
        Self(FORGOTTEN_EMAIL.to_string())
    }

    /// Wraps a value read back from storage as-is.
    pub(crate) fn from_persisted(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_valid_syntax(&self) -> bool {
        self.0.chars().count() <= MAX_EMAIL_CHARS && EMAIL_RE.is_match(&self.0)
    }
}

impl Display for EmailAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
