//! Optimistic-concurrency version counter.
//!
//! # Invariants
//! - A version is never zero; new entities start at `Version::INITIAL`.
//! - `next()` never wraps; an exhausted counter is a validation failure.

use crate::model::validation::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::num::NonZeroU32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Version(NonZeroU32);

impl Version {
    /// Version assigned by every create.
    pub const INITIAL: Version = Version(NonZeroU32::MIN);

    /// Returns `None` for zero.
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// Version written by the next successful mutation.
    pub fn next(self) -> Result<Self, ValidationError> {
        self.0
            .checked_add(1)
            .map(Self)
            .ok_or_else(|| ValidationError::single("version", "version counter is exhausted"))
    }

    /// Version a conditional write must find in storage for `self` to be
    /// the result of exactly one mutation. `None` for the initial version.
    pub fn predecessor(self) -> Option<Self> {
        Self::new(self.get() - 1)
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Version> for u32 {
    fn from(value: Version) -> Self {
        value.get()
    }
}

impl TryFrom<u32> for Version {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| "version must be a positive integer".to_string())
    }
}
