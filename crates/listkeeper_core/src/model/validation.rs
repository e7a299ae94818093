//! Structured field validation.
//!
//! Validation is pure and synchronous. It runs after normalization and before
//! any write, and reports every failing field rather than the first one.

use crate::model::email::EmailAddress;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// One failed constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: &'static str,
    pub reason: &'static str,
}

/// Validation failure enumerating every violated field constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    violations: Vec<FieldViolation>,
}

impl ValidationError {
    pub fn single(field: &'static str, reason: &'static str) -> Self {
        Self {
            violations: vec![FieldViolation { field, reason }],
        }
    }

    pub fn violations(&self) -> &[FieldViolation] {
        &self.violations
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.violations
            .iter()
            .any(|violation| violation.field == field)
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("validation failed: ")?;
        for (index, violation) in self.violations.iter().enumerate() {
            if index > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", violation.field, violation.reason)?;
        }
        Ok(())
    }
}

impl Error for ValidationError {}

/// Accumulates violations for one entity.
#[derive(Debug, Default)]
pub(crate) struct Validator {
    violations: Vec<FieldViolation>,
}

impl Validator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn check(&mut self, ok: bool, field: &'static str, reason: &'static str) {
        if !ok {
            self.violations.push(FieldViolation { field, reason });
        }
    }

    pub(crate) fn required_id(&mut self, field: &'static str, id: Uuid) {
        self.check(!id.is_nil(), field, "is required");
    }

    pub(crate) fn non_blank(&mut self, field: &'static str, value: &str) {
        self.check(!value.trim().is_empty(), field, "must not be empty");
    }

    pub(crate) fn email(&mut self, field: &'static str, value: &EmailAddress) {
        if value.as_str().is_empty() {
            self.violations.push(FieldViolation {
                field,
                reason: "is required",
            });
        } else {
            self.check(
                value.is_valid_syntax(),
                field,
                "must be a valid email address",
            );
        }
    }

    pub(crate) fn finish(self) -> Result<(), ValidationError> {
        if self.violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                violations: self.violations,
            })
        }
    }
}
