//! Error taxonomy shared by model, repository and service layers.
//!
//! # Responsibility
//! - Give every failure mode of the write protocol a distinct variant.
//! - Keep storage transport errors opaque behind `DbError`.
//!
//! # Invariants
//! - `PreconditionFailed` is the only retryable variant.
//! - `NotFound` is raised on initial reads; a zero-row conditional write is
//!   always `PreconditionFailed`, never `NotFound`.

use crate::db::DbError;
use crate::model::validation::ValidationError;
use crate::model::version::Version;
use crate::model::EntityKind;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type CoreResult<T> = Result<T, CoreError>;

/// Error returned by every core operation.
#[derive(Debug)]
pub enum CoreError {
    /// One or more field constraints were violated. Storage was not touched.
    Validation(ValidationError),
    /// Referenced entity does not exist at read time.
    NotFound { kind: EntityKind, id: Uuid },
    /// Subscriber never had a subscription to the list.
    NoSubscription { list_id: Uuid, subscriber_id: Uuid },
    /// Conditional write matched zero rows: the entity was deleted or another
    /// writer advanced its version since `expected_version` was observed.
    PreconditionFailed {
        kind: EntityKind,
        id: Uuid,
        expected_version: Version,
    },
    /// Requested change would not alter stored state.
    NoOp(&'static str),
    /// Entity is already in the requested terminal state.
    AlreadyDone(&'static str),
    /// Insert collided with an existing identity or uniqueness rule.
    Conflict { kind: EntityKind, id: Uuid },
    /// Underlying storage failure.
    Storage(DbError),
    /// Persisted row cannot be materialized into a valid entity.
    InvalidData(String),
}

impl CoreError {
    /// Returns whether the caller may re-read and retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PreconditionFailed { .. })
    }

    /// Stable machine-readable code, used in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_failed",
            Self::NotFound { .. } | Self::NoSubscription { .. } => "not_found",
            Self::PreconditionFailed { .. } => "precondition_failed",
            Self::NoOp(_) => "no_op",
            Self::AlreadyDone(_) => "already_done",
            Self::Conflict { .. } => "conflict",
            Self::Storage(_) => "storage_error",
            Self::InvalidData(_) => "invalid_data",
        }
    }
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::NotFound { kind, id } => write!(f, "{kind} not found: {id}"),
            Self::NoSubscription {
                list_id,
                subscriber_id,
            } => write!(
                f,
                "subscriber {subscriber_id} has no subscription to list {list_id}"
            ),
            Self::PreconditionFailed {
                kind,
                id,
                expected_version,
            } => write!(
                f,
                "precondition failed: {kind} {id} is no longer at version {expected_version}; reload and retry"
            ),
            Self::NoOp(details) => write!(f, "no change: {details}"),
            Self::AlreadyDone(details) => write!(f, "already done: {details}"),
            Self::Conflict { kind, id } => write!(f, "{kind} already exists: {id}"),
            Self::Storage(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for CoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for CoreError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for CoreError {
    fn from(value: DbError) -> Self {
        Self::Storage(value)
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Storage(DbError::Sqlite(value))
    }
}
