//! Use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Run multi-step writes inside one storage transaction.
//! - Publish exactly one domain event per committed operation.
//!
//! # Invariants
//! - Events are published after commit; publish failures are logged at
//!   `warn` and never change the caller's result.
//! - Services never retry on their own; see [`retry_on_conflict`].

use crate::error::{CoreError, CoreResult};
use crate::events::{DomainEvent, EventPublisher};
use log::{debug, error, info, warn};
use std::time::Instant;

pub mod list_service;
pub mod subscription_service;

/// List result envelope used by service callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListPage<T> {
    /// Items in insertion order.
    pub items: Vec<T>,
    /// Effective limit after clamping to the paging config.
    pub applied_limit: u32,
}

/// Re-runs `op` while it fails with a retryable error.
///
/// `op` receives the 1-based attempt number and is expected to re-read the
/// entity it mutates. At least one attempt is always made.
pub fn retry_on_conflict<T, F>(max_attempts: u32, mut op: F) -> CoreResult<T>
where
    F: FnMut(u32) -> CoreResult<T>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                debug!(
                    "event=conflict_retry module=service status=retry attempt={} error_code={}",
                    attempt,
                    err.code()
                );
                attempt += 1;
            }
            other => return other,
        }
    }
}

pub(crate) fn run_logged<T>(
    operation: &'static str,
    work: impl FnOnce() -> CoreResult<T>,
) -> CoreResult<T> {
    let started_at = Instant::now();
    let result = work();
    let duration_ms = started_at.elapsed().as_millis();

    match &result {
        Ok(_) => debug!(
            "event={} module=service status=ok duration_ms={}",
            operation, duration_ms
        ),
        Err(err @ (CoreError::Storage(_) | CoreError::InvalidData(_))) => error!(
            "event={} module=service status=error duration_ms={} error_code={} error={}",
            operation,
            duration_ms,
            err.code(),
            err
        ),
        Err(err) => info!(
            "event={} module=service status=error duration_ms={} error_code={}",
            operation,
            duration_ms,
            err.code()
        ),
    }
    result
}

pub(crate) fn publish_after_commit<P: EventPublisher>(events: &P, event: &DomainEvent) {
    if let Err(err) = events.publish(event) {
        warn!(
            "event=event_publish module=service status=error name={} error={}",
            event.name(),
            err
        );
    }
}

#[cfg(test)]
mod tests {
    use super::retry_on_conflict;
    use crate::error::CoreError;
    use crate::model::version::Version;
    use crate::model::EntityKind;
    use uuid::Uuid;

    fn stale() -> CoreError {
        CoreError::PreconditionFailed {
            kind: EntityKind::List,
            id: Uuid::new_v4(),
            expected_version: Version::INITIAL,
        }
    }

    #[test]
    fn retries_until_success() {
        let mut seen = Vec::new();
        let value = retry_on_conflict(3, |attempt| {
            seen.push(attempt);
            if attempt < 3 {
                Err(stale())
            } else {
                Ok(attempt)
            }
        })
        .unwrap();
        assert_eq!(value, 3);
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let mut calls = 0;
        let err = retry_on_conflict(2, |_| -> Result<(), CoreError> {
            calls += 1;
            Err(stale())
        })
        .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(calls, 2);
    }

    #[test]
    fn does_not_retry_terminal_errors() {
        let mut calls = 0;
        let err = retry_on_conflict(5, |_| -> Result<(), CoreError> {
            calls += 1;
            Err(CoreError::AlreadyDone("done"))
        })
        .unwrap_err();
        assert!(matches!(err, CoreError::AlreadyDone(_)));
        assert_eq!(calls, 1);
    }
}
