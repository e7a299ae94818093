//! Domain events and the publishing port.
//!
//! # Responsibility
//! - Name every event emitted after a committed top-level operation.
//! - Define the `EventPublisher` seam used by services.
//!
//! # Invariants
//! - Events carry identities and versions only, never email addresses or data.
//! - Publishing happens after commit; a failed publish never rolls back a write.

use crate::model::version::Version;
use crate::model::{ListId, SubscriberId, SubscriptionId, WorkspaceId};
use log::info;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex};

/// Topic every subscription-domain event is published on.
pub const EVENT_TOPIC: &str = "subscriptions";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    ListCreated {
        list_id: ListId,
        workspace_id: WorkspaceId,
    },
    ListRenamed {
        list_id: ListId,
        version: Version,
    },
    ListDeleted {
        list_id: ListId,
    },
    SubscriptionCreated {
        subscription_id: SubscriptionId,
        subscriber_id: SubscriberId,
        list_id: ListId,
    },
    SubscriberOptedIn {
        subscriber_id: SubscriberId,
        list_id: ListId,
    },
    SubscriberOptedOut {
        subscriber_id: SubscriberId,
        list_id: ListId,
    },
    SubscriptionUpdated {
        subscription_id: SubscriptionId,
        version: Version,
    },
    SubscriberForgotten {
        subscriber_id: SubscriberId,
    },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ListCreated { .. } => "list_created",
            Self::ListRenamed { .. } => "list_renamed",
            Self::ListDeleted { .. } => "list_deleted",
            Self::SubscriptionCreated { .. } => "subscription_created",
            Self::SubscriberOptedIn { .. } => "subscriber_opted_in",
            Self::SubscriberOptedOut { .. } => "subscriber_opted_out",
            Self::SubscriptionUpdated { .. } => "subscription_updated",
            Self::SubscriberForgotten { .. } => "subscriber_forgotten",
        }
    }

    pub fn topic(&self) -> &'static str {
        EVENT_TOPIC
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Failure reported by a publisher backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishError {
    message: String,
}

impl PublishError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Display for PublishError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "event publish failed: {}", self.message)
    }
}

impl Error for PublishError {}

/// Outbound port for domain events.
pub trait EventPublisher {
    fn publish(&self, event: &DomainEvent) -> Result<(), PublishError>;
}

/// Writes each event as one structured log line with a JSON payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPublisher;

impl EventPublisher for LogPublisher {
    fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        let payload = event
            .to_json()
            .map_err(|err| PublishError::new(err.to_string()))?;
        info!(
            "event=domain_event module=events status=ok topic={} name={} payload={}",
            event.topic(),
            event.name(),
            payload
        );
        Ok(())
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, _event: &DomainEvent) -> Result<(), PublishError> {
        Ok(())
    }
}

/// Keeps published events in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct RecordingPublisher {
    events: Arc<Mutex<Vec<DomainEvent>>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far, oldest first.
    pub fn events(&self) -> Vec<DomainEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(DomainEvent::name).collect()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| PublishError::new("recording buffer is poisoned"))?;
        events.push(event.clone());
        Ok(())
    }
}
