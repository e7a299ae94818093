//! Canonical domain model for lists, subscribers and subscriptions.
//!
//! # Responsibility
//! - Define the single set of entity types shared by every storage adapter.
//! - Own the pure state transitions (rename, cancel, forget, data update)
//!   including their guard clauses and version bumps.
//!
//! # Invariants
//! - Every entity is identified by a stable UUID and carries a `Version`.
//! - Transitions never mutate the observed value; they return the next state.
//! - Guards (`NoOp`, `AlreadyDone`) run before the version bump.

use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub mod data;
pub mod email;
pub mod list;
pub mod subscriber;
pub mod subscription;
pub mod validation;
pub mod version;

use version::Version;

pub type ListId = Uuid;
pub type SubscriberId = Uuid;
pub type SubscriptionId = Uuid;
/// Owning scope of lists and subscribers.
pub type WorkspaceId = Uuid;

/// Versioned entity kinds known to storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    List,
    Subscriber,
    Subscription,
}

impl EntityKind {
    /// Backing table (or collection) name.
    pub fn table(self) -> &'static str {
        match self {
            Self::List => "lists",
            Self::Subscriber => "subscribers",
            Self::Subscription => "subscriptions",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Subscriber => "subscriber",
            Self::Subscription => "subscription",
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Entity participating in the optimistic-write protocol.
pub trait Versioned {
    const KIND: EntityKind;

    fn id(&self) -> Uuid;

    fn version(&self) -> Version;
}
