//! Subscription entity: the join between a subscriber and a list.
//!
//! # Invariants
//! - State machine is `active -> cancelled`; cancelled is terminal.
//! - `email` is a copy taken at subscribe time and is not kept in sync with
//!   the subscriber afterwards.
//! - A data update equal to the current data is a `NoOp`.

use crate::error::{CoreError, CoreResult};
use crate::model::data::SubscriptionData;
use crate::model::email::EmailAddress;
use crate::model::list::List;
use crate::model::subscriber::Subscriber;
use crate::model::validation::{ValidationError, Validator};
use crate::model::version::Version;
use crate::model::{EntityKind, ListId, SubscriberId, SubscriptionId, Versioned};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub subscriber_id: SubscriberId,
    pub list_id: ListId,
    pub email: EmailAddress,
    pub data: SubscriptionData,
    pub is_cancelled: bool,
    pub version: Version,
}

impl Subscription {
    /// Creates an active subscription of `subscriber` to `list`.
    pub fn create(
        subscriber: &Subscriber,
        list: &List,
        data: SubscriptionData,
    ) -> CoreResult<Self> {
        if subscriber.is_forgotten {
            return Err(
                ValidationError::single("subscriber_id", "subscriber has been forgotten").into(),
            );
        }
        if subscriber.workspace_id != list.workspace_id {
            return Err(ValidationError::single(
                "list_id",
                "list belongs to a different workspace than the subscriber",
            )
            .into());
        }

        let subscription = Self {
            id: Uuid::new_v4(),
            subscriber_id: subscriber.id,
            list_id: list.id,
            email: subscriber.email.clone(),
            data,
            is_cancelled: false,
            version: Version::INITIAL,
        };
        subscription.validate()?;
        Ok(subscription)
    }

    /// Returns the cancelled subscription at the next version.
    pub fn cancelled(&self) -> CoreResult<Self> {
        if self.is_cancelled {
            return Err(CoreError::AlreadyDone("subscription is already cancelled"));
        }

        let cancelled = Self {
            is_cancelled: true,
            version: self.version.next()?,
            ..self.clone()
        };
        cancelled.validate()?;
        Ok(cancelled)
    }

    /// Returns the subscription with `data` fully replacing the current bag.
    pub fn with_data(&self, data: SubscriptionData) -> CoreResult<Self> {
        if self.is_cancelled {
            return Err(CoreError::AlreadyDone("subscription is already cancelled"));
        }
        if data == self.data {
            return Err(CoreError::NoOp("data did not change"));
        }

        let updated = Self {
            data,
            version: self.version.next()?,
            ..self.clone()
        };
        updated.validate()?;
        Ok(updated)
    }

    /// Overlays `partial` on the current data, then behaves as `with_data`.
    pub fn with_merged_data(&self, partial: &SubscriptionData) -> CoreResult<Self> {
        self.with_data(self.data.merged(partial))
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut validator = Validator::new();
        validator.required_id("id", self.id);
        validator.required_id("subscriber_id", self.subscriber_id);
        validator.required_id("list_id", self.list_id);
        validator.email("email", &self.email);
        validator.finish()
    }
}

impl Versioned for Subscription {
    const KIND: EntityKind = EntityKind::Subscription;

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }
}
