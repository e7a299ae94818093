//! Subscriber entity.
//!
//! # Invariants
//! - `email` is normalized and syntactically valid.
//! - Only forgotten subscribers carry the sentinel address.
//! - Forgetting is one-way: the email becomes the sentinel and
//!   `is_forgotten` never returns to `false`.

use crate::error::{CoreError, CoreResult};
use crate::model::email::{EmailAddress, FORGOTTEN_EMAIL};
use crate::model::validation::{ValidationError, Validator};
use crate::model::version::Version;
use crate::model::{EntityKind, SubscriberId, Versioned, WorkspaceId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: SubscriberId,
    pub workspace_id: WorkspaceId,
    pub email: EmailAddress,
    pub is_forgotten: bool,
    pub version: Version,
}

impl Subscriber {
    /// Creates a subscriber from a raw address, normalizing it first.
    pub fn create(workspace_id: WorkspaceId, raw_email: &str) -> CoreResult<Self> {
        let subscriber = Self {
            id: Uuid::new_v4(),
            workspace_id,
            email: EmailAddress::normalize(raw_email),
            is_forgotten: false,
            version: Version::INITIAL,
        };
        subscriber.validate()?;
        Ok(subscriber)
    }

    /// Returns the erased subscriber at the next version.
    pub fn forgotten(&self) -> CoreResult<Self> {
        if self.is_forgotten {
            return Err(CoreError::AlreadyDone("subscriber has already been forgotten"));
        }

        let forgotten = Self {
            email: EmailAddress::forgotten(),
            is_forgotten: true,
            version: self.version.next()?,
            ..self.clone()
        };
        forgotten.validate()?;
        Ok(forgotten)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut validator = Validator::new();
        validator.required_id("id", self.id);
        validator.required_id("workspace_id", self.workspace_id);
        validator.email("email", &self.email);
        validator.check(
            self.is_forgotten || self.email.as_str() != FORGOTTEN_EMAIL,
            "email",
            "is reserved for forgotten subscribers",
        );
        validator.finish()
    }
}

impl Versioned for Subscriber {
    const KIND: EntityKind = EntityKind::Subscriber;

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }
}
