//! Subscriber list entity.
//!
//! # Invariants
//! - `title` is stored trimmed and is never empty.
//! - Renaming to the current title is a `NoOp` and leaves `version` alone.

use crate::error::{CoreError, CoreResult};
use crate::model::validation::{ValidationError, Validator};
use crate::model::version::Version;
use crate::model::{EntityKind, ListId, Versioned, WorkspaceId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct List {
    pub id: ListId,
    pub workspace_id: WorkspaceId,
    pub title: String,
    pub version: Version,
}

impl List {
    /// Creates a new list at `Version::INITIAL` with a fresh identity.
    pub fn create(workspace_id: WorkspaceId, title: &str) -> CoreResult<Self> {
        Self::with_id(Uuid::new_v4(), workspace_id, title)
    }

    /// Creates a new list with a caller-provided identity.
    pub fn with_id(id: ListId, workspace_id: WorkspaceId, title: &str) -> CoreResult<Self> {
        let list = Self {
            id,
            workspace_id,
            title: normalize_title(title),
            version: Version::INITIAL,
        };
        list.validate()?;
        Ok(list)
    }

    /// Returns the renamed list at the next version.
    pub fn renamed(&self, title: &str) -> CoreResult<Self> {
        let title = normalize_title(title);
        if title == self.title {
            return Err(CoreError::NoOp("title did not change"));
        }

        let renamed = Self {
            title,
            version: self.version.next()?,
            ..self.clone()
        };
        renamed.validate()?;
        Ok(renamed)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut validator = Validator::new();
        validator.required_id("id", self.id);
        validator.required_id("workspace_id", self.workspace_id);
        validator.non_blank("title", &self.title);
        validator.finish()
    }
}

impl Versioned for List {
    const KIND: EntityKind = EntityKind::List;

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }
}

fn normalize_title(raw: &str) -> String {
    raw.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::List;
    use crate::error::CoreError;
    use uuid::Uuid;

    #[test]
    fn create_trims_title_and_starts_at_version_one() {
        let list = List::create(Uuid::new_v4(), "  Newsletter ").unwrap();
        assert_eq!(list.title, "Newsletter");
        assert_eq!(list.version.get(), 1);
        assert!(!list.id.is_nil());
    }

    #[test]
    fn create_rejects_blank_title_and_missing_workspace() {
        let err = List::create(Uuid::nil(), "   ").unwrap_err();
        match err {
            CoreError::Validation(validation) => {
                assert!(validation.has_field("title"));
                assert!(validation.has_field("workspace_id"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rename_bumps_version_by_one() {
        let list = List::create(Uuid::new_v4(), "Old").unwrap();
        let renamed = list.renamed(" New ").unwrap();
        assert_eq!(renamed.title, "New");
        assert_eq!(renamed.version.get(), 2);
        assert_eq!(renamed.id, list.id);
    }

    #[test]
    fn rename_to_same_trimmed_title_is_noop() {
        let list = List::create(Uuid::new_v4(), "Weekly").unwrap();
        let err = list.renamed("  Weekly  ").unwrap_err();
        assert!(matches!(err, CoreError::NoOp(_)));
        assert_eq!(list.version.get(), 1);
    }

    #[test]
    fn rename_to_blank_fails_validation() {
        let list = List::create(Uuid::new_v4(), "Weekly").unwrap();
        let err = list.renamed("  ").unwrap_err();
        assert!(matches!(err, CoreError::Validation(ref v) if v.has_field("title")));
    }
}
