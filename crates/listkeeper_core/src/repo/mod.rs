//! Storage port and its adapters.
//!
//! # Responsibility
//! - Define the data access contract (`Repository`) and the transaction
//!   scope (`TransactionalStore`) that services depend on.
//! - Provide a SQLite adapter and an in-memory adapter with identical
//!   write-protocol semantics.
//!
//! # Invariants
//! - Every write validates the entity before touching storage.
//! - Inserts reject duplicate identities with `CoreError::Conflict`.
//! - Updates and deletes are conditional on `id` and version; zero affected
//!   rows is `CoreError::PreconditionFailed`.

use crate::error::CoreResult;
use crate::model::email::EmailAddress;
use crate::model::list::List;
use crate::model::subscriber::Subscriber;
use crate::model::subscription::Subscription;
use crate::model::validation::ValidationError;
use crate::model::version::Version;
use crate::model::{ListId, SubscriberId, SubscriptionId, Versioned, WorkspaceId};

pub mod memory;
pub mod sqlite;

/// Offset/limit window. `limit = None` returns every remaining row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageQuery {
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Filter options for listing subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionListQuery {
    pub list_id: Option<ListId>,
    pub subscriber_id: Option<SubscriberId>,
    pub include_cancelled: bool,
    pub page: PageQuery,
}

/// Entity-level storage operations.
///
/// Object safe, so transaction scopes can hand out `&dyn Repository`.
pub trait Repository {
    fn get_list(&self, id: ListId) -> CoreResult<Option<List>>;
    fn list_lists(&self, workspace_id: WorkspaceId, page: &PageQuery) -> CoreResult<Vec<List>>;
    fn insert_list(&self, list: &List) -> CoreResult<()>;
    /// Writes `list` where the stored version is `list.version - 1`.
    fn update_list(&self, list: &List) -> CoreResult<()>;
    /// Deletes `list` where the stored version equals `list.version`.
    fn delete_list(&self, list: &List) -> CoreResult<()>;

    fn get_subscriber(&self, id: SubscriberId) -> CoreResult<Option<Subscriber>>;
    /// Looks up a non-forgotten subscriber by normalized email within a workspace.
    fn find_subscriber_by_email(
        &self,
        workspace_id: WorkspaceId,
        email: &EmailAddress,
    ) -> CoreResult<Option<Subscriber>>;
    fn list_subscribers(
        &self,
        workspace_id: WorkspaceId,
        page: &PageQuery,
    ) -> CoreResult<Vec<Subscriber>>;
    fn insert_subscriber(&self, subscriber: &Subscriber) -> CoreResult<()>;
    fn update_subscriber(&self, subscriber: &Subscriber) -> CoreResult<()>;

    fn get_subscription(&self, id: SubscriptionId) -> CoreResult<Option<Subscription>>;
    /// Returns the non-cancelled subscription for the pair, if any.
    fn find_active_subscription(
        &self,
        list_id: ListId,
        subscriber_id: SubscriberId,
    ) -> CoreResult<Option<Subscription>>;
    fn list_subscriptions(&self, query: &SubscriptionListQuery) -> CoreResult<Vec<Subscription>>;
    fn insert_subscription(&self, subscription: &Subscription) -> CoreResult<()>;
    fn update_subscription(&self, subscription: &Subscription) -> CoreResult<()>;
}

/// Storage that can run several repository calls as one atomic unit.
pub trait TransactionalStore: Repository {
    /// Runs `work` inside a transaction.
    ///
    /// Commits only when `work` returns `Ok`; every other exit path rolls
    /// back before the error is returned.
    fn with_transaction<T, F>(&self, work: F) -> CoreResult<T>
    where
        F: FnOnce(&dyn Repository) -> CoreResult<T>;
}

/// Version storage must currently hold for `entity` to be written.
///
/// An entity at the initial version was never mutated and cannot be the
/// subject of a conditional update.
pub(crate) fn expected_stored_version<E: Versioned>(entity: &E) -> CoreResult<Version> {
    entity.version().predecessor().ok_or_else(|| {
        ValidationError::single("version", "must be greater than 1 for a conditional update")
            .into()
    })
}
