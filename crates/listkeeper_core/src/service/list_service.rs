//! List use-case service.
//!
//! # Responsibility
//! - Provide create/rename/delete/get/list APIs for mailing lists.
//!
//! # Invariants
//! - Rename and delete act on the caller's observed version only.
//! - Deleting a list removes its subscriptions in the same statement.

use crate::config::PagingConfig;
use crate::error::CoreResult;
use crate::events::{DomainEvent, EventPublisher};
use crate::model::list::List;
use crate::model::{ListId, WorkspaceId};
use crate::repo::{PageQuery, TransactionalStore};
use crate::service::{publish_after_commit, run_logged, ListPage};

/// List service facade over a store and an event publisher.
pub struct ListService<S: TransactionalStore, P: EventPublisher> {
    store: S,
    events: P,
    paging: PagingConfig,
}

impl<S: TransactionalStore, P: EventPublisher> ListService<S, P> {
    /// Creates a service with default paging limits.
    pub fn new(store: S, events: P) -> Self {
        Self {
            store,
            events,
            paging: PagingConfig::default(),
        }
    }

    pub fn with_paging(mut self, paging: PagingConfig) -> Self {
        self.paging = paging;
        self
    }

    /// Creates one list at version 1.
    pub fn create_list(&self, workspace_id: WorkspaceId, title: &str) -> CoreResult<List> {
        let list = run_logged("list_create", || {
            let list = List::create(workspace_id, title)?;
            self.store.insert_list(&list)?;
            Ok(list)
        })?;

        publish_after_commit(
            &self.events,
            &DomainEvent::ListCreated {
                list_id: list.id,
                workspace_id: list.workspace_id,
            },
        );
        Ok(list)
    }

    /// Renames `observed`. Fails with `PreconditionFailed` if storage moved on.
    pub fn rename_list(&self, observed: &List, title: &str) -> CoreResult<List> {
        let renamed = run_logged("list_rename", || {
            let renamed = observed.renamed(title)?;
            self.store.update_list(&renamed)?;
            Ok(renamed)
        })?;

        publish_after_commit(
            &self.events,
            &DomainEvent::ListRenamed {
                list_id: renamed.id,
                version: renamed.version,
            },
        );
        Ok(renamed)
    }

    /// Deletes `observed` and every subscription attached to it.
    pub fn delete_list(&self, observed: &List) -> CoreResult<()> {
        run_logged("list_delete", || self.store.delete_list(observed))?;

        publish_after_commit(
            &self.events,
            &DomainEvent::ListDeleted {
                list_id: observed.id,
            },
        );
        Ok(())
    }

    pub fn get_list(&self, id: ListId) -> CoreResult<Option<List>> {
        self.store.get_list(id)
    }

    /// Lists a workspace's lists in creation order.
    pub fn list_lists(
        &self,
        workspace_id: WorkspaceId,
        page: &PageQuery,
    ) -> CoreResult<ListPage<List>> {
        let applied_limit = self.paging.apply(page.limit);
        let query = PageQuery {
            limit: Some(applied_limit),
            offset: page.offset,
        };
        let items = self.store.list_lists(workspace_id, &query)?;
        Ok(ListPage {
            items,
            applied_limit,
        })
    }
}
