//! In-memory implementation of the storage port.
//!
//! # Responsibility
//! - Mirror the SQLite adapter's write protocol without a database, for
//!   tests and embedding.
//!
//! # Invariants
//! - Rows keep insertion order, matching `ORDER BY rowid` in SQLite.
//! - Uniqueness rules match the partial unique indexes of the schema.
//! - A failed transaction restores the snapshot taken when it began.

use crate::error::{CoreError, CoreResult};
use crate::model::email::EmailAddress;
use crate::model::list::List;
use crate::model::subscriber::Subscriber;
use crate::model::subscription::Subscription;
use crate::model::{EntityKind, ListId, SubscriberId, SubscriptionId, Versioned, WorkspaceId};
use crate::repo::{
    expected_stored_version, PageQuery, Repository, SubscriptionListQuery, TransactionalStore,
};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone, Default)]
struct Tables {
    lists: Vec<List>,
    subscribers: Vec<Subscriber>,
    subscriptions: Vec<Subscription>,
}

/// Single-threaded store. Clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    tables: Rc<RefCell<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Repository for InMemoryStore {
    fn get_list(&self, id: ListId) -> CoreResult<Option<List>> {
        let tables = self.tables.borrow();
        Ok(tables.lists.iter().find(|list| list.id == id).cloned())
    }

    fn list_lists(&self, workspace_id: WorkspaceId, page: &PageQuery) -> CoreResult<Vec<List>> {
        let tables = self.tables.borrow();
        Ok(paged(
            tables
                .lists
                .iter()
                .filter(|list| list.workspace_id == workspace_id),
            page,
        ))
    }

    fn insert_list(&self, list: &List) -> CoreResult<()> {
        list.validate()?;
        let mut tables = self.tables.borrow_mut();
        ensure_new_identity(&tables.lists, list)?;
        tables.lists.push(list.clone());
        Ok(())
    }

    fn update_list(&self, list: &List) -> CoreResult<()> {
        list.validate()?;
        let mut tables = self.tables.borrow_mut();
        replace_conditionally(&mut tables.lists, list)
    }

    fn delete_list(&self, list: &List) -> CoreResult<()> {
        let mut tables = self.tables.borrow_mut();
        remove_conditionally(&mut tables.lists, list)?;
        tables
            .subscriptions
            .retain(|subscription| subscription.list_id != list.id);
        Ok(())
    }

    fn get_subscriber(&self, id: SubscriberId) -> CoreResult<Option<Subscriber>> {
        let tables = self.tables.borrow();
        Ok(tables
            .subscribers
            .iter()
            .find(|subscriber| subscriber.id == id)
            .cloned())
    }

    fn find_subscriber_by_email(
        &self,
        workspace_id: WorkspaceId,
        email: &EmailAddress,
    ) -> CoreResult<Option<Subscriber>> {
        let tables = self.tables.borrow();
        Ok(tables
            .subscribers
            .iter()
            .find(|subscriber| {
                !subscriber.is_forgotten
                    && subscriber.workspace_id == workspace_id
                    && &subscriber.email == email
            })
            .cloned())
    }

    fn list_subscribers(
        &self,
        workspace_id: WorkspaceId,
        page: &PageQuery,
    ) -> CoreResult<Vec<Subscriber>> {
        let tables = self.tables.borrow();
        Ok(paged(
            tables
                .subscribers
                .iter()
                .filter(|subscriber| subscriber.workspace_id == workspace_id),
            page,
        ))
    }

    fn insert_subscriber(&self, subscriber: &Subscriber) -> CoreResult<()> {
        subscriber.validate()?;
        let mut tables = self.tables.borrow_mut();
        ensure_new_identity(&tables.subscribers, subscriber)?;
        ensure_unique_active_email(&tables.subscribers, subscriber)?;
        tables.subscribers.push(subscriber.clone());
        Ok(())
    }

    fn update_subscriber(&self, subscriber: &Subscriber) -> CoreResult<()> {
        subscriber.validate()?;
        let mut tables = self.tables.borrow_mut();
        ensure_unique_active_email(&tables.subscribers, subscriber)?;
        replace_conditionally(&mut tables.subscribers, subscriber)
    }

    fn get_subscription(&self, id: SubscriptionId) -> CoreResult<Option<Subscription>> {
        let tables = self.tables.borrow();
        Ok(tables
            .subscriptions
            .iter()
            .find(|subscription| subscription.id == id)
            .cloned())
    }

    fn find_active_subscription(
        &self,
        list_id: ListId,
        subscriber_id: SubscriberId,
    ) -> CoreResult<Option<Subscription>> {
        let tables = self.tables.borrow();
        Ok(tables
            .subscriptions
            .iter()
            .find(|subscription| {
                !subscription.is_cancelled
                    && subscription.list_id == list_id
                    && subscription.subscriber_id == subscriber_id
            })
            .cloned())
    }

    fn list_subscriptions(&self, query: &SubscriptionListQuery) -> CoreResult<Vec<Subscription>> {
        let tables = self.tables.borrow();
        Ok(paged(
            tables.subscriptions.iter().filter(|subscription| {
                query.list_id.map_or(true, |id| subscription.list_id == id)
                    && query
                        .subscriber_id
                        .map_or(true, |id| subscription.subscriber_id == id)
                    && (query.include_cancelled || !subscription.is_cancelled)
            }),
            &query.page,
        ))
    }

    fn insert_subscription(&self, subscription: &Subscription) -> CoreResult<()> {
        subscription.validate()?;
        let mut tables = self.tables.borrow_mut();
        ensure_new_identity(&tables.subscriptions, subscription)?;
        if !tables.lists.iter().any(|list| list.id == subscription.list_id) {
            return Err(CoreError::NotFound {
                kind: EntityKind::List,
                id: subscription.list_id,
            });
        }
        if !tables
            .subscribers
            .iter()
            .any(|subscriber| subscriber.id == subscription.subscriber_id)
        {
            return Err(CoreError::NotFound {
                kind: EntityKind::Subscriber,
                id: subscription.subscriber_id,
            });
        }
        let duplicate_active = !subscription.is_cancelled
            && tables.subscriptions.iter().any(|existing| {
                !existing.is_cancelled
                    && existing.list_id == subscription.list_id
                    && existing.subscriber_id == subscription.subscriber_id
            });
        if duplicate_active {
            return Err(CoreError::Conflict {
                kind: EntityKind::Subscription,
                id: subscription.id,
            });
        }

        tables.subscriptions.push(subscription.clone());
        Ok(())
    }

    fn update_subscription(&self, subscription: &Subscription) -> CoreResult<()> {
        subscription.validate()?;
        let mut tables = self.tables.borrow_mut();
        replace_conditionally(&mut tables.subscriptions, subscription)
    }
}

impl TransactionalStore for InMemoryStore {
    fn with_transaction<T, F>(&self, work: F) -> CoreResult<T>
    where
        F: FnOnce(&dyn Repository) -> CoreResult<T>,
    {
        let snapshot = self.tables.borrow().clone();
        let result = work(self);
        if result.is_err() {
            *self.tables.borrow_mut() = snapshot;
        }
        result
    }
}

fn ensure_new_identity<E: Versioned>(rows: &[E], entity: &E) -> CoreResult<()> {
    if rows.iter().any(|row| row.id() == entity.id()) {
        return Err(CoreError::Conflict {
            kind: E::KIND,
            id: entity.id(),
        });
    }
    Ok(())
}

fn ensure_unique_active_email(rows: &[Subscriber], subscriber: &Subscriber) -> CoreResult<()> {
    if subscriber.is_forgotten {
        return Ok(());
    }
    let taken = rows.iter().any(|row| {
        row.id != subscriber.id
            && !row.is_forgotten
            && row.workspace_id == subscriber.workspace_id
            && row.email == subscriber.email
    });
    if taken {
        return Err(CoreError::Conflict {
            kind: EntityKind::Subscriber,
            id: subscriber.id,
        });
    }
    Ok(())
}

fn replace_conditionally<E: Versioned + Clone>(rows: &mut [E], entity: &E) -> CoreResult<()> {
    let expected = expected_stored_version(entity)?;
    let slot = rows
        .iter_mut()
        .find(|row| row.id() == entity.id() && row.version() == expected)
        .ok_or(CoreError::PreconditionFailed {
            kind: E::KIND,
            id: entity.id(),
            expected_version: expected,
        })?;
    *slot = entity.clone();
    Ok(())
}

fn remove_conditionally<E: Versioned>(rows: &mut Vec<E>, entity: &E) -> CoreResult<()> {
    let position = rows
        .iter()
        .position(|row| row.id() == entity.id() && row.version() == entity.version())
        .ok_or(CoreError::PreconditionFailed {
            kind: E::KIND,
            id: entity.id(),
            expected_version: entity.version(),
        })?;
    rows.remove(position);
    Ok(())
}

fn paged<'a, T, I>(rows: I, page: &PageQuery) -> Vec<T>
where
    T: Clone + 'a,
    I: Iterator<Item = &'a T>,
{
    let limit = page.limit.map_or(usize::MAX, |limit| limit as usize);
    rows.skip(page.offset as usize)
        .take(limit)
        .cloned()
        .collect()
}
