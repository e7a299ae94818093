//! Subscription use-case service.
//!
//! # Responsibility
//! - Subscribe, opt in, unsubscribe, opt out and forget subscribers.
//! - Replace or patch per-subscription data.
//!
//! # Invariants
//! - Subscribe and opt-in resolve the list, the subscriber and the
//!   subscription in one transaction; a failure leaves no partial rows.
//! - A subscriber has at most one active subscription per list.
//! - Forgetting a subscriber does not rewrite the email copies held by its
//!   subscriptions.

use crate::config::PagingConfig;
use crate::error::{CoreError, CoreResult};
use crate::events::{DomainEvent, EventPublisher};
use crate::model::data::SubscriptionData;
use crate::model::email::EmailAddress;
use crate::model::subscriber::Subscriber;
use crate::model::subscription::Subscription;
use crate::model::{EntityKind, ListId, SubscriberId, SubscriptionId, WorkspaceId};
use crate::repo::{PageQuery, Repository, SubscriptionListQuery, TransactionalStore};
use crate::service::{publish_after_commit, run_logged, ListPage};

/// Result of a successful subscribe or opt-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOutcome {
    pub subscriber: Subscriber,
    pub subscription: Subscription,
    /// `true` when no active subscriber existed for the email.
    pub subscriber_created: bool,
}

/// Subscription service facade over a store and an event publisher.
pub struct SubscriptionService<S: TransactionalStore, P: EventPublisher> {
    store: S,
    events: P,
    paging: PagingConfig,
}

impl<S: TransactionalStore, P: EventPublisher> SubscriptionService<S, P> {
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

    /// Subscribes `raw_email` to a list, creating the subscriber if needed.
    pub fn subscribe(
        &self,
        list_id: ListId,
        raw_email: &str,
        data: SubscriptionData,
    ) -> CoreResult<SubscribeOutcome> {
        let outcome = run_logged("subscription_create", || {
            self.store
                .with_transaction(|repo| create_subscription(repo, list_id, raw_email, data))
        })?;

        publish_after_commit(
            &self.events,
            &DomainEvent::SubscriptionCreated {
                subscription_id: outcome.subscription.id,
                subscriber_id: outcome.subscriber.id,
                list_id: outcome.subscription.list_id,
            },
        );
        Ok(outcome)
    }

    /// Same write path as [`Self::subscribe`], reported as an explicit opt-in.
    pub fn opt_in(
        &self,
        list_id: ListId,
        raw_email: &str,
        data: SubscriptionData,
    ) -> CoreResult<SubscribeOutcome> {
        let outcome = run_logged("subscriber_opt_in", || {
            self.store
                .with_transaction(|repo| create_subscription(repo, list_id, raw_email, data))
        })?;

        publish_after_commit(
            &self.events,
            &DomainEvent::SubscriberOptedIn {
                subscriber_id: outcome.subscriber.id,
                list_id: outcome.subscription.list_id,
            },
        );
        Ok(outcome)
    }

    /// Cancels one subscription of `list_id`.
    ///
    /// # Errors
    /// - `NotFound` when the subscription is missing or belongs to another list.
    /// - `AlreadyDone` when it is already cancelled.
    pub fn unsubscribe(
        &self,
        list_id: ListId,
        subscription_id: SubscriptionId,
    ) -> CoreResult<Subscription> {
        let cancelled = run_logged("subscription_cancel", || {
            self.store.with_transaction(|repo| {
                let subscription = repo
                    .get_subscription(subscription_id)?
                    .filter(|subscription| subscription.list_id == list_id)
                    .ok_or(CoreError::NotFound {
                        kind: EntityKind::Subscription,
                        id: subscription_id,
                    })?;
                let cancelled = subscription.cancelled()?;
                repo.update_subscription(&cancelled)?;
                Ok(cancelled)
            })
        })?;

        publish_after_commit(
            &self.events,
            &DomainEvent::SubscriberOptedOut {
                subscriber_id: cancelled.subscriber_id,
                list_id: cancelled.list_id,
            },
        );
        Ok(cancelled)
    }

    /// Cancels the active subscription of `subscriber_id` to `list_id`.
    ///
    /// # Errors
    /// - `NotFound` when the list or subscriber is missing.
    /// - `NoSubscription` when the pair never had a subscription.
    /// - `AlreadyDone` when the pair only has cancelled subscriptions.
    pub fn opt_out(
        &self,
        list_id: ListId,
        subscriber_id: SubscriberId,
    ) -> CoreResult<Subscription> {
        let cancelled = run_logged("subscriber_opt_out", || {
            self.store.with_transaction(|repo| {
                let active = resolve_active_subscription(repo, list_id, subscriber_id)?;
                let cancelled = active.cancelled()?;
                repo.update_subscription(&cancelled)?;
                Ok(cancelled)
            })
        })?;

        publish_after_commit(
            &self.events,
            &DomainEvent::SubscriberOptedOut {
                subscriber_id: cancelled.subscriber_id,
                list_id: cancelled.list_id,
            },
        );
        Ok(cancelled)
    }

    /// Replaces the subscriber's email with the forgotten sentinel.
    pub fn forget_subscriber(&self, observed: &Subscriber) -> CoreResult<Subscriber> {
        let forgotten = run_logged("subscriber_forget", || {
            let forgotten = observed.forgotten()?;
            self.store.update_subscriber(&forgotten)?;
            Ok(forgotten)
        })?;

        publish_after_commit(
            &self.events,
            &DomainEvent::SubscriberForgotten {
                subscriber_id: forgotten.id,
            },
        );
        Ok(forgotten)
    }

    /// Replaces the whole data map of `observed`.
    pub fn update_subscription_data(
        &self,
        observed: &Subscription,
        data: SubscriptionData,
    ) -> CoreResult<Subscription> {
        let updated = run_logged("subscription_update", || {
            let updated = observed.with_data(data)?;
            self.store.update_subscription(&updated)?;
            Ok(updated)
        })?;

        self.publish_updated(&updated);
        Ok(updated)
    }

    /// Overlays `partial` onto the data map of `observed`, key by key.
    pub fn patch_subscription_data(
        &self,
        observed: &Subscription,
        partial: &SubscriptionData,
    ) -> CoreResult<Subscription> {
        let updated = run_logged("subscription_patch", || {
            let updated = observed.with_merged_data(partial)?;
            self.store.update_subscription(&updated)?;
            Ok(updated)
        })?;

        self.publish_updated(&updated);
        Ok(updated)
    }

    pub fn get_subscriber(&self, id: SubscriberId) -> CoreResult<Option<Subscriber>> {
        self.store.get_subscriber(id)
    }

    /// Looks up the active subscriber for an email in any casing or padding.
    pub fn find_subscriber(
        &self,
        workspace_id: WorkspaceId,
        raw_email: &str,
    ) -> CoreResult<Option<Subscriber>> {
        let email = EmailAddress::parse(raw_email)?;
        self.store.find_subscriber_by_email(workspace_id, &email)
    }

    pub fn list_subscribers(
        &self,
        workspace_id: WorkspaceId,
        page: &PageQuery,
    ) -> CoreResult<ListPage<Subscriber>> {
        let applied_limit = self.paging.apply(page.limit);
        let items = self.store.list_subscribers(
            workspace_id,
            &PageQuery {
                limit: Some(applied_limit),
                offset: page.offset,
            },
        )?;
        Ok(ListPage {
            items,
            applied_limit,
        })
    }

    pub fn get_subscription(&self, id: SubscriptionId) -> CoreResult<Option<Subscription>> {
        self.store.get_subscription(id)
    }

    pub fn list_subscriptions(
        &self,
        query: &SubscriptionListQuery,
    ) -> CoreResult<ListPage<Subscription>> {
        let applied_limit = self.paging.apply(query.page.limit);
        let query = SubscriptionListQuery {
            page: PageQuery {
                limit: Some(applied_limit),
                offset: query.page.offset,
            },
            ..query.clone()
        };
        let items = self.store.list_subscriptions(&query)?;
        Ok(ListPage {
            items,
            applied_limit,
        })
    }

    fn publish_updated(&self, updated: &Subscription) {
        publish_after_commit(
            &self.events,
            &DomainEvent::SubscriptionUpdated {
                subscription_id: updated.id,
                version: updated.version,
            },
        );
    }
}

fn create_subscription(
    repo: &dyn Repository,
    list_id: ListId,
    raw_email: &str,
    data: SubscriptionData,
) -> CoreResult<SubscribeOutcome> {
    let list = repo.get_list(list_id)?.ok_or(CoreError::NotFound {
        kind: EntityKind::List,
        id: list_id,
    })?;
    let email = EmailAddress::parse(raw_email)?;

    let (subscriber, subscriber_created) =
        match repo.find_subscriber_by_email(list.workspace_id, &email)? {
            Some(existing) => (existing, false),
            None => {
                let subscriber = Subscriber::create(list.workspace_id, email.as_str())?;
                repo.insert_subscriber(&subscriber)?;
                (subscriber, true)
            }
        };

    if repo
        .find_active_subscription(list.id, subscriber.id)?
        .is_some()
    {
        return Err(CoreError::AlreadyDone(
            "subscriber already has an active subscription to this list",
        ));
    }

    let subscription = Subscription::create(&subscriber, &list, data)?;
    repo.insert_subscription(&subscription)?;

    Ok(SubscribeOutcome {
        subscriber,
        subscription,
        subscriber_created,
    })
}

fn resolve_active_subscription(
    repo: &dyn Repository,
    list_id: ListId,
    subscriber_id: SubscriberId,
) -> CoreResult<Subscription> {
    if repo.get_list(list_id)?.is_none() {
        return Err(CoreError::NotFound {
            kind: EntityKind::List,
            id: list_id,
        });
    }
    if repo.get_subscriber(subscriber_id)?.is_none() {
        return Err(CoreError::NotFound {
            kind: EntityKind::Subscriber,
            id: subscriber_id,
        });
    }
    if let Some(active) = repo.find_active_subscription(list_id, subscriber_id)? {
        return Ok(active);
    }

    let history = repo.list_subscriptions(&SubscriptionListQuery {
        list_id: Some(list_id),
        subscriber_id: Some(subscriber_id),
        include_cancelled: true,
        page: PageQuery {
            limit: Some(1),
            offset: 0,
        },
    })?;
    if history.is_empty() {
        Err(CoreError::NoSubscription {
            list_id,
            subscriber_id,
        })
    } else {
        Err(CoreError::AlreadyDone("subscriber already opted out of this list"))
    }
}
