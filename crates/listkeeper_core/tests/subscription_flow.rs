use listkeeper_core::db::open_db_in_memory;
use listkeeper_core::{
    CoreError, DomainEvent, EntityKind, EventPublisher, InMemoryStore, List, ListService,
    PageQuery, PublishError, RecordingPublisher, Repository, SqliteRepository, Subscriber,
    Subscription, SubscriptionData, SubscriptionListQuery, SubscriptionService, FORGOTTEN_EMAIL,
};
use rusqlite::Connection;
use uuid::Uuid;

struct Fixture {
    conn: Connection,
    events: RecordingPublisher,
    workspace_id: Uuid,
}

impl Fixture {
    fn new() -> Self {
        Self {
            conn: open_db_in_memory().unwrap(),
            events: RecordingPublisher::new(),
            workspace_id: Uuid::new_v4(),
        }
    }

    fn repo(&self) -> SqliteRepository<'_> {
        SqliteRepository::try_new(&self.conn).unwrap()
    }

    fn lists(&self) -> ListService<SqliteRepository<'_>, RecordingPublisher> {
        ListService::new(self.repo(), self.events.clone())
    }

    fn subscriptions(&self) -> SubscriptionService<SqliteRepository<'_>, RecordingPublisher> {
        SubscriptionService::new(self.repo(), self.events.clone())
    }
}

fn data(raw: &str) -> SubscriptionData {
    SubscriptionData::from_json(raw).unwrap()
}

#[test]
fn subscribe_creates_subscriber_and_subscription() {
    let fixture = Fixture::new();
    let list = fixture.lists().create_list(fixture.workspace_id, "News").unwrap();

    let outcome = fixture
        .subscriptions()
        .subscribe(list.id, "  Reader@Example.COM ", data(r#"{"plan":"free"}"#))
        .unwrap();

    assert!(outcome.subscriber_created);
    assert_eq!(outcome.subscriber.email.as_str(), "reader@example.com");
    assert_eq!(outcome.subscriber.version.get(), 1);
    assert_eq!(outcome.subscription.email, outcome.subscriber.email);
    assert_eq!(outcome.subscription.list_id, list.id);
    assert_eq!(outcome.subscription.data, data(r#"{"plan":"free"}"#));
    assert!(!outcome.subscription.is_cancelled);

    let stored = fixture
        .repo()
        .get_subscription(outcome.subscription.id)
        .unwrap()
        .unwrap();
    assert_eq!(stored, outcome.subscription);

    assert_eq!(
        fixture.events.events().last().unwrap(),
        &DomainEvent::SubscriptionCreated {
            subscription_id: outcome.subscription.id,
            subscriber_id: outcome.subscriber.id,
            list_id: list.id,
        }
    );
}

#[test]
fn differently_formatted_emails_resolve_to_one_subscriber() {
    let fixture = Fixture::new();
    let lists = fixture.lists();
    let news = lists.create_list(fixture.workspace_id, "News").unwrap();
    let offers = lists.create_list(fixture.workspace_id, "Offers").unwrap();
    let service = fixture.subscriptions();

    let first = service
        .subscribe(news.id, "a@B.com ", SubscriptionData::new())
        .unwrap();
    let second = service
        .subscribe(offers.id, "  A@B.COM", SubscriptionData::new())
        .unwrap();

    assert!(first.subscriber_created);
    assert!(!second.subscriber_created);
    assert_eq!(first.subscriber.id, second.subscriber.id);

    let found = service
        .find_subscriber(fixture.workspace_id, "A@b.Com")
        .unwrap()
        .unwrap();
    assert_eq!(found.id, first.subscriber.id);

    let all = service
        .list_subscribers(fixture.workspace_id, &PageQuery::default())
        .unwrap();
    assert_eq!(all.items.len(), 1);
}

#[test]
fn subscribing_twice_to_the_same_list_is_already_done() {
    let fixture = Fixture::new();
    let list = fixture.lists().create_list(fixture.workspace_id, "News").unwrap();
    let service = fixture.subscriptions();

    service
        .subscribe(list.id, "x@y.com", SubscriptionData::new())
        .unwrap();
    let err = service
        .subscribe(list.id, "X@Y.com", SubscriptionData::new())
        .unwrap_err();
    assert!(matches!(err, CoreError::AlreadyDone(_)));

    let active = service
        .list_subscriptions(&SubscriptionListQuery {
            list_id: Some(list.id),
            ..SubscriptionListQuery::default()
        })
        .unwrap();
    assert_eq!(active.items.len(), 1);
}

#[test]
fn subscribe_to_missing_list_is_not_found() {
    let fixture = Fixture::new();
    let missing = Uuid::new_v4();

    let err = fixture
        .subscriptions()
        .subscribe(missing, "x@y.com", SubscriptionData::new())
        .unwrap_err();
    match err {
        CoreError::NotFound { kind, id } => {
            assert_eq!(kind, EntityKind::List);
            assert_eq!(id, missing);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(fixture.events.events().is_empty());
}

#[test]
fn subscribe_with_invalid_email_is_validation_error() {
    let fixture = Fixture::new();
    let list = fixture.lists().create_list(fixture.workspace_id, "News").unwrap();

    let err = fixture
        .subscriptions()
        .subscribe(list.id, "not an email", SubscriptionData::new())
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(ref v) if v.has_field("email")));
    assert!(fixture
        .subscriptions()
        .list_subscribers(fixture.workspace_id, &PageQuery::default())
        .unwrap()
        .items
        .is_empty());
}

#[test]
fn opt_in_emits_opted_in_event() {
    let fixture = Fixture::new();
    let list = fixture.lists().create_list(fixture.workspace_id, "News").unwrap();

    let outcome = fixture
        .subscriptions()
        .opt_in(list.id, "x@y.com", SubscriptionData::new())
        .unwrap();

    assert_eq!(
        fixture.events.events().last().unwrap(),
        &DomainEvent::SubscriberOptedIn {
            subscriber_id: outcome.subscriber.id,
            list_id: list.id,
        }
    );
}

#[test]
fn unsubscribe_twice_is_already_done() {
    let fixture = Fixture::new();
    let list = fixture.lists().create_list(fixture.workspace_id, "News").unwrap();
    let service = fixture.subscriptions();
    let outcome = service
        .subscribe(list.id, "x@y.com", SubscriptionData::new())
        .unwrap();

    let cancelled = service
        .unsubscribe(list.id, outcome.subscription.id)
        .unwrap();
    assert!(cancelled.is_cancelled);
    assert_eq!(cancelled.version.get(), 2);

    let err = service
        .unsubscribe(list.id, outcome.subscription.id)
        .unwrap_err();
    assert!(matches!(err, CoreError::AlreadyDone(_)));

    let stored = service
        .get_subscription(outcome.subscription.id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.version.get(), 2);
    assert_eq!(
        fixture.events.names(),
        vec!["list_created", "subscription_created", "subscriber_opted_out"]
    );
    assert_eq!(
        fixture.events.events().last().unwrap(),
        &DomainEvent::SubscriberOptedOut {
            subscriber_id: outcome.subscriber.id,
            list_id: list.id,
        }
    );
}

#[test]
fn unsubscribe_through_another_list_is_not_found() {
    let fixture = Fixture::new();
    let lists = fixture.lists();
    let news = lists.create_list(fixture.workspace_id, "News").unwrap();
    let offers = lists.create_list(fixture.workspace_id, "Offers").unwrap();
    let service = fixture.subscriptions();
    let outcome = service
        .subscribe(news.id, "x@y.com", SubscriptionData::new())
        .unwrap();

    let err = service
        .unsubscribe(offers.id, outcome.subscription.id)
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::NotFound {
            kind: EntityKind::Subscription,
            ..
        }
    ));
}

#[test]
fn resubscribe_after_unsubscribe_creates_new_subscription() {
    let fixture = Fixture::new();
    let list = fixture.lists().create_list(fixture.workspace_id, "News").unwrap();
    let service = fixture.subscriptions();
    let first = service
        .subscribe(list.id, "x@y.com", SubscriptionData::new())
        .unwrap();
    service.unsubscribe(list.id, first.subscription.id).unwrap();

    let second = service
        .subscribe(list.id, "x@y.com", SubscriptionData::new())
        .unwrap();
    assert_eq!(second.subscriber.id, first.subscriber.id);
    assert_ne!(second.subscription.id, first.subscription.id);

    let history = service
        .list_subscriptions(&SubscriptionListQuery {
            subscriber_id: Some(first.subscriber.id),
            include_cancelled: true,
            ..SubscriptionListQuery::default()
        })
        .unwrap();
    assert_eq!(history.items.len(), 2);
}

#[test]
fn opt_out_cancels_active_subscription() {
    let fixture = Fixture::new();
    let list = fixture.lists().create_list(fixture.workspace_id, "News").unwrap();
    let service = fixture.subscriptions();
    let outcome = service
        .subscribe(list.id, "x@y.com", SubscriptionData::new())
        .unwrap();

    let cancelled = service.opt_out(list.id, outcome.subscriber.id).unwrap();
    assert_eq!(cancelled.id, outcome.subscription.id);
    assert!(cancelled.is_cancelled);
    assert_eq!(
        fixture.events.events().last().unwrap(),
        &DomainEvent::SubscriberOptedOut {
            subscriber_id: outcome.subscriber.id,
            list_id: list.id,
        }
    );

    let err = service.opt_out(list.id, outcome.subscriber.id).unwrap_err();
    assert!(matches!(err, CoreError::AlreadyDone(_)));
}

#[test]
fn opt_out_without_subscription_is_not_found() {
    let fixture = Fixture::new();
    let lists = fixture.lists();
    let news = lists.create_list(fixture.workspace_id, "News").unwrap();
    let offers = lists.create_list(fixture.workspace_id, "Offers").unwrap();
    let service = fixture.subscriptions();
    let outcome = service
        .subscribe(news.id, "x@y.com", SubscriptionData::new())
        .unwrap();

    let err = service.opt_out(offers.id, outcome.subscriber.id).unwrap_err();
    match err {
        CoreError::NoSubscription {
            list_id,
            subscriber_id,
        } => {
            assert_eq!(list_id, offers.id);
            assert_eq!(subscriber_id, outcome.subscriber.id);
        }
        other => panic!("unexpected error: {other}"),
    }

    let err = service.opt_out(news.id, Uuid::new_v4()).unwrap_err();
    assert!(matches!(
        err,
        CoreError::NotFound {
            kind: EntityKind::Subscriber,
            ..
        }
    ));
}

#[test]
fn forget_replaces_email_and_keeps_subscription_copies() {
    let fixture = Fixture::new();
    let list = fixture.lists().create_list(fixture.workspace_id, "News").unwrap();
    let service = fixture.subscriptions();
    let outcome = service
        .subscribe(list.id, "x@y.com", SubscriptionData::new())
        .unwrap();

    let forgotten = service.forget_subscriber(&outcome.subscriber).unwrap();
    assert!(forgotten.is_forgotten);
    assert_eq!(forgotten.email.as_str(), FORGOTTEN_EMAIL);
    assert_eq!(forgotten.version.get(), 2);

    let stored = service
        .get_subscriber(outcome.subscriber.id)
        .unwrap()
        .unwrap();
    assert_eq!(stored, forgotten);
    assert!(service
        .find_subscriber(fixture.workspace_id, "x@y.com")
        .unwrap()
        .is_none());

    let subscription = service
        .get_subscription(outcome.subscription.id)
        .unwrap()
        .unwrap();
    assert_eq!(subscription.email.as_str(), "x@y.com");

    let err = service.forget_subscriber(&forgotten).unwrap_err();
    assert!(matches!(err, CoreError::AlreadyDone(_)));
    let unchanged = service
        .get_subscriber(outcome.subscriber.id)
        .unwrap()
        .unwrap();
    assert_eq!(unchanged.email.as_str(), FORGOTTEN_EMAIL);
    assert_eq!(unchanged.version.get(), 2);
    assert_eq!(
        fixture.events.events().last().unwrap(),
        &DomainEvent::SubscriberForgotten {
            subscriber_id: outcome.subscriber.id,
        }
    );
}

#[test]
fn subscribing_with_the_forgotten_address_is_rejected() {
    let fixture = Fixture::new();
    let list = fixture.lists().create_list(fixture.workspace_id, "News").unwrap();
    let service = fixture.subscriptions();

    let err = service
        .subscribe(list.id, FORGOTTEN_EMAIL, SubscriptionData::new())
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(ref v) if v.has_field("email")));
    assert!(service
        .list_subscribers(fixture.workspace_id, &PageQuery::default())
        .unwrap()
        .items
        .is_empty());
    assert_eq!(fixture.events.names(), vec!["list_created"]);
}

#[test]
fn email_is_reusable_after_forget() {
    let fixture = Fixture::new();
    let list = fixture.lists().create_list(fixture.workspace_id, "News").unwrap();
    let service = fixture.subscriptions();
    let first = service
        .subscribe(list.id, "x@y.com", SubscriptionData::new())
        .unwrap();
    service.forget_subscriber(&first.subscriber).unwrap();

    let second = service
        .subscribe(list.id, "x@y.com", SubscriptionData::new())
        .unwrap();
    assert!(second.subscriber_created);
    assert_ne!(second.subscriber.id, first.subscriber.id);
}

#[test]
fn partial_update_overlays_top_level_keys() {
    let fixture = Fixture::new();
    let list = fixture.lists().create_list(fixture.workspace_id, "News").unwrap();
    let service = fixture.subscriptions();
    let outcome = service
        .subscribe(list.id, "x@y.com", data(r#"{"a":1,"b":2}"#))
        .unwrap();

    let updated = service
        .patch_subscription_data(&outcome.subscription, &data(r#"{"b":3,"c":4}"#))
        .unwrap();
    assert_eq!(updated.data, data(r#"{"a":1,"b":3,"c":4}"#));
    assert_eq!(updated.version.get(), 2);

    let stored = service
        .get_subscription(outcome.subscription.id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.data, data(r#"{"a":1,"b":3,"c":4}"#));
    assert_eq!(
        fixture.events.events().last().unwrap(),
        &DomainEvent::SubscriptionUpdated {
            subscription_id: updated.id,
            version: updated.version,
        }
    );
}

#[test]
fn empty_partial_update_is_noop() {
    let fixture = Fixture::new();
    let list = fixture.lists().create_list(fixture.workspace_id, "News").unwrap();
    let service = fixture.subscriptions();
    let outcome = service
        .subscribe(list.id, "x@y.com", data(r#"{"a":1}"#))
        .unwrap();
    let events_before = fixture.events.events().len();

    let err = service
        .patch_subscription_data(&outcome.subscription, &SubscriptionData::new())
        .unwrap_err();
    assert!(matches!(err, CoreError::NoOp(_)));

    let stored = service
        .get_subscription(outcome.subscription.id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.version.get(), 1);
    assert_eq!(fixture.events.events().len(), events_before);
}

#[test]
fn full_data_replace_drops_missing_keys() {
    let fixture = Fixture::new();
    let list = fixture.lists().create_list(fixture.workspace_id, "News").unwrap();
    let service = fixture.subscriptions();
    let outcome = service
        .subscribe(list.id, "x@y.com", data(r#"{"a":1,"nested":{"k":"v"}}"#))
        .unwrap();

    let updated = service
        .update_subscription_data(&outcome.subscription, data(r#"{"b":true}"#))
        .unwrap();
    assert_eq!(updated.data, data(r#"{"b":true}"#));

    let err = service
        .update_subscription_data(&updated, data(r#"{"b":true}"#))
        .unwrap_err();
    assert!(matches!(err, CoreError::NoOp(_)));

    let err = service
        .update_subscription_data(&outcome.subscription, data(r#"{"c":1}"#))
        .unwrap_err();
    assert!(matches!(err, CoreError::PreconditionFailed { .. }));
}

#[test]
fn failed_subscription_insert_rolls_back_new_subscriber() {
    let fixture = Fixture::new();
    let list = fixture.lists().create_list(fixture.workspace_id, "News").unwrap();
    fixture
        .conn
        .execute_batch(
            "CREATE TRIGGER reject_subscriptions
             BEFORE INSERT ON subscriptions
             BEGIN
                 SELECT RAISE(ABORT, 'subscriptions are frozen');
             END;",
        )
        .unwrap();
    let service = fixture.subscriptions();

    let err = service
        .subscribe(list.id, "x@y.com", SubscriptionData::new())
        .unwrap_err();
    assert!(matches!(err, CoreError::Storage(_)));

    assert!(service
        .find_subscriber(fixture.workspace_id, "x@y.com")
        .unwrap()
        .is_none());
    assert_eq!(fixture.events.names(), vec!["list_created"]);
}

struct FailingPublisher;

impl EventPublisher for FailingPublisher {
    fn publish(&self, _event: &DomainEvent) -> Result<(), PublishError> {
        Err(PublishError::new("broker unavailable"))
    }
}

#[test]
fn publish_failure_does_not_fail_committed_operation() {
    let fixture = Fixture::new();
    let lists = ListService::new(fixture.repo(), FailingPublisher);
    let service = SubscriptionService::new(fixture.repo(), FailingPublisher);

    let list = lists.create_list(fixture.workspace_id, "News").unwrap();
    let outcome = service
        .subscribe(list.id, "x@y.com", SubscriptionData::new())
        .unwrap();

    assert!(fixture
        .repo()
        .get_subscription(outcome.subscription.id)
        .unwrap()
        .is_some());
}

fn assert_dangling_references_are_not_found(repo: &dyn Repository) {
    let workspace_id = Uuid::new_v4();
    let list = List::create(workspace_id, "News").unwrap();
    repo.insert_list(&list).unwrap();
    let subscriber = Subscriber::create(workspace_id, "x@y.com").unwrap();
    repo.insert_subscriber(&subscriber).unwrap();

    let unsaved_list = List::create(workspace_id, "Draft").unwrap();
    let orphan = Subscription::create(&subscriber, &unsaved_list, SubscriptionData::new()).unwrap();
    match repo.insert_subscription(&orphan).unwrap_err() {
        CoreError::NotFound { kind, id } => {
            assert_eq!(kind, EntityKind::List);
            assert_eq!(id, unsaved_list.id);
        }
        other => panic!("unexpected error: {other}"),
    }

    let unsaved_subscriber = Subscriber::create(workspace_id, "z@y.com").unwrap();
    let orphan = Subscription::create(&unsaved_subscriber, &list, SubscriptionData::new()).unwrap();
    match repo.insert_subscription(&orphan).unwrap_err() {
        CoreError::NotFound { kind, id } => {
            assert_eq!(kind, EntityKind::Subscriber);
            assert_eq!(id, unsaved_subscriber.id);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn dangling_subscription_references_are_not_found_in_both_stores() {
    let conn = open_db_in_memory().unwrap();
    assert_dangling_references_are_not_found(&SqliteRepository::try_new(&conn).unwrap());
    assert_dangling_references_are_not_found(&InMemoryStore::new());
}
