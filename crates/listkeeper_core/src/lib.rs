//! Core domain logic for listkeeper.
//! Mailing lists, subscribers and subscriptions with optimistic concurrency.

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, CoreConfig, DatabaseConfig, LoggingConfig, PagingConfig};
pub use db::{open_configured, open_db, open_db_in_memory, DbError};
pub use error::{CoreError, CoreResult};
pub use events::{
    DomainEvent, EventPublisher, LogPublisher, NoopPublisher, PublishError, RecordingPublisher,
};
pub use logging::{default_log_level, init_logging, init_logging_from_config, logging_status};
pub use model::data::{DataValue, SubscriptionData};
pub use model::email::{EmailAddress, FORGOTTEN_EMAIL};
pub use model::list::List;
pub use model::subscriber::Subscriber;
pub use model::subscription::Subscription;
pub use model::validation::{FieldViolation, ValidationError};
pub use model::version::Version;
pub use model::{EntityKind, ListId, SubscriberId, SubscriptionId, Versioned, WorkspaceId};
pub use repo::memory::InMemoryStore;
pub use repo::sqlite::SqliteRepository;
pub use repo::{PageQuery, Repository, SubscriptionListQuery, TransactionalStore};
pub use service::list_service::ListService;
pub use service::subscription_service::{SubscribeOutcome, SubscriptionService};
pub use service::{retry_on_conflict, ListPage};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
