//! SQLite implementation of the storage port.
//!
//! # Responsibility
//! - Map entities to the `lists`, `subscribers` and `subscriptions` tables.
//! - Implement the conditional-write protocol once, keyed by entity kind.
//!
//! # Invariants
//! - Update predicates are `id = ? AND version = new_version - 1`.
//! - Uniqueness violations on insert surface as `CoreError::Conflict`.
//! - Missing parent rows on insert surface as `CoreError::NotFound`.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::db::migrations::{current_user_version, latest_version};
use crate::db::DbError;
use crate::error::{CoreError, CoreResult};
use crate::model::data::SubscriptionData;
use crate::model::email::EmailAddress;
use crate::model::list::List;
use crate::model::subscriber::Subscriber;
use crate::model::subscription::Subscription;
use crate::model::version::Version;
use crate::model::{EntityKind, ListId, SubscriberId, SubscriptionId, Versioned, WorkspaceId};
use crate::repo::{
    expected_stored_version, PageQuery, Repository, SubscriptionListQuery, TransactionalStore,
};
use log::warn;
use rusqlite::types::Value;
use rusqlite::{
    ffi, params, params_from_iter, Connection, ErrorCode, Params, Row, Transaction,
    TransactionBehavior,
};
use std::os::raw::c_int;
use uuid::Uuid;

const LIST_COLUMNS: &str = "id, workspace_id, title, version";
const SUBSCRIBER_COLUMNS: &str = "id, workspace_id, email, is_forgotten, version";
const SUBSCRIPTION_COLUMNS: &str =
    "id, subscriber_id, list_id, email, data, is_cancelled, version";

/// SQLite-backed repository over a migrated connection.
#[derive(Debug, Clone, Copy)]
pub struct SqliteRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRepository<'conn> {
    /// Wraps a connection whose schema is at the latest migration.
    pub fn try_new(conn: &'conn Connection) -> CoreResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }

    /// Names the parent row a rejected subscription insert points at.
    /// The list is checked first.
    fn missing_reference(&self, subscription: &Subscription) -> CoreError {
        match self.get_list(subscription.list_id) {
            Ok(None) => CoreError::NotFound {
                kind: EntityKind::List,
                id: subscription.list_id,
            },
            Ok(Some(_)) => CoreError::NotFound {
                kind: EntityKind::Subscriber,
                id: subscription.subscriber_id,
            },
            Err(err) => err,
        }
    }
}

impl Repository for SqliteRepository<'_> {
    fn get_list(&self, id: ListId) -> CoreResult<Option<List>> {
        query_optional(
            self.conn,
            &format!("SELECT {LIST_COLUMNS} FROM lists WHERE id = ?1;"),
            [id.to_string()],
            parse_list_row,
        )
    }

    fn list_lists(&self, workspace_id: WorkspaceId, page: &PageQuery) -> CoreResult<Vec<List>> {
        let mut sql = format!("SELECT {LIST_COLUMNS} FROM lists WHERE workspace_id = ?");
        let mut bind_values = vec![Value::Text(workspace_id.to_string())];
        sql.push_str(" ORDER BY rowid ASC");
        push_page(&mut sql, &mut bind_values, page);
        query_all(
            self.conn,
            &sql,
            params_from_iter(bind_values),
            parse_list_row,
        )
    }

    fn insert_list(&self, list: &List) -> CoreResult<()> {
        list.validate()?;

        self.conn
            .execute(
                "INSERT INTO lists (id, workspace_id, title, version)
                 VALUES (?1, ?2, ?3, ?4);",
                params![
                    list.id.to_string(),
                    list.workspace_id.to_string(),
                    list.title.as_str(),
                    list.version.get(),
                ],
            )
            .map_err(|err| map_write_error(err, EntityKind::List, list.id))?;
        Ok(())
    }

    fn update_list(&self, list: &List) -> CoreResult<()> {
        list.validate()?;
        conditional_update(
            self.conn,
            list,
            "title = ?",
            vec![Value::Text(list.title.clone())],
        )
    }

    fn delete_list(&self, list: &List) -> CoreResult<()> {
        conditional_delete(self.conn, list)
    }

    fn get_subscriber(&self, id: SubscriberId) -> CoreResult<Option<Subscriber>> {
        query_optional(
            self.conn,
            &format!("SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE id = ?1;"),
            [id.to_string()],
            parse_subscriber_row,
        )
    }

    fn find_subscriber_by_email(
        &self,
        workspace_id: WorkspaceId,
        email: &EmailAddress,
    ) -> CoreResult<Option<Subscriber>> {
        query_optional(
            self.conn,
            &format!(
                "SELECT {SUBSCRIBER_COLUMNS}
                 FROM subscribers
                 WHERE workspace_id = ?1
                   AND email = ?2
                   AND is_forgotten = 0;"
            ),
            params![workspace_id.to_string(), email.as_str()],
            parse_subscriber_row,
        )
    }

    fn list_subscribers(
        &self,
        workspace_id: WorkspaceId,
        page: &PageQuery,
    ) -> CoreResult<Vec<Subscriber>> {
        let mut sql =
            format!("SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE workspace_id = ?");
        let mut bind_values = vec![Value::Text(workspace_id.to_string())];
        sql.push_str(" ORDER BY rowid ASC");
        push_page(&mut sql, &mut bind_values, page);
        query_all(
            self.conn,
            &sql,
            params_from_iter(bind_values),
            parse_subscriber_row,
        )
    }

    fn insert_subscriber(&self, subscriber: &Subscriber) -> CoreResult<()> {
        subscriber.validate()?;

        self.conn
            .execute(
                "INSERT INTO subscribers (id, workspace_id, email, is_forgotten, version)
                 VALUES (?1, ?2, ?3, ?4, ?5);",
                params![
                    subscriber.id.to_string(),
                    subscriber.workspace_id.to_string(),
                    subscriber.email.as_str(),
                    bool_to_int(subscriber.is_forgotten),
                    subscriber.version.get(),
                ],
            )
            .map_err(|err| map_write_error(err, EntityKind::Subscriber, subscriber.id))?;
        Ok(())
    }

    fn update_subscriber(&self, subscriber: &Subscriber) -> CoreResult<()> {
        subscriber.validate()?;
        conditional_update(
            self.conn,
            subscriber,
            "email = ?, is_forgotten = ?",
            vec![
                Value::Text(subscriber.email.as_str().to_string()),
                Value::Integer(bool_to_int(subscriber.is_forgotten)),
            ],
        )
    }

    fn get_subscription(&self, id: SubscriptionId) -> CoreResult<Option<Subscription>> {
        query_optional(
            self.conn,
            &format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = ?1;"),
            [id.to_string()],
            parse_subscription_row,
        )
    }

    fn find_active_subscription(
        &self,
        list_id: ListId,
        subscriber_id: SubscriberId,
    ) -> CoreResult<Option<Subscription>> {
        query_optional(
            self.conn,
            &format!(
                "SELECT {SUBSCRIPTION_COLUMNS}
                 FROM subscriptions
                 WHERE list_id = ?1
                   AND subscriber_id = ?2
                   AND is_cancelled = 0;"
            ),
            params![list_id.to_string(), subscriber_id.to_string()],
            parse_subscription_row,
        )
    }

    fn list_subscriptions(&self, query: &SubscriptionListQuery) -> CoreResult<Vec<Subscription>> {
        let mut sql = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(list_id) = query.list_id {
            sql.push_str(" AND list_id = ?");
            bind_values.push(Value::Text(list_id.to_string()));
        }
        if let Some(subscriber_id) = query.subscriber_id {
            sql.push_str(" AND subscriber_id = ?");
            bind_values.push(Value::Text(subscriber_id.to_string()));
        }
        if !query.include_cancelled {
            sql.push_str(" AND is_cancelled = 0");
        }

        sql.push_str(" ORDER BY rowid ASC");
        push_page(&mut sql, &mut bind_values, &query.page);
        query_all(
            self.conn,
            &sql,
            params_from_iter(bind_values),
            parse_subscription_row,
        )
    }

    fn insert_subscription(&self, subscription: &Subscription) -> CoreResult<()> {
        subscription.validate()?;
        let data = encode_data(&subscription.data)?;

        self.conn
            .execute(
                "INSERT INTO subscriptions (
                    id,
                    subscriber_id,
                    list_id,
                    email,
                    data,
                    is_cancelled,
                    version
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
                params![
                    subscription.id.to_string(),
                    subscription.subscriber_id.to_string(),
                    subscription.list_id.to_string(),
                    subscription.email.as_str(),
                    data,
                    bool_to_int(subscription.is_cancelled),
                    subscription.version.get(),
                ],
            )
            .map_err(|err| {
                if is_constraint_violation(&err, &[ffi::SQLITE_CONSTRAINT_FOREIGNKEY]) {
                    self.missing_reference(subscription)
                } else {
                    map_write_error(err, EntityKind::Subscription, subscription.id)
                }
            })?;
        Ok(())
    }

    fn update_subscription(&self, subscription: &Subscription) -> CoreResult<()> {
        subscription.validate()?;
        let data = encode_data(&subscription.data)?;
        conditional_update(
            self.conn,
            subscription,
            "email = ?, data = ?, is_cancelled = ?",
            vec![
                Value::Text(subscription.email.as_str().to_string()),
                Value::Text(data),
                Value::Integer(bool_to_int(subscription.is_cancelled)),
            ],
        )
    }
}

impl TransactionalStore for SqliteRepository<'_> {
    fn with_transaction<T, F>(&self, work: F) -> CoreResult<T>
    where
        F: FnOnce(&dyn Repository) -> CoreResult<T>,
    {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let scoped = SqliteRepository { conn: &*tx };

        match work(&scoped) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!(
                        "event=tx_rollback module=repo status=error error_code={} error={}",
                        err.code(),
                        rollback_err
                    );
                }
                Err(err)
            }
        }
    }
}

/// Writes `assignments` (positional `?` placeholders bound from `values`)
/// where the stored row is one version behind `entity`.
fn conditional_update<E: Versioned>(
    conn: &Connection,
    entity: &E,
    assignments: &str,
    mut values: Vec<Value>,
) -> CoreResult<()> {
    let expected = expected_stored_version(entity)?;
    let sql = format!(
        "UPDATE {table}
         SET {assignments},
             version = ?,
             updated_at = (strftime('%s', 'now') * 1000)
         WHERE id = ?
           AND version = ?;",
        table = E::KIND.table()
    );
    values.push(Value::Integer(i64::from(entity.version().get())));
    values.push(Value::Text(entity.id().to_string()));
    values.push(Value::Integer(i64::from(expected.get())));

    let changed = conn
        .execute(&sql, params_from_iter(values))
        .map_err(|err| map_write_error(err, E::KIND, entity.id()))?;
    if changed == 0 {
        return Err(CoreError::PreconditionFailed {
            kind: E::KIND,
            id: entity.id(),
            expected_version: expected,
        });
    }

    Ok(())
}

fn conditional_delete<E: Versioned>(conn: &Connection, entity: &E) -> CoreResult<()> {
    let changed = conn.execute(
        &format!(
            "DELETE FROM {table} WHERE id = ?1 AND version = ?2;",
            table = E::KIND.table()
        ),
        params![entity.id().to_string(), entity.version().get()],
    )?;
    if changed == 0 {
        return Err(CoreError::PreconditionFailed {
            kind: E::KIND,
            id: entity.id(),
            expected_version: entity.version(),
        });
    }

    Ok(())
}

fn map_write_error(err: rusqlite::Error, kind: EntityKind, id: Uuid) -> CoreError {
    if is_constraint_violation(
        &err,
        &[
            ffi::SQLITE_CONSTRAINT_PRIMARYKEY,
            ffi::SQLITE_CONSTRAINT_UNIQUE,
        ],
    ) {
        CoreError::Conflict { kind, id }
    } else {
        err.into()
    }
}

fn is_constraint_violation(err: &rusqlite::Error, extended_codes: &[c_int]) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation
                && extended_codes.contains(&failure.extended_code)
    )
}

fn query_optional<T, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    parse: fn(&Row<'_>) -> CoreResult<T>,
) -> CoreResult<Option<T>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    match rows.next()? {
        Some(row) => parse(row).map(Some),
        None => Ok(None),
    }
}

fn query_all<T, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    parse: fn(&Row<'_>) -> CoreResult<T>,
) -> CoreResult<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        items.push(parse(row)?);
    }
    Ok(items)
}

fn push_page(sql: &mut String, bind_values: &mut Vec<Value>, page: &PageQuery) {
    if let Some(limit) = page.limit {
        sql.push_str(" LIMIT ?");
        bind_values.push(Value::Integer(i64::from(limit)));
        if page.offset > 0 {
            sql.push_str(" OFFSET ?");
            bind_values.push(Value::Integer(i64::from(page.offset)));
        }
    } else if page.offset > 0 {
        sql.push_str(" LIMIT -1 OFFSET ?");
        bind_values.push(Value::Integer(i64::from(page.offset)));
    }
}

fn parse_list_row(row: &Row<'_>) -> CoreResult<List> {
    let list = List {
        id: parse_uuid(row, "lists", "id")?,
        workspace_id: parse_uuid(row, "lists", "workspace_id")?,
        title: row.get("title")?,
        version: parse_version(row, "lists")?,
    };
    list.validate()
        .map_err(|err| CoreError::InvalidData(format!("lists row {}: {err}", list.id)))?;
    Ok(list)
}

fn parse_subscriber_row(row: &Row<'_>) -> CoreResult<Subscriber> {
    let subscriber = Subscriber {
        id: parse_uuid(row, "subscribers", "id")?,
        workspace_id: parse_uuid(row, "subscribers", "workspace_id")?,
        email: EmailAddress::from_persisted(row.get("email")?),
        is_forgotten: parse_flag(row, "subscribers", "is_forgotten")?,
        version: parse_version(row, "subscribers")?,
    };
    subscriber.validate().map_err(|err| {
        CoreError::InvalidData(format!("subscribers row {}: {err}", subscriber.id))
    })?;
    Ok(subscriber)
}

fn parse_subscription_row(row: &Row<'_>) -> CoreResult<Subscription> {
    let data_text: String = row.get("data")?;
    let data = SubscriptionData::from_json(&data_text).map_err(|err| {
        CoreError::InvalidData(format!("invalid json in subscriptions.data: {err}"))
    })?;

    let subscription = Subscription {
        id: parse_uuid(row, "subscriptions", "id")?,
        subscriber_id: parse_uuid(row, "subscriptions", "subscriber_id")?,
        list_id: parse_uuid(row, "subscriptions", "list_id")?,
        email: EmailAddress::from_persisted(row.get("email")?),
        data,
        is_cancelled: parse_flag(row, "subscriptions", "is_cancelled")?,
        version: parse_version(row, "subscriptions")?,
    };
    subscription.validate().map_err(|err| {
        CoreError::InvalidData(format!("subscriptions row {}: {err}", subscription.id))
    })?;
    Ok(subscription)
}

fn parse_uuid(row: &Row<'_>, table: &str, column: &str) -> CoreResult<Uuid> {
    let text: String = row.get(column)?;
    Uuid::parse_str(&text).map_err(|_| {
        CoreError::InvalidData(format!("invalid uuid value `{text}` in {table}.{column}"))
    })
}

fn parse_version(row: &Row<'_>, table: &str) -> CoreResult<Version> {
    let raw: i64 = row.get("version")?;
    u32::try_from(raw)
        .ok()
        .and_then(Version::new)
        .ok_or_else(|| {
            CoreError::InvalidData(format!("invalid version `{raw}` in {table}.version"))
        })
}

fn parse_flag(row: &Row<'_>, table: &str, column: &str) -> CoreResult<bool> {
    match row.get::<_, i64>(column)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(CoreError::InvalidData(format!(
            "invalid {column} value `{other}` in {table}.{column}"
        ))),
    }
}

fn encode_data(data: &SubscriptionData) -> CoreResult<String> {
    data.to_json().map_err(|err| {
        CoreError::InvalidData(format!("subscription data cannot be encoded: {err}"))
    })
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

fn ensure_connection_ready(conn: &Connection) -> CoreResult<()> {
    let expected_version = latest_version();
    let actual_version = current_user_version(conn)?;
    if actual_version != expected_version {
        return Err(DbError::UninitializedConnection {
            expected_version,
            actual_version,
        }
        .into());
    }

    for table in [
        EntityKind::List.table(),
        EntityKind::Subscriber.table(),
        EntityKind::Subscription.table(),
    ] {
        if !table_exists(conn, table)? {
            return Err(CoreError::InvalidData(format!(
                "required table `{table}` is missing"
            )));
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> CoreResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}
