#![allow(dead_code)]

use rowmirror::core::DataType;
use rowmirror::{
    Connector, Entity, Id, Index, IndexKind, Indexes, MemoryConnector, Result, Row, Signature,
    Value,
};
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Id,
    pub login: String,
    pub disabled: bool,
    pub updated_at: i64,
}

impl Entity for User {
    const TABLE: &'static str = "users";

    fn id(&self) -> Id {
        self.id
    }

    fn signature() -> Signature {
        Signature::of(&[
            ("id", DataType::Integer),
            ("login", DataType::Text),
            ("disabled", DataType::Boolean),
            ("updated_at", DataType::Integer),
        ])
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.id("id")?,
            login: row.require("login")?.to_string(),
            disabled: matches!(row.require("disabled")?, Value::Boolean(true)),
            updated_at: row.require("updated_at")?.as_i64().unwrap_or(0),
        })
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("id", self.id)
            .with("login", self.login.clone())
            .with("disabled", self.disabled)
            .with("updated_at", self.updated_at)
    }
}

pub fn user_row(id: Id, login: &str, updated_at: i64) -> Row {
    Row::new()
        .with("id", id)
        .with("login", login)
        .with("disabled", false)
        .with("updated_at", updated_at)
}

pub fn first_letter(login: &str) -> Value {
    match login.chars().next() {
        Some(c) => c.to_string().into(),
        None => Value::Null,
    }
}

/// Unique id index (with an emergency fallback to the store) plus a multi
/// index grouping users by the first letter of their login.
pub fn user_indexes() -> Indexes<User> {
    Indexes::builder()
        .index(
            Index::new("id", IndexKind::Unique, |u: &User| u.id.into())
                .with_emergency(|value| vec![("id".to_string(), value.clone())]),
        )
        .multi("first_letter", |u: &User| first_letter(&u.login))
        .build()
}

/// Connector wrapper counting store traffic, for asserting that reads were
/// (or were not) served from memory.
pub struct CountingConnector {
    inner: Arc<MemoryConnector>,
    pub since_scans: AtomicUsize,
    pub full_scans: AtomicUsize,
    pub field_queries: AtomicUsize,
    pub first_since: Mutex<Option<Option<Value>>>,
}

impl CountingConnector {
    pub fn new(inner: Arc<MemoryConnector>) -> Self {
        Self {
            inner,
            since_scans: AtomicUsize::new(0),
            full_scans: AtomicUsize::new(0),
            field_queries: AtomicUsize::new(0),
            first_since: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Connector for CountingConnector {
    async fn query_rows_since(
        &self,
        table: &str,
        indicator_column: &str,
        since: Option<&Value>,
        id_column: &str,
        limit: usize,
        index_hint: Option<&str>,
    ) -> Result<Vec<Row>> {
        self.since_scans.fetch_add(1, Ordering::SeqCst);
        if since.is_none() {
            self.full_scans.fetch_add(1, Ordering::SeqCst);
        }
        {
            let mut first = self.first_since.lock().unwrap();
            if first.is_none() {
                *first = Some(since.cloned());
            }
        }
        self.inner
            .query_rows_since(table, indicator_column, since, id_column, limit, index_hint)
            .await
    }

    async fn query_rows_by_fields(
        &self,
        table: &str,
        fields: &[(String, Value)],
    ) -> Result<Vec<Row>> {
        self.field_queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query_rows_by_fields(table, fields).await
    }

    async fn query_row_by_id(&self, table: &str, id_column: &str, id: Id) -> Result<Option<Row>> {
        self.inner.query_row_by_id(table, id_column, id).await
    }
}
