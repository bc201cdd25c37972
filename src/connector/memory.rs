use crate::core::{MirrorError, Result, Row, Value};
use crate::entity::Id;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;

use super::Connector;

/// In-process backing store keeping rows in plain vectors, one per table.
/// Useful as a test double and for embedding small fixed datasets.
#[derive(Default)]
pub struct MemoryConnector {
    tables: Mutex<HashMap<String, Vec<Row>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the row, replacing an existing row with the same value in
    /// `id_column`.
    pub fn upsert_row(&self, table: &str, id_column: &str, row: Row) -> Result<()> {
        let id = row.id(id_column)?;
        let mut tables = self.tables.lock()?;
        let rows = tables.entry(table.to_string()).or_default();
        if let Some(slot) = rows.iter_mut().find(|r| r.id(id_column).is_ok_and(|existing| existing == id)) {
            *slot = row;
        } else {
            rows.push(row);
        }
        Ok(())
    }

    pub fn row_count(&self, table: &str) -> Result<usize> {
        let tables = self.tables.lock()?;
        Ok(tables.get(table).map_or(0, Vec::len))
    }

    fn rows_of(&self, table: &str) -> Result<Vec<Row>> {
        let tables = self.tables.lock()?;
        Ok(tables.get(table).cloned().unwrap_or_default())
    }
}

fn value_cmp(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn query_rows_since(
        &self,
        table: &str,
        indicator_column: &str,
        since: Option<&Value>,
        id_column: &str,
        limit: usize,
        _index_hint: Option<&str>,
    ) -> Result<Vec<Row>> {
        let mut rows = self.rows_of(table)?;
        if let Some(since) = since {
            rows.retain(|row| {
                row.get(indicator_column)
                    .and_then(|v| v.partial_cmp(since))
                    .is_some_and(|ord| ord != Ordering::Less)
            });
        }
        rows.sort_by(|a, b| {
            value_cmp(a.get(indicator_column), b.get(indicator_column))
                .then(value_cmp(a.get(id_column), b.get(id_column)))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn query_rows_by_fields(
        &self,
        table: &str,
        fields: &[(String, Value)],
    ) -> Result<Vec<Row>> {
        let mut rows = self.rows_of(table)?;
        rows.retain(|row| {
            fields
                .iter()
                .all(|(name, value)| row.get(name) == Some(value))
        });
        rows.sort_by(|a, b| value_cmp(a.get("id"), b.get("id")));
        Ok(rows)
    }

    async fn query_row_by_id(&self, table: &str, id_column: &str, id: Id) -> Result<Option<Row>> {
        let rows = self.rows_of(table)?;
        let mut matches: Vec<Row> = rows
            .into_iter()
            .filter(|row| row.id(id_column).is_ok_and(|existing| existing == id))
            .collect();
        match matches.len() {
            0 => Ok(None),
            1 => Ok(Some(matches.remove(0))),
            n => Err(MirrorError::Store(format!(
                "expected at most one row of '{}' with {} = {}, found {}",
                table, id_column, id, n
            ))),
        }
    }
}
