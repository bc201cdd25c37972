use crate::core::{MirrorError, Result, Value};
use serde::{Deserialize, Serialize};

/// Raw backing-store row: an ordered column-name -> value mapping. Rows are
/// opaque to the core; only the id and indicator columns are ever inspected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    cols: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column append, replacing an existing column of the
    /// same name.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        if let Some(slot) = self.cols.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.cols.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.cols
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .or_else(|| {
                self.cols
                    .iter()
                    .find(|(n, _)| n.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v)
            })
    }

    pub fn require(&self, name: &str) -> Result<&Value> {
        self.get(name)
            .ok_or_else(|| MirrorError::Mapping(format!("missing column '{}'", name)))
    }

    /// The row's 64-bit identifier. Column lookup is case-insensitive.
    pub fn id(&self, id_column: &str) -> Result<i64> {
        match self.get(id_column) {
            Some(Value::Integer(id)) => Ok(*id),
            Some(other) => Err(MirrorError::Mapping(format!(
                "id column '{}' holds {} instead of an integer",
                id_column,
                other.type_name()
            ))),
            None => Err(MirrorError::Mapping(format!(
                "row has no id column '{}'",
                id_column
            ))),
        }
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cols.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.cols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cols.is_empty()
    }
}

/// Ordered batch of rows sharing one column schema, the unit the journal
/// codec serializes. The first pushed row fixes the schema; later rows are
/// projected onto it by column name, with missing columns becoming NULL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowBatch {
    columns: Vec<String>,
    values: Vec<Vec<Value>>,
}

impl RowBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, row: &Row) {
        if self.columns.is_empty() {
            self.columns = row.columns().map(str::to_string).collect();
        }
        let projected = self
            .columns
            .iter()
            .map(|name| row.get(name).cloned().unwrap_or(Value::Null))
            .collect();
        self.values.push(projected);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_rows(self) -> Vec<Row> {
        let columns = self.columns;
        self.values
            .into_iter()
            .map(|values| {
                let mut row = Row::new();
                for (name, value) in columns.iter().zip(values) {
                    row.set(name.clone(), value);
                }
                row
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_set_replaces() {
        let row = Row::new().with("id", 1i64).with("id", 2i64);
        assert_eq!(row.len(), 1);
        assert_eq!(row.id("id").unwrap(), 2);
    }

    #[test]
    fn test_row_id_case_insensitive() {
        let row = Row::new().with("ID", 7i64);
        assert_eq!(row.id("id").unwrap(), 7);
    }

    #[test]
    fn test_row_id_type_error() {
        let row = Row::new().with("id", "oops");
        assert!(row.id("id").is_err());
    }

    #[test]
    fn test_batch_round_trip_preserves_order_and_values() {
        let rows = vec![
            Row::new().with("id", 1i64).with("handle", "alice"),
            Row::new().with("id", 2i64).with("handle", "bob"),
        ];
        let mut batch = RowBatch::new();
        for row in &rows {
            batch.push(row);
        }
        assert_eq!(batch.into_rows(), rows);
    }

    #[test]
    fn test_batch_projects_missing_columns_to_null() {
        let mut batch = RowBatch::new();
        batch.push(&Row::new().with("id", 1i64).with("handle", "alice"));
        batch.push(&Row::new().with("id", 2i64));
        let rows = batch.into_rows();
        assert_eq!(rows[1].get("handle"), Some(&Value::Null));
    }
}
