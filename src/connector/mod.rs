//! Boundary to the backing store. The core never builds queries itself; it
//! asks a [`Connector`] for ordered change batches, equality lookups and
//! single-row fetches, and treats the returned rows as opaque.

pub mod memory;

use crate::core::{Result, Row, Value};
use crate::entity::Id;
use async_trait::async_trait;

#[async_trait]
pub trait Connector: Send + Sync {
    /// Rows whose indicator column is >= `since` (all rows when `since` is
    /// `None`), ordered by (indicator, id) and capped at `limit`.
    /// `index_hint` is an optional backing-store index name the query
    /// should be steered to.
    async fn query_rows_since(
        &self,
        table: &str,
        indicator_column: &str,
        since: Option<&Value>,
        id_column: &str,
        limit: usize,
        index_hint: Option<&str>,
    ) -> Result<Vec<Row>>;

    /// Rows matching all (field, value) equality pairs, ordered by id.
    async fn query_rows_by_fields(&self, table: &str, fields: &[(String, Value)])
    -> Result<Vec<Row>>;

    /// Zero or one row by id; more than one matching row is an error.
    async fn query_row_by_id(&self, table: &str, id_column: &str, id: Id) -> Result<Option<Row>>;
}
