use crate::core::{DataType, Result, Row};

/// Stable, externally assigned 64-bit entity identifier.
pub type Id = i64;

/// Ordered (field name, field type) list describing an entity's shape.
/// Two entity types are structurally compatible iff their signatures are
/// equal; compatible types may share one mirrored table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature(Vec<(String, DataType)>);

impl Signature {
    pub fn of(fields: &[(&str, DataType)]) -> Self {
        Self(
            fields
                .iter()
                .map(|(name, ty)| (name.to_string(), *ty))
                .collect(),
        )
    }

    pub fn fields(&self) -> &[(String, DataType)] {
        &self.0
    }
}

/// A record type mirrored into memory from the backing store.
///
/// The trait is the explicit copy contract of the system: `from_row` is the
/// entity mapper, `to_row` the reverse projection used to move entities
/// between structurally compatible types. Both must be pure. Entities are
/// value-copied into table storage, so a retrieved copy is independent of
/// the stored state.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Backing-store table name; also the registry key compatible types share.
    const TABLE: &'static str;

    /// Name of the id column in raw rows.
    const ID_COLUMN: &'static str = "id";

    fn id(&self) -> Id;

    fn signature() -> Signature;

    fn from_row(row: &Row) -> Result<Self>;

    fn to_row(&self) -> Row;
}
