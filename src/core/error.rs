use thiserror::Error;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Unknown index '{index}' on table '{table}'")]
    IndexNotFound { table: String, index: String },

    #[error(
        "Unique index '{index}' already holds id {existing_id} for value {value}, rejected id {new_id}"
    )]
    UniquenessViolation {
        index: String,
        value: String,
        existing_id: i64,
        new_id: i64,
    },

    #[error("Expected at most one match in index '{index}' for value {value}")]
    NotUnique { index: String, value: String },

    #[error("Incompatible entity type for table '{0}': {1}")]
    IncompatibleType(String, String),

    #[error("Backing store error: {0}")]
    Store(String),

    #[error("Journal error: {0}")]
    Journal(String),

    #[error("Row mapping error: {0}")]
    Mapping(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Timed out waiting for preload of table '{0}'")]
    PreloadTimeout(String),
}

pub type Result<T> = std::result::Result<T, MirrorError>;

impl<T> From<std::sync::PoisonError<T>> for MirrorError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}
