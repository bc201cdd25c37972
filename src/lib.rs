// ============================================================================
// RowMirror Library
// ============================================================================

pub mod connector;
pub mod core;
pub mod entity;
pub mod index;
pub mod journal;
pub mod registry;
pub mod table;
mod sync;

// Re-export main types for convenience
pub use core::{DataType, MirrorError, Result, Row, RowBatch, Value};
pub use entity::{Entity, Id, Signature};
pub use registry::{Registry, RegistryConfig, TableOptions};

// Re-export the index and connector API
pub use connector::{Connector, memory::MemoryConnector};
pub use index::{Index, IndexConstraint, IndexKind, Indexes, IndexesBuilder};
pub use journal::Journal;
pub use table::Table;
