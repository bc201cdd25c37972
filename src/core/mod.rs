pub mod error;
pub mod row;
pub mod value;

pub use error::{MirrorError, Result};
pub use row::{Row, RowBatch};
pub use value::{DataType, Value};
