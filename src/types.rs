pub mod byte_order;
pub mod dtype;
pub mod missing;

// Re-export types for convenience.
pub use crate::types::byte_order::ByteOrder;
pub use crate::types::dtype::{DType, DataType};
pub use crate::types::missing::Missing;
