//! A partitioned, block-typed dataframe holding one party's samples.
//!
//! Columns of the same type are grouped into [`block::Block`]s. Every partition of a
//! [`DataFrame`] stores the sample ids of its rows plus one block per block id of the shared
//! [`manager::DataManager`], all with the same number of rows.

pub mod block;
mod frame;
pub mod loader;
pub mod manager;
mod set_item;

pub use block::{Block, BlockType, Scalar};
pub use frame::{DataFrame, DataFrameBuilder, PartitionBlocks};
pub use manager::{DataManager, FieldKind};
pub use set_item::{Item, SetMode};

/// Errors raised while building or mutating a dataframe.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A column name is unknown, duplicated or of the wrong kind.
    #[error("schema error: {0}")]
    Schema(String),
    /// The number of keys, values, rows or columns does not line up.
    #[error("shape error: {0}")]
    Shape(String),
    /// A value cannot be stored in a block of the given type.
    #[error("cannot store {value} in a {block_type} block")]
    TypeCoercion {
        /// The offending value.
        value: String,
        /// The type of the target block.
        block_type: BlockType,
    },
    /// A sample id is not part of the frame.
    #[error("unknown sample id '{0}'")]
    MissingSampleId(String),
}
