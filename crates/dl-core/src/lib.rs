//! # dl-core
//!
//! Core types for the detector event loader: the error taxonomy shared by
//! every crate in the workspace and the typed column containers that carry
//! branch data from the reader to the builder and flattener.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arrow_convert;
pub mod column;
pub mod error;

pub use arrow_convert::{decode_column, decode_values};
pub use column::{
    Column, ColumnData, ColumnSlice, ColumnType, JaggedColumn, RawColumn, check_offsets,
    offsets_from_lengths,
};
pub use error::{Error, Result};
