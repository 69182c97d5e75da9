//! # dl-tree
//!
//! Raw reader adapter for tree-structured event files.
//!
//! A source holds one or more named trees; each tree holds one entry per
//! event and one branch per recorded quantity. Branches are either per-event
//! scalars or per-event variable-length lists (hits, primaries). This crate
//! only knows the branch-name contract ([`TreeSource`]) and decodes into the
//! typed columns of `dl-core`; it performs no caching or reshaping.
//!
//! ## Example
//!
//! ```no_run
//! use dl_tree::read_branches_from_path;
//!
//! let names = vec!["CrystalEdep".to_string(), "CrystalID".to_string()];
//! let raw = read_branches_from_path("data/res2.parquet", "Events", &names).unwrap();
//! println!("{} events, {} branches", raw.entries, raw.len());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch_tree;
pub mod memory;
pub mod reader;
pub mod source;

pub use batch_tree::{BatchTree, DEFAULT_TREE_NAME};
pub use memory::MemoryTree;
pub use reader::{RawBranch, RawBranches, read_branches, read_branches_from_path};
pub use source::{SourceFormat, TREE_NAME_KEY, TreeSource, open_source};
