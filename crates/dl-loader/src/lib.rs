//! # dl-loader
//!
//! Turns detector-simulation event files into analysis-ready structures.
//!
//! A source tree holds one entry per simulated event: per-event scalar
//! branches plus variable-length per-hit (crystal hits) and per-primary
//! branches. The loader builds
//!
//! - a nested [`EventTree`] that keeps the one-to-many Event→Hit and Event→Primary
//!   relationships (flat columns plus offsets), and
//! - flat [`FlatTable`]s, one row per hit or primary with an `event_index`
//!   foreign key,
//!
//! and caches the nested structure by (canonical source path, configuration
//! fingerprint), optionally in a durable Parquet store.
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use dl_loader::{LoadOptions, Loaded, Loader};
//!
//! let loader = Loader::from_config_path(Some(Path::new("data_config.json"))).unwrap();
//! match loader.load_and_process_data("res2.parquet", LoadOptions::default()).unwrap() {
//!     Loaded::Full(full) => {
//!         println!("{} events, {} hits", full.n_events, full.hits.num_rows());
//!     }
//!     Loaded::Tables(_) => unreachable!(),
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod event_tree;
pub mod flatten;
mod parquet_io;
pub mod particles;
pub mod split;
pub mod store;

mod loader;

pub use cache::{CacheKey, CacheManager, CacheStats};
pub use config::{BranchGroups, ColumnMapping, ColumnMappings, Config, load_config};
pub use event_tree::{Collection, EventTree, HIT_COUNT, PRIMARY_COUNT, build};
pub use flatten::{EVENT_INDEX_COLUMN, FlatTable, TableKind, flatten};
pub use loader::{
    FileOpener, FullLoad, LoadOptions, Loaded, Loader, NestedLoad, SourceOpener, TableLoad,
};
pub use particles::ParticleNameMap;
pub use split::{EventRecords, HitRecords, NestedRecords, PrimaryRecords, get_awkward_arrays};
pub use store::ParquetStore;

pub use dl_core::{Error, Result};
pub use dl_tree::{RawBranches, TreeSource, read_branches};
