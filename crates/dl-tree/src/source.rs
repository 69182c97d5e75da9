//! The branch-name contract every tree backend implements.

use std::path::Path;

use dl_core::{Error, RawColumn, Result};

use crate::batch_tree::BatchTree;

/// Key-value metadata entry naming the tree stored in a Parquet / IPC file.
pub const TREE_NAME_KEY: &str = "dl.tree_name";

/// A decoded source file exposing named trees of named branches.
///
/// Implementations only decode; they never cache or reshape. A native ROOT
/// decoder plugs in here the same way the Arrow-backed trees do.
pub trait TreeSource: Send + Sync {
    /// Names of all trees in the source.
    fn tree_names(&self) -> Vec<String>;

    /// Number of entries (events) in `tree`.
    fn entries(&self, tree: &str) -> Result<usize>;

    /// Names of all branches in `tree`, in storage order.
    fn branch_names(&self, tree: &str) -> Result<Vec<String>>;

    /// Decode one branch of `tree`.
    fn read_branch(&self, tree: &str, branch: &str) -> Result<RawColumn>;
}

/// Source file formats recognised by [`open_source`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// Apache Parquet (`.parquet`, `.pq`).
    Parquet,
    /// Arrow IPC file (`.arrow`, `.feather`, `.ipc`).
    ArrowIpc,
}

impl SourceFormat {
    /// Detect the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "parquet" | "pq" => Some(SourceFormat::Parquet),
            "arrow" | "feather" | "ipc" => Some(SourceFormat::ArrowIpc),
            _ => None,
        }
    }
}

/// Open a source file, choosing the backend by extension.
///
/// Only columnar Arrow formats are recognised; anything else (ROOT included)
/// is an [`Error::Decode`]. Other formats are served by implementing
/// [`TreeSource`] directly.
pub fn open_source(path: impl AsRef<Path>) -> Result<Box<dyn TreeSource>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::SourceNotFound(path.to_path_buf()));
    }
    let tree = match SourceFormat::from_path(path) {
        Some(SourceFormat::Parquet) => BatchTree::open_parquet(path)?,
        Some(SourceFormat::ArrowIpc) => BatchTree::open_ipc(path)?,
        None => {
            return Err(Error::Decode(format!(
                "unsupported source format: {} (expected .parquet, .pq, .arrow, .feather or .ipc)",
                path.display()
            )));
        }
    };
    Ok(Box::new(tree))
}

pub(crate) fn tree_not_found(tree: &str, available: &[String]) -> Error {
    Error::Schema(format!("tree '{tree}' not found (available: {available:?})"))
}
