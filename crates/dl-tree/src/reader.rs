//! Raw branch reading: named branches of one tree, decoded per event.

use std::path::Path;

use rayon::prelude::*;

use dl_core::{Error, RawColumn, Result};

use crate::source::{TreeSource, open_source};

/// One decoded branch.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBranch {
    /// Branch name.
    pub name: String,
    /// Decoded values.
    pub column: RawColumn,
}

/// Decoded branches of one tree, in request order.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBranches {
    /// Number of entries (events) in the tree.
    pub entries: usize,
    /// Branches in the order they were requested.
    pub branches: Vec<RawBranch>,
}

impl RawBranches {
    /// An empty group covering `entries` events.
    pub fn empty(entries: usize) -> Self {
        Self { entries, branches: Vec::new() }
    }

    /// Find a branch by name.
    pub fn get(&self, name: &str) -> Option<&RawColumn> {
        self.branches.iter().find(|b| b.name == name).map(|b| &b.column)
    }

    /// Remove and return a branch by name.
    pub fn take(&mut self, name: &str) -> Option<RawColumn> {
        let idx = self.branches.iter().position(|b| b.name == name)?;
        Some(self.branches.remove(idx).column)
    }

    /// Branch names in order.
    pub fn names(&self) -> Vec<&str> {
        self.branches.iter().map(|b| b.name.as_str()).collect()
    }

    /// Number of branches.
    pub fn len(&self) -> usize {
        self.branches.len()
    }

    /// Whether no branches were read.
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }
}

/// Read `branch_names` from `tree_name`.
///
/// Every requested branch must exist; all missing names are reported in a
/// single [`Error::Schema`]. Branches are decoded in parallel.
pub fn read_branches(
    source: &dyn TreeSource,
    tree_name: &str,
    branch_names: &[String],
) -> Result<RawBranches> {
    let available = source.branch_names(tree_name)?;
    let missing: Vec<&str> = branch_names
        .iter()
        .filter(|name| !available.iter().any(|a| a == *name))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(Error::Schema(format!(
            "tree '{tree_name}' is missing branches {missing:?} (available: {available:?})"
        )));
    }

    let entries = source.entries(tree_name)?;
    let columns = branch_names
        .par_iter()
        .map(|name| source.read_branch(tree_name, name))
        .collect::<Result<Vec<_>>>()?;

    let branches = branch_names
        .iter()
        .zip(columns)
        .map(|(name, column)| RawBranch { name: name.clone(), column })
        .collect();
    Ok(RawBranches { entries, branches })
}

/// Open `path` and read `branch_names` from `tree_name`.
pub fn read_branches_from_path(
    path: impl AsRef<Path>,
    tree_name: &str,
    branch_names: &[String],
) -> Result<RawBranches> {
    let source = open_source(path)?;
    read_branches(source.as_ref(), tree_name, branch_names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTree;
    use dl_core::{ColumnData, JaggedColumn};

    fn tree() -> MemoryTree {
        MemoryTree::new("Events", 2)
            .with_scalar("TotalEdep", ColumnData::Float(vec![1.0, 2.0]))
            .with_jagged("CrystalEdep", JaggedColumn::from_f64_lists(&[vec![0.5, 0.5], vec![2.0]]))
            .with_jagged("CrystalID", JaggedColumn::from_i64_lists(&[vec![3, 4], vec![9]]))
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn reads_in_request_order() {
        let raw = read_branches(&tree(), "Events", &names(&["CrystalID", "CrystalEdep"])).unwrap();
        assert_eq!(raw.entries, 2);
        assert_eq!(raw.names(), vec!["CrystalID", "CrystalEdep"]);
        assert!(raw.get("CrystalID").unwrap().is_jagged());
        assert!(raw.get("TotalEdep").is_none());
    }

    #[test]
    fn reports_all_missing_branches() {
        let err = read_branches(&tree(), "Events", &names(&["CrystalEdep", "Nope", "Gone"]))
            .unwrap_err();
        match err {
            Error::Schema(msg) => {
                assert!(msg.contains("Nope"), "{msg}");
                assert!(msg.contains("Gone"), "{msg}");
            }
            other => panic!("expected Schema error, got {other:?}"),
        }
    }

    #[test]
    fn missing_tree_is_schema_error() {
        let err = read_branches(&tree(), "Hits", &names(&["CrystalEdep"])).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn empty_request_still_reports_entries() {
        let raw = read_branches(&tree(), "Events", &[]).unwrap();
        assert_eq!(raw.entries, 2);
        assert!(raw.is_empty());
    }

    #[test]
    fn missing_path_is_source_not_found() {
        let err =
            read_branches_from_path("/definitely/not/here.parquet", "Events", &[]).unwrap_err();
        assert!(matches!(err, Error::SourceNotFound(_)));
    }
}
