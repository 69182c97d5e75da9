//! Programmatic in-memory trees.
//!
//! Used to embed already-decoded data and to produce source files for tests.
//! Branch lengths are not validated on insert so inconsistent inputs reach the
//! builder unchanged.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::ArrayRef;
use arrow::datatypes::{Field, Schema};
use arrow::ipc::writer::FileWriter;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use dl_core::{ColumnData, Error, JaggedColumn, RawColumn, Result};

use crate::source::{TREE_NAME_KEY, TreeSource, tree_not_found};

/// A single named tree whose branches are held as decoded columns.
#[derive(Debug, Clone)]
pub struct MemoryTree {
    name: String,
    entries: usize,
    branches: Vec<(String, RawColumn)>,
}

impl MemoryTree {
    /// Create an empty tree with `entries` events.
    pub fn new(name: impl Into<String>, entries: usize) -> Self {
        Self { name: name.into(), entries, branches: Vec::new() }
    }

    /// Add (or replace) a branch.
    pub fn with_branch(mut self, name: impl Into<String>, column: RawColumn) -> Self {
        let name = name.into();
        match self.branches.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = column,
            None => self.branches.push((name, column)),
        }
        self
    }

    /// Add a per-event scalar branch.
    pub fn with_scalar(self, name: impl Into<String>, data: ColumnData) -> Self {
        self.with_branch(name, RawColumn::Scalar(data))
    }

    /// Add a per-event variable-length branch.
    pub fn with_jagged(self, name: impl Into<String>, column: JaggedColumn) -> Self {
        self.with_branch(name, RawColumn::Jagged(column))
    }

    /// Tree name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Encode as a record batch, one row per entry, tagged with the tree name.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let mut fields = Vec::with_capacity(self.branches.len());
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(self.branches.len());
        for (name, column) in &self.branches {
            let array = match column {
                RawColumn::Scalar(data) => data.to_array(),
                RawColumn::Jagged(j) => j.to_array()?,
            };
            if array.len() != self.entries {
                return Err(Error::ShapeMismatch(format!(
                    "branch '{name}' covers {} entries, tree '{}' has {}",
                    array.len(),
                    self.name,
                    self.entries
                )));
            }
            fields.push(Field::new(name, array.data_type().clone(), false));
            arrays.push(array);
        }
        let metadata = HashMap::from([(TREE_NAME_KEY.to_string(), self.name.clone())]);
        let schema = Arc::new(Schema::new(fields).with_metadata(metadata));
        let options = RecordBatchOptions::new().with_row_count(Some(self.entries));
        Ok(RecordBatch::try_new_with_options(schema, arrays, &options)?)
    }

    /// Write the tree to a Parquet file.
    pub fn write_parquet(&self, path: impl AsRef<Path>) -> Result<()> {
        let batch = self.to_record_batch()?;
        let props = WriterProperties::builder().set_compression(Compression::SNAPPY).build();
        let file = File::create(path.as_ref())?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
        writer.write(&batch)?;
        writer.close()?;
        Ok(())
    }

    /// Write the tree to an Arrow IPC file.
    pub fn write_ipc(&self, path: impl AsRef<Path>) -> Result<()> {
        let batch = self.to_record_batch()?;
        let file = File::create(path.as_ref())?;
        let mut writer = FileWriter::try_new(file, batch.schema().as_ref())?;
        writer.write(&batch)?;
        writer.finish()?;
        Ok(())
    }

    fn check_tree(&self, tree: &str) -> Result<()> {
        if tree == self.name { Ok(()) } else { Err(tree_not_found(tree, &self.tree_names())) }
    }
}

impl TreeSource for MemoryTree {
    fn tree_names(&self) -> Vec<String> {
        vec![self.name.clone()]
    }

    fn entries(&self, tree: &str) -> Result<usize> {
        self.check_tree(tree)?;
        Ok(self.entries)
    }

    fn branch_names(&self, tree: &str) -> Result<Vec<String>> {
        self.check_tree(tree)?;
        Ok(self.branches.iter().map(|(n, _)| n.clone()).collect())
    }

    fn read_branch(&self, tree: &str, branch: &str) -> Result<RawColumn> {
        self.check_tree(tree)?;
        self.branches
            .iter()
            .find(|(n, _)| n == branch)
            .map(|(_, c)| c.clone())
            .ok_or_else(|| Error::Schema(format!("branch '{branch}' not found in tree '{tree}'")))
    }
}
