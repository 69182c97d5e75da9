//! Single-tree sources backed by Arrow record batches (Parquet and Arrow IPC files).
//!
//! A file holds exactly one tree: one row per event, one column per branch.
//! Per-event scalars are primitive columns; per-hit / per-primary branches are
//! `List` or `LargeList` columns. The tree name is read from the
//! [`TREE_NAME_KEY`] schema metadata entry, falling back to the file stem.

use std::fmt::Display;
use std::fs::File;
use std::path::Path;

use arrow::compute::concat_batches;
use arrow::datatypes::SchemaRef;
use arrow::ipc::reader::FileReader;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use dl_core::{Error, RawColumn, Result, decode_column};

use crate::source::{TREE_NAME_KEY, TreeSource, tree_not_found};

/// Tree name used when neither metadata nor a file stem is available.
pub const DEFAULT_TREE_NAME: &str = "events";

/// An in-memory tree materialized from Arrow record batches.
#[derive(Debug, Clone)]
pub struct BatchTree {
    name: String,
    batch: RecordBatch,
}

fn decode_err<E: Display>(path: &Path) -> impl Fn(E) -> Error + '_ {
    move |e| Error::Decode(format!("{}: {e}", path.display()))
}

impl BatchTree {
    /// Open a Parquet file.
    pub fn open_parquet(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = open_existing(path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(decode_err(path))?;
        let schema = builder.schema().clone();
        let reader = builder.build().map_err(decode_err(path))?;
        let batches = reader.collect::<std::result::Result<Vec<_>, _>>().map_err(decode_err(path))?;
        let name = tree_name_for(&schema, Some(path));
        tracing::debug!(path = %path.display(), tree = %name, "opened Parquet tree");
        Self::from_batches(name, schema, &batches).map_err(decode_err(path))
    }

    /// Open an Arrow IPC file.
    pub fn open_ipc(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = open_existing(path)?;
        let reader = FileReader::try_new(file, None).map_err(decode_err(path))?;
        let schema = reader.schema();
        let batches = reader.collect::<std::result::Result<Vec<_>, _>>().map_err(decode_err(path))?;
        let name = tree_name_for(&schema, Some(path));
        tracing::debug!(path = %path.display(), tree = %name, "opened Arrow IPC tree");
        Self::from_batches(name, schema, &batches).map_err(decode_err(path))
    }

    /// Decode Parquet bytes held in memory.
    pub fn from_parquet_bytes(data: &[u8]) -> Result<Self> {
        let buf = bytes::Bytes::copy_from_slice(data);
        let builder = ParquetRecordBatchReaderBuilder::try_new(buf)
            .map_err(|e| Error::Decode(format!("<bytes>: {e}")))?;
        let schema = builder.schema().clone();
        let reader = builder.build().map_err(|e| Error::Decode(format!("<bytes>: {e}")))?;
        let batches = reader
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Decode(format!("<bytes>: {e}")))?;
        let name = tree_name_for(&schema, None);
        Self::from_batches(name, schema, &batches)
    }

    /// Concatenate `batches` (all sharing `schema`) into one tree.
    pub fn from_batches(
        name: impl Into<String>,
        schema: SchemaRef,
        batches: &[RecordBatch],
    ) -> Result<Self> {
        let batch = concat_batches(&schema, batches)?;
        Ok(Self { name: name.into(), batch })
    }

    /// Tree name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The underlying record batch (one row per entry).
    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    fn check_tree(&self, tree: &str) -> Result<()> {
        if tree == self.name { Ok(()) } else { Err(tree_not_found(tree, &self.tree_names())) }
    }
}

impl TreeSource for BatchTree {
    fn tree_names(&self) -> Vec<String> {
        vec![self.name.clone()]
    }

    fn entries(&self, tree: &str) -> Result<usize> {
        self.check_tree(tree)?;
        Ok(self.batch.num_rows())
    }

    fn branch_names(&self, tree: &str) -> Result<Vec<String>> {
        self.check_tree(tree)?;
        Ok(self.batch.schema().fields().iter().map(|f| f.name().clone()).collect())
    }

    fn read_branch(&self, tree: &str, branch: &str) -> Result<RawColumn> {
        self.check_tree(tree)?;
        let column = self.batch.column_by_name(branch).ok_or_else(|| {
            Error::Schema(format!("branch '{branch}' not found in tree '{tree}'"))
        })?;
        decode_column(branch, column.as_ref())
    }
}

fn open_existing(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::SourceNotFound(path.to_path_buf())
        } else {
            Error::Io(e)
        }
    })
}

fn tree_name_for(schema: &SchemaRef, path: Option<&Path>) -> String {
    if let Some(name) = schema.metadata().get(TREE_NAME_KEY) {
        return name.clone();
    }
    path.and_then(|p| p.file_stem())
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_TREE_NAME.to_string())
}
