//! Flat tables: one row per hit or per primary, keyed by `event_index`.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Int64Type, Schema, UInt64Type};
use arrow::record_batch::RecordBatch;
use rayon::prelude::*;

use dl_core::{Error, Result};

use crate::config::ColumnMapping;
use crate::event_tree::{Collection, EventTree};
use crate::particles::ParticleNameMap;

/// Foreign-key column linking every row to its event.
pub const EVENT_INDEX_COLUMN: &str = "event_index";

/// Column appended by [`FlatTable::with_particle_names`].
pub const PARTICLE_NAME_COLUMN: &str = "particle_name";

/// Which collection a table was flattened from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    /// One row per crystal hit.
    Hits,
    /// One row per primary particle.
    Primaries,
}

impl TableKind {
    /// Lower-case name used in messages and file names.
    pub fn as_str(self) -> &'static str {
        match self {
            TableKind::Hits => "hits",
            TableKind::Primaries => "primaries",
        }
    }

    fn collection(self, tree: &EventTree) -> &Collection {
        match self {
            TableKind::Hits => tree.hits(),
            TableKind::Primaries => tree.primaries(),
        }
    }
}

/// A flattened hit or primary table backed by one Arrow record batch.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatTable {
    kind: TableKind,
    batch: RecordBatch,
}

impl FlatTable {
    /// Source collection of this table.
    pub fn kind(&self) -> TableKind {
        self.kind
    }

    /// Number of rows (hits or primaries).
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// Output column names, `event_index` first.
    pub fn column_names(&self) -> Vec<&str> {
        self.batch.schema_ref().fields().iter().map(|f| f.name().as_str()).collect()
    }

    /// Event index of every row.
    pub fn event_index(&self) -> &[u64] {
        self.batch
            .column(0)
            .as_primitive_opt::<UInt64Type>()
            .map(|a| &a.values()[..])
            .unwrap_or(&[])
    }

    /// Column by output name.
    pub fn column(&self, name: &str) -> Option<&ArrayRef> {
        self.batch.column_by_name(name)
    }

    /// Underlying record batch.
    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// Consume the table, returning the record batch.
    pub fn into_batch(self) -> RecordBatch {
        self.batch
    }

    /// Rows per event, for events `0..n_events`.
    pub fn group_lengths(&self, n_events: usize) -> Vec<usize> {
        let mut lengths = vec![0usize; n_events];
        for &event in self.event_index() {
            if let Some(n) = usize::try_from(event).ok().and_then(|e| lengths.get_mut(e)) {
                *n += 1;
            }
        }
        lengths
    }

    /// Append a `particle_name` column resolved from the integer column `code_column`.
    pub fn with_particle_names(&self, code_column: &str, names: &ParticleNameMap) -> Result<Self> {
        if self.column(PARTICLE_NAME_COLUMN).is_some() {
            return Err(Error::ColumnConflict(format!(
                "{} table already has a '{PARTICLE_NAME_COLUMN}' column",
                self.kind.as_str()
            )));
        }
        let codes = self
            .column(code_column)
            .and_then(|c| c.as_primitive_opt::<Int64Type>())
            .ok_or_else(|| {
                Error::InvalidStructure(format!(
                    "{} table has no integer column '{code_column}'",
                    self.kind.as_str()
                ))
            })?;
        let resolved: StringArray =
            codes.values().iter().map(|&code| Some(names.resolve(code))).collect();

        let schema = self.batch.schema();
        let mut fields: Vec<Field> = schema.fields().iter().map(|f| f.as_ref().clone()).collect();
        fields.push(Field::new(PARTICLE_NAME_COLUMN, DataType::Utf8, false));
        let mut columns = self.batch.columns().to_vec();
        columns.push(Arc::new(resolved));

        let schema = Arc::new(Schema::new(fields).with_metadata(schema.metadata().clone()));
        Ok(Self { kind: self.kind, batch: RecordBatch::try_new(schema, columns)? })
    }

    /// Write the table to a Parquet file.
    pub fn write_parquet(&self, path: impl AsRef<Path>) -> Result<()> {
        crate::parquet_io::write_batch(path.as_ref(), &self.batch)
    }
}

/// Flatten one collection of `tree` into a table.
///
/// Columns are `event_index` followed by the collection fields in configured
/// order, renamed through `mapping`. Rows follow event order, then the
/// within-event order of the source.
pub fn flatten(tree: &EventTree, mapping: &ColumnMapping, kind: TableKind) -> Result<FlatTable> {
    tree.validate()?;
    let collection = kind.collection(tree);

    let mut seen: HashSet<&str> = HashSet::from([EVENT_INDEX_COLUMN]);
    let mut names = Vec::with_capacity(collection.fields().len());
    for column in collection.fields() {
        let out = mapping.output_name(&column.name);
        if !seen.insert(out) {
            return Err(Error::ColumnConflict(format!(
                "{} column '{}' maps to '{out}', which is already taken",
                kind.as_str(),
                column.name
            )));
        }
        names.push(out);
    }

    let event_index: UInt64Array = collection
        .lengths()
        .into_iter()
        .enumerate()
        .flat_map(|(event, n)| std::iter::repeat_n(event as u64, n))
        .collect();

    let values: Vec<ArrayRef> =
        collection.fields().par_iter().map(|column| column.data.to_array()).collect();

    let mut fields = Vec::with_capacity(names.len() + 1);
    fields.push(Field::new(EVENT_INDEX_COLUMN, DataType::UInt64, false));
    for (name, array) in names.iter().zip(&values) {
        fields.push(Field::new(*name, array.data_type().clone(), false));
    }
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(values.len() + 1);
    columns.push(Arc::new(event_index));
    columns.extend(values);

    let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;
    tracing::debug!(table = kind.as_str(), rows = batch.num_rows(), "flattened");
    Ok(FlatTable { kind, batch })
}
