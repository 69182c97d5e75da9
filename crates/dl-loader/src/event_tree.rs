//! Nested, event-indexed structure (Structure-of-Arrays with offsets).
//!
//! Each event owns a contiguous run of hits and a contiguous run of
//! primaries. Collections store every field as one flat column plus a shared
//! `offsets` vector of length `n_events + 1`; event `i` owns rows
//! `offsets[i]..offsets[i + 1]`. Within-event order is the order the source
//! recorded, never re-sorted.
//!
//! # Arrow form
//!
//! One row per event. Event fields are `Float64` / `Int64` columns; hit and
//! primary fields are `LargeList` columns. Schema metadata:
//!
//! | Key                       | Value                                   |
//! |---------------------------|-----------------------------------------|
//! | `dl.schema_version`       | `"dl_event_tree_v1"`                    |
//! | `dl.hit_fields`           | JSON array of hit field names           |
//! | `dl.primary_fields`       | JSON array of primary field names       |
//! | `dl.particle_code_field`  | primary field holding PDG codes (opt.)  |

use std::borrow::Cow;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use arrow::array::ArrayRef;
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};

use dl_core::{
    Column, ColumnData, ColumnSlice, Error, JaggedColumn, RawColumn, Result, check_offsets,
    decode_column, offsets_from_lengths,
};
use dl_tree::RawBranches;

use crate::config::Config;
use crate::particles::ParticleNameMap;

/// Derived event field: number of hits in the event.
pub const HIT_COUNT: &str = "HitCount";

/// Derived event field: number of primaries in the event.
pub const PRIMARY_COUNT: &str = "PrimaryCount";

/// Schema version string embedded in Arrow metadata.
pub const EVENT_TREE_SCHEMA_V1: &str = "dl_event_tree_v1";

/// Arrow metadata key for the schema version.
pub const META_KEY_SCHEMA_VERSION: &str = "dl.schema_version";

/// Arrow metadata key listing hit fields (JSON array).
pub const META_KEY_HIT_FIELDS: &str = "dl.hit_fields";

/// Arrow metadata key listing primary fields (JSON array).
pub const META_KEY_PRIMARY_FIELDS: &str = "dl.primary_fields";

/// Arrow metadata key naming the particle-code field.
pub const META_KEY_PARTICLE_CODE: &str = "dl.particle_code_field";

/// Records of one kind (hits or primaries) owned by events.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    offsets: Vec<usize>,
    fields: Vec<Column>,
}

impl Collection {
    /// Create a collection from shared offsets and flat field columns.
    ///
    /// No checks are made here; see [`EventTree::validate`].
    pub fn new(offsets: Vec<usize>, fields: Vec<Column>) -> Self {
        Self { offsets, fields }
    }

    /// Entry boundaries (`n_events + 1` values).
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Field columns, in configured order.
    pub fn fields(&self) -> &[Column] {
        &self.fields
    }

    /// Field values by name.
    pub fn field(&self, name: &str) -> Option<&ColumnData> {
        self.fields.iter().find(|c| c.name == name).map(|c| &c.data)
    }

    /// Field names, in configured order.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|c| c.name.as_str()).collect()
    }

    /// Number of events covered.
    pub fn n_events(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    /// Total number of records across all events.
    pub fn len(&self) -> usize {
        self.offsets.last().copied().unwrap_or(0)
    }

    /// Whether no event owns any record.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row range owned by `event`.
    pub fn range(&self, event: usize) -> Option<Range<usize>> {
        let start = *self.offsets.get(event)?;
        let end = *self.offsets.get(event + 1)?;
        (start <= end).then_some(start..end)
    }

    /// Number of records owned by `event`.
    pub fn len_of(&self, event: usize) -> Option<usize> {
        self.range(event).map(|r| r.len())
    }

    /// Records per event.
    pub fn lengths(&self) -> Vec<usize> {
        self.offsets.windows(2).map(|w| w[1].saturating_sub(w[0])).collect()
    }

    /// Values of `field` for one event.
    pub fn values(&self, field: &str, event: usize) -> Option<ColumnSlice<'_>> {
        self.field(field)?.slice(self.range(event)?)
    }

    fn validate(&self, what: &str, n_events: usize) -> Result<()> {
        if self.offsets.len() != n_events + 1 {
            return Err(Error::InvalidStructure(format!(
                "{what} offsets cover {} events, expected {n_events}",
                self.n_events()
            )));
        }
        for col in &self.fields {
            check_offsets(&self.offsets, col.data.len()).map_err(|e| {
                Error::InvalidStructure(format!("{what} field '{}': {e}", col.name))
            })?;
        }
        check_offsets(&self.offsets, self.len())
            .map_err(|e| Error::InvalidStructure(format!("{what} offsets: {e}")))
    }
}

/// Immutable nested event structure.
#[derive(Debug, Clone, PartialEq)]
pub struct EventTree {
    n_events: usize,
    event_fields: Vec<Column>,
    hits: Collection,
    primaries: Collection,
    particle_code_field: Option<String>,
}

impl EventTree {
    /// Assemble a tree from parts without checking invariants.
    ///
    /// [`EventTree::validate`] (run by `get_awkward_arrays` and the flattener)
    /// reports anything inconsistent.
    pub fn from_parts(
        n_events: usize,
        event_fields: Vec<Column>,
        hits: Collection,
        primaries: Collection,
        particle_code_field: Option<String>,
    ) -> Self {
        Self { n_events, event_fields, hits, primaries, particle_code_field }
    }

    /// Number of events.
    pub fn n_events(&self) -> usize {
        self.n_events
    }

    /// Whether the tree holds no events.
    pub fn is_empty(&self) -> bool {
        self.n_events == 0
    }

    /// Per-event scalar fields, including the derived counts.
    pub fn event_fields(&self) -> &[Column] {
        &self.event_fields
    }

    /// Per-event scalar field by name.
    pub fn event_field(&self, name: &str) -> Option<&ColumnData> {
        self.event_fields.iter().find(|c| c.name == name).map(|c| &c.data)
    }

    /// Hits per event (the `HitCount` field).
    pub fn hit_counts(&self) -> &[i64] {
        self.event_field(HIT_COUNT).and_then(ColumnData::as_int).unwrap_or(&[])
    }

    /// Primaries per event (the `PrimaryCount` field).
    pub fn primary_counts(&self) -> &[i64] {
        self.event_field(PRIMARY_COUNT).and_then(ColumnData::as_int).unwrap_or(&[])
    }

    /// Hit collection.
    pub fn hits(&self) -> &Collection {
        &self.hits
    }

    /// Primary collection.
    pub fn primaries(&self) -> &Collection {
        &self.primaries
    }

    /// Primary field holding particle codes, if configured.
    pub fn particle_code_field(&self) -> Option<&str> {
        self.particle_code_field.as_deref()
    }

    /// Resolve the particle code of every primary, grouped by event.
    ///
    /// Names are computed on demand; the tree only stores raw codes.
    pub fn particle_names<'m>(&self, names: &'m ParticleNameMap) -> Result<Vec<Vec<Cow<'m, str>>>> {
        let field = self.particle_code_field.as_deref().ok_or_else(|| {
            Error::InvalidStructure("no particle code field configured for primaries".into())
        })?;
        let codes = self.primaries.field(field).and_then(ColumnData::as_int).ok_or_else(|| {
            Error::InvalidStructure(format!("primary field '{field}' is missing or not integer"))
        })?;
        (0..self.n_events)
            .map(|event| {
                let range = self.primaries.range(event).ok_or_else(|| {
                    Error::InvalidStructure(format!("primary offsets do not cover event {event}"))
                })?;
                let slice = codes.get(range).ok_or_else(|| {
                    Error::InvalidStructure(format!("primary field '{field}' is too short"))
                })?;
                Ok(slice.iter().map(|&code| names.resolve(code)).collect())
            })
            .collect()
    }

    /// Check every structural invariant.
    ///
    /// `HitCount` and `PrimaryCount` must be present and agree with the
    /// collection offsets; every field must match the length its level implies.
    pub fn validate(&self) -> Result<()> {
        for col in &self.event_fields {
            if col.data.len() != self.n_events {
                return Err(Error::InvalidStructure(format!(
                    "event field '{}' has {} values, expected {}",
                    col.name,
                    col.data.len(),
                    self.n_events
                )));
            }
        }
        self.hits.validate("hit", self.n_events)?;
        self.primaries.validate("primary", self.n_events)?;

        for (name, collection) in [(HIT_COUNT, &self.hits), (PRIMARY_COUNT, &self.primaries)] {
            let counts = self.event_field(name).and_then(ColumnData::as_int).ok_or_else(|| {
                Error::InvalidStructure(format!("missing integer event field '{name}'"))
            })?;
            let lengths = collection.lengths();
            if let Some(event) =
                counts.iter().zip(&lengths).position(|(&c, &l)| usize::try_from(c) != Ok(l))
            {
                return Err(Error::InvalidStructure(format!(
                    "{name}[{event}] = {} but the event owns {} records",
                    counts[event], lengths[event]
                )));
            }
        }
        Ok(())
    }

    /// Encode as an Arrow record batch, one row per event.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        self.to_record_batch_with_metadata(HashMap::new())
    }

    /// Encode as an Arrow record batch with extra schema metadata entries.
    pub fn to_record_batch_with_metadata(
        &self,
        extra: HashMap<String, String>,
    ) -> Result<RecordBatch> {
        let mut fields = Vec::new();
        let mut arrays: Vec<ArrayRef> = Vec::new();

        for col in &self.event_fields {
            fields.push(Field::new(&col.name, col.data.data_type(), false));
            arrays.push(col.data.to_array());
        }
        for collection in [&self.hits, &self.primaries] {
            for col in collection.fields() {
                let jagged = JaggedColumn::new(col.data.clone(), collection.offsets.clone())?;
                let array = jagged.to_array()?;
                fields.push(Field::new(&col.name, array.data_type().clone(), false));
                arrays.push(array);
            }
        }

        let field_list = |c: &Collection| serde_json::to_string(&c.field_names());
        let mut metadata = extra;
        metadata.insert(META_KEY_SCHEMA_VERSION.into(), EVENT_TREE_SCHEMA_V1.into());
        metadata.insert(
            META_KEY_HIT_FIELDS.into(),
            field_list(&self.hits)
                .map_err(|e| Error::InvalidStructure(format!("hit field list: {e}")))?,
        );
        metadata.insert(
            META_KEY_PRIMARY_FIELDS.into(),
            field_list(&self.primaries)
                .map_err(|e| Error::InvalidStructure(format!("primary field list: {e}")))?,
        );
        if let Some(code) = &self.particle_code_field {
            metadata.insert(META_KEY_PARTICLE_CODE.into(), code.clone());
        }

        let schema = Arc::new(Schema::new(fields).with_metadata(metadata));
        let options = RecordBatchOptions::new().with_row_count(Some(self.n_events));
        Ok(RecordBatch::try_new_with_options(schema, arrays, &options)?)
    }

    /// Decode the Arrow form produced by [`EventTree::to_record_batch`].
    pub fn from_record_batch(batch: &RecordBatch) -> Result<Self> {
        let schema = batch.schema();
        let metadata = schema.metadata();
        let hit_names = field_list_from_metadata(metadata, META_KEY_HIT_FIELDS)?;
        let primary_names = field_list_from_metadata(metadata, META_KEY_PRIMARY_FIELDS)?;
        let n_events = batch.num_rows();

        let mut event_fields = Vec::new();
        for field in schema.fields() {
            let name = field.name();
            if hit_names.contains(name) || primary_names.contains(name) {
                continue;
            }
            let column = batch.column_by_name(name).ok_or_else(|| {
                Error::InvalidStructure(format!("event field '{name}' is missing"))
            })?;
            match decode_column(name, column.as_ref()).map_err(as_invalid)? {
                RawColumn::Scalar(data) => event_fields.push(Column::new(name.clone(), data)),
                RawColumn::Jagged(_) => {
                    return Err(Error::InvalidStructure(format!(
                        "event field '{name}' is a list column"
                    )));
                }
            }
        }

        let counts_of = |name: &str| {
            event_fields.iter().find(|c| c.name == name).and_then(|c| c.data.as_int()).map(|v| {
                offsets_from_lengths(v.iter().map(|&n| usize::try_from(n).unwrap_or(0)))
            })
        };
        let hits = collection_from_batch(batch, "hit", &hit_names, counts_of(HIT_COUNT))?;
        let primaries =
            collection_from_batch(batch, "primary", &primary_names, counts_of(PRIMARY_COUNT))?;

        let tree = Self {
            n_events,
            event_fields,
            hits,
            primaries,
            particle_code_field: metadata.get(META_KEY_PARTICLE_CODE).cloned(),
        };
        tree.validate()?;
        Ok(tree)
    }
}

fn as_invalid(e: Error) -> Error {
    Error::InvalidStructure(e.to_string())
}

fn field_list_from_metadata(metadata: &HashMap<String, String>, key: &str) -> Result<Vec<String>> {
    let json = metadata
        .get(key)
        .ok_or_else(|| Error::InvalidStructure(format!("missing schema metadata '{key}'")))?;
    serde_json::from_str(json)
        .map_err(|e| Error::InvalidStructure(format!("invalid schema metadata '{key}': {e}")))
}

/// Rebuild a collection from list columns. With no fields, offsets come from
/// the derived count column.
fn collection_from_batch(
    batch: &RecordBatch,
    what: &str,
    names: &[String],
    fallback_offsets: Option<Vec<usize>>,
) -> Result<Collection> {
    let mut offsets: Option<Vec<usize>> = None;
    let mut fields = Vec::with_capacity(names.len());
    for name in names {
        let column = batch
            .column_by_name(name)
            .ok_or_else(|| Error::InvalidStructure(format!("{what} field '{name}' is missing")))?;
        let RawColumn::Jagged(jagged) = decode_column(name, column.as_ref()).map_err(as_invalid)?
        else {
            return Err(Error::InvalidStructure(format!("{what} field '{name}' is not a list")));
        };
        match &offsets {
            Some(existing) if *existing != jagged.offsets => {
                return Err(Error::InvalidStructure(format!(
                    "{what} field '{name}' has different per-event lengths than '{}'",
                    names[0]
                )));
            }
            Some(_) => {}
            None => offsets = Some(jagged.offsets),
        }
        fields.push(Column::new(name.clone(), jagged.values));
    }
    let offsets = offsets.or(fallback_offsets).ok_or_else(|| {
        Error::InvalidStructure(format!("cannot recover {what} offsets: no fields and no count"))
    })?;
    Ok(Collection::new(offsets, fields))
}

/// Assemble the nested structure from the three raw branch groups.
///
/// Hit and primary branches must be jagged and share per-event lengths within
/// their group; event branches must be scalar. `HitCount` / `PrimaryCount`
/// are recomputed from the realized lists and override any source branch of
/// the same name.
pub fn build(
    raw_event: RawBranches,
    raw_hits: RawBranches,
    raw_primaries: RawBranches,
    config: &Config,
) -> Result<EventTree> {
    let n_events = raw_event.entries;
    for (group, raw) in [("crystal_hits", &raw_hits), ("primary_particles", &raw_primaries)] {
        if raw.entries != n_events {
            return Err(Error::ShapeMismatch(format!(
                "branches.{group} covers {} events, event group covers {n_events}",
                raw.entries
            )));
        }
    }

    let hits = assemble_collection("crystal_hits", raw_hits, &config.branches.crystal_hits, n_events)?;
    let primaries = assemble_collection(
        "primary_particles",
        raw_primaries,
        &config.branches.primary_particles,
        n_events,
    )?;
    let event_fields =
        assemble_event_fields(raw_event, &config.branches.event, n_events, &hits, &primaries)?;

    let particle_code_field = config.particle_code_branch().map(str::to_string);
    Ok(EventTree { n_events, event_fields, hits, primaries, particle_code_field })
}

fn assemble_collection(
    group: &str,
    mut raw: RawBranches,
    names: &[String],
    n_events: usize,
) -> Result<Collection> {
    let mut offsets: Option<(String, Vec<usize>)> = None;
    let mut fields = Vec::with_capacity(names.len());

    for name in names {
        let column = raw
            .take(name)
            .ok_or_else(|| Error::Schema(format!("branch '{name}' was not read for {group}")))?;
        let RawColumn::Jagged(jagged) = column else {
            return Err(Error::ShapeMismatch(format!(
                "branch '{name}' in branches.{group} holds one value per event, expected a list"
            )));
        };
        if jagged.n_entries() != n_events {
            return Err(Error::ShapeMismatch(format!(
                "branch '{name}' covers {} events, expected {n_events}",
                jagged.n_entries()
            )));
        }
        check_offsets(&jagged.offsets, jagged.values.len())
            .map_err(|e| Error::ShapeMismatch(format!("branch '{name}': {e}")))?;

        match &offsets {
            Some((first, existing)) => {
                if let Some(event) = existing.windows(2).zip(jagged.offsets.windows(2)).position(
                    |(a, b)| a[1] - a[0] != b[1] - b[0],
                ) {
                    return Err(Error::ShapeMismatch(format!(
                        "branches.{group}: '{name}' and '{first}' disagree on the length of event {event}"
                    )));
                }
            }
            None => offsets = Some((name.clone(), jagged.offsets)),
        }
        fields.push(Column::new(name.clone(), jagged.values));
    }

    let offsets = offsets.map(|(_, o)| o).unwrap_or_else(|| vec![0; n_events + 1]);
    Ok(Collection::new(offsets, fields))
}

fn assemble_event_fields(
    mut raw: RawBranches,
    names: &[String],
    n_events: usize,
    hits: &Collection,
    primaries: &Collection,
) -> Result<Vec<Column>> {
    let derived = |c: &Collection| -> Vec<i64> {
        c.lengths().into_iter().map(|n| i64::try_from(n).unwrap_or(i64::MAX)).collect()
    };
    let hit_counts = derived(hits);
    let primary_counts = derived(primaries);

    let mut fields = Vec::with_capacity(names.len() + 2);
    for name in names {
        let column = raw
            .take(name)
            .ok_or_else(|| Error::Schema(format!("branch '{name}' was not read for event")))?;
        let RawColumn::Scalar(data) = column else {
            return Err(Error::ShapeMismatch(format!(
                "branch '{name}' in branches.event is a list, expected one value per event"
            )));
        };
        if data.len() != n_events {
            return Err(Error::ShapeMismatch(format!(
                "branch '{name}' has {} values, expected {n_events}",
                data.len()
            )));
        }
        let derived = match name.as_str() {
            HIT_COUNT => Some(&hit_counts),
            PRIMARY_COUNT => Some(&primary_counts),
            _ => None,
        };
        match derived {
            Some(counts) => {
                warn_on_count_mismatch(name, &data, counts);
                fields.push(Column::new(name.clone(), ColumnData::Int(counts.clone())));
            }
            None => fields.push(Column::new(name.clone(), data)),
        }
    }

    for (name, counts) in [(HIT_COUNT, hit_counts), (PRIMARY_COUNT, primary_counts)] {
        if !names.iter().any(|n| n == name) {
            fields.push(Column::new(name, ColumnData::Int(counts)));
        }
    }
    Ok(fields)
}

fn warn_on_count_mismatch(name: &str, stored: &ColumnData, derived: &[i64]) {
    let mismatches = derived
        .iter()
        .enumerate()
        .filter(|&(i, &d)| stored.get_f64(i) != Some(d as f64))
        .count();
    if mismatches > 0 {
        tracing::warn!(
            branch = name,
            mismatches,
            "stored counts disagree with realized list lengths; using realized lengths"
        );
    }
}
