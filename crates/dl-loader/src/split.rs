//! Three parallel views over one [`EventTree`]: events, hits, primaries.
//!
//! The views borrow the tree; nothing is copied. They share the event index
//! and hit/primary offsets, so event `i` of every view refers to the same
//! simulated event.

use dl_core::{Column, ColumnData, ColumnSlice, Result};

use crate::event_tree::{Collection, EventTree, HIT_COUNT, PRIMARY_COUNT};

/// One row per event: scalar fields including the derived counts.
#[derive(Debug, Clone, Copy)]
pub struct EventRecords<'a> {
    fields: &'a [Column],
    n_events: usize,
}

impl<'a> EventRecords<'a> {
    /// Number of events.
    pub fn len(&self) -> usize {
        self.n_events
    }

    /// Whether there are no events.
    pub fn is_empty(&self) -> bool {
        self.n_events == 0
    }

    /// Field names in tree order.
    pub fn field_names(&self) -> Vec<&'a str> {
        self.fields.iter().map(|c| c.name.as_str()).collect()
    }

    /// All values of one field.
    pub fn field(&self, name: &str) -> Option<&'a ColumnData> {
        self.fields.iter().find(|c| c.name == name).map(|c| &c.data)
    }

    /// Hit count per event.
    pub fn hit_counts(&self) -> Option<&'a [i64]> {
        self.field(HIT_COUNT).and_then(ColumnData::as_int)
    }

    /// Primary count per event.
    pub fn primary_counts(&self) -> Option<&'a [i64]> {
        self.field(PRIMARY_COUNT).and_then(ColumnData::as_int)
    }
}

/// Variable-length records grouped by event.
#[derive(Debug, Clone, Copy)]
pub struct NestedRecords<'a> {
    collection: &'a Collection,
}

/// Per-event hit lists.
pub type HitRecords<'a> = NestedRecords<'a>;

/// Per-event primary lists.
pub type PrimaryRecords<'a> = NestedRecords<'a>;

impl<'a> NestedRecords<'a> {
    /// Number of events (outer length).
    pub fn len(&self) -> usize {
        self.collection.n_events()
    }

    /// Whether there are no events.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total records across all events.
    pub fn total(&self) -> usize {
        self.collection.len()
    }

    /// Field names in configured order.
    pub fn field_names(&self) -> Vec<&'a str> {
        self.collection.field_names()
    }

    /// Flat values of one field across all events.
    pub fn field(&self, name: &str) -> Option<&'a ColumnData> {
        self.collection.field(name)
    }

    /// Values of `field` belonging to `event`.
    pub fn values(&self, field: &str, event: usize) -> Option<ColumnSlice<'a>> {
        self.collection.values(field, event)
    }

    /// Number of records in `event`.
    pub fn len_of(&self, event: usize) -> Option<usize> {
        self.collection.len_of(event)
    }

    /// Shared offsets (`len() + 1` values).
    pub fn offsets(&self) -> &'a [usize] {
        self.collection.offsets()
    }
}

/// Split a built tree into event, hit, and primary views.
///
/// The tree is validated first; a malformed tree is reported as
/// [`dl_core::Error::InvalidStructure`].
pub fn get_awkward_arrays(
    tree: &EventTree,
) -> Result<(EventRecords<'_>, HitRecords<'_>, PrimaryRecords<'_>)> {
    tree.validate()?;
    let events = EventRecords { fields: tree.event_fields(), n_events: tree.n_events() };
    let hits = NestedRecords { collection: tree.hits() };
    let primaries = NestedRecords { collection: tree.primaries() };
    Ok((events, hits, primaries))
}
