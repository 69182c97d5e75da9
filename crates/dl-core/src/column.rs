//! Typed column containers shared by the reader, builder, and flattener.

use std::ops::Range;

use crate::error::{Error, Result};

/// Logical element type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Floating point values, widened to `f64`.
    Float,
    /// Integer and boolean values, widened to `i64`.
    Int,
}

/// Owned, typed values of one column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    /// `f64` values.
    Float(Vec<f64>),
    /// `i64` values.
    Int(Vec<i64>),
}

impl ColumnData {
    /// Number of values.
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Float(v) => v.len(),
            ColumnData::Int(v) => v.len(),
        }
    }

    /// Whether the column holds no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element type.
    pub fn column_type(&self) -> ColumnType {
        match self {
            ColumnData::Float(_) => ColumnType::Float,
            ColumnData::Int(_) => ColumnType::Int,
        }
    }

    /// Float values, if this is a float column.
    pub fn as_float(&self) -> Option<&[f64]> {
        match self {
            ColumnData::Float(v) => Some(v),
            ColumnData::Int(_) => None,
        }
    }

    /// Integer values, if this is an integer column.
    pub fn as_int(&self) -> Option<&[i64]> {
        match self {
            ColumnData::Int(v) => Some(v),
            ColumnData::Float(_) => None,
        }
    }

    /// Value at `index` converted to `f64`.
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        match self {
            ColumnData::Float(v) => v.get(index).copied(),
            ColumnData::Int(v) => v.get(index).map(|&x| x as f64),
        }
    }

    /// Borrow a sub-range of the values.
    pub fn slice(&self, range: Range<usize>) -> Option<ColumnSlice<'_>> {
        match self {
            ColumnData::Float(v) => v.get(range).map(ColumnSlice::Float),
            ColumnData::Int(v) => v.get(range).map(ColumnSlice::Int),
        }
    }

    /// Borrow all values.
    pub fn as_slice(&self) -> ColumnSlice<'_> {
        match self {
            ColumnData::Float(v) => ColumnSlice::Float(v),
            ColumnData::Int(v) => ColumnSlice::Int(v),
        }
    }
}

/// Borrowed view of a run of column values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnSlice<'a> {
    /// `f64` values.
    Float(&'a [f64]),
    /// `i64` values.
    Int(&'a [i64]),
}

impl<'a> ColumnSlice<'a> {
    /// Number of values.
    pub fn len(&self) -> usize {
        match self {
            ColumnSlice::Float(v) => v.len(),
            ColumnSlice::Int(v) => v.len(),
        }
    }

    /// Whether the slice is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at `index` converted to `f64`.
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        match self {
            ColumnSlice::Float(v) => v.get(index).copied(),
            ColumnSlice::Int(v) => v.get(index).map(|&x| x as f64),
        }
    }

    /// Integer values, if this is an integer slice.
    pub fn as_int(&self) -> Option<&'a [i64]> {
        match self {
            ColumnSlice::Int(v) => Some(v),
            ColumnSlice::Float(_) => None,
        }
    }

    /// Float values, if this is a float slice.
    pub fn as_float(&self) -> Option<&'a [f64]> {
        match self {
            ColumnSlice::Float(v) => Some(v),
            ColumnSlice::Int(_) => None,
        }
    }
}

/// A named column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Branch (or field) name.
    pub name: String,
    /// Values.
    pub data: ColumnData,
}

impl Column {
    /// Create a named column.
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Self { name: name.into(), data }
    }
}

/// A jagged (variable-length) column: flat values + per-entry offsets.
///
/// `offsets` has length `n_entries + 1`. Entry `i` has values
/// `values[offsets[i]..offsets[i+1]]`.
#[derive(Debug, Clone, PartialEq)]
pub struct JaggedColumn {
    /// Flat array of all values across all entries.
    pub values: ColumnData,
    /// Entry boundaries: `offsets.len() == n_entries + 1`.
    pub offsets: Vec<usize>,
}

impl JaggedColumn {
    /// Create a jagged column, checking that the offsets describe `values`.
    pub fn new(values: ColumnData, offsets: Vec<usize>) -> Result<Self> {
        check_offsets(&offsets, values.len()).map_err(Error::ShapeMismatch)?;
        Ok(Self { values, offsets })
    }

    /// Build from per-entry float lists.
    pub fn from_f64_lists(lists: &[Vec<f64>]) -> Self {
        let offsets = offsets_from_lengths(lists.iter().map(Vec::len));
        Self { values: ColumnData::Float(lists.concat()), offsets }
    }

    /// Build from per-entry integer lists.
    pub fn from_i64_lists(lists: &[Vec<i64>]) -> Self {
        let offsets = offsets_from_lengths(lists.iter().map(Vec::len));
        Self { values: ColumnData::Int(lists.concat()), offsets }
    }

    /// Number of entries.
    pub fn n_entries(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    /// Value range of entry `row`.
    pub fn range(&self, row: usize) -> Option<Range<usize>> {
        let start = *self.offsets.get(row)?;
        let end = *self.offsets.get(row + 1)?;
        Some(start..end)
    }

    /// Per-entry lengths.
    pub fn lengths(&self) -> Vec<usize> {
        self.offsets.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

/// Decoded content of one branch.
#[derive(Debug, Clone, PartialEq)]
pub enum RawColumn {
    /// One value per entry.
    Scalar(ColumnData),
    /// A variable number of values per entry.
    Jagged(JaggedColumn),
}

impl RawColumn {
    /// Number of entries covered by this column.
    pub fn n_entries(&self) -> usize {
        match self {
            RawColumn::Scalar(data) => data.len(),
            RawColumn::Jagged(j) => j.n_entries(),
        }
    }

    /// Whether this is a jagged column.
    pub fn is_jagged(&self) -> bool {
        matches!(self, RawColumn::Jagged(_))
    }
}

/// Cumulative offsets (`[0, l0, l0+l1, ...]`) from per-entry lengths.
pub fn offsets_from_lengths(lengths: impl IntoIterator<Item = usize>) -> Vec<usize> {
    let iter = lengths.into_iter();
    let mut offsets = Vec::with_capacity(iter.size_hint().0 + 1);
    offsets.push(0);
    let mut total = 0usize;
    for len in iter {
        total += len;
        offsets.push(total);
    }
    offsets
}

/// Check that `offsets` starts at 0, is non-decreasing, and ends at `n_values`.
///
/// Returns a description of the first violation.
pub fn check_offsets(offsets: &[usize], n_values: usize) -> std::result::Result<(), String> {
    match offsets.first() {
        None => return Err("offsets are empty (expected at least [0])".into()),
        Some(&first) if first != 0 => {
            return Err(format!("offsets start at {first}, expected 0"));
        }
        Some(_) => {}
    }
    if let Some(i) = offsets.windows(2).position(|w| w[1] < w[0]) {
        return Err(format!("offsets decrease at entry {i}"));
    }
    let last = offsets[offsets.len() - 1];
    if last != n_values {
        return Err(format!("offsets end at {last} but {n_values} values are present"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jagged_from_lists() {
        let j = JaggedColumn::from_f64_lists(&[vec![1.0, 2.0], vec![], vec![3.0, 4.0, 5.0]]);
        assert_eq!(j.offsets, vec![0, 2, 2, 5]);
        assert_eq!(j.n_entries(), 3);
        assert_eq!(j.lengths(), vec![2, 0, 3]);
        assert_eq!(j.range(2), Some(2..5));
        assert_eq!(j.range(3), None);
    }

    #[test]
    fn jagged_new_rejects_bad_offsets() {
        let values = ColumnData::Int(vec![1, 2, 3]);
        assert!(JaggedColumn::new(values.clone(), vec![0, 1, 3]).is_ok());
        assert!(matches!(
            JaggedColumn::new(values.clone(), vec![0, 2, 1, 3]),
            Err(Error::ShapeMismatch(_))
        ));
        assert!(matches!(JaggedColumn::new(values.clone(), vec![0, 2]), Err(Error::ShapeMismatch(_))));
        assert!(matches!(JaggedColumn::new(values, vec![1, 3]), Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn empty_offsets_rejected() {
        assert!(check_offsets(&[], 0).is_err());
        assert!(check_offsets(&[0], 0).is_ok());
    }

    #[test]
    fn slices_and_conversions() {
        let c = ColumnData::Int(vec![11, 22, 2212]);
        assert_eq!(c.get_f64(2), Some(2212.0));
        assert_eq!(c.slice(1..3), Some(ColumnSlice::Int(&[22, 2212])));
        assert!(c.slice(2..5).is_none());
        assert!(c.as_float().is_none());
        assert_eq!(c.column_type(), ColumnType::Int);
    }
}
