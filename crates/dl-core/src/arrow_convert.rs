//! Arrow array ↔ typed column conversion.
//!
//! Decoding widens every supported physical type to the two logical column
//! types: floats to `f64`, integers and booleans to `i64`. `List` and
//! `LargeList` arrays decode to [`JaggedColumn`]s. Null values are rejected:
//! detector trees have no notion of a missing value.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, ArrowPrimitiveType, AsArray, Float64Array, GenericListArray, Int64Array,
    LargeListArray, OffsetSizeTrait,
};
use arrow::buffer::{OffsetBuffer, ScalarBuffer};
use arrow::datatypes::{
    DataType, Field, Float16Type, Float32Type, Float64Type, Int8Type, Int16Type, Int32Type,
    Int64Type, UInt8Type, UInt16Type, UInt32Type, UInt64Type,
};

use crate::column::{ColumnData, JaggedColumn, RawColumn, check_offsets};
use crate::error::{Error, Result};

impl ColumnData {
    /// Arrow data type used when encoding this column.
    pub fn data_type(&self) -> DataType {
        match self {
            ColumnData::Float(_) => DataType::Float64,
            ColumnData::Int(_) => DataType::Int64,
        }
    }

    /// Encode as an Arrow array (copies the values).
    pub fn to_array(&self) -> ArrayRef {
        match self {
            ColumnData::Float(v) => Arc::new(Float64Array::from(v.clone())),
            ColumnData::Int(v) => Arc::new(Int64Array::from(v.clone())),
        }
    }
}

impl JaggedColumn {
    /// Encode as an Arrow `LargeList` array.
    ///
    /// Fails with [`Error::ShapeMismatch`] when the offsets do not describe
    /// the values (the fields are public, so nothing else guarantees it).
    pub fn to_array(&self) -> Result<ArrayRef> {
        check_offsets(&self.offsets, self.values.len()).map_err(Error::ShapeMismatch)?;
        let offsets: Vec<i64> = self
            .offsets
            .iter()
            .map(|&o| {
                i64::try_from(o)
                    .map_err(|_| Error::ShapeMismatch(format!("offset {o} exceeds i64 range")))
            })
            .collect::<Result<_>>()?;
        let item = Arc::new(Field::new("item", self.values.data_type(), false));
        let list = LargeListArray::try_new(
            item,
            OffsetBuffer::new(ScalarBuffer::from(offsets)),
            self.values.to_array(),
            None,
        )?;
        Ok(Arc::new(list))
    }
}

/// Decode a flat (non-list) Arrow array into typed values.
pub fn decode_values(name: &str, array: &dyn Array) -> Result<ColumnData> {
    if array.null_count() > 0 {
        return Err(Error::Decode(format!(
            "column '{name}' contains {} null values",
            array.null_count()
        )));
    }
    let data = match array.data_type() {
        DataType::Float64 => ColumnData::Float(array.as_primitive::<Float64Type>().values().to_vec()),
        DataType::Float32 => ColumnData::Float(
            array.as_primitive::<Float32Type>().values().iter().map(|&v| f64::from(v)).collect(),
        ),
        DataType::Float16 => ColumnData::Float(
            array.as_primitive::<Float16Type>().values().iter().map(|v| v.to_f64()).collect(),
        ),
        DataType::Int64 => ColumnData::Int(array.as_primitive::<Int64Type>().values().to_vec()),
        DataType::Int32 => widen_int::<Int32Type>(array),
        DataType::Int16 => widen_int::<Int16Type>(array),
        DataType::Int8 => widen_int::<Int8Type>(array),
        DataType::UInt32 => widen_int::<UInt32Type>(array),
        DataType::UInt16 => widen_int::<UInt16Type>(array),
        DataType::UInt8 => widen_int::<UInt8Type>(array),
        DataType::UInt64 => {
            let values = array.as_primitive::<UInt64Type>().values();
            let mut out = Vec::with_capacity(values.len());
            for &v in values.iter() {
                out.push(i64::try_from(v).map_err(|_| {
                    Error::Decode(format!("column '{name}': value {v} does not fit in i64"))
                })?);
            }
            ColumnData::Int(out)
        }
        DataType::Boolean => {
            ColumnData::Int(array.as_boolean().values().iter().map(i64::from).collect())
        }
        other => {
            return Err(Error::Decode(format!("column '{name}' has unsupported type {other:?}")));
        }
    };
    Ok(data)
}

/// Decode an Arrow array into a scalar or jagged column.
pub fn decode_column(name: &str, array: &dyn Array) -> Result<RawColumn> {
    match array.data_type() {
        DataType::List(_) => decode_list(name, array.as_list::<i32>()),
        DataType::LargeList(_) => decode_list(name, array.as_list::<i64>()),
        _ => decode_values(name, array).map(RawColumn::Scalar),
    }
}

fn decode_list<O: OffsetSizeTrait>(name: &str, list: &GenericListArray<O>) -> Result<RawColumn> {
    if list.null_count() > 0 {
        return Err(Error::Decode(format!(
            "column '{name}' contains {} null lists",
            list.null_count()
        )));
    }
    let raw_offsets = list.value_offsets();
    let first = raw_offsets.first().map(|o| o.as_usize()).unwrap_or(0);
    let last = raw_offsets.last().map(|o| o.as_usize()).unwrap_or(0);
    // Sliced list arrays share a larger child buffer; only the covered range belongs to us.
    let child = list.values().slice(first, last - first);
    let values = decode_values(name, child.as_ref())?;
    let offsets = raw_offsets.iter().map(|o| o.as_usize() - first).collect();
    Ok(RawColumn::Jagged(JaggedColumn { values, offsets }))
}

fn widen_int<T>(array: &dyn Array) -> ColumnData
where
    T: ArrowPrimitiveType,
    T::Native: Into<i64>,
{
    ColumnData::Int(array.as_primitive::<T>().values().iter().map(|&v| v.into()).collect())
}
