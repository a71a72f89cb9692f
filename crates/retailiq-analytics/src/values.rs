//! Typed column extraction from warehouse batches

use arrow::array::{AsArray, RecordBatch};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, Int64Type};

use crate::error::{AnalyticsError, Result};

fn column(batch: &RecordBatch, table: &str, name: &str) -> Result<arrow::array::ArrayRef> {
    batch.column_by_name(name).cloned().ok_or_else(|| {
        let schema = batch.schema();
        let available: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        AnalyticsError::missing_column(table, name, &available)
    })
}

pub(crate) fn f64_values(batch: &RecordBatch, table: &str, name: &str) -> Result<Vec<Option<f64>>> {
    let array = cast(&column(batch, table, name)?, &DataType::Float64)?;
    Ok(array.as_primitive::<Float64Type>().iter().collect())
}

pub(crate) fn i64_values(batch: &RecordBatch, table: &str, name: &str) -> Result<Vec<Option<i64>>> {
    let array = cast(&column(batch, table, name)?, &DataType::Int64)?;
    Ok(array.as_primitive::<Int64Type>().iter().collect())
}

pub(crate) fn string_values(
    batch: &RecordBatch,
    table: &str,
    name: &str,
) -> Result<Vec<Option<String>>> {
    let array = cast(&column(batch, table, name)?, &DataType::Utf8)?;
    Ok(array
        .as_string::<i32>()
        .iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

/// Round to two decimal places
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub(crate) fn mean(sum: f64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Percent change from `previous` to `current`; undefined from zero
pub(crate) fn pct_change(previous: f64, current: f64) -> Option<f64> {
    if previous == 0.0 {
        None
    } else {
        Some((current - previous) / previous * 100.0)
    }
}
