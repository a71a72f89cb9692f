//! Partition path codec
//!
//! Maps an ordered list of `(column, value)` pairs to Hive-style directory
//! segments and back:
//! `{table_root}/{col1}={val1}/{col2}={val2}/data.parquet`
//!
//! Values for columns ending in `_month` are zero-padded to two digits so that
//! directory listing order matches chronological order, and so that `1` and
//! `01` land in the same directory.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WarehouseError};
use crate::schema::PartitionType;

/// Directory name used for a null partition value (Hive convention)
pub const HIVE_DEFAULT_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

const MONTH_SUFFIX: &str = "_month";

/// A scalar partition value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PartitionValue {
    Null,
    Int(i64),
    Float(f64),
    Str(String),
}

impl PartitionValue {
    /// Coerce a query literal: integer, then float, then quote-trimmed string.
    pub fn parse_literal(literal: &str) -> Self {
        let trimmed = literal.trim().trim_matches(|c| c == '\'' || c == '"');

        if let Ok(i) = trimmed.parse::<i64>() {
            return PartitionValue::Int(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            return PartitionValue::Float(f);
        }
        PartitionValue::Str(trimmed.to_string())
    }

    /// Type a raw path-decoded string using the column's declared type
    pub fn cast(column: &str, raw: &str, data_type: PartitionType) -> Result<Self> {
        if raw == HIVE_DEFAULT_PARTITION {
            return Ok(PartitionValue::Null);
        }

        match data_type {
            PartitionType::Utf8 => Ok(PartitionValue::Str(raw.to_string())),
            PartitionType::Int64 => raw.parse::<i64>().map(PartitionValue::Int).map_err(|e| {
                WarehouseError::invalid_partition_value(column, raw, format!("not an int64: {}", e))
            }),
            PartitionType::Float64 => {
                raw.parse::<f64>()
                    .map(PartitionValue::Float)
                    .map_err(|e| {
                        WarehouseError::invalid_partition_value(
                            column,
                            raw,
                            format!("not a float64: {}", e),
                        )
                    })
            }
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, PartitionValue::Null)
    }
}

impl fmt::Display for PartitionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionValue::Null => write!(f, "{}", HIVE_DEFAULT_PARTITION),
            PartitionValue::Int(i) => write!(f, "{}", i),
            PartitionValue::Float(v) => write!(f, "{}", v),
            PartitionValue::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for PartitionValue {
    fn from(value: i64) -> Self {
        PartitionValue::Int(value)
    }
}

impl From<i32> for PartitionValue {
    fn from(value: i32) -> Self {
        PartitionValue::Int(i64::from(value))
    }
}

impl From<f64> for PartitionValue {
    fn from(value: f64) -> Self {
        PartitionValue::Float(value)
    }
}

impl From<&str> for PartitionValue {
    fn from(value: &str) -> Self {
        PartitionValue::Str(value.to_string())
    }
}

impl From<String> for PartitionValue {
    fn from(value: String) -> Self {
        PartitionValue::Str(value)
    }
}

/// Render the value for `column` as it appears in a directory name
pub fn render_value(column: &str, value: &PartitionValue) -> Result<String> {
    let rendered = value.to_string();

    if value.is_null() {
        return Ok(rendered);
    }

    if rendered.is_empty() {
        return Err(WarehouseError::invalid_partition_value(
            column,
            rendered,
            "empty values cannot be encoded as a directory name",
        ));
    }
    if rendered == "." || rendered == ".." {
        return Err(WarehouseError::invalid_partition_value(
            column,
            rendered,
            "relative path components are not allowed",
        ));
    }
    if rendered.contains(['/', '\\']) {
        return Err(WarehouseError::invalid_partition_value(
            column,
            rendered,
            "value contains a path separator",
        ));
    }
    if rendered == HIVE_DEFAULT_PARTITION {
        return Err(WarehouseError::invalid_partition_value(
            column,
            rendered,
            "value is reserved for null partitions",
        ));
    }
    if rendered.contains('=') {
        return Err(WarehouseError::invalid_partition_value(
            column,
            rendered,
            "value contains '='",
        ));
    }

    if column.ends_with(MONTH_SUFFIX) {
        if let Ok(month) = rendered.parse::<u32>() {
            return Ok(format!("{:02}", month));
        }
    }

    Ok(rendered)
}

/// Encode one `column=value` directory segment
pub fn encode_segment(column: &str, value: &PartitionValue) -> Result<String> {
    Ok(format!("{}={}", column, render_value(column, value)?))
}

/// Append one segment per `(column, value)` pair, in order, to `table_root`
pub fn encode<S: AsRef<str>>(table_root: &Path, pairs: &[(S, PartitionValue)]) -> Result<PathBuf> {
    let mut path = table_root.to_path_buf();
    for (column, value) in pairs {
        path.push(encode_segment(column.as_ref(), value)?);
    }
    Ok(path)
}

/// Decode every `name=value` component of `path`.
///
/// Components without `=` are ignored, so callers should pass a path relative
/// to the table root when the warehouse root itself may contain `=`.
pub fn decode(path: &Path) -> BTreeMap<String, String> {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .filter_map(|part| part.split_once('='))
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}
