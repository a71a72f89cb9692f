//! Table declarations: partition layout and partition column types
//!
//! A declaration is supplied once when the warehouse is opened (or a table is
//! written) and is the single source of truth for how a table is laid out on
//! disk and how path-decoded partition values are typed.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WarehouseError};

/// Logical type of a partition column.
///
/// Partition values live in directory names, so only scalar types with a
/// lossless string form are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PartitionType {
    #[default]
    Utf8,
    Int64,
    Float64,
}

impl PartitionType {
    pub fn arrow_type(&self) -> DataType {
        match self {
            PartitionType::Utf8 => DataType::Utf8,
            PartitionType::Int64 => DataType::Int64,
            PartitionType::Float64 => DataType::Float64,
        }
    }
}

impl fmt::Display for PartitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionType::Utf8 => write!(f, "utf8"),
            PartitionType::Int64 => write!(f, "int64"),
            PartitionType::Float64 => write!(f, "float64"),
        }
    }
}

impl std::str::FromStr for PartitionType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "utf8" | "string" | "str" => Ok(PartitionType::Utf8),
            "int64" | "int" | "integer" => Ok(PartitionType::Int64),
            "float64" | "float" | "double" => Ok(PartitionType::Float64),
            _ => Err(format!(
                "Unsupported partition type: {}. Supported: utf8, int64, float64",
                s
            )),
        }
    }
}

/// One partition column: name plus declared type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionColumn {
    pub name: String,
    #[serde(default, rename = "type")]
    pub data_type: PartitionType,
}

impl PartitionColumn {
    pub fn new(name: impl Into<String>, data_type: PartitionType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }

    pub fn utf8(name: impl Into<String>) -> Self {
        Self::new(name, PartitionType::Utf8)
    }

    pub fn int64(name: impl Into<String>) -> Self {
        Self::new(name, PartitionType::Int64)
    }

    pub fn field(&self) -> Field {
        Field::new(&self.name, self.data_type.arrow_type(), true)
    }
}

/// Declared layout of a warehouse table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDeclaration {
    pub name: String,
    /// Ordered; path segments are concatenated in this order
    #[serde(default)]
    pub partition_columns: Vec<PartitionColumn>,
}

impl TableDeclaration {
    pub fn new(name: impl Into<String>, partition_columns: Vec<PartitionColumn>) -> Self {
        Self {
            name: name.into(),
            partition_columns,
        }
    }

    pub fn unpartitioned(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    pub fn is_partitioned(&self) -> bool {
        !self.partition_columns.is_empty()
    }

    pub fn partition_column_names(&self) -> Vec<String> {
        self.partition_columns
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn partition_column(&self, name: &str) -> Option<&PartitionColumn> {
        self.partition_columns.iter().find(|c| c.name == name)
    }

    /// Check that the table and column names are usable as directory names
    pub fn validate(&self) -> Result<()> {
        if !is_safe_identifier(&self.name) || self.name.starts_with(['.', '_']) {
            return Err(WarehouseError::invalid_declaration(
                &self.name,
                "table name must be non-empty, must not start with '.' or '_' and must not contain '/', '\\' or '='",
            ));
        }

        let mut seen = HashSet::new();
        for column in &self.partition_columns {
            if !is_safe_identifier(&column.name) {
                return Err(WarehouseError::invalid_declaration(
                    &self.name,
                    format!("partition column name {:?} is not path-safe", column.name),
                ));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(WarehouseError::invalid_declaration(
                    &self.name,
                    format!("duplicate partition column '{}'", column.name),
                ));
            }
        }

        Ok(())
    }
}

fn is_safe_identifier(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '='])
        && !name.chars().any(char::is_whitespace)
}

/// Name and arrow type of one stored payload column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
}

impl ColumnSchema {
    pub fn from_field(field: &Field) -> Self {
        Self {
            name: field.name().clone(),
            data_type: field.data_type().to_string(),
        }
    }
}

/// Stamp an arrow schema into its metastore form
pub fn stamp_schema(schema: &Schema) -> Vec<ColumnSchema> {
    schema
        .fields()
        .iter()
        .map(|f| ColumnSchema::from_field(f))
        .collect()
}

/// Rebuild an arrow schema from stamped columns.
///
/// Returns `None` when any recorded type cannot be parsed back.
pub fn schema_from_columns(columns: &[ColumnSchema]) -> Option<SchemaRef> {
    let fields = columns
        .iter()
        .map(|c| {
            c.data_type
                .parse::<DataType>()
                .ok()
                .map(|dt| Field::new(&c.name, dt, true))
        })
        .collect::<Option<Vec<_>>>()?;
    Some(Arc::new(Schema::new(fields)))
}

/// Layout of the six tables of the retail star schema
pub fn retail_tables() -> Vec<TableDeclaration> {
    vec![
        TableDeclaration::new("dim_customer", vec![PartitionColumn::utf8("region")]),
        TableDeclaration::new("dim_product", vec![PartitionColumn::utf8("category")]),
        TableDeclaration::unpartitioned("dim_location"),
        TableDeclaration::new("dim_date", vec![PartitionColumn::int64("year")]),
        TableDeclaration::new(
            "fact_sales",
            vec![
                PartitionColumn::int64("order_year"),
                PartitionColumn::int64("order_month"),
            ],
        ),
        TableDeclaration::new(
            "fact_shipments",
            vec![
                PartitionColumn::int64("ship_year"),
                PartitionColumn::int64("ship_month"),
            ],
        ),
    ]
}
