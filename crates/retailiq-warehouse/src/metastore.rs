//! JSON sidecar metastore
//!
//! Every table directory carries a `_METADATA.json` describing its partition
//! columns, the partition value combinations that were materialized, the row
//! count and the stored payload schema. Entries are rewritten wholesale on
//! every table write and loaded once when a [`crate::Warehouse`] is opened.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::codec::PartitionValue;
use crate::error::{Result, WarehouseError};
use crate::schema::{ColumnSchema, PartitionType};

/// Sidecar file name inside each table directory
pub const METADATA_FILE: &str = "_METADATA.json";

/// How to treat a sidecar that exists but cannot be parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetastorePolicy {
    /// Fail the load with `MetastoreCorrupt`
    #[default]
    Strict,
    /// Leave the table out of the snapshot and log a warning
    Lenient,
}

impl std::fmt::Display for MetastorePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetastorePolicy::Strict => write!(f, "strict"),
            MetastorePolicy::Lenient => write!(f, "lenient"),
        }
    }
}

impl std::str::FromStr for MetastorePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" | "fail" => Ok(MetastorePolicy::Strict),
            "lenient" | "skip" => Ok(MetastorePolicy::Lenient),
            _ => Err(format!(
                "Unsupported metastore policy: {}. Supported: strict, lenient",
                s
            )),
        }
    }
}

/// One data file recorded at write time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFileEntry {
    /// Path relative to the table directory, `/`-separated
    pub path: String,
    pub row_count: u64,
    pub size_bytes: u64,
    pub blake3: String,
}

/// Metastore entry for one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTableMetadata")]
pub struct TableMetadata {
    pub table_name: String,
    pub partition_columns: Vec<String>,
    pub partition_types: BTreeMap<String, PartitionType>,
    /// Materialized value tuples, ordered like `partition_columns`
    pub partitions: Vec<Vec<PartitionValue>>,
    pub created_date: String,
    pub record_count: u64,
    /// Zero for sidecars that predate schema stamping
    pub schema_version: u32,
    pub columns: Vec<ColumnSchema>,
    pub files: Vec<DataFileEntry>,
}

impl TableMetadata {
    pub fn is_partitioned(&self) -> bool {
        !self.partition_columns.is_empty()
    }

    pub fn partition_type(&self, column: &str) -> Option<PartitionType> {
        self.partition_types.get(column).copied()
    }
}

/// Accepts both the current layout and older single-column sidecars
/// (`partition_column` / `partitioned`, scalar or record partitions).
#[derive(Debug, Deserialize)]
struct RawTableMetadata {
    table_name: String,
    #[serde(default)]
    partition_columns: Option<Vec<String>>,
    #[serde(default)]
    partition_column: Option<String>,
    #[serde(default)]
    partitioned: Option<bool>,
    #[serde(default)]
    partition_types: BTreeMap<String, PartitionType>,
    #[serde(default)]
    partitions: Vec<Value>,
    #[serde(default)]
    created_date: Option<String>,
    record_count: u64,
    #[serde(default)]
    schema_version: u32,
    #[serde(default)]
    columns: Vec<ColumnSchema>,
    #[serde(default)]
    files: Vec<DataFileEntry>,
}

impl TryFrom<RawTableMetadata> for TableMetadata {
    type Error = String;

    fn try_from(raw: RawTableMetadata) -> std::result::Result<Self, Self::Error> {
        let partition_columns = match (raw.partition_columns, raw.partition_column) {
            (Some(columns), _) => columns,
            // Legacy sidecars name the source column ("Region") while the
            // directories use the lowercased name ("region=East")
            (None, Some(column)) => vec![column.to_lowercase()],
            (None, None) => {
                if raw.partitioned == Some(true) {
                    return Err("partitioned table without partition columns".to_string());
                }
                Vec::new()
            }
        };

        let partitions = raw
            .partitions
            .into_iter()
            .map(|value| normalize_partition(value, &partition_columns))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(TableMetadata {
            table_name: raw.table_name,
            partition_columns,
            partition_types: raw.partition_types,
            partitions,
            created_date: raw.created_date.unwrap_or_default(),
            record_count: raw.record_count,
            schema_version: raw.schema_version,
            columns: raw.columns,
            files: raw.files,
        })
    }
}

fn normalize_partition(
    value: Value,
    columns: &[String],
) -> std::result::Result<Vec<PartitionValue>, String> {
    let tuple = match value {
        Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value::<PartitionValue>)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| e.to_string())?,
        Value::Object(mut record) => columns
            .iter()
            .map(|column| {
                let item = record.remove(column).unwrap_or(Value::Null);
                serde_json::from_value::<PartitionValue>(item).map_err(|e| e.to_string())
            })
            .collect::<std::result::Result<Vec<_>, _>>()?,
        scalar => vec![serde_json::from_value::<PartitionValue>(scalar).map_err(|e| e.to_string())?],
    };

    if tuple.len() != columns.len() {
        return Err(format!(
            "partition tuple has {} values but table has {} partition columns",
            tuple.len(),
            columns.len()
        ));
    }
    Ok(tuple)
}

/// Path of the sidecar for a table directory
pub fn metadata_path(table_dir: &Path) -> PathBuf {
    table_dir.join(METADATA_FILE)
}

/// Serialize `metadata` into `table_dir`, replacing any previous entry
pub fn write(table_dir: &Path, metadata: &TableMetadata) -> Result<()> {
    let path = metadata_path(table_dir);
    let json = serde_json::to_string_pretty(metadata).map_err(|e| {
        WarehouseError::write_failure(&metadata.table_name, format!("serialize metadata: {}", e))
    })?;
    fs::write(&path, json).map_err(|e| WarehouseError::io(&path, e))?;
    debug!("Wrote metastore entry {}", path.display());
    Ok(())
}

/// Read the sidecar of one table directory.
///
/// Returns `Ok(None)` when the directory has no sidecar.
pub fn read(table_dir: &Path) -> Result<Option<TableMetadata>> {
    let path = metadata_path(table_dir);
    let table = table_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(WarehouseError::io(&path, e)),
    };

    serde_json::from_str::<TableMetadata>(&content)
        .map(Some)
        .map_err(|e| WarehouseError::metastore_corrupt(table, &path, e.to_string()))
}

/// Scan `<root>/*/_METADATA.json` into a table name → metadata map.
///
/// Directories without a sidecar are not tables. Hidden and `_`-prefixed
/// directories (staging areas) are skipped. Corrupt sidecars are handled
/// according to `policy`.
pub fn load_all(root: &Path, policy: MetastorePolicy) -> Result<BTreeMap<String, TableMetadata>> {
    let mut tables = BTreeMap::new();

    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Warehouse root {} does not exist yet", root.display());
            return Ok(tables);
        }
        Err(e) => return Err(WarehouseError::io(root, e)),
    };

    for entry in entries {
        let entry = entry.map_err(|e| WarehouseError::io(root, e))?;
        let table_dir = entry.path();
        if !table_dir.is_dir() {
            continue;
        }

        let dir_name = entry.file_name().to_string_lossy().into_owned();
        if dir_name.starts_with(['.', '_']) {
            continue;
        }

        match read(&table_dir) {
            Ok(Some(mut metadata)) => {
                if metadata.table_name != dir_name {
                    warn!(
                        "Sidecar in '{}' names table '{}'; using the directory name",
                        dir_name, metadata.table_name
                    );
                    metadata.table_name = dir_name.clone();
                }
                debug!("Loaded table: {}", dir_name);
                tables.insert(dir_name, metadata);
            }
            Ok(None) => {
                debug!("Skipping '{}': no {}", dir_name, METADATA_FILE);
            }
            Err(err @ WarehouseError::MetastoreCorrupt { .. }) => match policy {
                MetastorePolicy::Strict => return Err(err),
                MetastorePolicy::Lenient => {
                    warn!(
                        table = %dir_name,
                        error = %err,
                        "Skipping table with unreadable metastore entry"
                    );
                }
            },
            Err(err) => return Err(err),
        }
    }

    info!(
        "Loaded metastore from {} ({} tables)",
        root.display(),
        tables.len()
    );
    Ok(tables)
}
