//! Partition writer
//!
//! Splits a batch by the distinct combinations of its partition column values,
//! writes one Parquet file per combination into a staging directory, stamps the
//! metastore entry and then swaps the staged tree in place of the previous one.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use arrow::array::{Array, ArrayRef, AsArray, RecordBatch, UInt32Array};
use arrow::compute::{cast_with_options, take_record_batch, CastOptions};
use arrow::datatypes::{Float64Type, Int64Type};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::codec::{self, PartitionValue};
use crate::encoding::{self, DEFAULT_ROW_GROUP_SIZE};
use crate::error::{Result, WarehouseError};
use crate::metastore::{self, DataFileEntry, TableMetadata};
use crate::schema::{stamp_schema, ColumnSchema, PartitionType, TableDeclaration};

/// File name of every data file
pub const DATA_FILE: &str = "data.parquet";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Maximum rows per Parquet row group
    pub row_group_size: usize,
    /// Accept a payload schema that differs from the stamped one and bump
    /// `schema_version` instead of failing
    pub allow_schema_change: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
            allow_schema_change: false,
        }
    }
}

/// Outcome of one table write
#[derive(Debug, Clone)]
pub struct WriteSummary {
    pub table: String,
    pub record_count: u64,
    pub partitions: usize,
    pub files: Vec<DataFileEntry>,
    pub schema_version: u32,
}

impl WriteSummary {
    pub fn bytes_written(&self) -> u64 {
        self.files.iter().map(|f| f.size_bytes).sum()
    }
}

/// One partition's rows before they are written
struct PartitionGroup {
    values: Vec<PartitionValue>,
    segments: Vec<String>,
    rows: Vec<u32>,
}

impl PartitionGroup {
    fn relative_dir(&self) -> String {
        self.segments.join("/")
    }
}

/// Writes whole tables under a warehouse root
#[derive(Debug, Clone)]
pub struct PartitionWriter {
    root: PathBuf,
    options: WriteOptions,
}

impl PartitionWriter {
    pub fn new(root: impl Into<PathBuf>, options: WriteOptions) -> Self {
        Self {
            root: root.into(),
            options,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Replace the table described by `declaration` with the rows of `batch`.
    ///
    /// The batch must carry every declared partition column. Rows are not
    /// checked for consistency between payload columns and partition values.
    pub fn write_table(
        &self,
        declaration: &TableDeclaration,
        batch: &RecordBatch,
    ) -> Result<WriteSummary> {
        declaration.validate()?;
        let table = declaration.name.as_str();
        let record_count = batch.num_rows() as u64;

        debug!(
            "Writing {} rows to table '{}' (partition columns: {:?})",
            record_count,
            table,
            declaration.partition_column_names()
        );

        let (partition_arrays, payload) = split_partition_columns(declaration, batch)?;
        let columns = stamp_schema(&payload.schema());

        let table_dir = self.root.join(table);
        let previous = match metastore::read(&table_dir) {
            Ok(previous) => previous,
            Err(err @ WarehouseError::MetastoreCorrupt { .. }) => {
                warn!(table = %table, error = %err, "Ignoring unreadable metastore entry on rewrite");
                None
            }
            Err(err) => return Err(err),
        };
        let schema_version = self.next_schema_version(declaration, previous.as_ref(), &columns)?;

        let groups = group_rows(declaration, &partition_arrays, batch.num_rows())?;

        fs::create_dir_all(&self.root).map_err(|e| WarehouseError::io(&self.root, e))?;
        let staging = self
            .root
            .join(format!(".staging-{}-{}", table, Uuid::new_v4()));

        let staged = self.stage(declaration, &staging, &payload, groups, columns, schema_version);
        let metadata = match staged {
            Ok(metadata) => metadata,
            Err(err) => {
                if let Err(cleanup) = fs::remove_dir_all(&staging) {
                    debug!("Could not remove staging directory {}: {}", staging.display(), cleanup);
                }
                return Err(err);
            }
        };

        swap_in(&self.root, table, &staging, &table_dir)?;

        let summary = WriteSummary {
            table: table.to_string(),
            record_count,
            partitions: metadata.partitions.len(),
            files: metadata.files,
            schema_version,
        };

        info!(
            "Wrote {} rows to '{}' ({} partitions, {} files, {} bytes)",
            summary.record_count,
            table,
            summary.partitions,
            summary.files.len(),
            summary.bytes_written()
        );

        Ok(summary)
    }

    fn next_schema_version(
        &self,
        declaration: &TableDeclaration,
        previous: Option<&TableMetadata>,
        columns: &[ColumnSchema],
    ) -> Result<u32> {
        let Some(previous) = previous else {
            return Ok(1);
        };

        let layout_changed = previous.partition_columns != declaration.partition_column_names();
        // Sidecars written before schema stamping adopt the incoming schema
        let payload_changed = !previous.columns.is_empty() && previous.columns != columns;

        if !layout_changed && !payload_changed {
            return Ok(previous.schema_version.max(1));
        }

        if !self.options.allow_schema_change {
            let reason = if layout_changed {
                format!(
                    "partition columns {:?} differ from stored {:?}",
                    declaration.partition_column_names(),
                    previous.partition_columns
                )
            } else {
                format!(
                    "payload columns {} differ from stored {}",
                    describe_columns(columns),
                    describe_columns(&previous.columns)
                )
            };
            return Err(WarehouseError::schema_incompatible(&declaration.name, reason));
        }

        info!(
            "Schema of '{}' changed; bumping schema_version to {}",
            declaration.name,
            previous.schema_version + 1
        );
        Ok(previous.schema_version + 1)
    }

    fn stage(
        &self,
        declaration: &TableDeclaration,
        staging: &Path,
        payload: &RecordBatch,
        mut groups: Vec<PartitionGroup>,
        columns: Vec<ColumnSchema>,
        schema_version: u32,
    ) -> Result<TableMetadata> {
        let table = declaration.name.as_str();
        fs::create_dir_all(staging).map_err(|e| WarehouseError::io(staging, e))?;

        groups.sort_by_key(|g| g.relative_dir());

        let mut files = Vec::with_capacity(groups.len());
        for group in &groups {
            let pairs: Vec<(&str, PartitionValue)> = declaration
                .partition_columns
                .iter()
                .map(|c| c.name.as_str())
                .zip(group.values.iter().cloned())
                .collect();
            let dir = codec::encode(staging, &pairs)?;
            fs::create_dir_all(&dir).map_err(|e| WarehouseError::io(&dir, e))?;

            let rows = take_rows(payload, &group.rows)?;
            let relative_dir = group.relative_dir();
            let props = encoding::writer_properties(table, &relative_dir, self.options.row_group_size);
            let encoded = encoding::encode_batch(&rows, props)?;

            let file_path = dir.join(DATA_FILE);
            fs::write(&file_path, &encoded.bytes).map_err(|e| WarehouseError::io(&file_path, e))?;

            let relative_path = if relative_dir.is_empty() {
                DATA_FILE.to_string()
            } else {
                format!("{}/{}", relative_dir, DATA_FILE)
            };
            debug!(
                "Wrote partition {} ({} rows, {} bytes)",
                relative_path,
                rows.num_rows(),
                encoded.bytes.len()
            );

            files.push(DataFileEntry {
                path: relative_path,
                row_count: rows.num_rows() as u64,
                size_bytes: encoded.bytes.len() as u64,
                blake3: encoded.blake3,
            });
        }

        let partition_types: BTreeMap<String, PartitionType> = declaration
            .partition_columns
            .iter()
            .map(|c| (c.name.clone(), c.data_type))
            .collect();

        let partitions = if declaration.is_partitioned() {
            groups.into_iter().map(|g| g.values).collect()
        } else {
            Vec::new()
        };

        let metadata = TableMetadata {
            table_name: table.to_string(),
            partition_columns: declaration.partition_column_names(),
            partition_types,
            partitions,
            created_date: chrono::Utc::now().to_rfc3339(),
            record_count: payload.num_rows() as u64,
            schema_version,
            columns,
            files,
        };
        metastore::write(staging, &metadata)?;

        Ok(metadata)
    }
}

/// Cast the declared partition columns out of `batch` and return them
/// alongside the remaining payload columns.
fn split_partition_columns(
    declaration: &TableDeclaration,
    batch: &RecordBatch,
) -> Result<(Vec<ArrayRef>, RecordBatch)> {
    let schema = batch.schema();
    let cast_options = CastOptions {
        safe: false,
        ..Default::default()
    };

    let mut partition_indices = Vec::with_capacity(declaration.partition_columns.len());
    let mut partition_arrays = Vec::with_capacity(declaration.partition_columns.len());
    for column in &declaration.partition_columns {
        let index = schema.index_of(&column.name).map_err(|_| {
            WarehouseError::write_failure(
                &declaration.name,
                format!("input has no partition column '{}'", column.name),
            )
        })?;
        let array = cast_with_options(
            batch.column(index),
            &column.data_type.arrow_type(),
            &cast_options,
        )
        .map_err(|e| {
            WarehouseError::invalid_partition_value(
                &column.name,
                batch.column(index).data_type().to_string(),
                format!("cannot cast to {}: {}", column.data_type, e),
            )
        })?;
        partition_indices.push(index);
        partition_arrays.push(array);
    }

    let payload_indices: Vec<usize> = (0..schema.fields().len())
        .filter(|i| !partition_indices.contains(i))
        .collect();
    if payload_indices.is_empty() {
        return Err(WarehouseError::write_failure(
            &declaration.name,
            "no payload columns remain after removing partition columns",
        ));
    }

    let payload = batch.project(&payload_indices)?;
    Ok((partition_arrays, payload))
}

fn group_rows(
    declaration: &TableDeclaration,
    partition_arrays: &[ArrayRef],
    num_rows: usize,
) -> Result<Vec<PartitionGroup>> {
    if !declaration.is_partitioned() {
        return Ok(vec![PartitionGroup {
            values: Vec::new(),
            segments: Vec::new(),
            rows: (0..num_rows as u32).collect(),
        }]);
    }

    let mut groups: Vec<PartitionGroup> = Vec::new();
    let mut index: HashMap<Vec<String>, usize> = HashMap::new();

    for row in 0..num_rows {
        let mut values = Vec::with_capacity(partition_arrays.len());
        let mut segments = Vec::with_capacity(partition_arrays.len());
        for (column, array) in declaration.partition_columns.iter().zip(partition_arrays) {
            let value = value_at(array, row, column.data_type);
            segments.push(codec::encode_segment(&column.name, &value)?);
            values.push(value);
        }

        match index.get(&segments) {
            Some(&slot) => groups[slot].rows.push(row as u32),
            None => {
                index.insert(segments.clone(), groups.len());
                groups.push(PartitionGroup {
                    values,
                    segments,
                    rows: vec![row as u32],
                });
            }
        }
    }

    Ok(groups)
}

fn value_at(array: &ArrayRef, row: usize, data_type: PartitionType) -> PartitionValue {
    if array.is_null(row) {
        return PartitionValue::Null;
    }
    match data_type {
        PartitionType::Utf8 => PartitionValue::Str(array.as_string::<i32>().value(row).to_string()),
        PartitionType::Int64 => PartitionValue::Int(array.as_primitive::<Int64Type>().value(row)),
        PartitionType::Float64 => {
            PartitionValue::Float(array.as_primitive::<Float64Type>().value(row))
        }
    }
}

fn take_rows(payload: &RecordBatch, rows: &[u32]) -> Result<RecordBatch> {
    if rows.len() == payload.num_rows() && rows.iter().enumerate().all(|(i, r)| i as u32 == *r) {
        return Ok(payload.clone());
    }
    let indices = UInt32Array::from(rows.to_vec());
    Ok(take_record_batch(payload, &indices)?)
}

/// Move `staging` to `table_dir`, setting any previous tree aside first
fn swap_in(root: &Path, table: &str, staging: &Path, table_dir: &Path) -> Result<()> {
    let trash = if table_dir.exists() {
        let trash = root.join(format!(".trash-{}-{}", table, Uuid::new_v4()));
        fs::rename(table_dir, &trash).map_err(|e| WarehouseError::io(table_dir, e))?;
        Some(trash)
    } else {
        None
    };

    if let Err(e) = fs::rename(staging, table_dir) {
        if let Some(trash) = &trash {
            if let Err(restore) = fs::rename(trash, table_dir) {
                warn!(
                    "Could not restore previous '{}' from {}: {}",
                    table,
                    trash.display(),
                    restore
                );
            }
        }
        if let Err(cleanup) = fs::remove_dir_all(staging) {
            debug!("Could not remove staging directory {}: {}", staging.display(), cleanup);
        }
        return Err(WarehouseError::write_failure(
            table,
            format!("could not move staged table into place: {}", e),
        ));
    }

    if let Some(trash) = trash {
        if let Err(e) = fs::remove_dir_all(&trash) {
            warn!("Could not remove previous tree {}: {}", trash.display(), e);
        }
    }
    Ok(())
}

fn describe_columns(columns: &[ColumnSchema]) -> String {
    let parts: Vec<String> = columns
        .iter()
        .map(|c| format!("{}:{}", c.name, c.data_type))
        .collect();
    format!("[{}]", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PartitionColumn;
    use arrow::array::{Float64Array, Int64Array, StringArray};
    use arrow::datatypes::{Field, Schema};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn test_batch(columns: Vec<(&str, ArrayRef)>) -> RecordBatch {
        let fields: Vec<Field> = columns
            .iter()
            .map(|(name, array)| Field::new(*name, array.data_type().clone(), true))
            .collect();
        let arrays: Vec<ArrayRef> = columns.into_iter().map(|(_, a)| a).collect();
        RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays).unwrap()
    }

    fn customers() -> RecordBatch {
        test_batch(vec![
            ("customer_sk", Arc::new(Int64Array::from(vec![1, 2, 3, 4])) as ArrayRef),
            (
                "region",
                Arc::new(StringArray::from(vec!["East", "West", "East", "South"])) as ArrayRef,
            ),
            ("sales", Arc::new(Float64Array::from(vec![1.0, 2.0, 3.0, 4.0])) as ArrayRef),
        ])
    }

    fn customer_decl() -> TableDeclaration {
        TableDeclaration::new("dim_customer", vec![PartitionColumn::utf8("region")])
    }

    #[test]
    fn test_one_file_per_partition() {
        let dir = TempDir::new().unwrap();
        let writer = PartitionWriter::new(dir.path(), WriteOptions::default());

        let summary = writer.write_table(&customer_decl(), &customers()).unwrap();
        assert_eq!(summary.record_count, 4);
        assert_eq!(summary.partitions, 3);
        assert_eq!(summary.schema_version, 1);

        let paths: Vec<&str> = summary.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "region=East/data.parquet",
                "region=South/data.parquet",
                "region=West/data.parquet"
            ]
        );
        assert_eq!(summary.files[0].row_count, 2);
        for file in &summary.files {
            assert!(dir.path().join("dim_customer").join(&file.path).is_file());
        }
    }

    #[test]
    fn test_unpartitioned_writes_single_file() {
        let dir = TempDir::new().unwrap();
        let writer = PartitionWriter::new(dir.path(), WriteOptions::default());
        let decl = TableDeclaration::unpartitioned("dim_location");

        let summary = writer.write_table(&decl, &customers()).unwrap();
        assert_eq!(summary.partitions, 0);
        assert_eq!(summary.files.len(), 1);
        assert_eq!(summary.files[0].path, DATA_FILE);
        assert!(dir.path().join("dim_location").join(DATA_FILE).is_file());
    }

    #[test]
    fn test_missing_partition_column_is_write_failure() {
        let dir = TempDir::new().unwrap();
        let writer = PartitionWriter::new(dir.path(), WriteOptions::default());
        let decl = TableDeclaration::new("dim_customer", vec![PartitionColumn::utf8("segment")]);

        let err = writer.write_table(&decl, &customers()).unwrap_err();
        assert!(matches!(err, WarehouseError::WriteFailure { .. }));
        assert!(!dir.path().join("dim_customer").exists());
    }

    #[test]
    fn test_invalid_value_leaves_no_staging_directory() {
        let dir = TempDir::new().unwrap();
        let writer = PartitionWriter::new(dir.path(), WriteOptions::default());
        let batch = test_batch(vec![
            ("id", Arc::new(Int64Array::from(vec![1, 2])) as ArrayRef),
            ("region", Arc::new(StringArray::from(vec!["East", "North/West"])) as ArrayRef),
        ]);

        let err = writer.write_table(&customer_decl(), &batch).unwrap_err();
        assert!(matches!(err, WarehouseError::InvalidPartitionValue { .. }));

        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_partition_values_are_cast_to_declared_type() {
        let dir = TempDir::new().unwrap();
        let writer = PartitionWriter::new(dir.path(), WriteOptions::default());
        let decl = TableDeclaration::new(
            "fact_sales",
            vec![PartitionColumn::int64("order_year"), PartitionColumn::int64("order_month")],
        );
        let batch = test_batch(vec![
            ("sales", Arc::new(Float64Array::from(vec![1.0, 2.0])) as ArrayRef),
            ("order_year", Arc::new(StringArray::from(vec!["2017", "2017"])) as ArrayRef),
            ("order_month", Arc::new(StringArray::from(vec!["1", "01"])) as ArrayRef),
        ]);

        let summary = writer.write_table(&decl, &batch).unwrap();
        assert_eq!(summary.partitions, 1);
        assert_eq!(summary.files[0].path, "order_year=2017/order_month=01/data.parquet");

        let metadata = metastore::read(&dir.path().join("fact_sales")).unwrap().unwrap();
        assert_eq!(
            metadata.partitions,
            vec![vec![PartitionValue::Int(2017), PartitionValue::Int(1)]]
        );
        assert_eq!(metadata.partition_type("order_year"), Some(PartitionType::Int64));
    }

    #[test]
    fn test_null_partition_value_uses_default_partition() {
        let dir = TempDir::new().unwrap();
        let writer = PartitionWriter::new(dir.path(), WriteOptions::default());
        let batch = test_batch(vec![
            ("id", Arc::new(Int64Array::from(vec![1, 2])) as ArrayRef),
            ("region", Arc::new(StringArray::from(vec![Some("East"), None])) as ArrayRef),
        ]);

        let summary = writer.write_table(&customer_decl(), &batch).unwrap();
        assert!(summary
            .files
            .iter()
            .any(|f| f.path == "region=__HIVE_DEFAULT_PARTITION__/data.parquet"));
    }
}
