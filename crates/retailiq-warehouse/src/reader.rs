//! Partition-pruned reader
//!
//! Resolves a table and an optional equality filter on partition columns to
//! the matching directory subtree, reads every data file found there and
//! re-attaches the partition columns decoded from each file's path.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{new_null_array, ArrayRef, Float64Array, Int64Array, RecordBatch, StringArray};
use arrow::compute::concat_batches;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatchReader;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tracing::{debug, warn};

use crate::codec::{self, PartitionValue};
use crate::error::{Result, WarehouseError};
use crate::schema::{PartitionColumn, PartitionType};

/// Equality filter: partition column name → required value
pub type PartitionFilter = BTreeMap<String, PartitionValue>;

/// Rows read from a table plus the data files they came from
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub batch: RecordBatch,
    pub files: Vec<PathBuf>,
}

/// Everything the reader needs to know about one table
#[derive(Debug, Clone)]
pub struct TableLayout<'a> {
    pub table: &'a str,
    pub table_dir: PathBuf,
    pub partition_columns: Vec<PartitionColumn>,
    /// Payload schema stamped at write time, used for empty results
    pub stored_schema: Option<SchemaRef>,
}

impl TableLayout<'_> {
    fn partition_column_names(&self) -> Vec<String> {
        self.partition_columns.iter().map(|c| c.name.clone()).collect()
    }

    fn empty_schema(&self) -> SchemaRef {
        match &self.stored_schema {
            Some(stored) => {
                let mut fields: Vec<Field> = stored
                    .fields()
                    .iter()
                    .map(|f| f.as_ref().clone())
                    .collect();
                fields.extend(self.partition_columns.iter().map(PartitionColumn::field));
                Arc::new(Schema::new(fields))
            }
            None => Arc::new(Schema::empty()),
        }
    }
}

/// Read the files of `layout` that match `filters`.
pub fn scan(layout: &TableLayout<'_>, filters: &PartitionFilter) -> Result<ScanResult> {
    for column in filters.keys() {
        if !layout.partition_columns.iter().any(|c| &c.name == column) {
            return Err(WarehouseError::unknown_partition_column(
                layout.table,
                column,
                layout.partition_column_names(),
            ));
        }
    }

    if !layout.table_dir.is_dir() {
        warn!(
            "Table directory {} is missing; returning an empty result",
            layout.table_dir.display()
        );
        return Ok(empty_result(layout));
    }

    let files = if filters.is_empty() {
        data_files(&layout.table_dir)?
    } else {
        pruned_files(layout, filters)?
    };

    if files.is_empty() {
        warn!(
            "No data files matched in '{}' (filters: {:?})",
            layout.table, filters
        );
        return Ok(empty_result(layout));
    }

    let mut batches = Vec::with_capacity(files.len());
    for file in &files {
        let batch = read_file(file)?;
        let relative = file
            .parent()
            .and_then(|dir| dir.strip_prefix(&layout.table_dir).ok())
            .unwrap_or_else(|| Path::new(""));
        batches.push(attach_partition_columns(layout, batch, relative)?);
    }

    let batch = outer_concat(layout.table, &batches)?;
    debug!(
        "Read {} rows from {} files of '{}'",
        batch.num_rows(),
        files.len(),
        layout.table
    );

    Ok(ScanResult { batch, files })
}

fn empty_result(layout: &TableLayout<'_>) -> ScanResult {
    ScanResult {
        batch: RecordBatch::new_empty(layout.empty_schema()),
        files: Vec::new(),
    }
}

/// Recursively collect every Parquet file under `dir`, in path order.
///
/// Entries whose name starts with `.` or `_` are skipped.
pub fn data_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    collect_data_files(dir, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_data_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for path in visible_entries(dir)? {
        if path.is_dir() {
            collect_data_files(&path, files)?;
        } else if is_parquet(&path) {
            files.push(path);
        }
    }
    Ok(())
}

fn visible_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| WarehouseError::io(dir, e))? {
        let entry = entry.map_err(|e| WarehouseError::io(dir, e))?;
        let name = entry.file_name();
        if name.to_string_lossy().starts_with(['.', '_']) {
            continue;
        }
        entries.push(entry.path());
    }
    entries.sort();
    Ok(entries)
}

fn is_parquet(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "parquet")
}

/// Walk the partition levels in declared order. A filtered level descends into
/// exactly one encoded segment; an unfiltered level descends into every
/// `column=` subdirectory.
fn pruned_files(layout: &TableLayout<'_>, filters: &PartitionFilter) -> Result<Vec<PathBuf>> {
    let mut frontier = vec![layout.table_dir.clone()];

    for column in &layout.partition_columns {
        let mut next = Vec::new();
        match filters.get(&column.name) {
            Some(value) => {
                let segment = match codec::encode_segment(&column.name, value) {
                    Ok(segment) => segment,
                    // No directory can carry this value, so nothing matches
                    Err(WarehouseError::InvalidPartitionValue { reason, .. }) => {
                        debug!(
                            "Filter {}={:?} cannot match any partition of '{}': {}",
                            column.name, value, layout.table, reason
                        );
                        return Ok(Vec::new());
                    }
                    Err(e) => return Err(e),
                };
                for dir in &frontier {
                    let candidate = dir.join(&segment);
                    if candidate.is_dir() {
                        next.push(candidate);
                    }
                }
            }
            None => {
                let prefix = format!("{}=", column.name);
                for dir in &frontier {
                    for path in visible_entries(dir)? {
                        let matches = path
                            .file_name()
                            .is_some_and(|n| n.to_string_lossy().starts_with(&prefix));
                        if matches && path.is_dir() {
                            next.push(path);
                        }
                    }
                }
            }
        }
        frontier = next;
        if frontier.is_empty() {
            break;
        }
    }

    let mut files = Vec::new();
    for dir in &frontier {
        files.extend(
            visible_entries(dir)?
                .into_iter()
                .filter(|p| p.is_file() && is_parquet(p)),
        );
    }
    Ok(files)
}

/// Read one Parquet file into a single batch
pub fn read_file(path: &Path) -> Result<RecordBatch> {
    let file = File::open(path).map_err(|e| WarehouseError::io(path, e))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| WarehouseError::read_failure(path, e.to_string()))?
        .build()
        .map_err(|e| WarehouseError::read_failure(path, e.to_string()))?;

    let schema = reader.schema();
    let batches = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| WarehouseError::read_failure(path, e.to_string()))?;

    debug!("Read data file {}", path.display());
    Ok(concat_batches(&schema, &batches)?)
}

/// Row count from a Parquet footer without decoding any pages
pub fn footer_row_count(path: &Path) -> Result<u64> {
    let file = File::open(path).map_err(|e| WarehouseError::io(path, e))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| WarehouseError::read_failure(path, e.to_string()))?;
    Ok(builder.metadata().file_metadata().num_rows().max(0) as u64)
}

/// Append (or replace) the declared partition columns using the values
/// decoded from `relative_dir`, typed by their declared type.
fn attach_partition_columns(
    layout: &TableLayout<'_>,
    batch: RecordBatch,
    relative_dir: &Path,
) -> Result<RecordBatch> {
    if layout.partition_columns.is_empty() {
        return Ok(batch);
    }

    let decoded = codec::decode(relative_dir);
    let num_rows = batch.num_rows();
    let mut fields: Vec<Field> = batch
        .schema()
        .fields()
        .iter()
        .map(|f| f.as_ref().clone())
        .collect();
    let mut columns: Vec<ArrayRef> = batch.columns().to_vec();

    for column in &layout.partition_columns {
        let value = match decoded.get(&column.name) {
            Some(raw) => PartitionValue::cast(&column.name, raw, column.data_type)?,
            None => PartitionValue::Null,
        };
        let array = repeat_value(&value, column.data_type, num_rows);

        match fields.iter().position(|f| f.name() == &column.name) {
            Some(index) => {
                fields[index] = column.field();
                columns[index] = array;
            }
            None => {
                fields.push(column.field());
                columns.push(array);
            }
        }
    }

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

fn repeat_value(value: &PartitionValue, data_type: PartitionType, len: usize) -> ArrayRef {
    match (value, data_type) {
        (PartitionValue::Null, _) => new_null_array(&data_type.arrow_type(), len),
        (PartitionValue::Int(i), PartitionType::Int64) => Arc::new(Int64Array::from(vec![*i; len])),
        (PartitionValue::Float(f), PartitionType::Float64) => {
            Arc::new(Float64Array::from(vec![*f; len]))
        }
        (PartitionValue::Int(i), PartitionType::Float64) => {
            Arc::new(Float64Array::from(vec![*i as f64; len]))
        }
        (other, _) => Arc::new(StringArray::from(vec![other.to_string(); len])),
    }
}

/// Concatenate batches whose schemas may differ: the result carries the union
/// of all columns in first-seen order and missing columns are filled with
/// nulls. The same column name with two different types is an error.
pub fn outer_concat(table: &str, batches: &[RecordBatch]) -> Result<RecordBatch> {
    let mut order: Vec<String> = Vec::new();
    let mut types: HashMap<String, DataType> = HashMap::new();

    for batch in batches {
        for field in batch.schema().fields() {
            match types.get(field.name()) {
                Some(existing) if existing != field.data_type() => {
                    return Err(WarehouseError::schema_incompatible(
                        table,
                        format!(
                            "column '{}' is {} in one data file and {} in another",
                            field.name(),
                            existing,
                            field.data_type()
                        ),
                    ));
                }
                Some(_) => {}
                None => {
                    order.push(field.name().clone());
                    types.insert(field.name().clone(), field.data_type().clone());
                }
            }
        }
    }

    let fields: Vec<Field> = order
        .iter()
        .map(|name| Field::new(name, types[name].clone(), true))
        .collect();
    let schema = Arc::new(Schema::new(fields));

    let aligned = batches
        .iter()
        .map(|batch| {
            let columns: Vec<ArrayRef> = schema
                .fields()
                .iter()
                .map(|field| match batch.column_by_name(field.name()) {
                    Some(column) => column.clone(),
                    None => new_null_array(field.data_type(), batch.num_rows()),
                })
                .collect();
            RecordBatch::try_new(schema.clone(), columns)
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(concat_batches(&schema, &aligned)?)
}
