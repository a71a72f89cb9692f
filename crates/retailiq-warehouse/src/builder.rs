//! Warehouse builder
//!
//! Loads one conformed Parquet file per table from a source directory,
//! derives each declared partition column and hands the result to the
//! [`PartitionWriter`]. A partition column is resolved, in order, from:
//!
//! 1. a source column with the same name
//! 2. a source column with the same name ignoring case (renamed)
//! 3. the table's own `date` column, for `*year` / `*month` columns
//! 4. a `date_sk` lookup into the `dim_date` source, for `*year` / `*month`

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, Int64Array, RecordBatch};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Date32Type, Field, Int64Type, Schema};
use chrono::{Datelike, NaiveDate};
use tracing::{debug, info};

use crate::error::{Result, WarehouseError};
use crate::reader;
use crate::schema::{PartitionColumn, TableDeclaration};
use crate::writer::{PartitionWriter, WriteOptions, WriteSummary};

pub const DEFAULT_SOURCE_DIR: &str = "data/warehouse";

const DATE_TABLE: &str = "dim_date";
const DATE_COLUMN: &str = "date";
const DATE_KEY_COLUMN: &str = "date_sk";

type DateLookup = HashMap<i64, NaiveDate>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DatePart {
    Year,
    Month,
}

impl DatePart {
    fn for_column(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        if name.ends_with("month") {
            Some(DatePart::Month)
        } else if name.ends_with("year") {
            Some(DatePart::Year)
        } else {
            None
        }
    }

    fn extract(&self, date: NaiveDate) -> i64 {
        match self {
            DatePart::Year => i64::from(date.year()),
            DatePart::Month => i64::from(date.month()),
        }
    }
}

/// Builds a partitioned warehouse from per-table source files
#[derive(Debug, Clone)]
pub struct WarehouseBuilder {
    source_dir: PathBuf,
    writer: PartitionWriter,
}

impl WarehouseBuilder {
    pub fn new(source_dir: impl Into<PathBuf>, warehouse_root: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            writer: PartitionWriter::new(warehouse_root, WriteOptions::default()),
        }
    }

    pub fn with_write_options(mut self, options: WriteOptions) -> Self {
        self.writer = PartitionWriter::new(self.writer.root().to_path_buf(), options);
        self
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    /// `<source_dir>/<table>.parquet`
    pub fn source_path(&self, table: &str) -> PathBuf {
        self.source_dir.join(format!("{}.parquet", table))
    }

    /// Build every declared table, failing before any write if a source file
    /// is missing
    pub fn build(&self, declarations: &[TableDeclaration]) -> Result<Vec<WriteSummary>> {
        let missing: Vec<String> = declarations
            .iter()
            .map(|d| self.source_path(&d.name))
            .filter(|p| !p.is_file())
            .map(|p| p.display().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(WarehouseError::read_failure(
                &self.source_dir,
                format!("missing source files: {}", missing.join(", ")),
            ));
        }

        info!(
            "Building warehouse at {} from {}",
            self.writer.root().display(),
            self.source_dir.display()
        );

        let mut dates: Option<DateLookup> = None;
        let mut summaries = Vec::with_capacity(declarations.len());
        for declaration in declarations {
            let source = reader::read_file(&self.source_path(&declaration.name))?;
            debug!("Loaded {} source rows for '{}'", source.num_rows(), declaration.name);

            let prepared = self.prepare(declaration, source, &mut dates)?;
            summaries.push(self.writer.write_table(declaration, &prepared)?);
        }

        Ok(summaries)
    }

    /// Make sure `batch` carries every partition column of `declaration`
    fn prepare(
        &self,
        declaration: &TableDeclaration,
        mut batch: RecordBatch,
        dates: &mut Option<DateLookup>,
    ) -> Result<RecordBatch> {
        for column in &declaration.partition_columns {
            batch = self.derive_column(declaration, batch, column, dates)?;
        }
        Ok(batch)
    }

    fn derive_column(
        &self,
        declaration: &TableDeclaration,
        batch: RecordBatch,
        column: &PartitionColumn,
        dates: &mut Option<DateLookup>,
    ) -> Result<RecordBatch> {
        let schema = batch.schema();
        if schema.index_of(&column.name).is_ok() {
            return Ok(batch);
        }

        if let Some(index) = find_column(&schema, &column.name) {
            debug!(
                "'{}': using source column '{}' as '{}'",
                declaration.name,
                schema.field(index).name(),
                column.name
            );
            return rename_column(batch, index, &column.name);
        }

        let Some(part) = DatePart::for_column(&column.name) else {
            return Err(underivable(declaration, column));
        };

        if let Some(index) = find_column(&schema, DATE_COLUMN) {
            let values: Int64Array = dates_of(&declaration.name, batch.column(index))?
                .into_iter()
                .map(|d| d.map(|d| part.extract(d)))
                .collect();
            return append_column(batch, &column.name, Arc::new(values));
        }

        if let Some(index) = find_column(&schema, DATE_KEY_COLUMN) {
            if dates.is_none() {
                *dates = Some(self.load_date_lookup()?);
            }
            let lookup = dates.as_ref();
            let keys = cast(batch.column(index), &DataType::Int64)?;
            let keys = keys.as_primitive::<Int64Type>();
            let values: Int64Array = (0..keys.len())
                .map(|i| {
                    if keys.is_null(i) {
                        return None;
                    }
                    lookup
                        .and_then(|l| l.get(&keys.value(i)))
                        .map(|d| part.extract(*d))
                })
                .collect();
            if values.null_count() > 0 {
                debug!(
                    "'{}': {} rows have no matching {}; '{}' will be null",
                    declaration.name,
                    values.null_count(),
                    DATE_KEY_COLUMN,
                    column.name
                );
            }
            return append_column(batch, &column.name, Arc::new(values));
        }

        Err(underivable(declaration, column))
    }

    fn load_date_lookup(&self) -> Result<DateLookup> {
        let path = self.source_path(DATE_TABLE);
        if !path.is_file() {
            return Err(WarehouseError::read_failure(
                &path,
                "date dimension is required to derive year/month partitions",
            ));
        }

        let batch = reader::read_file(&path)?;
        let schema = batch.schema();
        let (Some(key_index), Some(date_index)) = (
            find_column(&schema, DATE_KEY_COLUMN),
            find_column(&schema, DATE_COLUMN),
        ) else {
            return Err(WarehouseError::read_failure(
                &path,
                format!("expected '{}' and '{}' columns", DATE_KEY_COLUMN, DATE_COLUMN),
            ));
        };

        let keys = cast(batch.column(key_index), &DataType::Int64)?;
        let keys = keys.as_primitive::<Int64Type>();
        let dates = dates_of(DATE_TABLE, batch.column(date_index))?;

        let lookup: DateLookup = dates
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !keys.is_null(*i))
            .filter_map(|(i, d)| d.map(|d| (keys.value(i), d)))
            .collect();
        debug!("Loaded {} date keys from {}", lookup.len(), path.display());
        Ok(lookup)
    }
}

fn underivable(declaration: &TableDeclaration, column: &PartitionColumn) -> WarehouseError {
    WarehouseError::write_failure(
        &declaration.name,
        format!("cannot derive partition column '{}' from the source", column.name),
    )
}

fn find_column(schema: &Schema, name: &str) -> Option<usize> {
    schema
        .fields()
        .iter()
        .position(|f| f.name().eq_ignore_ascii_case(name))
}

fn rename_column(batch: RecordBatch, index: usize, name: &str) -> Result<RecordBatch> {
    let schema = batch.schema();
    let fields: Vec<Field> = schema
        .fields()
        .iter()
        .enumerate()
        .map(|(i, f)| {
            if i == index {
                f.as_ref().clone().with_name(name)
            } else {
                f.as_ref().clone()
            }
        })
        .collect();
    Ok(RecordBatch::try_new(
        Arc::new(Schema::new(fields)),
        batch.columns().to_vec(),
    )?)
}

fn append_column(batch: RecordBatch, name: &str, array: ArrayRef) -> Result<RecordBatch> {
    let schema = batch.schema();
    let mut fields: Vec<Field> = schema.fields().iter().map(|f| f.as_ref().clone()).collect();
    fields.push(Field::new(name, array.data_type().clone(), true));
    let mut columns = batch.columns().to_vec();
    columns.push(array);
    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

/// Calendar dates of a date-like column: Date32/Date64/Timestamp or strings
/// starting with `YYYY-MM-DD`. Unparseable values become `None`.
fn dates_of(table: &str, array: &ArrayRef) -> Result<Vec<Option<NaiveDate>>> {
    let parse = |s: &str| {
        s.get(..10)
            .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
    };

    match array.data_type() {
        DataType::Utf8 => {
            let strings = array.as_string::<i32>();
            Ok(strings.iter().map(|s| s.and_then(parse)).collect())
        }
        DataType::LargeUtf8 => {
            let strings = array.as_string::<i64>();
            Ok(strings.iter().map(|s| s.and_then(parse)).collect())
        }
        DataType::Date32 | DataType::Date64 | DataType::Timestamp(_, _) => {
            let days = cast(array, &DataType::Date32)?;
            let days = days.as_primitive::<Date32Type>();
            Ok((0..days.len())
                .map(|i| {
                    if days.is_null(i) {
                        None
                    } else {
                        days.value_as_date(i)
                    }
                })
                .collect())
        }
        other => Err(WarehouseError::write_failure(
            table,
            format!("'{}' column has unsupported type {}", DATE_COLUMN, other),
        )),
    }
}
