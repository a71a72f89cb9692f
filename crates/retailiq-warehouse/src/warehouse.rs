//! Warehouse handle: root path, table declarations and a metastore snapshot

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use arrow::array::RecordBatch;
use tracing::{debug, info};

use crate::error::{Result, WarehouseError};
use crate::metastore::{self, MetastorePolicy, TableMetadata};
use crate::reader::{self, PartitionFilter, ScanResult, TableLayout};
use crate::schema::{schema_from_columns, PartitionColumn, PartitionType, TableDeclaration};
use crate::writer::{PartitionWriter, WriteOptions};

/// Options for [`Warehouse::open`]
#[derive(Debug, Clone, Default)]
pub struct WarehouseOptions {
    pub policy: MetastorePolicy,
    /// Declared table layouts. Tables present on disk but not declared are
    /// still readable using the partition columns recorded in their sidecar.
    pub declarations: Vec<TableDeclaration>,
}

/// A warehouse opened for reading.
///
/// The metastore is loaded once at open time and kept as an immutable
/// snapshot; call [`Warehouse::refresh`] to pick up writes made since.
#[derive(Debug, Clone)]
pub struct Warehouse {
    root: PathBuf,
    options: WarehouseOptions,
    tables: BTreeMap<String, TableMetadata>,
}

impl Warehouse {
    pub fn open(root: impl Into<PathBuf>, options: WarehouseOptions) -> Result<Self> {
        let root = root.into();
        for declaration in &options.declarations {
            declaration.validate()?;
        }

        let tables = metastore::load_all(&root, options.policy)?;
        let warehouse = Self {
            root,
            options,
            tables,
        };
        warehouse.check_declarations()?;

        info!(
            "Opened warehouse at {} ({} tables)",
            warehouse.root.display(),
            warehouse.tables.len()
        );
        Ok(warehouse)
    }

    /// Reload the metastore snapshot from disk
    pub fn refresh(&mut self) -> Result<()> {
        self.tables = metastore::load_all(&self.root, self.options.policy)?;
        self.check_declarations()?;
        debug!("Refreshed metastore snapshot ({} tables)", self.tables.len());
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn policy(&self) -> MetastorePolicy {
        self.options.policy
    }

    pub fn declarations(&self) -> &[TableDeclaration] {
        &self.options.declarations
    }

    pub fn declaration(&self, table: &str) -> Option<&TableDeclaration> {
        self.options.declarations.iter().find(|d| d.name == table)
    }

    /// All tables in the snapshot, keyed by name
    pub fn tables(&self) -> &BTreeMap<String, TableMetadata> {
        &self.tables
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn metadata(&self, table: &str) -> Result<&TableMetadata> {
        self.tables
            .get(table)
            .ok_or_else(|| WarehouseError::unknown_table(table))
    }

    pub fn table_dir(&self, table: &str) -> PathBuf {
        self.root.join(table)
    }

    /// Partition columns of `table` with the type used to re-cast their values.
    ///
    /// The type recorded in the sidecar wins; sidecars that predate typed
    /// partitions fall back to the declaration, then to `Utf8`.
    pub fn partition_layout(&self, table: &str) -> Result<Vec<PartitionColumn>> {
        let metadata = self.metadata(table)?;
        let declaration = self.declaration(table);

        Ok(metadata
            .partition_columns
            .iter()
            .map(|name| {
                let data_type = metadata
                    .partition_type(name)
                    .or_else(|| {
                        declaration
                            .and_then(|d| d.partition_column(name))
                            .map(|c| c.data_type)
                    })
                    .unwrap_or(PartitionType::Utf8);
                PartitionColumn::new(name.clone(), data_type)
            })
            .collect())
    }

    /// Read `table`, restricted to the partitions matching `filters`, and
    /// report which data files were read
    pub fn scan(&self, table: &str, filters: &PartitionFilter) -> Result<ScanResult> {
        let metadata = self.metadata(table)?;
        let layout = TableLayout {
            table,
            table_dir: self.table_dir(table),
            partition_columns: self.partition_layout(table)?,
            stored_schema: schema_from_columns(&metadata.columns),
        };
        reader::scan(&layout, filters)
    }

    /// Read `table`, restricted to the partitions matching `filters`
    pub fn read_table(&self, table: &str, filters: &PartitionFilter) -> Result<RecordBatch> {
        Ok(self.scan(table, filters)?.batch)
    }

    /// A writer targeting this warehouse root
    pub fn writer(&self, options: WriteOptions) -> PartitionWriter {
        PartitionWriter::new(self.root.clone(), options)
    }

    fn check_declarations(&self) -> Result<()> {
        for declaration in &self.options.declarations {
            let Some(metadata) = self.tables.get(&declaration.name) else {
                continue;
            };

            let declared = declaration.partition_column_names();
            if metadata.partition_columns != declared {
                return Err(WarehouseError::schema_incompatible(
                    &declaration.name,
                    format!(
                        "declared partition columns {:?} but metastore records {:?}",
                        declared, metadata.partition_columns
                    ),
                ));
            }

            for column in &declaration.partition_columns {
                if let Some(recorded) = metadata.partition_type(&column.name) {
                    if recorded != column.data_type {
                        return Err(WarehouseError::schema_incompatible(
                            &declaration.name,
                            format!(
                                "partition column '{}' declared {} but metastore records {}",
                                column.name, column.data_type, recorded
                            ),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}
