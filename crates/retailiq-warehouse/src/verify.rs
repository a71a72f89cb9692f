//! Warehouse verification
//!
//! Cross-checks each declared table against its metastore entry: presence,
//! readability, row counts and the blake3 checksum of every recorded file.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::reader::{self, PartitionFilter};
use crate::schema::TableDeclaration;
use crate::warehouse::Warehouse;

/// A data file that disagrees with the metastore
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileProblem {
    /// Recorded in the metastore but absent on disk
    Missing { path: String },
    /// Present but its content hash differs from the recorded one
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },
    /// On disk but not recorded in the metastore
    Unrecorded { path: String },
}

impl std::fmt::Display for FileProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileProblem::Missing { path } => write!(f, "missing: {}", path),
            FileProblem::ChecksumMismatch {
                path,
                expected,
                actual,
            } => write!(f, "checksum mismatch: {} (expected {}, found {})", path, expected, actual),
            FileProblem::Unrecorded { path } => write!(f, "not in metastore: {}", path),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableVerification {
    pub table: String,
    pub in_metastore: bool,
    pub metastore_rows: Option<u64>,
    /// Rows actually read back; `None` when the table could not be read
    pub physical_rows: Option<u64>,
    pub partitions: usize,
    pub problems: Vec<FileProblem>,
    pub read_error: Option<String>,
}

impl TableVerification {
    pub fn healthy(&self) -> bool {
        self.in_metastore && self.read_error.is_none() && self.problems.is_empty()
    }

    pub fn rows_match(&self) -> bool {
        self.metastore_rows.is_some() && self.metastore_rows == self.physical_rows
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub root: PathBuf,
    pub root_exists: bool,
    pub tables: Vec<TableVerification>,
    /// Bytes under the warehouse root, sidecars included
    pub total_bytes: u64,
}

impl VerificationReport {
    pub fn healthy(&self) -> bool {
        self.root_exists && self.tables.iter().all(TableVerification::healthy)
    }
}

impl Warehouse {
    /// Verify every table in `declarations` against the metastore snapshot
    pub fn verify(&self, declarations: &[TableDeclaration]) -> VerificationReport {
        let root_exists = self.root().is_dir();
        let tables = declarations
            .iter()
            .map(|declaration| self.verify_table(&declaration.name))
            .collect();

        let total_bytes = if root_exists {
            directory_size(self.root())
        } else {
            0
        };

        VerificationReport {
            root: self.root().to_path_buf(),
            root_exists,
            tables,
            total_bytes,
        }
    }

    fn verify_table(&self, table: &str) -> TableVerification {
        let Ok(metadata) = self.metadata(table) else {
            warn!("Table '{}' is not in the metastore", table);
            return TableVerification {
                table: table.to_string(),
                in_metastore: false,
                metastore_rows: None,
                physical_rows: None,
                partitions: 0,
                problems: Vec::new(),
                read_error: None,
            };
        };

        let (physical_rows, read_error) = match self.read_table(table, &PartitionFilter::new()) {
            Ok(batch) => (Some(batch.num_rows() as u64), None),
            Err(err) => {
                warn!("Table '{}' is not readable: {}", table, err);
                (None, Some(err.to_string()))
            }
        };

        let table_dir = self.table_dir(table);
        let mut problems = Vec::new();
        for entry in &metadata.files {
            let path = table_dir.join(&entry.path);
            match fs::read(&path) {
                Ok(bytes) => {
                    let actual = blake3::hash(&bytes).to_hex().to_string();
                    if actual != entry.blake3 {
                        problems.push(FileProblem::ChecksumMismatch {
                            path: entry.path.clone(),
                            expected: entry.blake3.clone(),
                            actual,
                        });
                    }
                }
                Err(_) => problems.push(FileProblem::Missing {
                    path: entry.path.clone(),
                }),
            }
        }

        // Sidecars that predate file tracking cannot be checked for extras
        if !metadata.files.is_empty() {
            let recorded: BTreeSet<&str> = metadata.files.iter().map(|f| f.path.as_str()).collect();
            for file in reader::data_files(&table_dir).unwrap_or_default() {
                let relative = relative_slash_path(&table_dir, &file);
                if !recorded.contains(relative.as_str()) {
                    problems.push(FileProblem::Unrecorded { path: relative });
                }
            }
        }

        debug!("Verified '{}' ({} problems)", table, problems.len());

        TableVerification {
            table: table.to_string(),
            in_metastore: true,
            metastore_rows: Some(metadata.record_count),
            physical_rows,
            partitions: metadata.partitions.len(),
            problems,
            read_error,
        }
    }
}

fn relative_slash_path(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn directory_size(dir: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                directory_size(&path)
            } else {
                entry.metadata().map(|m| m.len()).unwrap_or(0)
            }
        })
        .sum()
}
