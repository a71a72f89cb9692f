//! Error types for report generation

use std::path::{Path, PathBuf};

use retailiq_warehouse::WarehouseError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error("Column '{column}' not found in table '{table}' (available: {available})")]
    MissingColumn {
        table: String,
        column: String,
        available: String,
    },

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AnalyticsError {
    pub fn missing_column<S: AsRef<str>>(
        table: impl Into<String>,
        column: impl Into<String>,
        available: &[S],
    ) -> Self {
        let available = available
            .iter()
            .map(|s| s.as_ref())
            .collect::<Vec<_>>()
            .join(", ");
        Self::MissingColumn {
            table: table.into(),
            column: column.into(),
            available,
        }
    }

    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, AnalyticsError>;
