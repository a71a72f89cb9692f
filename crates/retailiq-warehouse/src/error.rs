//! Error types for the warehouse crate

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// E001: Table is not present in the loaded metastore
    E001UnknownTable,
    /// E002: Partition value cannot be encoded as a path segment
    E002InvalidPartitionValue,
    /// E003: Textual query is missing a required clause
    E003MalformedQuery,
    /// E004: Metastore sidecar could not be parsed
    E004MetastoreCorrupt,
    /// E005: Schema differs from the one stamped in the metastore
    E005SchemaIncompatible,
    /// E006: Filter names a column the table is not partitioned by
    E006UnknownPartitionColumn,
    /// E007: Write operation failed
    E007WriteFailure,
    /// E008: Read operation failed
    E008ReadFailure,
    /// E009: Table declaration is invalid
    E009InvalidDeclaration,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::E001UnknownTable => "E001",
            Self::E002InvalidPartitionValue => "E002",
            Self::E003MalformedQuery => "E003",
            Self::E004MetastoreCorrupt => "E004",
            Self::E005SchemaIncompatible => "E005",
            Self::E006UnknownPartitionColumn => "E006",
            Self::E007WriteFailure => "E007",
            Self::E008ReadFailure => "E008",
            Self::E009InvalidDeclaration => "E009",
        }
    }
}

/// Errors that can occur while writing, reading or querying the warehouse
#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("[{code}] Table '{table}' not found in metastore")]
    UnknownTable { code: &'static str, table: String },

    #[error("[{code}] Invalid partition value {value:?} for column '{column}': {reason}")]
    InvalidPartitionValue {
        code: &'static str,
        column: String,
        value: String,
        reason: String,
    },

    #[error("[{code}] Malformed query '{query}': {reason}")]
    MalformedQuery {
        code: &'static str,
        query: String,
        reason: String,
    },

    #[error("[{code}] Metastore sidecar for '{table}' is corrupt ({}): {reason}", .path.display())]
    MetastoreCorrupt {
        code: &'static str,
        table: String,
        path: PathBuf,
        reason: String,
    },

    #[error("[{code}] Schema incompatible for table '{table}': {reason}")]
    SchemaIncompatible {
        code: &'static str,
        table: String,
        reason: String,
    },

    #[error("[{code}] Table '{table}' is not partitioned by '{column}' (partition columns: {available:?})")]
    UnknownPartitionColumn {
        code: &'static str,
        table: String,
        column: String,
        available: Vec<String>,
    },

    #[error("[{code}] Write failed for table '{table}': {message}")]
    WriteFailure {
        code: &'static str,
        table: String,
        message: String,
    },

    #[error("[{code}] Read failed for '{}': {message}", .path.display())]
    ReadFailure {
        code: &'static str,
        path: PathBuf,
        message: String,
    },

    #[error("[{code}] Invalid declaration for table '{table}': {reason}")]
    InvalidDeclaration {
        code: &'static str,
        table: String,
        reason: String,
    },

    #[error("I/O error at '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
}

impl WarehouseError {
    pub fn unknown_table(table: impl Into<String>) -> Self {
        Self::UnknownTable {
            code: ErrorCode::E001UnknownTable.as_str(),
            table: table.into(),
        }
    }

    pub fn invalid_partition_value(
        column: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidPartitionValue {
            code: ErrorCode::E002InvalidPartitionValue.as_str(),
            column: column.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn malformed_query(query: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedQuery {
            code: ErrorCode::E003MalformedQuery.as_str(),
            query: query.into(),
            reason: reason.into(),
        }
    }

    pub fn metastore_corrupt(
        table: impl Into<String>,
        path: impl Into<PathBuf>,
        reason: impl Into<String>,
    ) -> Self {
        Self::MetastoreCorrupt {
            code: ErrorCode::E004MetastoreCorrupt.as_str(),
            table: table.into(),
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn schema_incompatible(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaIncompatible {
            code: ErrorCode::E005SchemaIncompatible.as_str(),
            table: table.into(),
            reason: reason.into(),
        }
    }

    pub fn unknown_partition_column(
        table: impl Into<String>,
        column: impl Into<String>,
        available: Vec<String>,
    ) -> Self {
        Self::UnknownPartitionColumn {
            code: ErrorCode::E006UnknownPartitionColumn.as_str(),
            table: table.into(),
            column: column.into(),
            available,
        }
    }

    pub fn write_failure(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::WriteFailure {
            code: ErrorCode::E007WriteFailure.as_str(),
            table: table.into(),
            message: message.into(),
        }
    }

    pub fn read_failure(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ReadFailure {
            code: ErrorCode::E008ReadFailure.as_str(),
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn invalid_declaration(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDeclaration {
            code: ErrorCode::E009InvalidDeclaration.as_str(),
            table: table.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Stable error code, if this error carries one
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::UnknownTable { code, .. }
            | Self::InvalidPartitionValue { code, .. }
            | Self::MalformedQuery { code, .. }
            | Self::MetastoreCorrupt { code, .. }
            | Self::SchemaIncompatible { code, .. }
            | Self::UnknownPartitionColumn { code, .. }
            | Self::WriteFailure { code, .. }
            | Self::ReadFailure { code, .. }
            | Self::InvalidDeclaration { code, .. } => Some(*code),
            Self::Io { .. } | Self::Arrow(_) | Self::Parquet(_) => None,
        }
    }
}

/// Result type alias for WarehouseError
pub type Result<T> = std::result::Result<T, WarehouseError>;
