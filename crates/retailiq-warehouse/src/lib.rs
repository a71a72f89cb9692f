//! Hive-style partitioned Parquet warehouse
//!
//! Tables live under a single root directory, one subdirectory per table,
//! with partition values encoded in directory names:
//!
//! ```text
//! <root>/<table>/<col1>=<v1>/<col2>=<v2>/data.parquet
//! <root>/<table>/_METADATA.json
//! ```
//!
//! The JSON sidecar is the metastore entry for the table. [`Warehouse`] loads
//! every sidecar once at open time and serves partition-pruned reads and a
//! small equality-only query language on top of that snapshot.

// Error variants carry paths and reasons for diagnostics
#![allow(clippy::result_large_err)]

mod builder;
mod codec;
mod encoding;
mod error;
pub mod metastore;
mod query;
mod reader;
mod schema;
mod verify;
mod warehouse;
mod writer;

pub use builder::{WarehouseBuilder, DEFAULT_SOURCE_DIR};
pub use codec::{decode, encode, encode_segment, PartitionValue, HIVE_DEFAULT_PARTITION};
pub use encoding::DEFAULT_ROW_GROUP_SIZE;
pub use error::{ErrorCode, Result, WarehouseError};
pub use metastore::{DataFileEntry, MetastorePolicy, TableMetadata, METADATA_FILE};
pub use query::{parse_query, ParsedQuery, PartitionSummary, TableSummary};
pub use reader::{PartitionFilter, ScanResult};
pub use schema::{
    retail_tables, ColumnSchema, PartitionColumn, PartitionType, TableDeclaration,
};
pub use verify::{FileProblem, TableVerification, VerificationReport};
pub use warehouse::{Warehouse, WarehouseOptions};
pub use writer::{PartitionWriter, WriteOptions, WriteSummary, DATA_FILE};

/// Build a [`PartitionFilter`] from `(column, value)` pairs
pub fn filter<I, K, V>(pairs: I) -> PartitionFilter
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<PartitionValue>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
