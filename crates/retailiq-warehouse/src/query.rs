//! Query façade
//!
//! A tiny equality-only SQL subset mapped onto partition filters:
//!
//! ```text
//! SELECT * FROM <table> [WHERE <col>=<val> [AND <col>=<val> ...]]
//! ```
//!
//! The projection is ignored and only partition columns may be filtered.

use std::collections::BTreeMap;
use std::path::PathBuf;

use arrow::array::RecordBatch;
use tracing::debug;

use crate::codec::PartitionValue;
use crate::error::{Result, WarehouseError};
use crate::reader::{self, PartitionFilter};
use crate::warehouse::Warehouse;

/// Table plus filters extracted from a query string
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuery {
    pub table: String,
    pub filters: PartitionFilter,
}

/// Metastore view of one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSummary {
    pub name: String,
    pub record_count: u64,
    /// Zero for unpartitioned tables
    pub partitions: usize,
}

/// On-disk view of one partition directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSummary {
    /// Path relative to the table directory; `.` for the table root
    pub relative_path: String,
    pub row_count: u64,
    pub files: usize,
}

/// Parse `SELECT * FROM <table> [WHERE ...]`.
///
/// Keywords are case-insensitive. Literals are coerced to integer, then
/// float, then a quote-trimmed string.
pub fn parse_query(sql: &str) -> Result<ParsedQuery> {
    let tokens: Vec<&str> = sql.split_whitespace().collect();
    let keyword = |wanted: &str| tokens.iter().position(|t| t.eq_ignore_ascii_case(wanted));

    let from = keyword("FROM").ok_or_else(|| WarehouseError::malformed_query(sql, "missing FROM clause"))?;
    let where_at = keyword("WHERE");

    let table = tokens
        .get(from + 1)
        .map(|t| t.trim_end_matches(';'))
        .filter(|t| !t.is_empty() && !t.eq_ignore_ascii_case("WHERE"))
        .ok_or_else(|| WarehouseError::malformed_query(sql, "missing table name after FROM"))?
        .to_string();

    let mut filters = BTreeMap::new();
    if let Some(where_at) = where_at {
        if where_at < from {
            return Err(WarehouseError::malformed_query(sql, "WHERE must follow FROM"));
        }
        let conditions = &tokens[where_at + 1..];
        if conditions.is_empty() {
            return Err(WarehouseError::malformed_query(sql, "WHERE without conditions"));
        }

        for condition in conditions.split(|t| t.eq_ignore_ascii_case("AND")) {
            let condition = condition.join(" ");
            let condition = condition.trim_end_matches(';');
            let (column, value) = condition.split_once('=').ok_or_else(|| {
                WarehouseError::malformed_query(sql, format!("condition '{}' has no '='", condition))
            })?;

            let column = column.trim();
            if column.is_empty() {
                return Err(WarehouseError::malformed_query(
                    sql,
                    format!("condition '{}' has no column name", condition),
                ));
            }
            filters.insert(column.to_string(), PartitionValue::parse_literal(value));
        }
    }

    Ok(ParsedQuery { table, filters })
}

impl Warehouse {
    /// Run a query string through the partition-pruned reader
    pub fn query(&self, sql: &str) -> Result<RecordBatch> {
        let parsed = parse_query(sql)?;
        debug!("Query on '{}' with filters {:?}", parsed.table, parsed.filters);
        self.read_table(&parsed.table, &parsed.filters)
    }

    /// Tables in the metastore snapshot with their row and partition counts.
    ///
    /// Does not touch the filesystem.
    pub fn show_tables(&self) -> Vec<TableSummary> {
        self.tables()
            .iter()
            .map(|(name, metadata)| TableSummary {
                name: name.clone(),
                record_count: metadata.record_count,
                partitions: metadata.partitions.len(),
            })
            .collect()
    }

    /// Every directory of `table` that holds data files, with row counts read
    /// from the Parquet footers
    pub fn show_partitions(&self, table: &str) -> Result<Vec<PartitionSummary>> {
        self.metadata(table)?;
        let table_dir = self.table_dir(table);
        if !table_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut by_dir: BTreeMap<String, PartitionSummary> = BTreeMap::new();
        for file in reader::data_files(&table_dir)? {
            let relative = file
                .parent()
                .and_then(|dir| dir.strip_prefix(&table_dir).ok())
                .map(PathBuf::from)
                .unwrap_or_default();
            let relative_path = if relative.as_os_str().is_empty() {
                ".".to_string()
            } else {
                relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/")
            };

            let rows = reader::footer_row_count(&file)?;
            let entry = by_dir
                .entry(relative_path.clone())
                .or_insert_with(|| PartitionSummary {
                    relative_path,
                    row_count: 0,
                    files: 0,
                });
            entry.row_count += rows;
            entry.files += 1;
        }

        Ok(by_dir.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_with_conjunction() {
        let parsed =
            parse_query("SELECT * FROM fact_sales WHERE order_year=2017 AND order_month=11").unwrap();
        assert_eq!(parsed.table, "fact_sales");
        assert_eq!(parsed.filters.len(), 2);
        assert_eq!(parsed.filters["order_year"], PartitionValue::Int(2017));
        assert_eq!(parsed.filters["order_month"], PartitionValue::Int(11));
    }

    #[test]
    fn test_parse_query_without_where() {
        let parsed = parse_query("SELECT * FROM dim_location").unwrap();
        assert_eq!(parsed.table, "dim_location");
        assert!(parsed.filters.is_empty());
    }

    #[test]
    fn test_parse_query_quoted_and_spaced_literals() {
        let parsed =
            parse_query("select * from dim_product where category = 'Office Supplies'").unwrap();
        assert_eq!(parsed.table, "dim_product");
        assert_eq!(
            parsed.filters["category"],
            PartitionValue::Str("Office Supplies".to_string())
        );

        let parsed = parse_query("SELECT * FROM fact_sales WHERE order_month = '03'").unwrap();
        assert_eq!(parsed.filters["order_month"], PartitionValue::Int(3));
    }

    #[test]
    fn test_and_is_matched_as_a_whole_word() {
        let parsed = parse_query("SELECT * FROM dim_customer WHERE region=NEW_ENGLAND").unwrap();
        assert_eq!(
            parsed.filters["region"],
            PartitionValue::Str("NEW_ENGLAND".to_string())
        );
    }

    #[test]
    fn test_malformed_queries() {
        for sql in [
            "SELECT *",
            "SELECT * FROM",
            "SELECT * FROM WHERE region=East",
            "SELECT * FROM dim_customer WHERE region",
            "SELECT * FROM dim_customer WHERE",
            "SELECT * FROM dim_customer WHERE =East",
        ] {
            let err = parse_query(sql).unwrap_err();
            assert!(
                matches!(err, WarehouseError::MalformedQuery { .. }),
                "expected MalformedQuery for {:?}",
                sql
            );
        }
    }
}
