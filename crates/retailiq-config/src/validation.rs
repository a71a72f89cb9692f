// Configuration validation
//
// Validates that required fields are present and values are sensible

use crate::*;
use anyhow::{bail, Result};
use retailiq_warehouse::TableDeclaration;
use std::collections::HashSet;
use tracing::warn;

pub fn validate_config(config: &RuntimeConfig) -> Result<()> {
    validate_warehouse_config(&config.warehouse)?;
    validate_logging_config(&config.logging)?;
    validate_analytics_config(&config.analytics)?;
    validate_tables(&config.tables)?;
    Ok(())
}

fn validate_warehouse_config(config: &WarehouseConfig) -> Result<()> {
    if config.root.trim().is_empty() {
        bail!("warehouse.root must not be empty");
    }

    if config.source_dir.trim().is_empty() {
        bail!("warehouse.source_dir must not be empty");
    }

    if config.parquet_row_group_size == 0 {
        bail!("warehouse.parquet_row_group_size must be greater than 0");
    }

    if config.parquet_row_group_size > 10_000_000 {
        warn!(
            row_group_size = config.parquet_row_group_size,
            "warehouse.parquet_row_group_size is very large; may cause memory issues"
        );
    }

    Ok(())
}

fn validate_logging_config(config: &LoggingConfig) -> Result<()> {
    if config.level.trim().is_empty() {
        bail!("logging.level must not be empty");
    }
    Ok(())
}

fn validate_analytics_config(config: &AnalyticsConfig) -> Result<()> {
    if config.report_dir.trim().is_empty() {
        bail!("analytics.report_dir must not be empty");
    }

    for (key, name) in config.columns.names() {
        if name.trim().is_empty() {
            bail!("analytics.columns.{} must not be empty", key);
        }
    }

    if config.reports.years.is_empty() {
        warn!("analytics.years is empty; the growth report will have no rows");
    }

    Ok(())
}

fn validate_tables(tables: &[TableDeclaration]) -> Result<()> {
    if tables.is_empty() {
        warn!("No tables declared; build will write nothing");
    }

    let mut seen = HashSet::new();
    for table in tables {
        if !seen.insert(table.name.as_str()) {
            bail!("tables: duplicate table name '{}'", table.name);
        }
        if let Err(e) = table.validate() {
            bail!("tables: {}", e);
        }
    }

    Ok(())
}
