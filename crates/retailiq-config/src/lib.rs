// retailiq-config - Configuration for the warehouse builder, reader and reports
//
// Supports configuration from multiple sources:
// 1. Environment variables (highest priority)
// 2. Config file path from RETAILIQ_CONFIG env var
// 3. Config file contents from RETAILIQ_CONFIG_CONTENT env var
// 4. Default config file locations (./retailiq.toml, ./.retailiq.toml)
// 5. Built-in defaults (lowest priority)

use anyhow::{bail, Context, Result};
use retailiq_analytics::{ReportOptions, SalesColumns};
use retailiq_warehouse::{
    retail_tables, MetastorePolicy, TableDeclaration, WarehouseOptions, WriteOptions,
    DEFAULT_ROW_GROUP_SIZE, DEFAULT_SOURCE_DIR,
};
use serde::{Deserialize, Serialize};

mod env_overrides;
mod sources;
mod validation;

pub use env_overrides::{EnvSource, ENV_PREFIX};
pub use sources::{load_from_file_path, StdEnvSource};

pub const DEFAULT_WAREHOUSE_ROOT: &str = "retail_warehouse/";
pub const DEFAULT_REPORT_DIR: &str = "analytics_reports";

/// Main runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub warehouse: WarehouseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub analytics: AnalyticsConfig,

    /// Table layouts; the six retail tables when omitted
    #[serde(default = "retail_tables")]
    pub tables: Vec<TableDeclaration>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            warehouse: WarehouseConfig::default(),
            logging: LoggingConfig::default(),
            analytics: AnalyticsConfig::default(),
            tables: retail_tables(),
        }
    }
}

/// Warehouse location and write settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    pub root: String,
    /// Directory holding the conformed `<table>.parquet` extracts
    pub source_dir: String,
    pub parquet_row_group_size: usize,
    pub metastore_policy: MetastorePolicy,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            root: DEFAULT_WAREHOUSE_ROOT.to_string(),
            source_dir: DEFAULT_SOURCE_DIR.to_string(),
            parquet_row_group_size: DEFAULT_ROW_GROUP_SIZE,
            metastore_policy: MetastorePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => bail!("Unsupported log format: {}. Supported: text, json", s),
        }
    }
}

/// Report output and column declarations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub report_dir: String,
    pub columns: SalesColumns,
    #[serde(flatten)]
    pub reports: ReportOptions,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            report_dir: DEFAULT_REPORT_DIR.to_string(),
            columns: SalesColumns::default(),
            reports: ReportOptions::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from all sources with priority
    pub fn load() -> Result<Self> {
        sources::load_config()
    }

    /// Parse a TOML document on top of the defaults, without consulting the
    /// environment
    pub fn from_toml(content: &str) -> Result<Self> {
        let file_config: RuntimeConfig =
            toml::from_str(content).context("Failed to parse config content")?;
        let mut config = RuntimeConfig::default();
        config.merge(file_config);
        config.validate()?;
        Ok(config)
    }

    /// Replace every section with the one from `other`
    pub fn merge(&mut self, other: RuntimeConfig) {
        self.warehouse = other.warehouse;
        self.logging = other.logging;
        self.analytics = other.analytics;
        self.tables = other.tables;
    }

    /// Apply environment overrides from a custom source
    pub fn apply_env_overrides_from<E: EnvSource>(&mut self, env: &E) -> Result<()> {
        env_overrides::apply_env_overrides(self, env)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }

    pub fn write_options(&self) -> WriteOptions {
        WriteOptions {
            row_group_size: self.warehouse.parquet_row_group_size,
            ..Default::default()
        }
    }

    pub fn warehouse_options(&self) -> WarehouseOptions {
        WarehouseOptions {
            policy: self.warehouse.metastore_policy,
            declarations: self.tables.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_default_configs() {
        let config = RuntimeConfig::default();
        assert_eq!(config.warehouse.root, "retail_warehouse/");
        assert_eq!(config.warehouse.source_dir, "data/warehouse");
        assert_eq!(config.warehouse.parquet_row_group_size, 32 * 1024);
        assert_eq!(config.warehouse.metastore_policy, MetastorePolicy::Strict);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
        assert_eq!(config.analytics.report_dir, "analytics_reports");
        assert_eq!(config.analytics.reports.year, 2017);
        assert_eq!(config.tables.len(), 6);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_toml_keeps_field_defaults() {
        let config = RuntimeConfig::from_toml(
            r#"
            [warehouse]
            root = "/srv/warehouse"
            metastore_policy = "lenient"

            [logging]
            format = "json"

            [analytics]
            year = 2016
            regions = ["East", "West"]

            [analytics.columns]
            sales = "Sales"
            "#,
        )
        .unwrap();

        assert_eq!(config.warehouse.root, "/srv/warehouse");
        assert_eq!(config.warehouse.source_dir, "data/warehouse");
        assert_eq!(config.warehouse.metastore_policy, MetastorePolicy::Lenient);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.analytics.reports.year, 2016);
        assert_eq!(config.analytics.reports.regions, vec!["East", "West"]);
        assert_eq!(config.analytics.reports.top_n, 10);
        assert_eq!(config.analytics.columns.sales, "Sales");
        assert_eq!(config.analytics.columns.profit, "profit");
        assert_eq!(config.tables.len(), 6);
    }

    #[test]
    fn test_tables_section_replaces_retail_tables() {
        let config = RuntimeConfig::from_toml(
            r#"
            [[tables]]
            name = "fact_returns"
            partition_columns = [{ name = "return_year", type = "int64" }]

            [[tables]]
            name = "dim_store"
            "#,
        )
        .unwrap();

        assert_eq!(config.tables.len(), 2);
        assert_eq!(config.tables[0].partition_column_names(), vec!["return_year"]);
        assert!(!config.tables[1].is_partitioned());

        let options = config.warehouse_options();
        assert_eq!(options.declarations.len(), 2);
        assert_eq!(options.policy, MetastorePolicy::Strict);
    }

    #[test]
    fn test_write_options_carry_row_group_size() {
        let config = RuntimeConfig::from_toml("[warehouse]\nparquet_row_group_size = 1000\n").unwrap();
        let options = config.write_options();
        assert_eq!(options.row_group_size, 1000);
        assert!(!options.allow_schema_change);
    }
}
