use super::{LogFormat, RuntimeConfig};
use anyhow::{anyhow, Context, Result};
use retailiq_warehouse::MetastorePolicy;

pub const ENV_PREFIX: &str = "RETAILIQ_";

/// Abstraction over environment-variable lookups so tests can supply their
/// own source of overrides.
pub trait EnvSource {
    /// Get an environment variable; `key` is given without the RETAILIQ_ prefix
    fn get(&self, key: &str) -> Option<String>;

    /// Get an environment variable WITHOUT the RETAILIQ_ prefix
    fn get_raw(&self, key: &str) -> Option<String>;
}

/// Apply environment-variable overrides (highest priority) to the runtime config.
pub fn apply_env_overrides<E: EnvSource>(config: &mut RuntimeConfig, env: &E) -> Result<()> {
    // Warehouse location
    if let Some(root) = get_env_string(env, "WAREHOUSE_ROOT")? {
        config.warehouse.root = root;
    }
    if let Some(dir) = get_env_string(env, "SOURCE_DIR")? {
        config.warehouse.source_dir = dir;
    }
    if let Some(val) = get_env_usize(env, "PARQUET_ROW_GROUP_SIZE")? {
        config.warehouse.parquet_row_group_size = val;
    }
    if let Some(policy) = get_env_string(env, "METASTORE_POLICY")? {
        config.warehouse.metastore_policy = policy
            .parse::<MetastorePolicy>()
            .map_err(|e| anyhow!(e))
            .context("Invalid RETAILIQ_METASTORE_POLICY value")?;
    }

    // Reports
    if let Some(dir) = get_env_string(env, "REPORT_DIR")? {
        config.analytics.report_dir = dir;
    }

    // Logging; RUST_LOG is honoured when no explicit level is set
    if let Some(level) = get_env_string(env, "LOG_LEVEL")? {
        config.logging.level = level;
    } else if let Some(level) = env.get_raw("RUST_LOG") {
        config.logging.level = level;
    }
    if let Some(format) = get_env_string(env, "LOG_FORMAT")? {
        config.logging.format = format
            .parse::<LogFormat>()
            .context("Invalid RETAILIQ_LOG_FORMAT value")?;
    }

    Ok(())
}

fn get_env_string<E: EnvSource>(env: &E, key: &str) -> Result<Option<String>> {
    Ok(env.get(key).filter(|v| !v.trim().is_empty()))
}

fn get_env_usize<E: EnvSource>(env: &E, key: &str) -> Result<Option<usize>> {
    match get_env_string(env, key)? {
        Some(val) => {
            let parsed = val
                .trim()
                .parse::<usize>()
                .map_err(|e| anyhow!("Failed to parse {}{}: {}", ENV_PREFIX, key, e))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapEnv(HashMap<String, String>);

    impl MapEnv {
        fn new(pairs: &[(&str, &str)]) -> Self {
            Self(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            )
        }
    }

    impl EnvSource for MapEnv {
        fn get(&self, key: &str) -> Option<String> {
            self.0.get(&format!("{}{}", ENV_PREFIX, key)).cloned()
        }

        fn get_raw(&self, key: &str) -> Option<String> {
            self.0.get(key).cloned()
        }
    }

    #[test]
    fn test_env_overrides_replace_file_values() {
        let mut config = RuntimeConfig::default();
        let env = MapEnv::new(&[
            ("RETAILIQ_WAREHOUSE_ROOT", "/data/wh"),
            ("RETAILIQ_SOURCE_DIR", "/data/src"),
            ("RETAILIQ_REPORT_DIR", "/data/reports"),
            ("RETAILIQ_PARQUET_ROW_GROUP_SIZE", "4096"),
            ("RETAILIQ_METASTORE_POLICY", "skip"),
            ("RETAILIQ_LOG_LEVEL", "debug"),
            ("RETAILIQ_LOG_FORMAT", "json"),
        ]);

        apply_env_overrides(&mut config, &env).unwrap();

        assert_eq!(config.warehouse.root, "/data/wh");
        assert_eq!(config.warehouse.source_dir, "/data/src");
        assert_eq!(config.analytics.report_dir, "/data/reports");
        assert_eq!(config.warehouse.parquet_row_group_size, 4096);
        assert_eq!(config.warehouse.metastore_policy, MetastorePolicy::Lenient);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_rust_log_used_without_explicit_level() {
        let mut config = RuntimeConfig::default();
        apply_env_overrides(&mut config, &MapEnv::new(&[("RUST_LOG", "warn")])).unwrap();
        assert_eq!(config.logging.level, "warn");

        let mut config = RuntimeConfig::default();
        let env = MapEnv::new(&[("RUST_LOG", "warn"), ("RETAILIQ_LOG_LEVEL", "trace")]);
        apply_env_overrides(&mut config, &env).unwrap();
        assert_eq!(config.logging.level, "trace");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = RuntimeConfig::default();
        let err = apply_env_overrides(
            &mut config,
            &MapEnv::new(&[("RETAILIQ_PARQUET_ROW_GROUP_SIZE", "lots")]),
        )
        .unwrap_err();
        assert!(err
            .to_string()
            .contains("Failed to parse RETAILIQ_PARQUET_ROW_GROUP_SIZE"));

        let mut config = RuntimeConfig::default();
        assert!(apply_env_overrides(
            &mut config,
            &MapEnv::new(&[("RETAILIQ_METASTORE_POLICY", "maybe")])
        )
        .is_err());
    }

    #[test]
    fn test_empty_values_are_ignored() {
        let mut config = RuntimeConfig::default();
        apply_env_overrides(&mut config, &MapEnv::new(&[("RETAILIQ_WAREHOUSE_ROOT", "")])).unwrap();
        assert_eq!(config.warehouse.root, "retail_warehouse/");
    }
}
