use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::paths::DataPaths;

/// Engine tunables, all sourced from the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub paths: DataPaths,
    /// Worker cycle period.
    pub cycle_interval: Duration,
    /// Files ingested per cycle.
    pub files_per_cycle: u32,
    /// Per-phase deadline inside a cycle.
    pub cycle_timeout: Duration,
    /// Cycles between gap scans.
    pub gap_check_interval: u32,
    /// Minimum contiguity gap worth reporting.
    pub gap_threshold: Duration,
    pub auto_recover_gaps: bool,
    /// Worker pool size for the template→file index build.
    pub template_index_workers: usize,
    /// Main-thread in-flight window for the fallback build engine.
    pub template_index_concurrency: usize,
    pub vote_index_build_on_startup: bool,
}

impl EngineConfig {
    /// Load from process environment, applying defaults for unset values.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load through an explicit lookup, for tests and embedding.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = lookup("DATA_DIR").unwrap_or_else(default_data_dir);
        if data_dir.trim().is_empty() {
            return Err(ConfigError::DataDir(
                "DATA_DIR is set but empty".to_string(),
            ));
        }
        let mut paths = DataPaths::new(data_dir);
        if let Some(db) = lookup("WAREHOUSE_DB_PATH") {
            let db = db.trim();
            if db.is_empty() {
                return Err(ConfigError::DataDir(
                    "WAREHOUSE_DB_PATH is set but empty".to_string(),
                ));
            }
            paths = paths.with_db_path(db);
        }

        Ok(Self {
            paths,
            cycle_interval: Duration::from_millis(parse_or(
                &lookup,
                "ENGINE_INTERVAL_MS",
                30_000,
            )?),
            files_per_cycle: parse_or(&lookup, "ENGINE_FILES_PER_CYCLE", 3)?,
            cycle_timeout: Duration::from_millis(parse_or(
                &lookup,
                "ENGINE_CYCLE_TIMEOUT_MS",
                300_000,
            )?),
            gap_check_interval: parse_or(&lookup, "GAP_CHECK_INTERVAL", 10)?,
            gap_threshold: Duration::from_millis(parse_or(
                &lookup,
                "GAP_THRESHOLD_MS",
                120_000,
            )?),
            auto_recover_gaps: parse_bool_or(&lookup, "AUTO_RECOVER_GAPS", true)?,
            template_index_workers: parse_or(
                &lookup,
                "TEMPLATE_INDEX_WORKERS",
                default_worker_count() as u64,
            )? as usize,
            template_index_concurrency: parse_or(
                &lookup,
                "TEMPLATE_INDEX_CONCURRENCY",
                6,
            )? as usize,
            vote_index_build_on_startup: parse_bool_or(
                &lookup,
                "VOTE_INDEX_BUILD_ON_STARTUP",
                true,
            )?,
        })
    }
}

/// `min(8, max(2, cores - 1))` — leave one core for the flusher and the
/// cooperative scheduler.
pub fn default_worker_count() -> usize {
    num_cpus::get().saturating_sub(1).clamp(2, 8)
}

fn default_data_dir() -> String {
    if cfg!(windows) {
        r"C:\ledgerhouse\data".to_string()
    } else {
        "/var/lib/ledgerhouse".to_string()
    }
}

fn parse_or<T, F>(lookup: &F, name: &'static str, default: T) -> Result<T>
where
    T: std::str::FromStr + Copy,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(default);
            }
            trimmed.parse().map_err(|_| ConfigError::InvalidValue {
                name,
                value: raw,
                reason: "expected a number",
            })
        }
    }
}

fn parse_bool_or<F>(lookup: &F, name: &'static str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "" => Ok(default),
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                name,
                value: raw,
                reason: "expected a boolean",
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from<'a>(map: &'a HashMap<&'a str, &'a str>) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| map.get(name).map(|v| v.to_string())
    }

    #[test]
    fn defaults_when_unset() {
        let map = HashMap::from([("DATA_DIR", "/tmp/wh")]);
        let config = EngineConfig::from_lookup(lookup_from(&map)).unwrap();
        assert_eq!(config.cycle_interval, Duration::from_secs(30));
        assert_eq!(config.files_per_cycle, 3);
        assert_eq!(config.cycle_timeout, Duration::from_secs(300));
        assert_eq!(config.gap_check_interval, 10);
        assert_eq!(config.gap_threshold, Duration::from_secs(120));
        assert!(config.auto_recover_gaps);
        assert_eq!(config.template_index_concurrency, 6);
        assert!(config.vote_index_build_on_startup);
        assert!((2..=8).contains(&config.template_index_workers));
        assert_eq!(
            config.paths.db_path(),
            std::path::Path::new("/tmp/wh/warehouse.db")
        );
    }

    #[test]
    fn overrides_are_parsed() {
        let map = HashMap::from([
            ("DATA_DIR", "/tmp/wh"),
            ("ENGINE_INTERVAL_MS", "5000"),
            ("ENGINE_FILES_PER_CYCLE", "10"),
            ("AUTO_RECOVER_GAPS", "false"),
            ("TEMPLATE_INDEX_WORKERS", "4"),
            ("WAREHOUSE_DB_PATH", "/elsewhere/wh.db"),
        ]);
        let config = EngineConfig::from_lookup(lookup_from(&map)).unwrap();
        assert_eq!(config.cycle_interval, Duration::from_secs(5));
        assert_eq!(config.files_per_cycle, 10);
        assert!(!config.auto_recover_gaps);
        assert_eq!(config.template_index_workers, 4);
        assert_eq!(
            config.paths.db_path(),
            std::path::Path::new("/elsewhere/wh.db")
        );
    }

    #[test]
    fn garbage_numbers_are_rejected() {
        let map = HashMap::from([("ENGINE_INTERVAL_MS", "soon")]);
        let err = EngineConfig::from_lookup(lookup_from(&map)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name: "ENGINE_INTERVAL_MS", .. }));
    }

    #[test]
    fn empty_directories_are_rejected() {
        let map = HashMap::from([("DATA_DIR", "   ")]);
        let err = EngineConfig::from_lookup(lookup_from(&map)).unwrap_err();
        assert!(matches!(err, ConfigError::DataDir(_)));

        let map = HashMap::from([("DATA_DIR", "/tmp/wh"), ("WAREHOUSE_DB_PATH", "")]);
        let err = EngineConfig::from_lookup(lookup_from(&map)).unwrap_err();
        assert!(matches!(err, ConfigError::DataDir(_)));
    }
}
