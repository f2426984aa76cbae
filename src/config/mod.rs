/// Configuration management for the Assessway engine
///
/// Handles server configuration, storage, engine tuning, the advisory
/// collaborator and reviewer directory. Every value can be set from an
/// `ASSESSWAY_*` environment variable.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Workflow engine tuning
    pub engine: EngineConfig,
    /// AI advisory collaborator
    pub advisory: AdvisoryConfig,
    /// Identity resolution for reviewers
    pub access: AccessConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Sqlite,
    Memory,
}

impl FromStr for StorageKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(StorageKind::Sqlite),
            "memory" => Ok(StorageKind::Memory),
            other => Err(anyhow::anyhow!("Unknown storage backend: {}", other)),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding the database file (default: "data")
    pub data_dir: String,
    /// Database file name inside `data_dir`
    pub file_name: String,
    pub storage: StorageKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Completeness (0.0..=1.0) a snapshot needs before submission
    pub completeness_threshold: f64,
    /// Axes that must be answered; empty means every present axis counts
    pub required_axes: Vec<String>,
    /// Seconds a heartbeat keeps a viewer listed as active
    pub liveness_secs: u64,
    /// Cron expression for the presence sweeper
    pub presence_sweep: String,
    /// Default activity page size
    pub activity_page_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisoryConfig {
    /// Advisory endpoint; advisory is disabled when unset
    pub url: Option<String>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Reviewer allow-list; when unset any non-blank id resolves
    pub known_users: Option<Vec<String>>,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Completeness threshold in [0, 1]; unparsable or non-finite input falls back to 1.0
fn parse_threshold(raw: Option<&str>) -> f64 {
    match raw.and_then(|raw| raw.trim().parse::<f64>().ok()) {
        Some(value) if value.is_finite() => value.clamp(0.0, 1.0),
        Some(_) => {
            tracing::warn!("⚠️ Ignoring non-finite completeness threshold");
            1.0
        }
        None => 1.0,
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: env_or("ASSESSWAY_HOST", "0.0.0.0"),
                port: env_parse("ASSESSWAY_PORT", 3004),
            },
            database: DatabaseConfig {
                data_dir: env_or("ASSESSWAY_DATA_DIR", "data"),
                file_name: "assessway.db".to_string(),
                storage: env_parse("ASSESSWAY_STORAGE", StorageKind::Sqlite),
            },
            engine: EngineConfig {
                completeness_threshold: parse_threshold(
                    std::env::var("ASSESSWAY_COMPLETENESS_THRESHOLD").ok().as_deref(),
                ),
                required_axes: split_list(&env_or("ASSESSWAY_REQUIRED_AXES", "")),
                liveness_secs: env_parse("ASSESSWAY_LIVENESS_SECS", 30),
                presence_sweep: env_or("ASSESSWAY_PRESENCE_SWEEP", "*/30 * * * * *"),
                activity_page_size: env_parse("ASSESSWAY_ACTIVITY_PAGE_SIZE", 50_usize).clamp(1, 500),
            },
            advisory: AdvisoryConfig {
                url: std::env::var("ASSESSWAY_ADVISORY_URL").ok().filter(|u| !u.trim().is_empty()),
                timeout_ms: env_parse("ASSESSWAY_ADVISORY_TIMEOUT_MS", 8000),
            },
            access: AccessConfig {
                known_users: std::env::var("ASSESSWAY_KNOWN_USERS").ok().map(|raw| split_list(&raw)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_rejects_non_finite_values() {
        assert_eq!(parse_threshold(Some("NaN")), 1.0);
        assert_eq!(parse_threshold(Some("inf")), 1.0);
        assert_eq!(parse_threshold(Some("-inf")), 1.0);
        assert_eq!(parse_threshold(Some(" 0.8 ")), 0.8);
        assert_eq!(parse_threshold(Some("2")), 1.0);
        assert_eq!(parse_threshold(Some("-0.5")), 0.0);
        assert_eq!(parse_threshold(Some("most")), 1.0);
        assert_eq!(parse_threshold(None), 1.0);
    }

    #[test]
    fn lists_ignore_blanks() {
        assert_eq!(split_list(" strategy, ,people ,"), vec!["strategy", "people"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn storage_kind_is_case_insensitive() {
        assert_eq!("Memory".parse::<StorageKind>().unwrap(), StorageKind::Memory);
        assert!("postgres".parse::<StorageKind>().is_err());
    }
}
