use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::models::PackageStatus;

/// Main configuration structure for Freight Desk
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FreightDeskConfig {
    /// Consolidation and status workflow settings
    pub workflow: WorkflowConfig,
    /// Snapshot store settings
    pub store: StoreConfig,
    /// Database settings (optional, needs the `database` feature)
    pub database: Option<DatabaseConfig>,
    /// Observability settings
    pub observability: ObservabilityConfig,
    /// Operator CLI settings
    pub desk: DeskConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Prefix of generated consolidated tracking numbers
    pub tracking_prefix: String,
    /// How many random suffixes to try before giving up on a unique number
    pub tracking_number_attempts: u32,
    /// Retries of a read-check-write cycle after a concurrent modification
    pub max_conflict_retries: u32,
    /// Target statuses that trigger a customer notification
    pub notify_on: Vec<PackageStatus>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            tracking_prefix: "CONS".to_string(),
            tracking_number_attempts: 16,
            max_conflict_retries: 3,
            notify_on: vec![
                PackageStatus::Customs,
                PackageStatus::Ready,
                PackageStatus::Delivered,
                PackageStatus::Delayed,
            ],
        }
    }
}

impl WorkflowConfig {
    pub fn should_notify(&self, status: PackageStatus) -> bool {
        self.notify_on.contains(&status)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON snapshot used when no database is configured
    pub snapshot_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot_path: ".freight-desk/state.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database URL (SQLite file path or connection string)
    pub url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Enable automatic migrations
    pub auto_migrate: bool,
    /// How long a writer waits for another writer's lock before failing
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://.freight-desk/freight-desk.db".to_string(),
            max_connections: 10,
            auto_migrate: true,
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level used when RUST_LOG is not set
    pub log_level: String,
    /// JSON log lines instead of human-readable ones
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeskConfig {
    /// Actor recorded in history when `--actor` is not given
    pub default_actor_id: i64,
}

impl Default for DeskConfig {
    fn default() -> Self {
        Self {
            default_actor_id: 1,
        }
    }
}

impl FreightDeskConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (freight-desk.toml, .freight-desk-rc)
    /// 3. Environment variables (prefixed with FREIGHT_DESK_, sections split by `__`)
    pub fn load() -> Result<Self> {
        let mut builder = Config::builder();

        if Path::new("freight-desk.toml").exists() {
            builder = builder.add_source(File::with_name("freight-desk"));
        }

        if Path::new(".freight-desk-rc").exists() {
            builder = builder.add_source(
                File::with_name(".freight-desk-rc").format(config::FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix("FREIGHT_DESK")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let freight_desk_config: FreightDeskConfig = config.try_deserialize()?;

        Ok(freight_desk_config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<FreightDeskConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        // Load .env file first
        let _ = FreightDeskConfig::load_env_file();
        FreightDeskConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static FreightDeskConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

/// Initialize configuration (called at startup)
pub fn init_config() -> Result<()> {
    let _config = config()?;
    tracing::info!("Configuration loaded successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FreightDeskConfig::default();
        assert_eq!(config.workflow.tracking_prefix, "CONS");
        assert!(config.workflow.should_notify(PackageStatus::Ready));
        assert!(!config.workflow.should_notify(PackageStatus::Processing));
        assert!(config.database.is_none());
        assert_eq!(config.desk.default_actor_id, 1);
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let parsed: FreightDeskConfig = toml::from_str(
            r#"
            [workflow]
            tracking_prefix = "GRP"
            notify_on = ["delivered"]
            "#,
        )
        .unwrap();

        assert_eq!(parsed.workflow.tracking_prefix, "GRP");
        assert_eq!(parsed.workflow.notify_on, vec![PackageStatus::Delivered]);
        assert_eq!(parsed.workflow.max_conflict_retries, 3);
        assert_eq!(parsed.store.snapshot_path, ".freight-desk/state.json");
    }

    #[test]
    fn test_saved_config_parses_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("freight-desk.toml");
        let mut config = FreightDeskConfig::default();
        config.database = Some(DatabaseConfig::default());
        config.save_to_file(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: FreightDeskConfig = toml::from_str(&raw).unwrap();
        assert_eq!(parsed.database.unwrap().max_connections, 10);
    }

    #[test]
    fn test_database_section_with_only_url() {
        let parsed: FreightDeskConfig = toml::from_str(
            r#"
            [database]
            url = "sqlite://desk.db"
            "#,
        )
        .unwrap();

        let database = parsed.database.unwrap();
        assert_eq!(database.url, "sqlite://desk.db");
        assert_eq!(database.max_connections, 10);
        assert!(database.auto_migrate);
        assert_eq!(database.busy_timeout_ms, 5_000);
    }
}
