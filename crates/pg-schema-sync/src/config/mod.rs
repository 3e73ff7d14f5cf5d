//! Configuration loading, validation, and connection pool construction.

use crate::error::{Result, SyncError};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio_postgres::{Config as PgConfig, NoTls};
use tracing::info;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database connection configuration.
    pub database: DatabaseConfig,

    /// Reconciliation behavior configuration.
    #[serde(default)]
    pub reconcile: ReconcileOptions,
}

/// PostgreSQL connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,

    /// Application schema to reconcile (default: "public").
    #[serde(default = "default_schema")]
    pub schema: String,

    /// Connection timeout in seconds (default: 30).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Per-statement timeout in seconds applied to DDL (default: 300,
    /// 0 disables it).
    #[serde(default = "default_statement_timeout")]
    pub statement_timeout_secs: u64,

    /// Connection pool size (default: 4).
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

/// Reconciliation behavior flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileOptions {
    /// Plan destructive operations (column drops). Default: false.
    #[serde(default)]
    pub allow_destructive: bool,

    /// Create missing secondary indexes. Default: true.
    #[serde(default = "default_true")]
    pub create_indexes: bool,

    /// Create missing foreign key constraints. Default: true.
    #[serde(default = "default_true")]
    pub create_foreign_keys: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            allow_destructive: false,
            create_indexes: true,
            create_foreign_keys: true,
        }
    }
}

fn default_pg_port() -> u16 {
    5432
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_statement_timeout() -> u64 {
    300
}

fn default_pool_size() -> usize {
    4
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a YAML file, then apply environment
    /// overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&content)?.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PG_SCHEMA_SYNC_*` environment overrides, so secrets can stay
    /// out of the config file.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(host) = std::env::var("PG_SCHEMA_SYNC_HOST") {
            self.database.host = host;
        }
        if let Ok(port) = std::env::var("PG_SCHEMA_SYNC_PORT") {
            if let Ok(port) = port.parse() {
                self.database.port = port;
            }
        }
        if let Ok(user) = std::env::var("PG_SCHEMA_SYNC_USER") {
            self.database.user = user;
        }
        if let Ok(password) = std::env::var("PG_SCHEMA_SYNC_PASSWORD") {
            self.database.password = password;
        }
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let db = &self.database;
        if db.host.trim().is_empty() {
            return Err(SyncError::Config("database.host is empty".to_string()));
        }
        if db.database.trim().is_empty() {
            return Err(SyncError::Config("database.database is empty".to_string()));
        }
        if db.user.trim().is_empty() {
            return Err(SyncError::Config("database.user is empty".to_string()));
        }
        if db.schema.trim().is_empty() {
            return Err(SyncError::Config("database.schema is empty".to_string()));
        }
        if db.pool_size == 0 {
            return Err(SyncError::Config(
                "database.pool_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl DatabaseConfig {
    /// Build a deadpool-backed connection pool and verify connectivity.
    pub async fn build_pool(&self) -> Result<Pool> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&self.host);
        pg_config.port(self.port);
        pg_config.dbname(&self.database);
        pg_config.user(&self.user);
        pg_config.password(&self.password);
        pg_config.connect_timeout(std::time::Duration::from_secs(self.connect_timeout_secs));

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(self.pool_size)
            .build()
            .map_err(|e| SyncError::pool(format!("failed to create pool: {}", e), "build"))?;

        let client = pool
            .get()
            .await
            .map_err(|e| SyncError::pool(format!("failed to get connection: {}", e), "connect"))?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| SyncError::pool(format!("connectivity probe failed: {}", e), "probe"))?;

        info!(
            "Connected to PostgreSQL: {}:{}/{}",
            self.host, self.port, self.database
        );

        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_YAML: &str = r#"
database:
  host: localhost
  database: appdb
  user: app
  password: secret
"#;

    #[test]
    fn test_minimal_yaml_applies_defaults() {
        let config = Config::from_yaml(MINIMAL_YAML).unwrap();
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.schema, "public");
        assert_eq!(config.database.pool_size, 4);
        assert!(!config.reconcile.allow_destructive);
        assert!(config.reconcile.create_indexes);
        assert!(config.reconcile.create_foreign_keys);
    }

    #[test]
    fn test_full_yaml_overrides() {
        let yaml = r#"
database:
  host: db.internal
  port: 5433
  database: appdb
  user: app
  password: secret
  schema: app
  pool_size: 8
reconcile:
  allow_destructive: true
  create_indexes: false
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.database.port, 5433);
        assert_eq!(config.database.schema, "app");
        assert!(config.reconcile.allow_destructive);
        assert!(!config.reconcile.create_indexes);
        assert!(config.reconcile.create_foreign_keys);
    }

    #[test]
    fn test_rejects_empty_host() {
        let yaml = r#"
database:
  host: "  "
  database: appdb
  user: app
  password: secret
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("database.host"));
    }

    #[test]
    fn test_rejects_zero_pool_size() {
        let yaml = r#"
database:
  host: localhost
  database: appdb
  user: app
  password: secret
  pool_size: 0
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_env_override_replaces_password() {
        let config = Config::from_yaml(MINIMAL_YAML).unwrap();
        std::env::set_var("PG_SCHEMA_SYNC_PASSWORD", "from-env");
        let config = config.with_env_overrides();
        std::env::remove_var("PG_SCHEMA_SYNC_PASSWORD");
        assert_eq!(config.database.password, "from-env");
        assert_eq!(config.database.host, "localhost");
    }

    #[test]
    fn test_malformed_yaml_is_config_error() {
        let err = Config::from_yaml("database: [").unwrap_err();
        assert!(matches!(err, SyncError::Yaml(_)));
    }
}
