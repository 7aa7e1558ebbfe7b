//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod auth;
mod limits;
mod storage;

pub use auth::{AuthConfig, ClassroomConfig, DEFAULT_MIN_PASSWORD_LENGTH};
pub use limits::{
    LedgerLimits, DEFAULT_MAX_BATCH_WRITES, DEFAULT_PURCHASE_MAX_RETRIES,
    DEFAULT_RETRY_MAX_DELAY_MS, DEFAULT_RETRY_MIN_DELAY_MS,
};
pub use storage::{SqliteConfig, StorageConfig, StorageType};

use serde::Deserialize;

use crate::storage::MAX_BATCH_WRITES;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "CLASSROOM_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "CLASSROOM";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "CLASSROOM_LOG";

/// Configuration values that load but cannot be used.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("limits.max_batch_writes must be between 1 and {max}, got {value}")]
    BatchLimitOutOfRange { value: usize, max: usize },

    #[error("limits.retry_min_delay_ms ({min}) exceeds limits.retry_max_delay_ms ({max})")]
    RetryDelaysInverted { min: u64, max: u64 },

    #[error("auth.teacher_emails is empty; nobody could manage the classroom")]
    NoTeachers,

    #[error("classroom.id must not be empty")]
    MissingClassroomId,
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Classroom served by this process.
    pub classroom: ClassroomConfig,
    /// Role resolution and account settings.
    pub auth: AuthConfig,
    /// Batch and retry limits.
    pub limits: LedgerLimits,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix,
    ///    e.g. `CLASSROOM__STORAGE__TYPE=sqlite`
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("auth.teacher_emails"),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML document, without consulting the
    /// environment.
    pub fn from_yaml(yaml: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the ledger cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let batch = self.limits.max_batch_writes;
        if batch == 0 || batch > MAX_BATCH_WRITES {
            return Err(ConfigError::BatchLimitOutOfRange {
                value: batch,
                max: MAX_BATCH_WRITES,
            });
        }
        if self.limits.retry_min_delay_ms > self.limits.retry_max_delay_ms {
            return Err(ConfigError::RetryDelaysInverted {
                min: self.limits.retry_min_delay_ms,
                max: self.limits.retry_max_delay_ms,
            });
        }
        if self.auth.teacher_emails.is_empty() {
            return Err(ConfigError::NoTeachers);
        }
        if self.classroom.id.trim().is_empty() {
            return Err(ConfigError::MissingClassroomId);
        }
        Ok(())
    }

    /// Create config for testing: in-memory storage, fast retries.
    pub fn for_test() -> Self {
        Self {
            limits: LedgerLimits {
                retry_min_delay_ms: 1,
                retry_max_delay_ms: 5,
                ..LedgerLimits::default()
            },
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.storage.storage_type, StorageType::Memory);
        assert_eq!(config.classroom.id, "main-class");
        assert_eq!(config.limits.max_batch_writes, 499);
        assert_eq!(config.limits.purchase_max_retries, 5);
        assert_eq!(config.auth.min_password_length, 6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_yaml_overrides() {
        let config = Config::from_yaml(
            r#"
storage:
  type: sqlite
  sqlite:
    path: /tmp/class.db
classroom:
  id: room-7
auth:
  teacher_emails:
    - ms.frizzle@school.test
limits:
  max_batch_writes: 100
"#,
        )
        .unwrap();

        assert_eq!(config.storage.storage_type, StorageType::Sqlite);
        assert_eq!(config.storage.sqlite.path, "/tmp/class.db");
        assert_eq!(config.classroom.id, "room-7");
        assert_eq!(config.classroom.name, "Main Class");
        assert_eq!(config.auth.teacher_emails, vec!["ms.frizzle@school.test"]);
        assert_eq!(config.limits.max_batch_writes, 100);
        assert_eq!(config.limits.purchase_max_retries, 5);
    }

    #[test]
    fn test_validate_rejects_oversized_batches() {
        let mut config = Config::default();
        config.limits.max_batch_writes = 501;
        assert_eq!(
            config.validate(),
            Err(ConfigError::BatchLimitOutOfRange {
                value: 501,
                max: 500
            })
        );
    }

    #[test]
    fn test_validate_requires_a_teacher() {
        let mut config = Config::default();
        config.auth.teacher_emails.clear();
        assert_eq!(config.validate(), Err(ConfigError::NoTeachers));
    }

    #[test]
    fn test_config_for_test_is_valid() {
        assert!(Config::for_test().validate().is_ok());
    }
}
