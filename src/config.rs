// Configuration module - runtime settings and where they come from
//
// This module is responsible for:
// 1. Parsing the TOML configuration (global runtime settings, MongoDB backend)
// 2. Validating every field and reporting all problems at once
// 3. Providing reload sources: a TOML file or a settings document in MongoDB

use async_trait::async_trait;
use bson::{doc, Document};
use mongodb::{Client, Collection, Database};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::logging::LogLevel;

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] ValidationErrors),

    #[error("MongoDB connection failed: {0}")]
    MongoConnectionError(#[from] mongodb::error::Error),

    #[error("Settings document not found for key: {0}")]
    SettingsNotFound(String),

    #[error("Invalid settings format: {0}")]
    InvalidSettings(#[from] bson::de::Error),
}

/// A single configuration field that failed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every validation failure found in one configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    fn push(&mut self, field: &str, message: &str) {
        self.0.push(FieldError {
            field: field.to_string(),
            message: message.to_string(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the named field has at least one error
    pub fn contains(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [] => write!(f, "no errors"),
            [single] => write!(f, "{}", single),
            many => {
                write!(f, "multiple validation errors:")?;
                for err in many {
                    write!(f, "\n  - {}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ValidationErrors {}

/// Main configuration structure
///
/// All sections and fields are optional; missing values take the defaults below.
///
/// # Example
/// ```toml
/// [global]
/// poll_interval = "30s"
/// log_level = "debug"
/// batch_size = 20
/// retry_attempts = 5
/// retry_delay = "2s"
///
/// [mongodb]
/// enabled = true
/// uri = "mongodb://localhost:27017"
/// database = "monitoring"
/// collection = "metrics"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Poll cadence, batching, retry and logging settings
    pub global: GlobalConfig,

    /// MongoDB backend settings
    pub mongodb: MongoConfig,
}

/// Global runtime settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// How often the collector is invoked
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Log verbosity (hot-reloadable)
    pub log_level: LogLevel,

    /// Buffered points that trigger an immediate flush
    pub batch_size: usize,

    /// Periodic flush cadence; defaults to the poll interval
    #[serde(with = "humantime_serde")]
    pub flush_interval: Option<Duration>,

    /// Write attempts per backend per flush
    pub retry_attempts: u32,

    /// Pause between write attempts
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,

    /// Upper bound for the final collection, the drain flush and backend close
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            log_level: LogLevel::Info,
            batch_size: 10,
            flush_interval: None,
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl GlobalConfig {
    /// Flush interval actually used by the pipeline
    pub fn effective_flush_interval(&self) -> Duration {
        self.flush_interval.unwrap_or(self.poll_interval)
    }
}

/// Settings for the MongoDB backend
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MongoConfig {
    pub enabled: bool,

    /// Connection URI (e.g., "mongodb://localhost:27017")
    pub uri: String,

    pub database: String,

    /// Collection receiving the data points
    pub collection: String,

    /// Create the name/timestamp index when the backend initializes
    pub create_indexes: bool,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            uri: "mongodb://localhost:27017".to_string(),
            database: "monitoring".to_string(),
            collection: "metrics".to_string(),
            create_indexes: false,
        }
    }
}

impl MonitorConfig {
    /// Loads and validates configuration from a TOML file
    ///
    /// # Errors
    /// Returns error if the file cannot be read, is not valid TOML or fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        contents.parse()
    }

    /// Checks every field and collects all problems
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errs = ValidationErrors::default();
        self.validate_global(&mut errs);
        self.validate_mongodb(&mut errs);

        if errs.is_empty() {
            Ok(())
        } else {
            Err(errs)
        }
    }

    fn validate_global(&self, errs: &mut ValidationErrors) {
        let global = &self.global;

        if global.poll_interval.is_zero() {
            errs.push("global.poll_interval", "must be positive");
        }
        if global.batch_size == 0 {
            errs.push("global.batch_size", "must be positive");
        }
        if global.flush_interval.is_some_and(|d| d.is_zero()) {
            errs.push("global.flush_interval", "must be positive");
        }
        if global.retry_attempts == 0 {
            errs.push("global.retry_attempts", "must be positive");
        }
        if global.retry_delay.is_zero() {
            errs.push("global.retry_delay", "must be positive");
        }
        if global.shutdown_timeout.is_zero() {
            errs.push("global.shutdown_timeout", "must be positive");
        }
    }

    fn validate_mongodb(&self, errs: &mut ValidationErrors) {
        let mongo = &self.mongodb;
        if !mongo.enabled {
            return;
        }

        if mongo.uri.is_empty() {
            errs.push("mongodb.uri", "required when MongoDB is enabled");
        }
        if mongo.database.is_empty() {
            errs.push("mongodb.database", "required when MongoDB is enabled");
        }
        if mongo.collection.is_empty() {
            errs.push("mongodb.collection", "required when MongoDB is enabled");
        }
    }
}

impl FromStr for MonitorConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: MonitorConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

/// Somewhere a fresh configuration can be read from on reload
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Human-readable description for logs
    fn describe(&self) -> String;

    /// Reads and validates the current configuration
    async fn load(&self) -> Result<MonitorConfig, ConfigError>;
}

/// Reloads configuration from a TOML file on disk
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    fn describe(&self) -> String {
        format!("file '{}'", self.path.display())
    }

    async fn load(&self) -> Result<MonitorConfig, ConfigError> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ConfigError::Io {
                path: self.path.display().to_string(),
                source: e,
            })?;
        contents.parse()
    }
}

/// Loads configuration from the MonitoringSettings collection in MongoDB
///
/// Each node has its own settings document identified by `key`. Every other
/// field of the document is read as a [`MonitorConfig`].
///
/// # Example MongoDB Document
/// ```json
/// {
///   "key": "1111-1111",
///   "global": { "poll_interval": "30s", "log_level": "debug" },
///   "mongodb": { "enabled": true, "collection": "metrics" }
/// }
/// ```
pub struct MongoConfigSource {
    /// MongoDB client instance
    client: Client,

    /// Database name where MonitoringSettings collection resides
    database_name: String,

    /// Settings document key for this node
    key: String,
}

impl MongoConfigSource {
    /// Connects to MongoDB and verifies the connection
    ///
    /// # Arguments
    /// * `connection_string` - MongoDB connection URI (e.g., "mongodb://localhost:27017")
    /// * `database_name` - Name of the database to use (optional, defaults to "monitoring")
    /// * `key` - The configuration key (e.g., "1111-1111")
    pub async fn connect(
        connection_string: &str,
        database_name: Option<&str>,
        key: &str,
    ) -> Result<Self, ConfigError> {
        let client = Client::with_uri_str(connection_string).await?;

        // Verify connection by listing databases (lightweight operation)
        match client.list_database_names(None, None).await {
            Ok(_) => info!("Successfully connected to MongoDB"),
            Err(e) => {
                warn!("MongoDB connection verification failed: {}", e);
                return Err(ConfigError::MongoConnectionError(e));
            }
        }

        Ok(Self {
            client,
            database_name: database_name.unwrap_or("monitoring").to_string(),
            key: key.to_string(),
        })
    }

    fn get_database(&self) -> Database {
        self.client.database(&self.database_name)
    }

    /// Returns the MongoDB client, so the backend can share the connection pool
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }
}

#[async_trait]
impl ConfigSource for MongoConfigSource {
    fn describe(&self) -> String {
        format!("MongoDB settings '{}'", self.key)
    }

    /// Executes `db.MonitoringSettings.findOne({ key: "<key>" })`
    async fn load(&self) -> Result<MonitorConfig, ConfigError> {
        info!("Loading monitoring settings for key: {}", self.key);

        let collection: Collection<Document> = self.get_database().collection("MonitoringSettings");

        match collection.find_one(doc! { "key": &self.key }, None).await? {
            Some(document) => {
                let config = settings_from_document(document)?;
                info!(
                    "Loaded settings: poll interval {:?}, batch size {}",
                    config.global.poll_interval, config.global.batch_size
                );
                Ok(config)
            }
            None => {
                warn!("No settings found for key: {}", self.key);
                Err(ConfigError::SettingsNotFound(self.key.clone()))
            }
        }
    }
}

fn settings_from_document(mut document: Document) -> Result<MonitorConfig, ConfigError> {
    document.remove("_id");
    document.remove("key");
    let config: MonitorConfig = bson::from_document(document)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = MonitorConfig::default();
        assert_eq!(config.global.poll_interval, Duration::from_secs(10));
        assert_eq!(config.global.log_level, LogLevel::Info);
        assert_eq!(config.global.batch_size, 10);
        assert_eq!(config.global.retry_attempts, 3);
        assert_eq!(config.global.retry_delay, Duration::from_secs(1));
        assert_eq!(config.global.effective_flush_interval(), Duration::from_secs(10));
        assert!(!config.mongodb.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let config: MonitorConfig = r#"
[global]
poll_interval = "30s"
log_level = "DEBUG"
batch_size = 20
flush_interval = "5s"
retry_attempts = 5
retry_delay = "250ms"
shutdown_timeout = "10s"

[mongodb]
enabled = true
uri = "mongodb://db:27017"
database = "prod"
collection = "points"
create_indexes = true
"#
        .parse()
        .unwrap();

        assert_eq!(config.global.poll_interval, Duration::from_secs(30));
        assert_eq!(config.global.log_level, LogLevel::Debug);
        assert_eq!(config.global.batch_size, 20);
        assert_eq!(config.global.effective_flush_interval(), Duration::from_secs(5));
        assert_eq!(config.global.retry_attempts, 5);
        assert_eq!(config.global.retry_delay, Duration::from_millis(250));
        assert_eq!(config.global.shutdown_timeout, Duration::from_secs(10));
        assert!(config.mongodb.enabled);
        assert_eq!(config.mongodb.collection, "points");
        assert!(config.mongodb.create_indexes);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: MonitorConfig = "".parse().unwrap();
        assert_eq!(config, MonitorConfig::default());
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let err = r#"
[global]
poll_interval = "0s"
batch_size = 0
retry_attempts = 0

[mongodb]
enabled = true
uri = ""
"#
        .parse::<MonitorConfig>()
        .unwrap_err();

        match err {
            ConfigError::Invalid(errs) => {
                assert_eq!(errs.len(), 4);
                assert!(errs.contains("global.poll_interval"));
                assert!(errs.contains("global.batch_size"));
                assert!(errs.contains("global.retry_attempts"));
                assert!(errs.contains("mongodb.uri"));
                assert!(errs.to_string().starts_with("multiple validation errors:"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_log_level_rejected() {
        let err = "[global]\nlog_level = \"loud\"".parse::<MonitorConfig>().unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_file_missing() {
        let err = MonitorConfig::from_file("/nonexistent/config.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[tokio::test]
    async fn test_file_source_reads_latest_contents() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[global]\npoll_interval = \"2s\"").unwrap();

        let source = FileConfigSource::new(file.path());
        let config = source.load().await.unwrap();
        assert_eq!(config.global.poll_interval, Duration::from_secs(2));
        assert!(source.describe().contains("file"));

        std::fs::write(file.path(), "[global]\nbatch_size = 0").unwrap();
        assert!(matches!(source.load().await, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_settings_document_conversion() {
        let document = doc! {
            "_id": "abc",
            "key": "1111-1111",
            "global": { "poll_interval": "15s", "log_level": "warn" },
        };

        let config = settings_from_document(document).unwrap();
        assert_eq!(config.global.poll_interval, Duration::from_secs(15));
        assert_eq!(config.global.log_level, LogLevel::Warn);
        assert_eq!(config.global.batch_size, 10);
    }
}
