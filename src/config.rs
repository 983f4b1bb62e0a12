//! Configuration file loading and validation.
//!
//! The gateway is configured by a single JSON file selected with
//! `--config`. The `dialect` tag names the downstream sink and must have a
//! matching section (`blob` or `queue`) with that dialect's settings.
//! Everything else has serviceable defaults sized from the host's CPU
//! count.
//!
//! Invalid configuration is a startup error: the process logs the problem
//! and exits with code 1 before binding the listener.

use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::event::TimeMode;

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Could not read the configuration file.
    #[error("cannot read configuration file: {0}")]
    Io(#[from] io::Error),

    /// The file was not valid JSON for the expected shape.
    #[error("cannot parse configuration file: {0}")]
    Parse(#[from] serde_json::Error),

    /// `shared_secret` was absent or empty.
    #[error("configuration is incomplete: `shared_secret` must be set")]
    MissingSharedSecret,

    /// `dialect` was absent or empty.
    #[error("configuration is incomplete: `dialect` must be set")]
    MissingDialect,

    /// `dialect` named an unrecognized sink.
    #[error("unknown dialect `{0}`")]
    UnknownDialect(String),

    /// The section for the selected dialect was missing or incomplete.
    #[error("dialect `{0}` configuration is missing or incomplete")]
    IncompleteDialect(&'static str),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Settings for the buffered object-store dialect.
#[derive(Debug, Clone, Deserialize)]
pub struct BlobConfig {
    /// Root directory of the object store.
    pub path: PathBuf,

    /// Key prefix prepended to every object name.
    #[serde(default)]
    pub prefix: String,
}

impl BlobConfig {
    /// Checks that the section is usable.
    pub fn is_valid(&self) -> bool {
        !self.path.as_os_str().is_empty()
    }
}

/// Settings for the unbuffered queue dialect.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Queue endpoint that receives one POST per record.
    pub url: String,
}

impl QueueConfig {
    /// Checks that the section is usable.
    pub fn is_valid(&self) -> bool {
        !self.url.is_empty()
    }
}

/// The selected sink dialect with its settings.
#[derive(Debug, Clone)]
pub enum Dialect {
    /// Buffered object-store sink.
    Blob(BlobConfig),

    /// Unbuffered queue sink.
    Queue(QueueConfig),
}

/// Gateway configuration as read from the JSON file.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Secret shared with clients for request signing.
    #[serde(default)]
    pub shared_secret: String,

    /// Tag selecting the sink dialect.
    #[serde(default)]
    pub dialect: String,

    /// Blob dialect settings; required iff `dialect == "blob"`.
    #[serde(default)]
    pub blob: Option<BlobConfig>,

    /// Queue dialect settings; required iff `dialect == "queue"`.
    #[serde(default)]
    pub queue: Option<QueueConfig>,

    /// Bind host.
    #[serde(default)]
    pub host: Option<String>,

    /// Bind port.
    #[serde(default)]
    pub port: Option<u16>,

    /// Log file path; absent means stderr.
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Capacity of the pending-job queue.
    #[serde(default)]
    pub max_queue_size: Option<usize>,

    /// Number of workers.
    #[serde(default)]
    pub max_worker_size: Option<usize>,

    /// Base per-worker buffer size for buffered sinks.
    #[serde(default)]
    pub buffer_size: Option<u32>,

    /// Staggers per-worker buffer sizes to desynchronize flushes.
    #[serde(default)]
    pub spread_buffer: bool,

    /// Per-job save attempt cap for unbuffered sinks.
    #[serde(default)]
    pub retry_attempt: Option<u32>,

    /// Renders record timestamps in UTC instead of local time.
    #[serde(default)]
    pub utc: bool,
}

impl Config {
    /// Loads and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read(path.as_ref())?;
        let config: Config = serde_json::from_slice(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates required keys and the selected dialect section.
    pub fn validate(&self) -> Result<()> {
        if self.shared_secret.is_empty() {
            return Err(ConfigError::MissingSharedSecret);
        }
        if self.dialect.is_empty() {
            return Err(ConfigError::MissingDialect);
        }
        self.dialect_config().map(|_| ())
    }

    /// Resolves the `dialect` tag into its validated settings.
    pub fn dialect_config(&self) -> Result<Dialect> {
        match self.dialect.as_str() {
            "blob" => match &self.blob {
                Some(blob) if blob.is_valid() => Ok(Dialect::Blob(blob.clone())),
                _ => Err(ConfigError::IncompleteDialect("blob")),
            },
            "queue" => match &self.queue {
                Some(queue) if queue.is_valid() => Ok(Dialect::Queue(queue.clone())),
                _ => Err(ConfigError::IncompleteDialect("queue")),
            },
            other => Err(ConfigError::UnknownDialect(other.to_string())),
        }
    }

    /// The address to bind the HTTP listener to.
    pub fn address(&self) -> String {
        format!(
            "{}:{}",
            self.host.as_deref().unwrap_or("0.0.0.0"),
            self.port.unwrap_or(8080)
        )
    }

    /// Worker count; defaults to one more than the host's parallelism.
    pub fn max_worker_size(&self) -> usize {
        self.max_worker_size.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                + 1
        })
    }

    /// Job queue capacity; defaults to twenty jobs per worker.
    pub fn max_queue_size(&self) -> usize {
        self.max_queue_size
            .unwrap_or_else(|| self.max_worker_size() * 20)
    }

    /// Base buffer size per worker for buffered sinks.
    pub fn buffer_size(&self) -> u32 {
        self.buffer_size.unwrap_or(100)
    }

    /// Per-job save attempt cap for unbuffered sinks.
    pub fn retry_attempt(&self) -> u32 {
        self.retry_attempt.unwrap_or(3)
    }

    /// The timezone records are rendered in.
    pub fn time_mode(&self) -> TimeMode {
        if self.utc { TimeMode::Utc } else { TimeMode::Local }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn load_minimal_blob_config() {
        let file = write_config(
            r#"{
                "shared_secret": "s3cret",
                "dialect": "blob",
                "blob": {"path": "/tmp/objects", "prefix": "events/"}
            }"#,
        );

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.shared_secret, "s3cret");
        assert!(matches!(config.dialect_config(), Ok(Dialect::Blob(_))));
        assert_eq!(config.address(), "0.0.0.0:8080");
        assert!(!config.spread_buffer);
        assert_eq!(config.retry_attempt(), 3);
        assert_eq!(config.buffer_size(), 100);
    }

    #[test]
    fn load_full_queue_config() {
        let file = write_config(
            r#"{
                "shared_secret": "s3cret",
                "dialect": "queue",
                "queue": {"url": "http://127.0.0.1:9100/queue"},
                "host": "127.0.0.1",
                "port": 9000,
                "max_queue_size": 500,
                "max_worker_size": 4,
                "buffer_size": 50,
                "spread_buffer": true,
                "retry_attempt": 5,
                "utc": true
            }"#,
        );

        let config = Config::load(file.path()).unwrap();

        assert!(matches!(config.dialect_config(), Ok(Dialect::Queue(_))));
        assert_eq!(config.address(), "127.0.0.1:9000");
        assert_eq!(config.max_queue_size(), 500);
        assert_eq!(config.max_worker_size(), 4);
        assert_eq!(config.buffer_size(), 50);
        assert!(config.spread_buffer);
        assert_eq!(config.retry_attempt(), 5);
        assert_eq!(config.time_mode(), TimeMode::Utc);
    }

    #[test]
    fn queue_size_defaults_to_twenty_per_worker() {
        let config = Config {
            max_worker_size: Some(3),
            ..Config::default()
        };
        assert_eq!(config.max_queue_size(), 60);
    }

    #[test]
    fn missing_shared_secret_is_rejected() {
        let file = write_config(r#"{"dialect": "blob", "blob": {"path": "/tmp/o"}}"#);
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::MissingSharedSecret)
        ));
    }

    #[test]
    fn missing_dialect_is_rejected() {
        let file = write_config(r#"{"shared_secret": "s"}"#);
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::MissingDialect)
        ));
    }

    #[test]
    fn unknown_dialect_is_rejected() {
        let file = write_config(r#"{"shared_secret": "s", "dialect": "carrier-pigeon"}"#);
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::UnknownDialect(_))
        ));
    }

    #[test]
    fn dialect_without_its_section_is_rejected() {
        let file = write_config(r#"{"shared_secret": "s", "dialect": "queue"}"#);
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::IncompleteDialect("queue"))
        ));
    }

    #[test]
    fn empty_dialect_section_is_rejected() {
        let file = write_config(
            r#"{"shared_secret": "s", "dialect": "queue", "queue": {"url": ""}}"#,
        );
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::IncompleteDialect("queue"))
        ));
    }

    #[test]
    fn unreadable_file_is_an_io_error() {
        assert!(matches!(
            Config::load("/nonexistent/hamustro.json"),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let file = write_config("{not json");
        assert!(matches!(Config::load(file.path()), Err(ConfigError::Parse(_))));
    }
}
