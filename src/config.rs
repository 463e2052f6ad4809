//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `--config PATH` (command line)
//! 2. `$INBOUND_CONFIG` (environment variable)
//! 3. `~/.config/inbound/config.toml` (Linux)
//!    `~/Library/Application Support/inbound/config.toml` (macOS)
//!    `%APPDATA%\inbound\config.toml` (Windows)
//! 4. Built-in defaults

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{InboundError, Result};
use crate::parser::mime::{BodyMode, WalkOptions};
use crate::smtp::tls::TlsAcceptor;
use crate::smtp::ServerSettings;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging settings.
    pub general: GeneralConfig,
    /// Listener and protocol limits.
    pub server: ServerConfig,
    /// Decomposition behavior.
    pub processing: ProcessingConfig,
    /// Storage destinations.
    pub sinks: SinksConfig,
    /// Receive outcome reporting.
    pub metrics: MetricsConfig,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Also write logs to this file.
    pub log_file: Option<PathBuf>,
}

/// Listener and protocol limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on.
    pub listen: String,
    /// Server name used in replies.
    pub domain: String,
    /// Largest accepted transmission, in megabytes.
    pub max_message_size_mb: usize,
    /// Recipients accepted per transmission.
    pub max_recipients: usize,
    /// Idle seconds before a silent client is dropped.
    pub read_timeout_secs: u64,
    /// PEM certificate chain offered through STARTTLS.
    pub tls_cert: Option<PathBuf>,
    /// PEM private key matching `tls_cert`.
    pub tls_key: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Split HTML bodies into new content and quoted thread.
    pub classify_html: bool,
    /// "alternatives" keeps one entry per inline part, "merged" joins them.
    pub body_mode: BodyMode,
}

/// Storage destinations. Enabled sinks run in the order log, local, object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinksConfig {
    /// Log every stored record.
    pub log: bool,
    /// Root directory of the local filesystem sink.
    pub local_dir: Option<PathBuf>,
    /// S3-compatible object storage.
    pub object: Option<ObjectConfig>,
}

/// S3-compatible bucket settings. Credentials come from the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectConfig {
    pub bucket: String,
    /// Key prefix; empty for none.
    pub prefix: String,
    /// Custom endpoint URL for non-AWS services.
    pub endpoint: Option<String>,
    pub region: String,
    /// Path-style addressing. Defaults to on when `endpoint` is set.
    pub path_style: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Publish receive outcomes to Amazon CloudWatch.
    pub cloudwatch: Option<CloudWatchConfig>,
}

/// CloudWatch settings. Credentials come from the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudWatchConfig {
    pub namespace: String,
    pub region: String,
    /// Custom monitoring endpoint URL.
    pub endpoint: Option<String>,
    /// Dimensions attached to every datum.
    pub dimensions: BTreeMap<String, String>,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "localhost:1025".to_string(),
            domain: "localhost".to_string(),
            max_message_size_mb: 100,
            max_recipients: 100,
            read_timeout_secs: 300,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            classify_html: true,
            body_mode: BodyMode::Alternatives,
        }
    }
}

impl Default for SinksConfig {
    fn default() -> Self {
        Self {
            log: true,
            local_dir: None,
            object: None,
        }
    }
}

impl Default for ObjectConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            prefix: String::new(),
            endpoint: None,
            region: "us-east-1".to_string(),
            path_style: None,
        }
    }
}

impl Default for CloudWatchConfig {
    fn default() -> Self {
        Self {
            namespace: "Inbound".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            dimensions: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Protocol settings for the SMTP front-end.
    ///
    /// Loads the TLS certificate and key when both are configured.
    pub fn server_settings(&self) -> Result<ServerSettings> {
        let tls = match (&self.server.tls_cert, &self.server.tls_key) {
            (Some(cert), Some(key)) => Some(TlsAcceptor::from_pem_files(cert, key)?),
            (None, None) => None,
            _ => {
                return Err(InboundError::Config(
                    "tls_cert and tls_key must be set together".into(),
                ))
            }
        };
        Ok(ServerSettings {
            listen: self.server.listen.clone(),
            domain: self.server.domain.clone(),
            max_message_size: self.server.max_message_size_mb.saturating_mul(1024 * 1024),
            max_recipients: self.server.max_recipients,
            read_timeout: Duration::from_secs(self.server.read_timeout_secs),
            tls,
        })
    }

    /// Decomposition settings for the part walker.
    pub fn walk_options(&self) -> WalkOptions {
        WalkOptions {
            classify_html: self.processing.classify_html,
            body_mode: self.processing.body_mode,
        }
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Where a loaded configuration came from.
///
/// Loading runs before logging is set up, so the outcome is returned for
/// the caller to report.
#[derive(Debug)]
pub enum ConfigSource {
    /// Parsed from this file.
    File(PathBuf),
    /// No file found; built-in defaults.
    Defaults,
    /// A discovered file failed to load; built-in defaults.
    Fallback { path: PathBuf, error: InboundError },
}

/// Load configuration.
///
/// An explicit `path` must exist and parse. A file found in the standard
/// locations that fails to load is replaced by defaults and reported as
/// [`ConfigSource::Fallback`].
pub fn load_config(path: Option<&Path>) -> Result<(Config, ConfigSource)> {
    match path {
        Some(path) => Ok((read_config(path)?, ConfigSource::File(path.to_path_buf()))),
        None => Ok(load_discovered(config_file_path())),
    }
}

fn load_discovered(path: Option<PathBuf>) -> (Config, ConfigSource) {
    match path {
        Some(path) if path.exists() => match read_config(&path) {
            Ok(cfg) => (cfg, ConfigSource::File(path)),
            Err(error) => (Config::default(), ConfigSource::Fallback { path, error }),
        },
        _ => (Config::default(), ConfigSource::Defaults),
    }
}

/// Read and parse one configuration file.
pub fn read_config(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path).map_err(|e| InboundError::io(path, e))?;
    toml::from_str::<Config>(&contents)
        .map_err(|e| InboundError::Config(format!("{}: {e}", path.display())))
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("INBOUND_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    dirs::config_dir().map(|d| d.join("inbound").join("config.toml"))
}
