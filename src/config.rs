//! Configuration loading and types for azblob-failover.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct. Each subsection governs a different part of the
//! system: the two storage credentials, transfer behaviour, logging and
//! metrics. Every section may be omitted.
//!
//! ```yaml
//! credentials:
//!   primary_connection_string: "DefaultEndpointsProtocol=https;AccountName=acct;AccountKey=...;EndpointSuffix=core.windows.net"
//!   secondary_connection_string: "DefaultEndpointsProtocol=https;AccountName=acct;AccountKey=...;EndpointSuffix=core.windows.net"
//! transfer:
//!   timeout_seconds: 300
//!   download_dir: /var/lib/azblob/BlobStorageFiles
//! logging:
//!   level: info
//!   format: text
//! observability:
//!   metrics: true
//! ```

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// The two storage account connection strings.
    #[serde(default)]
    pub credentials: CredentialsConfig,

    /// HTTP transfer settings.
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Primary and secondary connection strings. Either may be absent; an
/// absent string simply fails its credential attempt.
#[derive(Clone, Default, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub primary_connection_string: Option<String>,

    #[serde(default)]
    pub secondary_connection_string: Option<String>,
}

// Connection strings carry account keys.
impl fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |s: &Option<String>| s.as_ref().map(|_| "<redacted>");
        f.debug_struct("CredentialsConfig")
            .field("primary_connection_string", &redact(&self.primary_connection_string))
            .field(
                "secondary_connection_string",
                &redact(&self.secondary_connection_string),
            )
            .finish()
    }
}

/// Transfer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    /// Per-request HTTP timeout in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Directory for `download_file_to_disk`. Defaults to
    /// `BlobStorageFiles` next to the executable.
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
}

impl TransferConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            download_dir: None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Install the Prometheus recorder.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { metrics: true }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_timeout_seconds() -> u64 {
    crate::transport::azure::DEFAULT_TIMEOUT.as_secs()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}
