//! Configuration for the Shelly exporter.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use shelly_common::LoggingConfig;

use crate::exposition::sanitize_label_name;
use crate::target::Target;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] shelly_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
///
/// Built once at startup (defaults, then config file, then environment and
/// flags) and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExporterConfig {
    /// IP address to listen on (default: "0.0.0.0").
    #[serde(default = "default_listen_ip")]
    pub listen_ip: String,

    /// Port to listen on (default: 9686).
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Device request timeout in seconds (default: 5).
    #[serde(default = "default_timeout")]
    pub timeout: f64,

    /// Targets probed live on every `/metrics` scrape.
    #[serde(default)]
    pub static_targets: Vec<StaticTarget>,

    /// Default username for all targets.
    #[serde(default)]
    pub username: Option<String>,

    /// Default password for all targets.
    #[serde(default)]
    pub password: Option<String>,

    /// Per-target overrides keyed by target address.
    #[serde(default)]
    pub targetcfg: HashMap<String, TargetOverride>,

    /// File path (or object key, with S3) of the saved-metrics document.
    #[serde(default = "default_metrics_file")]
    pub metrics_file: String,

    /// Store saved metrics in an S3-compatible bucket instead of a local file.
    #[serde(default)]
    pub s3: Option<S3Config>,

    /// Metric name prefix (default: "shelly").
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_listen_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    9686
}

fn default_timeout() -> f64 {
    5.0
}

fn default_metrics_file() -> String {
    "metrics.json".to_string()
}

fn default_prefix() -> String {
    "shelly".to_string()
}

/// Optional settings layered over the global defaults for one target.
///
/// Unset fields inherit from the layer below.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetOverride {
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Timeout in seconds.
    #[serde(default)]
    pub timeout: Option<f64>,

    /// Extra labels attached to every sample of the target.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// An entry of the static target list: a bare address or an address with
/// its own overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StaticTarget {
    Address(String),
    Entry {
        target: String,
        #[serde(flatten)]
        overrides: TargetOverride,
    },
}

impl StaticTarget {
    /// The raw (not yet normalized) address.
    pub fn address(&self) -> &str {
        match self {
            StaticTarget::Address(addr) => addr,
            StaticTarget::Entry { target, .. } => target,
        }
    }

    /// Overrides carried by the entry, empty for a bare address.
    pub fn overrides(&self) -> TargetOverride {
        match self {
            StaticTarget::Address(_) => TargetOverride::default(),
            StaticTarget::Entry { overrides, .. } => overrides.clone(),
        }
    }
}

/// S3-compatible object store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct S3Config {
    /// Bucket holding the saved-metrics object.
    pub bucket: String,

    /// Endpoint URL including scheme (e.g., "https://minio.local:9000").
    #[serde(default)]
    pub url: Option<String>,

    /// Access key ID.
    #[serde(default)]
    pub key_id: Option<String>,

    /// Secret access key.
    #[serde(default)]
    pub secret_key: Option<String>,

    /// Region (default: "us-east-1").
    #[serde(default = "default_region")]
    pub region: String,

    /// TLS certificate verification.
    #[serde(default)]
    pub verify: TlsVerify,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// TLS verification mode for the object store connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TlsVerifyRepr", into = "TlsVerifyRepr")]
pub enum TlsVerify {
    /// Verify against the system roots.
    #[default]
    Enabled,
    /// Accept any certificate.
    Disabled,
    /// Verify against a custom CA bundle (PEM).
    CustomCa(PathBuf),
}

impl FromStr for TlsVerify {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" => Err("empty TLS verify mode".to_string()),
            "true" | "on" | "yes" => Ok(TlsVerify::Enabled),
            "false" | "off" | "no" => Ok(TlsVerify::Disabled),
            _ => Ok(TlsVerify::CustomCa(PathBuf::from(s.trim()))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum TlsVerifyRepr {
    Flag(bool),
    Text(String),
}

impl TryFrom<TlsVerifyRepr> for TlsVerify {
    type Error = String;

    fn try_from(repr: TlsVerifyRepr) -> Result<Self, Self::Error> {
        match repr {
            TlsVerifyRepr::Flag(true) => Ok(TlsVerify::Enabled),
            TlsVerifyRepr::Flag(false) => Ok(TlsVerify::Disabled),
            TlsVerifyRepr::Text(s) => s.parse(),
        }
    }
}

impl From<TlsVerify> for TlsVerifyRepr {
    fn from(mode: TlsVerify) -> Self {
        match mode {
            TlsVerify::Enabled => TlsVerifyRepr::Flag(true),
            TlsVerify::Disabled => TlsVerifyRepr::Flag(false),
            TlsVerify::CustomCa(path) => TlsVerifyRepr::Text(path.display().to_string()),
        }
    }
}

impl ExporterConfig {
    /// Load configuration from a JSON5 or YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: ExporterConfig = shelly_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = shelly_common::parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse an inline target-override document (YAML or JSON).
    pub fn parse_targetcfg(content: &str) -> Result<HashMap<String, TargetOverride>, ConfigError> {
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        Ok(shelly_common::parse_yaml(content)?)
    }

    /// Socket address the HTTP server binds to.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: std::net::IpAddr = self.listen_ip.parse().map_err(|_| {
            ConfigError::Validation(format!("Invalid listen address: {}", self.listen_ip))
        })?;
        Ok(SocketAddr::new(ip, self.listen_port))
    }

    /// Global device timeout.
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        timeout_duration("timeout", self.timeout)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;

        self.timeout()?;

        for entry in &self.static_targets {
            Target::parse(entry.address()).map_err(|e| {
                ConfigError::Validation(format!("static_targets: {}", e))
            })?;
            let overrides = entry.overrides();
            if let Some(timeout) = overrides.timeout {
                timeout_duration(entry.address(), timeout)?;
            }
            validate_labels(entry.address(), &overrides.labels)?;
        }

        for (key, entry) in &self.targetcfg {
            Target::parse(key)
                .map_err(|e| ConfigError::Validation(format!("targetcfg: {}", e)))?;
            if let Some(timeout) = entry.timeout {
                timeout_duration(key, timeout)?;
            }
            validate_labels(key, &entry.labels)?;
        }

        if self.metrics_file.trim().is_empty() {
            return Err(ConfigError::Validation(
                "metrics_file must not be empty".to_string(),
            ));
        }

        if let Some(s3) = &self.s3
            && s3.bucket.trim().is_empty()
        {
            return Err(ConfigError::Validation(
                "s3.bucket must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Convert a timeout in seconds, rejecting values a `Duration` cannot hold.
pub(crate) fn timeout_duration(context: &str, seconds: f64) -> Result<Duration, ConfigError> {
    match Duration::try_from_secs_f64(seconds) {
        Ok(timeout) if !timeout.is_zero() => Ok(timeout),
        _ => Err(ConfigError::Validation(format!(
            "{}: timeout must be a positive number of seconds, got {}",
            context, seconds
        ))),
    }
}

/// Reject label keys that collapse to the same exposition label name.
fn validate_labels(context: &str, labels: &BTreeMap<String, String>) -> Result<(), ConfigError> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    for key in labels.keys() {
        let name = sanitize_label_name(key);
        if let Some(previous) = seen.insert(name.clone(), key) {
            return Err(ConfigError::Validation(format!(
                "{}: labels '{}' and '{}' both map to '{}'",
                context, previous, key, name
            )));
        }
    }
    Ok(())
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            listen_ip: default_listen_ip(),
            listen_port: default_listen_port(),
            timeout: default_timeout(),
            static_targets: Vec::new(),
            username: None,
            password: None,
            targetcfg: HashMap::new(),
            metrics_file: default_metrics_file(),
            s3: None,
            prefix: default_prefix(),
            logging: LoggingConfig::default(),
        }
    }
}
