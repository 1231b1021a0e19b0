//! Command-line and environment configuration layer.
//!
//! Every flag can also be set through a `SHELLY_*` environment variable;
//! clap gives flags precedence over the environment. Both are applied on
//! top of the optional configuration file.

use std::path::PathBuf;

use clap::Parser;
use shelly_common::LogFormat;

use crate::config::{ConfigError, ExporterConfig, S3Config, StaticTarget, TlsVerify};

/// Prometheus exporter for Shelly devices.
#[derive(Parser, Debug, Default)]
#[command(name = "shelly-exporter")]
#[command(about = "Export Shelly device telemetry as Prometheus metrics")]
#[command(version)]
pub struct Args {
    /// Path to a configuration file (JSON5, or YAML for .yaml/.yml).
    #[arg(short, long, env = "SHELLY_CONFIG")]
    pub config: Option<PathBuf>,

    /// IP address to listen on.
    #[arg(long, env = "SHELLY_LISTEN_IP")]
    pub listen_ip: Option<String>,

    /// Port to listen on.
    #[arg(long, env = "SHELLY_LISTEN_PORT")]
    pub listen_port: Option<u16>,

    /// Device request timeout in seconds.
    #[arg(long, env = "SHELLY_TIMEOUT")]
    pub timeout: Option<f64>,

    /// Comma separated targets probed on every /metrics scrape.
    #[arg(long, env = "SHELLY_STATIC_TARGETS", value_delimiter = ',')]
    pub static_targets: Vec<String>,

    /// Default device username.
    #[arg(long, env = "SHELLY_USERNAME")]
    pub username: Option<String>,

    /// Default device password.
    #[arg(long, env = "SHELLY_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Inline YAML or JSON document of per-target overrides.
    #[arg(long, env = "SHELLY_TARGETCFG")]
    pub targetcfg: Option<String>,

    /// Saved-metrics file, or object key when S3 is used.
    #[arg(long, env = "SHELLY_METRICS_FILE")]
    pub metrics_file: Option<String>,

    /// Metric name prefix.
    #[arg(long, env = "SHELLY_PREFIX")]
    pub prefix: Option<String>,

    /// S3 bucket for saved metrics.
    #[arg(long, env = "SHELLY_S3_BUCKET")]
    pub s3_bucket: Option<String>,

    /// S3 endpoint URL.
    #[arg(long, env = "SHELLY_S3_URL")]
    pub s3_url: Option<String>,

    /// S3 access key ID.
    #[arg(long, env = "SHELLY_S3_KEY_ID")]
    pub s3_key_id: Option<String>,

    /// S3 secret access key.
    #[arg(long, env = "SHELLY_S3_SECRET_KEY", hide_env_values = true)]
    pub s3_secret_key: Option<String>,

    /// S3 region.
    #[arg(long, env = "SHELLY_S3_REGION")]
    pub s3_region: Option<String>,

    /// S3 TLS verification: true, false, or a path to a PEM CA bundle.
    #[arg(long, env = "SHELLY_S3_VERIFY")]
    pub s3_verify: Option<TlsVerify>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "SHELLY_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log format (text or json).
    #[arg(long, env = "SHELLY_LOG_FORMAT")]
    pub log_format: Option<String>,
}

impl Args {
    /// Build the final configuration: file (or defaults), then these arguments.
    pub fn load_config(&self) -> Result<ExporterConfig, ConfigError> {
        let config = match &self.config {
            Some(path) => ExporterConfig::load_from_file(path)?,
            None => ExporterConfig::default(),
        };
        self.apply(config)
    }

    /// Layer the arguments over `config` and validate the result.
    pub fn apply(&self, mut config: ExporterConfig) -> Result<ExporterConfig, ConfigError> {
        if let Some(ip) = &self.listen_ip {
            config.listen_ip = ip.clone();
        }
        if let Some(port) = self.listen_port {
            config.listen_port = port;
        }
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }

        let static_targets: Vec<_> = self
            .static_targets
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(|t| StaticTarget::Address(t.to_string()))
            .collect();
        if !static_targets.is_empty() {
            config.static_targets = static_targets;
        }

        if let Some(username) = &self.username {
            config.username = Some(username.clone());
        }
        if let Some(password) = &self.password {
            config.password = Some(password.clone());
        }
        if let Some(document) = &self.targetcfg {
            config.targetcfg.extend(ExporterConfig::parse_targetcfg(document)?);
        }
        if let Some(metrics_file) = &self.metrics_file {
            config.metrics_file = metrics_file.clone();
        }
        if let Some(prefix) = &self.prefix {
            config.prefix = prefix.clone();
        }

        self.apply_s3(&mut config);

        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.logging.format = match format.trim().to_ascii_lowercase().as_str() {
                "text" => LogFormat::Text,
                "json" => LogFormat::Json,
                other => {
                    return Err(ConfigError::Validation(format!(
                        "Unknown log format: {}",
                        other
                    )));
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    fn apply_s3(&self, config: &mut ExporterConfig) {
        let any_set = self.s3_bucket.is_some()
            || self.s3_url.is_some()
            || self.s3_key_id.is_some()
            || self.s3_secret_key.is_some()
            || self.s3_region.is_some()
            || self.s3_verify.is_some();
        if !any_set {
            return;
        }

        // An empty bucket fails validation when no file section provides one
        let s3 = config.s3.get_or_insert_with(|| S3Config {
            bucket: String::new(),
            url: None,
            key_id: None,
            secret_key: None,
            region: "us-east-1".to_string(),
            verify: TlsVerify::Enabled,
        });

        if let Some(bucket) = &self.s3_bucket {
            s3.bucket = bucket.clone();
        }
        if let Some(url) = &self.s3_url {
            s3.url = Some(url.clone());
        }
        if let Some(key_id) = &self.s3_key_id {
            s3.key_id = Some(key_id.clone());
        }
        if let Some(secret) = &self.s3_secret_key {
            s3.secret_key = Some(secret.clone());
        }
        if let Some(region) = &self.s3_region {
            s3.region = region.clone();
        }
        if let Some(verify) = &self.s3_verify {
            s3.verify = verify.clone();
        }
    }
}
