use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Common logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Document syntax of a configuration source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSyntax {
    /// JSON5 (plain JSON is accepted too).
    Json5,
    /// YAML 1.2.
    Yaml,
}

impl ConfigSyntax {
    /// Pick the syntax from a file extension. Anything but `.yaml`/`.yml` is JSON5.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => ConfigSyntax::Yaml,
            _ => ConfigSyntax::Json5,
        }
    }
}

/// Load a configuration file, JSON5 or YAML depending on its extension.
pub fn load_config<T: for<'de> Deserialize<'de>>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    parse_with(&content, ConfigSyntax::from_path(path)).map_err(|e| {
        Error::Config(format!(
            "Failed to parse config file '{}': {}",
            path.display(),
            e
        ))
    })
}

/// Load a configuration from a JSON5 string.
pub fn parse_config<T: for<'de> Deserialize<'de>>(content: &str) -> Result<T> {
    parse_with(content, ConfigSyntax::Json5)
}

/// Parse an inline YAML (or JSON, which is valid YAML) document.
pub fn parse_yaml<T: for<'de> Deserialize<'de>>(content: &str) -> Result<T> {
    parse_with(content, ConfigSyntax::Yaml)
}

fn parse_with<T: for<'de> Deserialize<'de>>(content: &str, syntax: ConfigSyntax) -> Result<T> {
    match syntax {
        ConfigSyntax::Json5 => json5::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e))),
        ConfigSyntax::Yaml => Ok(serde_yaml::from_str(content)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[derive(Debug, Deserialize)]
    struct Sample {
        #[serde(default)]
        logging: LoggingConfig,
        #[serde(default)]
        targets: HashMap<String, u64>,
    }

    #[test]
    fn test_default_logging_config() {
        let config: Sample = parse_config("{}").unwrap();

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_json_logging_format() {
        let json5 = r#"
        {
            logging: {
                level: "debug",
                format: "json",
            },
        }
        "#;

        let config: Sample = parse_config(json5).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_parse_yaml_accepts_json() {
        let yaml: Sample = parse_yaml("targets:\n  10.0.0.5: 20\n").unwrap();
        let json: Sample = parse_yaml(r#"{"targets": {"10.0.0.5": 20}}"#).unwrap();

        assert_eq!(yaml.targets.get("10.0.0.5"), Some(&20));
        assert_eq!(json.targets.get("10.0.0.5"), Some(&20));
    }

    #[test]
    fn test_syntax_from_path() {
        assert_eq!(
            ConfigSyntax::from_path(Path::new("shelly.yaml")),
            ConfigSyntax::Yaml
        );
        assert_eq!(
            ConfigSyntax::from_path(Path::new("shelly.yml")),
            ConfigSyntax::Yaml
        );
        assert_eq!(
            ConfigSyntax::from_path(Path::new("shelly.json5")),
            ConfigSyntax::Json5
        );
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "logging:\n  level: warn").unwrap();

        let config: Sample = load_config(file.path()).unwrap();
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_load_missing_file() {
        let result: Result<Sample> = load_config("/nonexistent/shelly.json5");
        assert!(result.unwrap_err().to_string().contains("Failed to read"));
    }
}
