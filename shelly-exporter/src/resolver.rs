//! Effective per-target configuration.
//!
//! Layers, lowest priority first:
//!
//! 1. global defaults (`username`, `password`, `timeout` of [`ExporterConfig`])
//! 2. the matching static target entry
//! 3. the matching `targetcfg` override block
//! 4. credentials supplied with a `/probe` request
//!
//! Merging is field by field: a layer that leaves a field unset keeps the
//! value from the layer below.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tracing::warn;

use crate::config::{ConfigError, ExporterConfig, TargetOverride, timeout_duration};
use crate::target::Target;

/// Basic-auth credentials for a device.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Resolved settings for one target. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
    /// Extra labels attached to every sample.
    pub labels: BTreeMap<String, String>,
}

impl TargetConfig {
    /// Credentials to send, only when both username and password are known.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }

    fn apply(&mut self, layer: &Layer) {
        if let Some(username) = &layer.username {
            self.username = Some(username.clone());
        }
        if let Some(password) = &layer.password {
            self.password = Some(password.clone());
        }
        if let Some(timeout) = layer.timeout {
            self.timeout = timeout;
        }
        for (k, v) in &layer.labels {
            self.labels.insert(k.clone(), v.clone());
        }
    }
}

/// A [`TargetOverride`] with its timeout already converted.
#[derive(Debug, Clone, Default)]
struct Layer {
    username: Option<String>,
    password: Option<String>,
    timeout: Option<Duration>,
    labels: BTreeMap<String, String>,
}

impl Layer {
    fn from_override(target: &Target, entry: TargetOverride) -> Result<Self, ConfigError> {
        let timeout = entry
            .timeout
            .map(|seconds| timeout_duration(target.as_str(), seconds))
            .transpose()?;
        Ok(Self {
            username: entry.username,
            password: entry.password,
            timeout,
            labels: entry.labels,
        })
    }
}

/// Credentials passed as `/probe` query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestCredentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Merges the configuration layers into a [`TargetConfig`] per target.
#[derive(Debug, Clone)]
pub struct TargetResolver {
    defaults: TargetConfig,
    static_order: Vec<Target>,
    static_entries: HashMap<Target, Layer>,
    overrides: HashMap<Target, Layer>,
}

impl TargetResolver {
    /// Create a resolver from already-normalized layers.
    ///
    /// Duplicate static targets keep their first entry. Fails on a timeout
    /// that does not fit a `Duration`.
    pub fn new(
        defaults: TargetConfig,
        static_targets: Vec<(Target, TargetOverride)>,
        overrides: HashMap<Target, TargetOverride>,
    ) -> Result<Self, ConfigError> {
        let mut static_order = Vec::with_capacity(static_targets.len());
        let mut static_entries = HashMap::with_capacity(static_targets.len());

        for (target, entry) in static_targets {
            if static_entries.contains_key(&target) {
                warn!(target = %target, "Duplicate static target ignored");
                continue;
            }
            let layer = Layer::from_override(&target, entry)?;
            static_order.push(target.clone());
            static_entries.insert(target, layer);
        }

        let overrides = overrides
            .into_iter()
            .map(|(target, entry)| {
                let layer = Layer::from_override(&target, entry)?;
                Ok((target, layer))
            })
            .collect::<Result<HashMap<_, _>, ConfigError>>()?;

        Ok(Self {
            defaults,
            static_order,
            static_entries,
            overrides,
        })
    }

    /// Build the resolver from the startup configuration.
    pub fn from_config(config: &ExporterConfig) -> Result<Self, ConfigError> {
        let defaults = TargetConfig {
            username: config.username.clone(),
            password: config.password.clone(),
            timeout: config.timeout()?,
            labels: BTreeMap::new(),
        };

        let static_targets = config
            .static_targets
            .iter()
            .map(|entry| {
                Target::parse(entry.address())
                    .map(|target| (target, entry.overrides()))
                    .map_err(|e| ConfigError::Validation(format!("static_targets: {}", e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut overrides = HashMap::with_capacity(config.targetcfg.len());
        for (key, entry) in &config.targetcfg {
            let target = Target::parse(key)
                .map_err(|e| ConfigError::Validation(format!("targetcfg: {}", e)))?;
            if overrides.insert(target.clone(), entry.clone()).is_some() {
                warn!(target = %target, "Several targetcfg keys normalize to the same target");
            }
        }

        Self::new(defaults, static_targets, overrides)
    }

    /// Resolve the effective configuration of a target.
    pub fn resolve(&self, target: &Target) -> TargetConfig {
        let mut config = self.defaults.clone();
        if let Some(entry) = self.static_entries.get(target) {
            config.apply(entry);
        }
        if let Some(entry) = self.overrides.get(target) {
            config.apply(entry);
        }
        config
    }

    /// Resolve a target for a `/probe` request; request credentials win.
    pub fn resolve_for_request(
        &self,
        target: &Target,
        request: &RequestCredentials,
    ) -> TargetConfig {
        let mut config = self.resolve(target);
        config.apply(&Layer {
            username: request.username.clone(),
            password: request.password.clone(),
            ..Default::default()
        });
        config
    }

    /// Static targets in configuration order.
    pub fn static_targets(&self) -> &[Target] {
        &self.static_order
    }

    /// Whether the target is part of the static list.
    pub fn is_static(&self, target: &Target) -> bool {
        self.static_entries.contains_key(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticTarget;

    fn target(s: &str) -> Target {
        Target::parse(s).unwrap()
    }

    fn defaults() -> TargetConfig {
        TargetConfig {
            username: Some("admin".to_string()),
            password: Some("global".to_string()),
            timeout: Duration::from_secs(5),
            labels: BTreeMap::new(),
        }
    }

    #[test]
    fn test_field_granular_merge() {
        let overrides = [(
            target("10.0.0.5"),
            TargetOverride {
                timeout: Some(20.0),
                ..Default::default()
            },
        )]
        .into_iter()
        .collect();
        let resolver = TargetResolver::new(
            defaults(),
            vec![(target("10.0.0.5"), TargetOverride::default())],
            overrides,
        )
        .unwrap();

        let config = resolver.resolve(&target("10.0.0.5"));
        assert_eq!(config.timeout, Duration::from_secs(20));
        assert_eq!(config.username.as_deref(), Some("admin"));
        assert_eq!(config.password.as_deref(), Some("global"));
    }

    #[test]
    fn test_override_beats_static_entry() {
        let static_entry = TargetOverride {
            username: Some("static".to_string()),
            timeout: Some(8.0),
            labels: [("room".to_string(), "hall".to_string())].into_iter().collect(),
            ..Default::default()
        };
        let override_entry = TargetOverride {
            username: Some("override".to_string()),
            labels: [("floor".to_string(), "1".to_string())].into_iter().collect(),
            ..Default::default()
        };
        let resolver = TargetResolver::new(
            defaults(),
            vec![(target("plug"), static_entry)],
            [(target("plug"), override_entry)].into_iter().collect(),
        )
        .unwrap();

        let config = resolver.resolve(&target("plug"));
        assert_eq!(config.username.as_deref(), Some("override"));
        assert_eq!(config.timeout, Duration::from_secs(8));
        assert_eq!(config.labels.len(), 2);
    }

    #[test]
    fn test_unknown_target_uses_defaults_and_request_credentials() {
        let resolver = TargetResolver::new(defaults(), Vec::new(), HashMap::new()).unwrap();

        let plain = resolver.resolve(&target("10.9.9.9"));
        assert_eq!(plain, defaults());

        let request = RequestCredentials {
            username: None,
            password: Some("from-request".to_string()),
        };
        let config = resolver.resolve_for_request(&target("10.9.9.9"), &request);
        assert_eq!(config.username.as_deref(), Some("admin"));
        assert_eq!(config.password.as_deref(), Some("from-request"));
    }

    #[test]
    fn test_request_credentials_beat_override_block() {
        let resolver = TargetResolver::new(
            defaults(),
            Vec::new(),
            [(
                target("ht"),
                TargetOverride {
                    username: Some("cfg".to_string()),
                    password: Some("cfg".to_string()),
                    ..Default::default()
                },
            )]
            .into_iter()
            .collect(),
        )
        .unwrap();
        let request = RequestCredentials {
            username: Some("req".to_string()),
            password: Some("req".to_string()),
        };

        let config = resolver.resolve_for_request(&target("ht"), &request);
        assert_eq!(
            config.credentials(),
            Some(Credentials {
                username: "req".to_string(),
                password: "req".to_string()
            })
        );
    }

    #[test]
    fn test_credentials_need_both_fields() {
        let mut config = defaults();
        config.password = None;
        assert!(config.credentials().is_none());
    }

    #[test]
    fn test_from_config_normalizes_and_dedupes() {
        let config = ExporterConfig {
            static_targets: vec![
                StaticTarget::Address("HTTP://10.0.0.5/".to_string()),
                StaticTarget::Address("10.0.0.5".to_string()),
                StaticTarget::Address("10.0.0.6".to_string()),
            ],
            targetcfg: [(
                "http://10.0.0.6".to_string(),
                TargetOverride {
                    timeout: Some(1.5),
                    ..Default::default()
                },
            )]
            .into_iter()
            .collect(),
            ..Default::default()
        };

        let resolver = TargetResolver::from_config(&config).unwrap();

        assert_eq!(
            resolver.static_targets(),
            &[target("10.0.0.5"), target("10.0.0.6")]
        );
        assert!(resolver.is_static(&target("10.0.0.6")));
        assert!(!resolver.is_static(&target("10.0.0.7")));
        assert_eq!(
            resolver.resolve(&target("10.0.0.6")).timeout,
            Duration::from_millis(1500)
        );
    }

    #[test]
    fn test_out_of_range_timeout_rejected_up_front() {
        let result = TargetResolver::new(
            defaults(),
            Vec::new(),
            [(
                target("10.0.0.5"),
                TargetOverride {
                    timeout: Some(1e20),
                    ..Default::default()
                },
            )]
            .into_iter()
            .collect(),
        );
        assert!(matches!(result, Err(ConfigError::Validation(_))));

        let config = ExporterConfig {
            timeout: f64::MAX,
            ..Default::default()
        };
        assert!(TargetResolver::from_config(&config).is_err());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials {
            username: "admin".to_string(),
            password: "hunter2".to_string(),
        };
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }
}
