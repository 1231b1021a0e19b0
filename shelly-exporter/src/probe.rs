//! Single-target probe: identity, dispatch, telemetry, extraction.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use shelly_common::{MetricSample, MetricSet, current_timestamp_secs};
use thiserror::Error;
use tracing::{debug, warn};

use crate::client::{DeviceClient, DeviceError};
use crate::devices::{DeviceRegistry, IDENTITY, Telemetry};
use crate::resolver::{Credentials, RequestCredentials, TargetConfig, TargetResolver};
use crate::store::{SharedStore, StorageError};
use crate::target::Target;

/// Why a probe failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProbeErrorKind {
    /// The requested target is not a valid address.
    InvalidTarget,
    /// Device unreachable or answered with an unexpected status.
    Transport,
    /// Device did not answer within the target timeout.
    Timeout,
    /// Device rejected the credentials.
    Auth,
    /// No extractor registered for the reported type.
    UnsupportedDeviceType,
    /// Identity document unusable.
    MalformedPayload,
}

impl ProbeErrorKind {
    pub const ALL: [ProbeErrorKind; 6] = [
        ProbeErrorKind::InvalidTarget,
        ProbeErrorKind::Transport,
        ProbeErrorKind::Timeout,
        ProbeErrorKind::Auth,
        ProbeErrorKind::UnsupportedDeviceType,
        ProbeErrorKind::MalformedPayload,
    ];

    /// Stable reason code used in logs, error bodies and counters.
    pub fn reason(&self) -> &'static str {
        match self {
            ProbeErrorKind::InvalidTarget => "invalid_target",
            ProbeErrorKind::Transport => "transport",
            ProbeErrorKind::Timeout => "timeout",
            ProbeErrorKind::Auth => "auth",
            ProbeErrorKind::UnsupportedDeviceType => "unsupported_device_type",
            ProbeErrorKind::MalformedPayload => "malformed_payload",
        }
    }
}

impl std::fmt::Display for ProbeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason())
    }
}

/// A failed probe. No samples are ever returned alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: target {target}: {message}")]
pub struct ProbeFailure {
    pub target: String,
    pub kind: ProbeErrorKind,
    pub message: String,
}

impl ProbeFailure {
    fn new(target: impl Into<String>, kind: ProbeErrorKind, message: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            kind,
            message: message.into(),
        }
    }

    fn from_device(target: &Target, endpoint: &str, error: DeviceError) -> Self {
        let kind = match &error {
            DeviceError::Timeout(_) => ProbeErrorKind::Timeout,
            DeviceError::Transport(_) | DeviceError::Status(_) => ProbeErrorKind::Transport,
            DeviceError::Unauthorized(_) => ProbeErrorKind::Auth,
            DeviceError::Malformed(_) => ProbeErrorKind::MalformedPayload,
        };
        Self::new(target.as_str(), kind, format!("{}: {}", endpoint, error))
    }
}

/// Result of a successful `/probe`.
#[derive(Debug)]
pub struct ProbeOutcome {
    pub set: MetricSet,
    /// Set when the probe asked to save and the store could not persist it.
    pub storage_warning: Option<StorageError>,
}

/// Runs probes against devices and optionally saves the result.
#[derive(Clone)]
pub struct ProbeExecutor {
    client: Arc<dyn DeviceClient>,
    registry: Arc<DeviceRegistry>,
    resolver: Arc<TargetResolver>,
    store: SharedStore,
}

impl ProbeExecutor {
    pub fn new(
        client: Arc<dyn DeviceClient>,
        registry: Arc<DeviceRegistry>,
        resolver: Arc<TargetResolver>,
        store: SharedStore,
    ) -> Self {
        Self {
            client,
            registry,
            resolver,
            store,
        }
    }

    pub fn resolver(&self) -> &TargetResolver {
        &self.resolver
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Probe an ad-hoc target as requested through `/probe`.
    ///
    /// Request credentials take precedence over every configured layer. With
    /// `save`, a successful result gets a `probetime` sample and is written
    /// to the store; a storage failure does not fail the probe.
    pub async fn probe(
        &self,
        raw_target: &str,
        request: &RequestCredentials,
        save: bool,
    ) -> Result<ProbeOutcome, ProbeFailure> {
        let target = Target::parse(raw_target).map_err(|e| {
            ProbeFailure::new(raw_target, ProbeErrorKind::InvalidTarget, e.to_string())
        })?;
        let config = self.resolver.resolve_for_request(&target, request);

        let mut set = self.probe_with(&target, &config).await?;
        if !save {
            return Ok(ProbeOutcome {
                set,
                storage_warning: None,
            });
        }

        let mut probetime = MetricSample::counter("probetime", current_timestamp_secs() as f64)
            .with_help("Unix time of the last saved probe");
        probetime.inherit_labels(&target_labels(&target, &set.device_type, &config));
        set.push(probetime);

        let storage_warning = match self.store.save(&target, set.clone()).await {
            Ok(()) => None,
            Err(e) => {
                warn!(target = %target, error = %e, "Saved metrics are not durable");
                Some(e)
            }
        };

        Ok(ProbeOutcome {
            set,
            storage_warning,
        })
    }

    /// Probe a target with an already-resolved configuration.
    pub async fn probe_with(
        &self,
        target: &Target,
        config: &TargetConfig,
    ) -> Result<MetricSet, ProbeFailure> {
        let result = self.run(target, config).await;
        match &result {
            Ok(set) => debug!(
                target = %target,
                device_type = %set.device_type,
                samples = set.len(),
                "Probe succeeded"
            ),
            Err(failure) => debug!(
                target = %target,
                reason = failure.kind.reason(),
                error = %failure.message,
                "Probe failed"
            ),
        }
        result
    }

    async fn run(&self, target: &Target, config: &TargetConfig) -> Result<MetricSet, ProbeFailure> {
        let credentials = config.credentials();

        let identity = self
            .fetch(target, IDENTITY, credentials.as_ref(), config.timeout)
            .await
            .map_err(|e| ProbeFailure::from_device(target, IDENTITY, e))?;

        let device_type = identity
            .get("type")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ProbeFailure::new(
                    target.as_str(),
                    ProbeErrorKind::MalformedPayload,
                    "identity has no device type",
                )
            })?
            .to_string();

        let extractor = self.registry.lookup(&device_type).map_err(|e| {
            ProbeFailure::new(
                target.as_str(),
                ProbeErrorKind::UnsupportedDeviceType,
                e.to_string(),
            )
        })?;

        let mut telemetry = Telemetry::new();
        for endpoint in extractor.endpoints() {
            match self
                .fetch(target, endpoint, credentials.as_ref(), config.timeout)
                .await
            {
                Ok(body) => telemetry.insert(*endpoint, body),
                Err(DeviceError::Malformed(msg)) => {
                    warn!(target = %target, endpoint, error = %msg, "Unparseable telemetry");
                    telemetry.insert(*endpoint, Value::Null);
                }
                Err(e) => return Err(ProbeFailure::from_device(target, endpoint, e)),
            }
        }

        let mut samples = extractor.extract(&device_type, &telemetry);
        if samples.is_empty() {
            warn!(
                target = %target,
                device_type = %device_type,
                family = extractor.family(),
                "Extraction produced no samples"
            );
        }

        let labels = target_labels(target, &device_type, config);
        for sample in &mut samples {
            sample.inherit_labels(&labels);
        }

        Ok(MetricSet::new(target.as_str(), device_type, samples))
    }

    async fn fetch(
        &self,
        target: &Target,
        endpoint: &str,
        credentials: Option<&Credentials>,
        timeout: Duration,
    ) -> Result<Value, DeviceError> {
        match tokio::time::timeout(
            timeout,
            self.client.get_json(target, endpoint, credentials, timeout),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DeviceError::Timeout(timeout)),
        }
    }
}

/// Labels attached to every sample of a target. Configured extra labels
/// cannot shadow `name` or `type`.
fn target_labels(
    target: &Target,
    device_type: &str,
    config: &TargetConfig,
) -> BTreeMap<String, String> {
    let mut labels = config.labels.clone();
    labels.insert("name".to_string(), target.to_string());
    labels.insert("type".to_string(), device_type.to_string());
    labels
}
