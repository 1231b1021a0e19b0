//! Device type registry and per-family metric extractors.
//!
//! Every Shelly device reports its model in the `type` field of `/shelly`.
//! The [`DeviceRegistry`] maps that string to an [`Extractor`], which turns
//! the raw JSON of the device's telemetry endpoints into [`MetricSample`]s.
//!
//! Adding a device family means writing one more [`Extractor`] and listing
//! it in [`builtin_extractors`]; the probe and aggregation code never looks
//! at device types.

mod base;
mod ht;
mod relay;
mod trv;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use shelly_common::MetricSample;
use thiserror::Error;
use tracing::warn;

pub use ht::HumidityTemperatureExtractor;
pub use relay::RelayExtractor;
pub use trv::ThermostatExtractor;

/// Self-description endpoint, returns at least `{"type": "..."}`.
pub const IDENTITY: &str = "/shelly";
/// Runtime status endpoint.
pub const STATUS: &str = "/status";
/// Device settings endpoint.
pub const SETTINGS: &str = "/settings";

/// No extractor is registered for the reported device type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported device type '{0}'")]
pub struct UnsupportedDeviceType(pub String);

/// Raw JSON documents fetched from a device, keyed by endpoint path.
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    responses: BTreeMap<String, Value>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the response of an endpoint.
    pub fn insert(&mut self, endpoint: impl Into<String>, body: Value) {
        self.responses.insert(endpoint.into(), body);
    }

    /// Builder-style [`Telemetry::insert`].
    pub fn with(mut self, endpoint: impl Into<String>, body: Value) -> Self {
        self.insert(endpoint, body);
        self
    }

    /// Response of an endpoint, `Null` when it was not fetched.
    pub fn get(&self, endpoint: &str) -> &Value {
        self.responses.get(endpoint).unwrap_or(&Value::Null)
    }

    pub fn status(&self) -> &Value {
        self.get(STATUS)
    }

    pub fn settings(&self) -> &Value {
        self.get(SETTINGS)
    }
}

/// Metric extraction strategy for one device family.
///
/// Implementations are pure: they never perform I/O and never fail. A field
/// that is missing or has the wrong JSON type only drops its own sample.
pub trait Extractor: Send + Sync {
    /// Family name, used in logs.
    fn family(&self) -> &'static str;

    /// Device type strings (as reported by `/shelly`) handled by this family.
    fn device_types(&self) -> &'static [&'static str];

    /// Telemetry endpoints the extractor reads.
    fn endpoints(&self) -> &'static [&'static str] {
        &[STATUS]
    }

    /// Convert raw telemetry into samples.
    fn extract(&self, device_type: &str, telemetry: &Telemetry) -> Vec<MetricSample>;
}

/// Extractors compiled into the exporter.
pub fn builtin_extractors() -> Vec<Arc<dyn Extractor>> {
    vec![
        Arc::new(RelayExtractor),
        Arc::new(ThermostatExtractor),
        Arc::new(HumidityTemperatureExtractor),
    ]
}

/// Maps device type strings to extractors.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    extractors: BTreeMap<String, Arc<dyn Extractor>>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with all [`builtin_extractors`].
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for extractor in builtin_extractors() {
            registry.register(extractor);
        }
        registry
    }

    /// Register an extractor for every device type it declares.
    ///
    /// A type that is already registered is taken over by the new extractor.
    pub fn register(&mut self, extractor: Arc<dyn Extractor>) {
        for device_type in extractor.device_types() {
            let key = normalize_type(device_type);
            if let Some(previous) = self.extractors.insert(key, extractor.clone()) {
                warn!(
                    device_type,
                    previous = previous.family(),
                    family = extractor.family(),
                    "Device type registered twice, keeping the latest"
                );
            }
        }
    }

    /// Find the extractor for a device type.
    pub fn lookup(&self, device_type: &str) -> Result<Arc<dyn Extractor>, UnsupportedDeviceType> {
        self.extractors
            .get(&normalize_type(device_type))
            .cloned()
            .ok_or_else(|| UnsupportedDeviceType(device_type.to_string()))
    }

    /// All registered device types, sorted.
    pub fn device_types(&self) -> impl Iterator<Item = &str> {
        self.extractors.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.extractors.iter().map(|(k, v)| (k, v.family())))
            .finish()
    }
}

fn normalize_type(device_type: &str) -> String {
    device_type.trim().to_ascii_uppercase()
}

/// The array at `pointer`, empty when missing or not an array.
pub(crate) fn array<'a>(doc: &'a Value, pointer: &str) -> &'a [Value] {
    doc.pointer(pointer)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Interpret a JSON value as a sample value: numbers as-is, booleans as 0/1.
pub(crate) fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Collects samples, silently skipping fields that cannot be read.
#[derive(Debug, Default)]
pub(crate) struct SampleSink {
    samples: Vec<MetricSample>,
    skipped: Vec<String>,
}

impl SampleSink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a gauge read from `pointer` (RFC 6901) inside `doc`.
    pub(crate) fn gauge(&mut self, name: &'static str, doc: &Value, pointer: &str, help: &str) {
        self.push(MetricSample::gauge(name, 0.0), doc, pointer, help, &[]);
    }

    /// Add a counter read from `pointer` inside `doc`.
    pub(crate) fn counter(&mut self, name: &'static str, doc: &Value, pointer: &str, help: &str) {
        self.push(MetricSample::counter(name, 0.0), doc, pointer, help, &[]);
    }

    /// Add a labeled gauge read from `pointer` inside `doc`.
    pub(crate) fn gauge_with(
        &mut self,
        name: &'static str,
        labels: &[(&str, &str)],
        doc: &Value,
        pointer: &str,
        help: &str,
    ) {
        self.push(MetricSample::gauge(name, 0.0), doc, pointer, help, labels);
    }

    /// Add a labeled counter read from `pointer` inside `doc`.
    pub(crate) fn counter_with(
        &mut self,
        name: &'static str,
        labels: &[(&str, &str)],
        doc: &Value,
        pointer: &str,
        help: &str,
    ) {
        self.push(MetricSample::counter(name, 0.0), doc, pointer, help, labels);
    }

    fn push(
        &mut self,
        mut sample: MetricSample,
        doc: &Value,
        pointer: &str,
        help: &str,
        labels: &[(&str, &str)],
    ) {
        let Some(value) = doc.pointer(pointer).and_then(numeric) else {
            self.skipped.push(sample.name);
            return;
        };
        sample.value = value;
        sample.help = help.to_string();
        for (k, v) in labels {
            sample.labels.insert((*k).to_string(), (*v).to_string());
        }
        self.samples.push(sample);
    }

    /// Names of the samples that were skipped.
    #[cfg(test)]
    pub(crate) fn skipped(&self) -> &[String] {
        &self.skipped
    }

    pub(crate) fn finish(self) -> Vec<MetricSample> {
        if !self.skipped.is_empty() {
            tracing::trace!(skipped = ?self.skipped, "Fields missing from telemetry");
        }
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_registry_is_enumerable() {
        let registry = DeviceRegistry::builtin();
        let types: Vec<&str> = registry.device_types().collect();

        assert!(types.contains(&"SHPLG-S"));
        assert!(types.contains(&"SHSW-PM"));
        assert!(types.contains(&"SHTRV-01"));
        assert!(types.contains(&"SHHT-1"));
        assert!(types.windows(2).all(|w| w[0] < w[1]), "sorted and unique");
    }

    #[test]
    fn test_lookup_dispatches_by_type() {
        let registry = DeviceRegistry::builtin();

        assert_eq!(registry.lookup("SHPLG-S").unwrap().family(), "relay");
        assert_eq!(registry.lookup("shht-1").unwrap().family(), "humidity_temperature");
        assert_eq!(registry.lookup(" SHTRV-01 ").unwrap().family(), "thermostat");
    }

    #[test]
    fn test_lookup_unsupported() {
        let registry = DeviceRegistry::builtin();
        let err = registry.lookup("SHBLB-1").err().unwrap();

        assert_eq!(err, UnsupportedDeviceType("SHBLB-1".to_string()));
        assert!(err.to_string().contains("SHBLB-1"));
    }

    struct DoorWindow;

    impl Extractor for DoorWindow {
        fn family(&self) -> &'static str {
            "door_window"
        }

        fn device_types(&self) -> &'static [&'static str] {
            &["SHDW-2"]
        }

        fn extract(&self, _device_type: &str, telemetry: &Telemetry) -> Vec<MetricSample> {
            let mut sink = SampleSink::new();
            sink.gauge("lux", telemetry.status(), "/lux/value", "Illuminance");
            sink.finish()
        }
    }

    #[test]
    fn test_register_additional_family() {
        let mut registry = DeviceRegistry::builtin();
        let before = registry.device_types().count();
        registry.register(Arc::new(DoorWindow));

        assert_eq!(registry.device_types().count(), before + 1);
        let extractor = registry.lookup("SHDW-2").unwrap();
        let telemetry = Telemetry::new().with(STATUS, json!({"lux": {"value": 120}}));
        let samples = extractor.extract("SHDW-2", &telemetry);
        assert_eq!(samples[0].value, 120.0);
    }

    #[test]
    fn test_numeric_conversion() {
        assert_eq!(numeric(&json!(12.5)), Some(12.5));
        assert_eq!(numeric(&json!(true)), Some(1.0));
        assert_eq!(numeric(&json!(false)), Some(0.0));
        assert_eq!(numeric(&json!("12")), None);
        assert_eq!(numeric(&Value::Null), None);
    }

    #[test]
    fn test_sink_skips_missing_and_wrong_typed() {
        let doc = json!({"a": 1, "b": "x", "c": {"d": true}});
        let mut sink = SampleSink::new();
        sink.gauge("a", &doc, "/a", "");
        sink.gauge("b", &doc, "/b", "");
        sink.gauge("missing", &doc, "/nope", "");
        sink.counter_with("d", &[("relay", "0")], &doc, "/c/d", "");

        assert_eq!(sink.skipped().len(), 2);
        let samples = sink.finish();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].labels["relay"], "0");
        assert_eq!(samples[1].value, 1.0);
    }

    #[test]
    fn test_telemetry_missing_endpoint_is_null() {
        let telemetry = Telemetry::new();
        assert!(telemetry.settings().is_null());
    }
}
