use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of a metric sample, mirrored in the `# TYPE` line of the exposition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Can go up or down.
    #[default]
    Gauge,
    /// Monotonically increasing.
    Counter,
}

impl MetricKind {
    /// Get the string used in the `# TYPE` comment.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single normalized observation taken from a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Metric name without the exporter prefix (e.g., "relay_ison").
    pub name: String,

    /// Label set. Ordered so that equal sets compare and render identically.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// The measured value. Booleans are stored as 0/1.
    pub value: f64,

    /// Gauge or counter.
    #[serde(default)]
    pub kind: MetricKind,

    /// Human readable description, rendered as `# HELP`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub help: String,
}

impl MetricSample {
    /// Create a gauge sample with no labels.
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
            value,
            kind: MetricKind::Gauge,
            help: String::new(),
        }
    }

    /// Create a counter sample with no labels.
    pub fn counter(name: impl Into<String>, value: f64) -> Self {
        Self {
            kind: MetricKind::Counter,
            ..Self::gauge(name, value)
        }
    }

    /// Add a label to this sample.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Set the help text.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    /// Merge `base` labels underneath this sample's own labels.
    ///
    /// Labels already present on the sample are kept.
    pub fn inherit_labels(&mut self, base: &BTreeMap<String, String>) {
        for (k, v) in base {
            self.labels.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
}

/// All samples captured from one target at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSet {
    /// Normalized identity of the target the samples came from.
    pub target: String,

    /// Device type reported by the target (e.g., "SHPLG-S").
    #[serde(default)]
    pub device_type: String,

    /// Unix epoch milliseconds when the probe completed.
    pub captured_at: i64,

    /// Samples in extraction order.
    #[serde(default)]
    pub samples: Vec<MetricSample>,
}

impl MetricSet {
    /// Create a set stamped with the current time.
    pub fn new(
        target: impl Into<String>,
        device_type: impl Into<String>,
        samples: Vec<MetricSample>,
    ) -> Self {
        Self {
            target: target.into(),
            device_type: device_type.into(),
            captured_at: current_timestamp_millis(),
            samples,
        }
    }

    /// Number of samples in the set.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the set holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Append a sample.
    pub fn push(&mut self, sample: MetricSample) {
        self.samples.push(sample);
    }

    /// Find the first sample with the given name.
    pub fn find(&self, name: &str) -> Option<&MetricSample> {
        self.samples.iter().find(|s| s.name == name)
    }
}

/// Get the current timestamp in milliseconds since Unix epoch.
pub fn current_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Get the current timestamp in whole seconds since Unix epoch.
pub fn current_timestamp_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
