//! Prometheus exporter for Shelly smart relays and sensors.
//!
//! Devices are polled over their HTTP API, their JSON telemetry is
//! normalized into [`shelly_common::MetricSet`]s and exposed in the
//! Prometheus text format.
//!
//! # Architecture
//!
//! ```text
//!                  ┌──────────────┐    ┌────────────────┐    ┌──────────────┐
//!  GET /probe ────>│ ProbeExecutor│───>│ DeviceRegistry │───>│  Extractors  │
//!                  └──────┬───────┘    └────────────────┘    └──────────────┘
//!                         │ save=true
//!                         v
//!                  ┌──────────────┐    ┌────────────────┐
//!  GET /metrics ──>│  Aggregator  │───>│  MetricsStore  │──> file / S3
//!                  └──────────────┘    └────────────────┘
//! ```
//!
//! `/metrics` probes every static target live and adds the saved results
//! of targets that pushed through `/probe?save=true`, such as battery
//! sensors that are asleep most of the time.
//!
//! # Usage
//!
//! ```bash
//! shelly-exporter --static-targets 10.0.0.10,10.0.0.11 --metrics-file /var/lib/shelly/metrics.json
//! ```
//!
//! See [`config::ExporterConfig`] and [`cli::Args`] for all options.

pub mod aggregation;
pub mod cli;
pub mod client;
pub mod config;
pub mod devices;
pub mod exposition;
pub mod http;
pub mod probe;
pub mod resolver;
pub mod store;
pub mod target;

pub use aggregation::{Aggregator, ExporterStats};
pub use client::{DeviceClient, DeviceError, HttpDeviceClient};
pub use config::{ConfigError, ExporterConfig};
pub use devices::{DeviceRegistry, Extractor};
pub use http::{HttpServer, create_router};
pub use probe::{ProbeErrorKind, ProbeExecutor, ProbeFailure, ProbeOutcome};
pub use resolver::{RequestCredentials, TargetConfig, TargetResolver};
pub use store::{MetricsStore, SharedStore, StorageBackend, StorageError, backend_from_config};
pub use target::Target;
