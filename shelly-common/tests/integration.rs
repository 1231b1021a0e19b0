//! Integration tests for shelly-common library.

use std::collections::BTreeMap;

use shelly_common::{LogFormat, LoggingConfig, MetricKind, MetricSample, MetricSet, parse_yaml};

#[test]
fn test_metric_set_workflow() {
    let base: BTreeMap<String, String> = [
        ("name".to_string(), "shellyplug-s-1a2b3c".to_string()),
        ("type".to_string(), "SHPLG-S".to_string()),
    ]
    .into_iter()
    .collect();

    let mut samples = vec![
        MetricSample::gauge("relay_ison", 1.0).with_label("relay", "0"),
        MetricSample::counter("meter_total", 9631.0).with_label("meter", "0"),
    ];
    for sample in &mut samples {
        sample.inherit_labels(&base);
    }

    let set = MetricSet::new("shellyplug-s-1a2b3c", "SHPLG-S", samples);
    assert_eq!(set.len(), 2);
    assert!(set.captured_at > 0);

    let relay = set.find("relay_ison").expect("relay sample");
    assert_eq!(relay.labels.len(), 3);
    assert_eq!(relay.labels["relay"], "0");
    assert_eq!(relay.labels["type"], "SHPLG-S");

    // Persisted shape survives a JSON round-trip unchanged
    let bytes = serde_json::to_vec(&set).expect("encode");
    let decoded: MetricSet = serde_json::from_slice(&bytes).expect("decode");
    assert_eq!(decoded, set);
    assert_eq!(decoded.find("meter_total").unwrap().kind, MetricKind::Counter);
}

#[test]
fn test_logging_config_from_yaml() {
    #[derive(serde::Deserialize)]
    struct Doc {
        logging: LoggingConfig,
    }

    let doc: Doc = parse_yaml("logging:\n  level: debug\n  format: json\n").expect("parse");
    assert_eq!(doc.logging.level, "debug");
    assert_eq!(doc.logging.format, LogFormat::Json);
}
