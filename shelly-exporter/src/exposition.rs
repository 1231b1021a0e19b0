//! Prometheus text exposition of metric sets.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;

use shelly_common::{MetricKind, MetricSample, MetricSet};

use crate::aggregation::ExporterStats;
use crate::probe::ProbeErrorKind;

/// Sanitize a metric name to match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
///
/// Runs of invalid characters become one underscore, and a leading digit
/// gets an underscore in front.
pub fn sanitize_metric_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len() + 1);
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        result.push('_');
    }

    for c in name.chars() {
        let c = if c.is_ascii_alphanumeric() || c == ':' {
            c
        } else {
            '_'
        };
        if c == '_' && result.ends_with('_') {
            continue;
        }
        result.push(c);
    }

    let trimmed = result.trim_end_matches('_');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Sanitize a label name to match `[a-zA-Z_][a-zA-Z0-9_]*`.
///
/// Names starting with `__` are reserved by Prometheus and get a `z` prefix.
pub fn sanitize_label_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    for (i, c) in name.chars().enumerate() {
        let valid = c.is_ascii_alphabetic() || c == '_' || (i > 0 && c.is_ascii_digit());
        let c = if valid { c } else { '_' };
        if c == '_' && result.ends_with('_') && !valid {
            continue;
        }
        result.push(c);
    }

    let mut result = result.trim_end_matches('_').to_string();
    if result.is_empty() {
        return "label".to_string();
    }
    if result.starts_with("__") {
        result.insert(0, 'z');
    }
    result
}

/// Full metric name: `{prefix}_{name}`, or just `name` without a prefix.
pub fn build_metric_name(prefix: &str, name: &str) -> String {
    let name = sanitize_metric_name(name);
    if prefix.is_empty() {
        name
    } else {
        format!("{}_{}", sanitize_metric_name(prefix), name)
    }
}

/// Render metric sets. Samples sharing a name are grouped under one
/// `# HELP` / `# TYPE` header; kind and help come from the first sample.
pub fn render(sets: &[MetricSet], prefix: &str) -> String {
    let mut families: BTreeMap<String, Vec<&MetricSample>> = BTreeMap::new();
    let mut names: HashMap<&str, String> = HashMap::new();

    for sample in sets.iter().flat_map(|set| &set.samples) {
        let name = names
            .entry(sample.name.as_str())
            .or_insert_with(|| build_metric_name(prefix, &sample.name));
        families.entry(name.clone()).or_default().push(sample);
    }

    let mut output = Vec::with_capacity(families.len() * 128);
    for (name, samples) in &families {
        let first = samples[0];
        if !first.help.is_empty() {
            writeln!(output, "# HELP {} {}", name, escape_help(&first.help)).ok();
        }
        writeln!(output, "# TYPE {} {}", name, first.kind).ok();

        for sample in samples {
            writeln!(
                output,
                "{}{} {}",
                name,
                format_labels(&sample.labels),
                format_value(sample.value)
            )
            .ok();
        }
    }

    String::from_utf8(output).unwrap_or_default()
}

/// Render the exporter's own counters.
pub fn render_stats(stats: &ExporterStats, prefix: &str) -> String {
    let mut output = Vec::new();
    let name = |suffix: &str| build_metric_name(prefix, &format!("exporter_{}", suffix));

    write_family(
        &mut output,
        &name("scrapes_total"),
        MetricKind::Counter,
        "Number of /metrics scrapes served",
    );
    writeln!(output, "{} {}", name("scrapes_total"), stats.scrapes_total).ok();

    write_family(
        &mut output,
        &name("omitted_targets_total"),
        MetricKind::Counter,
        "Static targets left out of a scrape, by failure reason",
    );
    for kind in ProbeErrorKind::ALL {
        writeln!(
            output,
            "{}{{reason=\"{}\"}} {}",
            name("omitted_targets_total"),
            kind.reason(),
            stats.omitted.get(&kind).copied().unwrap_or(0)
        )
        .ok();
    }

    write_family(
        &mut output,
        &name("store_write_failures_total"),
        MetricKind::Counter,
        "Saved probes that could not be persisted",
    );
    writeln!(
        output,
        "{} {}",
        name("store_write_failures_total"),
        stats.store_write_failures
    )
    .ok();

    write_family(
        &mut output,
        &name("saved_targets"),
        MetricKind::Gauge,
        "Targets with saved metrics",
    );
    writeln!(output, "{} {}", name("saved_targets"), stats.saved_targets).ok();

    write_family(
        &mut output,
        &name("static_targets"),
        MetricKind::Gauge,
        "Configured static targets",
    );
    writeln!(output, "{} {}", name("static_targets"), stats.static_targets).ok();

    String::from_utf8(output).unwrap_or_default()
}

fn write_family(output: &mut Vec<u8>, name: &str, kind: MetricKind, help: &str) {
    writeln!(output, "# HELP {} {}", name, help).ok();
    writeln!(output, "# TYPE {} {}", name, kind).ok();
}

fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        let inf = if value.is_sign_positive() { "+Inf" } else { "-Inf" };
        inf.to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

fn format_labels(labels: &BTreeMap<String, String>) -> String {
    if labels.is_empty() {
        return String::new();
    }

    // Keys that sanitize to the same name keep the first value
    let mut sanitized: BTreeMap<String, &str> = BTreeMap::new();
    for (k, v) in labels {
        sanitized.entry(sanitize_label_name(k)).or_insert(v);
    }

    let parts: Vec<String> = sanitized
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}
