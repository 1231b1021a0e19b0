//! Status block shared by every Gen1 Shelly device.

use serde_json::Value;

use super::SampleSink;

/// Extract connectivity, firmware and system metrics from `/status`.
pub(super) fn extract_common(status: &Value, sink: &mut SampleSink) {
    sink.gauge(
        "wifi_sta_connected",
        status,
        "/wifi_sta/connected",
        "Current status of the WiFi connection (connected or not)",
    );
    sink.gauge(
        "wifi_sta_rssi",
        status,
        "/wifi_sta/rssi",
        "WiFi signal strength in dBm",
    );
    sink.gauge(
        "cloud_enabled",
        status,
        "/cloud/enabled",
        "Whether the cloud connection is enabled",
    );
    sink.gauge(
        "cloud_connected",
        status,
        "/cloud/connected",
        "Current cloud connection status (connected or not)",
    );
    sink.gauge(
        "mqtt_connected",
        status,
        "/mqtt/connected",
        "MQTT connection status, when MQTT is enabled (connected or not)",
    );
    sink.gauge("serial", status, "/serial", "Cloud serial number");
    sink.gauge(
        "has_update",
        status,
        "/update/has_update",
        "Whether a firmware update is available",
    );
    sink.gauge(
        "ram_total",
        status,
        "/ram_total",
        "Total amount of system memory in bytes",
    );
    sink.gauge(
        "ram_free",
        status,
        "/ram_free",
        "Available amount of system memory in bytes",
    );
    sink.gauge(
        "fs_size",
        status,
        "/fs_size",
        "Total amount of the file system in bytes",
    );
    sink.gauge(
        "fs_free",
        status,
        "/fs_free",
        "Available amount of the file system in bytes",
    );
    sink.counter("uptime", status, "/uptime", "Seconds elapsed since boot");
}
