//! Plugs and relay switches: relays plus optional power meters.

use serde_json::Value;
use shelly_common::MetricSample;

use super::{Extractor, SETTINGS, STATUS, SampleSink, Telemetry, array, base};

/// Device type of the Plug S, which exposes extra LED settings and an
/// internal temperature sensor.
const PLUG_S: &str = "SHPLG-S";

/// Shelly Plug / Plug S / Plug US and the 1, 1PM and 2.5 relays.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelayExtractor;

impl Extractor for RelayExtractor {
    fn family(&self) -> &'static str {
        "relay"
    }

    fn device_types(&self) -> &'static [&'static str] {
        &[
            PLUG_S, "SHPLG-1", "SHPLG2-1", "SHPLG-U1", "SHSW-1", "SHSW-PM", "SHSW-25",
        ]
    }

    fn endpoints(&self) -> &'static [&'static str] {
        &[STATUS, SETTINGS]
    }

    fn extract(&self, device_type: &str, telemetry: &Telemetry) -> Vec<MetricSample> {
        let status = telemetry.status();
        let settings = telemetry.settings();
        let mut sink = SampleSink::new();

        base::extract_common(status, &mut sink);

        sink.gauge(
            "max_power",
            settings,
            "/max_power",
            "Overpower threshold in Watts",
        );

        if device_type.eq_ignore_ascii_case(PLUG_S) {
            sink.gauge(
                "led_status_disable",
                settings,
                "/led_status_disable",
                "Whether LED indication for connection status is disabled",
            );
            sink.gauge(
                "led_power_disable",
                settings,
                "/led_power_disable",
                "Whether LED indication for output status is disabled",
            );
            sink.gauge(
                "temperature",
                status,
                "/temperature",
                "Internal device temperature in °C",
            );
            sink.gauge(
                "overtemperature",
                status,
                "/overtemperature",
                "Whether the device has overheated",
            );
        }

        for (i, relay) in array(status, "/relays").iter().enumerate() {
            extract_relay(&i.to_string(), relay, &mut sink);
        }

        for (i, meter) in array(status, "/meters").iter().enumerate() {
            let index = i.to_string();
            let labels = [("meter", index.as_str())];
            sink.gauge_with(
                "meter_power",
                &labels,
                meter,
                "/power",
                "Current real AC power being drawn, in Watts",
            );
            sink.gauge_with(
                "meter_is_valid",
                &labels,
                meter,
                "/is_valid",
                "Whether power metering self-checks OK",
            );
            sink.counter_with(
                "meter_total",
                &labels,
                meter,
                "/total",
                "Total energy consumed by the attached appliance in Watt-minute",
            );
        }

        sink.finish()
    }
}

fn extract_relay(index: &str, relay: &Value, sink: &mut SampleSink) {
    let labels = [("relay", index)];
    sink.gauge_with(
        "relay_ison",
        &labels,
        relay,
        "/ison",
        "Whether the channel is turned ON or OFF",
    );
    sink.gauge_with(
        "relay_has_timer",
        &labels,
        relay,
        "/has_timer",
        "Whether a timer is currently armed for this channel",
    );
    if relay.pointer("/has_timer").and_then(Value::as_bool) == Some(true) {
        sink.gauge_with(
            "relay_timer_started",
            &labels,
            relay,
            "/timer_started",
            "Unix timestamp of timer start; 0 if timer inactive or time not synced",
        );
        sink.gauge_with(
            "relay_timer_duration",
            &labels,
            relay,
            "/timer_duration",
            "Timer duration, s",
        );
        sink.gauge_with(
            "relay_timer_remaining",
            &labels,
            relay,
            "/timer_remaining",
            "Seconds until the active timer elapses; 0 otherwise",
        );
    }
    sink.gauge_with(
        "relay_overpower",
        &labels,
        relay,
        "/overpower",
        "Whether the channel was turned off by overpower protection",
    );
}
