//! Shelly H&T battery-powered humidity and temperature sensor.
//!
//! The sensor sleeps most of the time and is normally scraped through
//! `/probe?save=true` when it wakes up and pushes.

use shelly_common::MetricSample;

use super::{Extractor, SampleSink, Telemetry, base};

#[derive(Debug, Clone, Copy, Default)]
pub struct HumidityTemperatureExtractor;

impl Extractor for HumidityTemperatureExtractor {
    fn family(&self) -> &'static str {
        "humidity_temperature"
    }

    fn device_types(&self) -> &'static [&'static str] {
        &["SHHT-1"]
    }

    fn extract(&self, _device_type: &str, telemetry: &Telemetry) -> Vec<MetricSample> {
        let status = telemetry.status();
        let mut sink = SampleSink::new();

        base::extract_common(status, &mut sink);

        sink.gauge("bat_charge", status, "/bat/value", "Percentage of battery level");
        sink.gauge("bat_voltage", status, "/bat/voltage", "Battery voltage");
        sink.gauge("humidity", status, "/hum/value", "Air humidity, in %rH");
        sink.gauge(
            "humidity_valid",
            status,
            "/hum/is_valid",
            "Whether the humidity measurement is valid",
        );
        sink.gauge("temperature", status, "/tmp/value", "Air temperature");
        sink.gauge(
            "temperature_valid",
            status,
            "/tmp/is_valid",
            "Whether the temperature measurement is valid",
        );

        sink.finish()
    }
}
