//! Shelly TRV thermostatic radiator valve.

use shelly_common::MetricSample;

use super::{Extractor, SampleSink, Telemetry, array, base};

#[derive(Debug, Clone, Copy, Default)]
pub struct ThermostatExtractor;

impl Extractor for ThermostatExtractor {
    fn family(&self) -> &'static str {
        "thermostat"
    }

    fn device_types(&self) -> &'static [&'static str] {
        &["SHTRV-01"]
    }

    fn extract(&self, _device_type: &str, telemetry: &Telemetry) -> Vec<MetricSample> {
        let status = telemetry.status();
        let mut sink = SampleSink::new();

        base::extract_common(status, &mut sink);

        sink.gauge("bat_charge", status, "/bat/value", "Percentage of battery level");
        sink.gauge("bat_voltage", status, "/bat/voltage", "Battery voltage");
        sink.gauge(
            "bat_charger",
            status,
            "/charger",
            "Whether a charger is plugged in",
        );

        for (i, thermostat) in array(status, "/thermostats").iter().enumerate() {
            let index = i.to_string();
            let labels = [("thermostat", index.as_str())];
            sink.gauge_with(
                "thermostat_position",
                &labels,
                thermostat,
                "/pos",
                "Valve position in percent",
            );
            sink.gauge_with(
                "thermostat_enabled",
                &labels,
                thermostat,
                "/target_t/enabled",
                "Whether the thermostat is enabled",
            );
            sink.gauge_with(
                "thermostat_target_t",
                &labels,
                thermostat,
                "/target_t/value",
                "Thermostat target temperature",
            );
            sink.gauge_with(
                "thermostat_measured_temperature",
                &labels,
                thermostat,
                "/tmp/value",
                "Thermostat measured temperature",
            );
            sink.gauge_with(
                "thermostat_measured_valid",
                &labels,
                thermostat,
                "/tmp/is_valid",
                "Whether the temperature measurement is valid",
            );
            sink.gauge_with(
                "thermostat_is_scheduled",
                &labels,
                thermostat,
                "/schedule",
                "Whether the thermostat is following a schedule",
            );
            sink.gauge_with(
                "thermostat_schedule_profile",
                &labels,
                thermostat,
                "/schedule_profile",
                "Current thermostat profile",
            );
            sink.gauge_with(
                "thermostat_boost_minutes",
                &labels,
                thermostat,
                "/boost_minutes",
                "Length of initial warm-up boost, in minutes",
            );
        }

        sink.finish()
    }
}
