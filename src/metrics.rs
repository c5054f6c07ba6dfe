use crate::quorum::Decision;
use crate::report::CheckReport;
use crate::sensors::SensorValue;
use prometheus::core::Collector;
use prometheus::{opts, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to build metrics: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("failed to write metrics file {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

pub struct Metrics {
    registry: Registry,
    pub tss_sensor_temperature_celsius: GaugeVec,
    pub tss_sensor_up: GaugeVec,
    pub tss_shutdown_threshold_celsius: Gauge,
    pub tss_sensors_triggered: Gauge,
    pub tss_sensors_failed: Gauge,
    pub tss_sensors_required: Gauge,
    pub tss_device_connected: Gauge,
    pub tss_decision: GaugeVec,
    pub tss_shutdown_dispatch_exit_code: GaugeVec,
    pub tss_check_status: Gauge,
    pub tss_last_run_timestamp_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let tss_sensor_temperature_celsius = GaugeVec::new(
            opts!(
                "tss_sensor_temperature_celsius",
                "Temperature by sensor in Celsius, absent when the read failed"
            ),
            &["slot", "sensor"],
        )?;
        let tss_sensor_up = GaugeVec::new(
            opts!("tss_sensor_up", "1 if the sensor returned a valid reading"),
            &["slot", "sensor"],
        )?;
        let tss_shutdown_threshold_celsius = Gauge::with_opts(opts!(
            "tss_shutdown_threshold_celsius",
            "Configured shutdown temperature in Celsius"
        ))?;
        let tss_sensors_triggered = Gauge::with_opts(opts!(
            "tss_sensors_triggered",
            "Number of working sensors above the shutdown temperature"
        ))?;
        let tss_sensors_failed =
            Gauge::with_opts(opts!("tss_sensors_failed", "Number of failed sensors"))?;
        let tss_sensors_required = Gauge::with_opts(opts!(
            "tss_sensors_required",
            "Triggered sensors needed for a shutdown after failure degradation"
        ))?;
        let tss_device_connected = Gauge::with_opts(opts!(
            "tss_device_connected",
            "1 if the device answered with the expected model"
        ))?;
        let tss_decision = GaugeVec::new(
            opts!("tss_decision", "Shutdown decision of the last run (1 = taken)"),
            &["decision"],
        )?;
        let tss_shutdown_dispatch_exit_code = GaugeVec::new(
            opts!(
                "tss_shutdown_dispatch_exit_code",
                "Exit code of the shutdown command by host"
            ),
            &["host"],
        )?;
        let tss_check_status = Gauge::with_opts(opts!(
            "tss_check_status",
            "Plugin exit status (0 OK, 1 WARNING, 2 CRITICAL, 3 UNKNOWN)"
        ))?;
        let tss_last_run_timestamp_seconds = Gauge::with_opts(opts!(
            "tss_last_run_timestamp_seconds",
            "Unix timestamp of the last run"
        ))?;

        register(&registry, &tss_sensor_temperature_celsius)?;
        register(&registry, &tss_sensor_up)?;
        register(&registry, &tss_shutdown_threshold_celsius)?;
        register(&registry, &tss_sensors_triggered)?;
        register(&registry, &tss_sensors_failed)?;
        register(&registry, &tss_sensors_required)?;
        register(&registry, &tss_device_connected)?;
        register(&registry, &tss_decision)?;
        register(&registry, &tss_shutdown_dispatch_exit_code)?;
        register(&registry, &tss_check_status)?;
        register(&registry, &tss_last_run_timestamp_seconds)?;

        Ok(Self {
            registry,
            tss_sensor_temperature_celsius,
            tss_sensor_up,
            tss_shutdown_threshold_celsius,
            tss_sensors_triggered,
            tss_sensors_failed,
            tss_sensors_required,
            tss_device_connected,
            tss_decision,
            tss_shutdown_dispatch_exit_code,
            tss_check_status,
            tss_last_run_timestamp_seconds,
        })
    }

    pub fn update_from_report(&self, report: &CheckReport) {
        self.tss_check_status
            .set(f64::from(report.outcome.state.exit_code()));
        self.tss_last_run_timestamp_seconds
            .set(report.checked_at_unix as f64);
        if let Some(policy) = &report.policy {
            self.tss_shutdown_threshold_celsius
                .set(policy.threshold_celsius);
        }
        if let Some(connected) = report.connected {
            self.tss_device_connected
                .set(if connected { 1.0 } else { 0.0 });
        }

        self.tss_sensor_temperature_celsius.reset();
        self.tss_sensor_up.reset();
        self.tss_decision.reset();
        self.tss_shutdown_dispatch_exit_code.reset();

        for sensor in &report.sensors {
            let slot = sensor.slot.to_string();
            let labels = [slot.as_str(), sensor.identifier.as_str()];
            match &sensor.value {
                SensorValue::Celsius(v) => {
                    self.tss_sensor_temperature_celsius
                        .with_label_values(&labels)
                        .set(*v);
                    self.tss_sensor_up.with_label_values(&labels).set(1.0);
                }
                SensorValue::Failed(_) => {
                    self.tss_sensor_up.with_label_values(&labels).set(0.0);
                }
            }
        }

        if let Some(decision) = &report.decision {
            let label = match decision {
                Decision::Trigger(_) => "trigger",
                Decision::NoTrigger(_) => "no_trigger",
                Decision::Invalid { .. } => "invalid",
            };
            self.tss_decision.with_label_values(&[label]).set(1.0);
            if let Some(tally) = decision.tally() {
                self.tss_sensors_triggered.set(f64::from(tally.triggered));
                self.tss_sensors_failed.set(f64::from(tally.failed));
                self.tss_sensors_required
                    .set(f64::from(tally.effective_required));
            }
        }

        for result in &report.dispatched {
            self.tss_shutdown_dispatch_exit_code
                .with_label_values(&[result.host.as_str()])
                .set(f64::from(result.exit_code));
        }
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }

    /// Writes the exposition next to `path` and renames it into place, so a
    /// textfile collector never sees a partial file.
    pub fn write_textfile(&self, path: &Path) -> Result<(), MetricsError> {
        let encoded = self.encode_metrics()?;
        let mut tmp = PathBuf::from(path);
        tmp.as_mut_os_string().push(".tmp");
        let write_error = |source| MetricsError::Write {
            path: path.display().to_string(),
            source,
        };
        fs::write(&tmp, encoded).map_err(write_error)?;
        fs::rename(&tmp, path).map_err(write_error)
    }
}

/// Writes the metrics of one report to `path`.
pub fn export_report(report: &CheckReport, path: &Path) -> Result<(), MetricsError> {
    let metrics = Metrics::new()?;
    metrics.update_from_report(report);
    metrics.write_textfile(path)
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}
