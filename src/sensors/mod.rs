pub mod snmp;

use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// In-band value the device boundary uses for "no valid reading".
pub const FAILURE_SENTINEL: f64 = 999.0;

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("snmpget exited with status {code}: {stderr}")]
    Status { code: i32, stderr: String },
    #[error("unexpected value {0:?}")]
    Parse(String),
}

/// Read access to the environmental monitor.
pub trait SensorReader: Send + Sync {
    /// Reads one temperature sensor, in degrees Celsius.
    fn read_celsius(
        &self,
        identifier: &str,
    ) -> impl Future<Output = Result<f64, ReadError>> + Send;

    /// Returns the device's self-reported model string.
    fn device_identity(&self) -> impl Future<Output = Result<String, ReadError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The device reported the 999.0 sentinel itself.
    Sentinel,
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorValue {
    Celsius(f64),
    Failed(FailureReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub identifier: String,
    pub value: SensorValue,
}

impl SensorReading {
    pub fn from_result(identifier: impl Into<String>, result: Result<f64, ReadError>) -> Self {
        let value = match result {
            Ok(v) if v == FAILURE_SENTINEL => SensorValue::Failed(FailureReason::Sentinel),
            Ok(v) => SensorValue::Celsius(v),
            Err(err) => SensorValue::Failed(FailureReason::Transport(err.to_string())),
        };
        Self {
            identifier: identifier.into(),
            value,
        }
    }

    /// Builds a reading from a legacy value where 999.0 means "failed".
    #[cfg(test)]
    pub fn from_legacy(identifier: impl Into<String>, value: f64) -> Self {
        Self::from_result(identifier, Ok(value))
    }

    pub fn celsius(&self) -> Option<f64> {
        match self.value {
            SensorValue::Celsius(v) => Some(v),
            SensorValue::Failed(_) => None,
        }
    }

    /// The value as older tooling expects it: failures read as 999.0.
    pub fn legacy_value(&self) -> f64 {
        self.celsius().unwrap_or(FAILURE_SENTINEL)
    }
}

/// The three configured sensor slots, in configuration order.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSet {
    readings: [SensorReading; 3],
}

impl SensorSet {
    pub fn new(readings: [SensorReading; 3]) -> Self {
        Self { readings }
    }

    #[cfg(test)]
    pub fn from_legacy(identifiers: [&str; 3], values: [f64; 3]) -> Self {
        let [a, b, c] = identifiers;
        let [va, vb, vc] = values;
        Self::new([
            SensorReading::from_legacy(a, va),
            SensorReading::from_legacy(b, vb),
            SensorReading::from_legacy(c, vc),
        ])
    }

    pub fn iter(&self) -> impl Iterator<Item = &SensorReading> {
        self.readings.iter()
    }
}

/// Reads all three slots concurrently. Individual failures are kept as
/// failed readings, never propagated.
pub async fn read_sensor_set<R: SensorReader>(reader: &R, identifiers: &[String; 3]) -> SensorSet {
    let [a, b, c] = identifiers;
    let (ra, rb, rc) = tokio::join!(
        read_slot(reader, a),
        read_slot(reader, b),
        read_slot(reader, c)
    );
    SensorSet::new([ra, rb, rc])
}

async fn read_slot<R: SensorReader>(reader: &R, identifier: &str) -> SensorReading {
    let result = reader.read_celsius(identifier).await;
    match &result {
        Ok(v) if *v == FAILURE_SENTINEL => {
            warn!(sensor = %identifier, "sensor reported failure sentinel")
        }
        Ok(v) => debug!(sensor = %identifier, celsius = *v, "sensor read"),
        Err(err) => warn!(sensor = %identifier, error = %err, "sensor read failed"),
    }
    SensorReading::from_result(identifier, result)
}

/// True iff the device answers and identifies as `expected_model`.
pub async fn is_connected<R: SensorReader>(reader: &R, expected_model: &str) -> bool {
    match reader.device_identity().await {
        Ok(identity) if identity == expected_model => true,
        Ok(identity) => {
            warn!(expected = %expected_model, actual = %identity, "unexpected device model");
            false
        }
        Err(err) => {
            warn!(error = %err, "connectivity probe failed");
            false
        }
    }
}
