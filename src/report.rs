use crate::quorum::{Decision, ShutdownPolicy};
use crate::sensors::{SensorSet, SensorValue};
use crate::shutdown::DispatchResult;
use crate::status::CheckOutcome;
use nagiosplugin::PerfData;
use serde::Serialize;
use std::time::SystemTime;

/// Everything one invocation observed and decided.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub checked_at: String,
    pub checked_at_unix: i64,
    pub device: Option<String>,
    pub policy: Option<ShutdownPolicy>,
    pub connected: Option<bool>,
    pub sensors: Vec<SensorEntry>,
    pub decision: Option<Decision>,
    pub dispatched: Vec<DispatchResult>,
    pub outcome: CheckOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorEntry {
    pub slot: usize,
    pub identifier: String,
    pub value: SensorValue,
    /// Failed sensors read 999.0 here, as older tooling expects.
    pub legacy_value: f64,
}

impl CheckReport {
    pub fn new(device: impl Into<String>, policy: ShutdownPolicy) -> Self {
        Self {
            device: Some(device.into()),
            policy: Some(policy),
            ..Self::fault("Shutdown condition check did not complete")
        }
    }

    /// Report for a run that failed before or outside the check itself.
    pub fn fault(message: impl Into<String>) -> Self {
        let now = SystemTime::now();
        Self {
            checked_at: humantime::format_rfc3339_seconds(now).to_string(),
            checked_at_unix: now
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0),
            device: None,
            policy: None,
            connected: None,
            sensors: Vec::new(),
            decision: None,
            dispatched: Vec::new(),
            outcome: CheckOutcome::unknown(message),
        }
    }

    pub fn record_readings(&mut self, readings: &SensorSet) {
        self.sensors = readings
            .iter()
            .enumerate()
            .map(|(i, reading)| SensorEntry {
                slot: i + 1,
                identifier: reading.identifier.clone(),
                value: reading.value.clone(),
                legacy_value: reading.legacy_value(),
            })
            .collect();
    }

    /// Sets the terminal outcome, attaching perfdata for whatever was measured.
    pub fn finish(mut self, outcome: CheckOutcome) -> Self {
        let threshold = self.policy.map(|p| p.threshold_celsius);
        let mut perfdata: Vec<PerfData<f64>> = self
            .sensors
            .iter()
            .map(|s| {
                PerfData::new(s.identifier.clone(), s.legacy_value).with_thresholds(None, threshold)
            })
            .collect();
        if let Some(tally) = self.decision.as_ref().and_then(Decision::tally) {
            perfdata.push(PerfData::new("triggered", f64::from(tally.triggered)));
            perfdata.push(PerfData::new("required", f64::from(tally.effective_required)));
            perfdata.push(PerfData::new("failed", f64::from(tally.failed)));
        }
        self.outcome = outcome.with_perfdata(perfdata);
        self
    }
}
