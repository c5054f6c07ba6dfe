//! Shutdown quorum evaluation.
//!
//! A shutdown is triggered when enough of the three sensors read above the
//! threshold. Failed sensors never count as triggered, but each failure
//! lowers the number of sensors required (never below one) once the
//! configured requirement exceeds the number of sensors still reporting.

use crate::sensors::SensorSet;
use serde::Serialize;
use thiserror::Error;

pub const MIN_REQUIRED: i64 = 1;
pub const MAX_REQUIRED: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ShutdownPolicy {
    pub required_count: i64,
    pub threshold_celsius: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
pub enum PolicyError {
    #[error("required sensor count {0} is outside 1..=3")]
    RequiredCountOutOfRange(i64),
}

/// Counts behind a decision, kept for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub failed: u8,
    pub ok: u8,
    pub triggered: u8,
    pub required: u8,
    pub effective_required: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Trigger(Tally),
    NoTrigger(Tally),
    Invalid { error: PolicyError },
}

impl Decision {
    pub fn tally(&self) -> Option<&Tally> {
        match self {
            Decision::Trigger(tally) | Decision::NoTrigger(tally) => Some(tally),
            Decision::Invalid { .. } => None,
        }
    }
}

/// Validates the configured requirement, returning it as a sensor count.
pub fn validate_required(required_count: i64) -> Result<u8, PolicyError> {
    if (MIN_REQUIRED..=MAX_REQUIRED).contains(&required_count) {
        Ok(required_count as u8)
    } else {
        Err(PolicyError::RequiredCountOutOfRange(required_count))
    }
}

/// Number of triggered sensors needed given `failed` unavailable sensors.
/// Never exceeds `required`, never drops below one.
pub fn effective_required(required: u8, failed: u8) -> u8 {
    let ok = 3u8.saturating_sub(failed);
    if failed > 0 && required > ok {
        required.saturating_sub(failed).max(1)
    } else {
        required
    }
}

pub fn evaluate(readings: &SensorSet, policy: &ShutdownPolicy) -> Decision {
    let required = match validate_required(policy.required_count) {
        Ok(required) => required,
        Err(error) => return Decision::Invalid { error },
    };

    let mut failed = 0u8;
    let mut triggered = 0u8;
    for reading in readings.iter() {
        match reading.celsius() {
            None => failed += 1,
            Some(v) if v > policy.threshold_celsius => triggered += 1,
            Some(_) => {}
        }
    }
    let ok = 3 - failed;
    let effective = effective_required(required, failed);
    let tally = Tally {
        failed,
        ok,
        triggered,
        required,
        effective_required: effective,
    };

    // No data, no shutdown.
    if ok == 0 {
        return Decision::NoTrigger(tally);
    }

    if triggered >= effective {
        Decision::Trigger(tally)
    } else {
        Decision::NoTrigger(tally)
    }
}
