//! Plugin outcome and its rendering through `nagiosplugin`.

use nagiosplugin::{CheckResult, PerfData, Resource};
use serde::{Serialize, Serializer};

pub use nagiosplugin::ServiceState;

/// Resource name leading the status line.
pub const RESOURCE_NAME: &str = "TSS";

#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    #[serde(serialize_with = "serialize_state")]
    pub state: ServiceState,
    pub message: String,
    #[serde(skip)]
    pub perfdata: Vec<PerfData<f64>>,
}

impl CheckOutcome {
    pub fn new(state: ServiceState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
            perfdata: Vec::new(),
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(ServiceState::Ok, message)
    }

    pub fn critical(message: impl Into<String>) -> Self {
        Self::new(ServiceState::Critical, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ServiceState::Unknown, message)
    }

    pub fn with_perfdata(mut self, perfdata: Vec<PerfData<f64>>) -> Self {
        self.perfdata = perfdata;
        self
    }

    /// The decided state is fixed on the resource: perfdata thresholds are
    /// informational and never change it.
    pub fn to_resource(&self) -> Resource {
        let mut resource = Resource::new(RESOURCE_NAME)
            .with_fixed_state(self.state)
            .with_description(self.message.replace('\n', " "));
        for perf in &self.perfdata {
            resource.push_result(CheckResult::new().with_perf_data(perf.clone()));
        }
        resource
    }

    /// The single status line printed for the scheduler.
    pub fn status_line(&self) -> String {
        self.to_resource().nagios_result().1
    }
}

fn serialize_state<S>(state: &ServiceState, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_plugin_convention() {
        assert_eq!(CheckOutcome::ok("fine").state.exit_code(), 0);
        assert_eq!(CheckOutcome::critical("hot").state.exit_code(), 2);
        assert_eq!(CheckOutcome::unknown("lost").state.exit_code(), 3);
    }

    #[test]
    fn status_line_without_perfdata() {
        let outcome = CheckOutcome::critical("No connection to device");
        assert_eq!(outcome.status_line(), "TSS is CRITICAL: No connection to device");
    }

    #[test]
    fn status_line_with_perfdata() {
        let outcome = CheckOutcome::ok("No emergency shutdown required").with_perfdata(vec![
            PerfData::new("digital-sen1-1", 52.5).with_thresholds(None, Some(60.0)),
            PerfData::new("failed", 1.0),
        ]);
        assert_eq!(
            outcome.status_line(),
            "TSS is OK: No emergency shutdown required|'digital-sen1-1'=52.5;;60;; 'failed'=1;;;;"
        );
    }

    #[test]
    fn perfdata_above_threshold_does_not_override_state() {
        let outcome = CheckOutcome::ok("No emergency shutdown required")
            .with_perfdata(vec![PerfData::new("s1", 75.0).with_thresholds(None, Some(60.0))]);
        let (state, _) = outcome.to_resource().nagios_result();
        assert_eq!(state, ServiceState::Ok);
    }

    #[test]
    fn message_is_kept_on_one_line() {
        let outcome = CheckOutcome::unknown("first\nsecond");
        assert_eq!(outcome.status_line(), "TSS is UNKNOWN: first second");
    }

    #[test]
    fn state_serializes_as_label() {
        let json = serde_json::to_value(CheckOutcome::critical("hot")).expect("serialize");
        assert_eq!(json["state"], "CRITICAL");
        assert_eq!(json["message"], "hot");
        assert!(json.get("perfdata").is_none());
    }
}
