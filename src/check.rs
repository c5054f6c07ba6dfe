//! One check-and-act run against the environmental monitor.

use crate::config::Config;
use crate::quorum::{evaluate, validate_required, Decision, Tally};
use crate::report::CheckReport;
use crate::sensors::{is_connected, read_sensor_set, SensorReader, SensorSet};
use crate::shutdown::{dispatch, RemoteExecutor};
use crate::status::CheckOutcome;
use tracing::{error, info, warn};

enum Stage {
    ConnectivityCheck,
    ReadSensors,
    Evaluate(SensorSet),
    Dispatching(Tally),
    Terminal(CheckOutcome),
}

pub async fn run_check<R, E>(cfg: &Config, reader: &R, executor: &E) -> CheckReport
where
    R: SensorReader,
    E: RemoteExecutor,
{
    let policy = cfg.shutdown_policy();
    let mut report = CheckReport::new(cfg.device.host.clone(), policy);
    let mut stage = Stage::ConnectivityCheck;

    let outcome = loop {
        stage = match stage {
            Stage::ConnectivityCheck => {
                let connected = is_connected(reader, &cfg.device.model).await;
                report.connected = Some(connected);
                if connected {
                    Stage::ReadSensors
                } else {
                    error!(device = %cfg.device.host, "no connection to device");
                    Stage::Terminal(CheckOutcome::critical(format!(
                        "No connection to {} at {}",
                        cfg.device.model, cfg.device.host
                    )))
                }
            }
            Stage::ReadSensors => match validate_required(policy.required_count) {
                // Nothing is read under a policy that cannot be evaluated.
                Err(error) => {
                    report.decision = Some(Decision::Invalid { error });
                    Stage::Terminal(bad_configuration(&error.to_string()))
                }
                Ok(_) => Stage::Evaluate(read_sensor_set(reader, &cfg.sensors).await),
            },
            Stage::Evaluate(readings) => {
                report.record_readings(&readings);
                let decision = evaluate(&readings, &policy);
                report.decision = Some(decision);
                match decision {
                    Decision::Invalid { error } => {
                        Stage::Terminal(bad_configuration(&error.to_string()))
                    }
                    Decision::NoTrigger(tally) => {
                        info!(
                            triggered = tally.triggered,
                            required = tally.effective_required,
                            failed = tally.failed,
                            "no shutdown required"
                        );
                        Stage::Terminal(CheckOutcome::ok(format!(
                            "No emergency shutdown required ({})",
                            describe(&tally, policy.threshold_celsius)
                        )))
                    }
                    Decision::Trigger(tally) => {
                        warn!(
                            triggered = tally.triggered,
                            required = tally.effective_required,
                            failed = tally.failed,
                            hosts = cfg.shutdown.hosts.len(),
                            "shutdown condition met"
                        );
                        Stage::Dispatching(tally)
                    }
                }
            }
            Stage::Dispatching(tally) => {
                let results = dispatch(executor, &cfg.shutdown.hosts, &cfg.shutdown.command).await;
                let accepted = results.iter().filter(|r| r.succeeded()).count();
                let total = results.len();
                report.dispatched = results;
                // Once decided, the shutdown is reported as CRITICAL however many hosts took it.
                Stage::Terminal(CheckOutcome::critical(format!(
                    "Emergency shutdown executed, accepted by {accepted}/{total} host(s) ({})",
                    describe(&tally, policy.threshold_celsius)
                )))
            }
            Stage::Terminal(outcome) => break outcome,
        };
    };

    report.finish(outcome)
}

fn bad_configuration(reason: &str) -> CheckOutcome {
    error!(reason = %reason, "bad configuration");
    CheckOutcome::unknown(format!("Bad configuration: {reason}"))
}

fn describe(tally: &Tally, threshold: f64) -> String {
    let mut text = format!(
        "{}/{} sensors above {threshold:.1}°C, {} required",
        tally.triggered, tally.ok, tally.effective_required
    );
    if tally.failed > 0 {
        text.push_str(&format!(", {} failed", tally.failed));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeviceConfig, PolicyConfig, ShutdownConfig, SnmpVersion};
    use crate::sensors::tests::FakeDevice;
    use crate::sensors::FAILURE_SENTINEL;
    use crate::shutdown::tests::FakeExecutor;
    use crate::shutdown::INVOKE_FAILED_CODE;
    use crate::status::ServiceState;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    const MODEL: &str = "AVTECH RoomAlert 32S";

    fn config(required_sensors: i64, hosts: &[&str]) -> Config {
        Config {
            device: DeviceConfig {
                host: "10.2.3.15".to_string(),
                port: 161,
                version: SnmpVersion::V2c,
                community: "public".to_string(),
                model: MODEL.to_string(),
                timeout: Duration::from_secs(2),
                snmpget_path: "snmpget".to_string(),
            },
            sensors: ["s1".to_string(), "s2".to_string(), "s3".to_string()],
            policy: PolicyConfig {
                required_sensors,
                shutdown_temperature: 60.0,
            },
            shutdown: ShutdownConfig {
                command: "emergency_shutdown".to_string(),
                check_nrpe_path: "/usr/local/nagios/libexec/check_nrpe".to_string(),
                nrpe_port: 5660,
                timeout: Duration::from_secs(2),
                hosts: hosts.iter().map(|h| h.to_string()).collect(),
            },
        }
    }

    fn device(values: [f64; 3]) -> FakeDevice {
        FakeDevice::new(
            MODEL,
            &[("s1", values[0]), ("s2", values[1]), ("s3", values[2])],
        )
    }

    #[tokio::test]
    async fn degraded_quorum_triggers_shutdown() {
        let cfg = config(3, &["web01", "web02"]);
        let executor = FakeExecutor::default();
        let report = run_check(&cfg, &device([65.0, 70.0, FAILURE_SENTINEL]), &executor).await;

        assert_eq!(report.outcome.state, ServiceState::Critical);
        assert_eq!(report.outcome.state.exit_code(), 2);
        let tally = report.decision.as_ref().and_then(Decision::tally).copied();
        assert_eq!(tally.map(|t| t.effective_required), Some(2));
        assert_eq!(report.dispatched.len(), 2);
        assert_eq!(*executor.calls.lock().unwrap(), vec!["web01", "web02"]);
        assert!(report
            .outcome
            .message
            .starts_with("Emergency shutdown executed, accepted by 2/2 host(s)"));
    }

    #[tokio::test]
    async fn all_sensors_failed_is_ok_without_dispatch() {
        let cfg = config(2, &["web01"]);
        let executor = FakeExecutor::default();
        // No values configured: every read fails like a transport error.
        let reader = FakeDevice::new(MODEL, &[]);
        let report = run_check(&cfg, &reader, &executor).await;

        assert_eq!(report.outcome.state, ServiceState::Ok);
        assert!(report.dispatched.is_empty());
        assert!(executor.calls.lock().unwrap().is_empty());
        assert!(report.sensors.iter().all(|s| s.legacy_value == FAILURE_SENTINEL));
    }

    #[tokio::test]
    async fn cool_sensors_are_ok() {
        let cfg = config(1, &["web01"]);
        let executor = FakeExecutor::default();
        let report = run_check(&cfg, &device([50.0, 55.0, 58.0]), &executor).await;

        assert_eq!(report.outcome.state, ServiceState::Ok);
        assert_eq!(report.outcome.state.exit_code(), 0);
        assert!(executor.calls.lock().unwrap().is_empty());
        assert_eq!(
            report.outcome.message,
            "No emergency shutdown required (0/3 sensors above 60.0°C, 1 required)"
        );
    }

    #[tokio::test]
    async fn invalid_required_count_is_unknown_without_reading() {
        let cfg = config(5, &["web01"]);
        let executor = FakeExecutor::default();
        let reader = device([90.0, 90.0, 90.0]);
        let report = run_check(&cfg, &reader, &executor).await;

        assert_eq!(report.outcome.state, ServiceState::Unknown);
        assert_eq!(report.outcome.state.exit_code(), 3);
        assert!(report.outcome.message.starts_with("Bad configuration"));
        assert!(matches!(report.decision, Some(Decision::Invalid { .. })));
        assert_eq!(reader.reads.load(Ordering::SeqCst), 0);
        assert!(executor.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn wrong_device_is_critical_without_reading() {
        let cfg = config(1, &["web01"]);
        let executor = FakeExecutor::default();
        let mut reader = device([90.0, 90.0, 90.0]);
        reader.identity = Some("AVTECH RoomAlert 12E".to_string());
        let report = run_check(&cfg, &reader, &executor).await;

        assert_eq!(report.outcome.state, ServiceState::Critical);
        assert_eq!(report.connected, Some(false));
        assert!(report.outcome.message.starts_with("No connection"));
        assert_eq!(reader.reads.load(Ordering::SeqCst), 0);
        assert!(executor.calls.lock().unwrap().is_empty());
        assert!(report.outcome.perfdata.is_empty());
    }

    #[tokio::test]
    async fn partial_dispatch_failure_is_still_critical() {
        let cfg = config(2, &["web01", "web02", "web03"]);
        let executor = FakeExecutor {
            broken: vec!["web02".to_string()],
            ..FakeExecutor::default()
        };
        let report = run_check(&cfg, &device([61.0, 62.0, 20.0]), &executor).await;

        assert_eq!(report.outcome.state, ServiceState::Critical);
        assert_eq!(report.dispatched.len(), 3);
        assert_eq!(report.dispatched[1].exit_code, INVOKE_FAILED_CODE);
        assert!(report.outcome.message.contains("accepted by 2/3 host(s)"));
    }

    #[tokio::test]
    async fn trigger_with_no_hosts_is_critical() {
        let cfg = config(1, &[]);
        let executor = FakeExecutor::default();
        let report = run_check(&cfg, &device([75.0, 20.0, 20.0]), &executor).await;

        assert_eq!(report.outcome.state, ServiceState::Critical);
        assert!(report.dispatched.is_empty());
    }
}
