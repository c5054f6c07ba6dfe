//! Sensor access through the net-snmp `snmpget` tool.
//!
//! Each query is one `snmpget` invocation with retries disabled. The
//! RoomAlert 32S reports temperatures as integer hundredths of a degree.

use super::{ReadError, SensorReader};
use crate::config::DeviceConfig;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time;
use tracing::debug;

const SYS_DESCR_OID: &str = "1.3.6.1.2.1.1.1.0";
const DIGITAL_SENSORS_OID: &str = "1.3.6.1.4.1.20916.1.11.1.2";
const INTERNAL_TEMP_C_OID: &str = "1.3.6.1.4.1.20916.1.11.1.1.1.2.0";
const MIB_MODULE: &str = "ROOMALERT32S-MIB";

/// Slack on top of the SNMP timeout before the child is killed.
const PROCESS_GRACE: Duration = Duration::from_secs(1);

pub struct SnmpGetReader {
    cfg: DeviceConfig,
}

impl SnmpGetReader {
    pub fn new(cfg: DeviceConfig) -> Self {
        Self { cfg }
    }

    async fn get(&self, oid: &str) -> Result<String, ReadError> {
        let timeout_secs = self.cfg.timeout.as_secs().max(1);
        let mut cmd = Command::new(&self.cfg.snmpget_path);
        cmd.args(["-v", self.cfg.version.as_arg(), "-c", self.cfg.community.as_str()])
            .args(["-t", timeout_secs.to_string().as_str(), "-r", "0", "-Oqv"])
            .arg(format!("{}:{}", self.cfg.host, self.cfg.port))
            .arg(oid)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| ReadError::Spawn {
            program: self.cfg.snmpget_path.clone(),
            source,
        })?;

        let limit = self.cfg.timeout + PROCESS_GRACE;
        let output = match time::timeout(limit, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(ReadError::Spawn {
                    program: self.cfg.snmpget_path.clone(),
                    source,
                })
            }
            Err(_elapsed) => return Err(ReadError::Timeout(limit)),
        };

        if !output.status.success() {
            return Err(ReadError::Status {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(oid = %oid, value = %text, "snmpget");
        Ok(text)
    }
}

impl SensorReader for SnmpGetReader {
    async fn read_celsius(&self, identifier: &str) -> Result<f64, ReadError> {
        let raw = self.get(&resolve_oid(identifier)).await?;
        parse_hundredths(&raw)
    }

    async fn device_identity(&self) -> Result<String, ReadError> {
        let raw = self.get(SYS_DESCR_OID).await?;
        Ok(unquote(&raw).to_string())
    }
}

/// Maps a sensor identifier to the OID handed to `snmpget`.
pub fn resolve_oid(identifier: &str) -> String {
    let id = identifier.trim();
    if is_numeric_oid(id) {
        return id.to_string();
    }
    if id == "internal-tempc" {
        return INTERNAL_TEMP_C_OID.to_string();
    }
    if let Some((port, channel)) = id
        .strip_prefix("digital-sen")
        .and_then(|rest| rest.split_once('-'))
    {
        if let (Ok(port), Ok(channel)) = (port.parse::<u32>(), channel.parse::<u32>()) {
            return format!("{DIGITAL_SENSORS_OID}.{port}.{channel}.0");
        }
    }
    format!("{MIB_MODULE}::{id}.0")
}

fn is_numeric_oid(id: &str) -> bool {
    !id.is_empty()
        && id.chars().any(|c| c.is_ascii_digit())
        && id.chars().all(|c| c.is_ascii_digit() || c == '.')
}

fn unquote(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed)
}

/// Parses a raw register value (hundredths of a degree) into Celsius.
/// Tolerates a leading type tag such as `INTEGER:`.
fn parse_hundredths(raw: &str) -> Result<f64, ReadError> {
    let value = unquote(raw);
    let token = value.split_whitespace().last().unwrap_or_default();
    token
        .parse::<f64>()
        .map(|v| v / 100.0)
        .map_err(|_| ReadError::Parse(raw.to_string()))
}
