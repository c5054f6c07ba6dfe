use crate::quorum::ShutdownPolicy;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "/usr/local/nagios/libexec/check_tss/etc/tss.yaml";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub device: DeviceConfig,
    pub sensors: [String; 3],
    pub policy: PolicyConfig,
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    pub host: String,
    #[serde(default = "default_snmp_port")]
    pub port: u16,
    #[serde(default)]
    pub version: SnmpVersion,
    #[serde(default = "default_community")]
    pub community: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(
        default = "default_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub timeout: Duration,
    #[serde(default = "default_snmpget_path")]
    pub snmpget_path: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum SnmpVersion {
    #[serde(rename = "1")]
    V1,
    #[default]
    #[serde(rename = "2c", alias = "2")]
    V2c,
}

impl SnmpVersion {
    pub fn as_arg(self) -> &'static str {
        match self {
            SnmpVersion::V1 => "1",
            SnmpVersion::V2c => "2c",
        }
    }
}

/// Shutdown trigger settings. `required_sensors` is kept signed and
/// unvalidated here: out-of-range values surface as an invalid evaluation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PolicyConfig {
    pub required_sensors: i64,
    pub shutdown_temperature: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShutdownConfig {
    #[serde(default = "default_shutdown_command")]
    pub command: String,
    #[serde(default = "default_check_nrpe_path")]
    pub check_nrpe_path: String,
    #[serde(default = "default_nrpe_port")]
    pub nrpe_port: u16,
    #[serde(
        default = "default_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub timeout: Duration,
    #[serde(default, deserialize_with = "deserialize_hosts")]
    pub hosts: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_device(&self.device)?;
        validate_sensors(&self.sensors)?;
        if !self.policy.shutdown_temperature.is_finite() {
            return Err(ConfigError::Validation(
                "policy.shutdown_temperature must be a finite number".to_string(),
            ));
        }
        validate_shutdown(&self.shutdown)?;
        Ok(())
    }

    pub fn shutdown_policy(&self) -> ShutdownPolicy {
        ShutdownPolicy {
            required_count: self.policy.required_sensors,
            threshold_celsius: self.policy.shutdown_temperature,
        }
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_device(cfg: &DeviceConfig) -> Result<(), ConfigError> {
    if cfg.host.trim().is_empty() {
        return Err(ConfigError::Validation(
            "device.host is required".to_string(),
        ));
    }
    if cfg.port == 0 {
        return Err(ConfigError::Validation(
            "device.port must be in 1..65535".to_string(),
        ));
    }
    if cfg.community.is_empty() {
        return Err(ConfigError::Validation(
            "device.community must not be empty".to_string(),
        ));
    }
    if cfg.model.trim().is_empty() {
        return Err(ConfigError::Validation(
            "device.model must not be empty".to_string(),
        ));
    }
    if cfg.timeout.is_zero() {
        return Err(ConfigError::Validation(
            "device.timeout must be > 0".to_string(),
        ));
    }
    if cfg.snmpget_path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "device.snmpget_path must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_sensors(sensors: &[String; 3]) -> Result<(), ConfigError> {
    for (slot, id) in sensors.iter().enumerate() {
        if id.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "sensors[{slot}] must not be empty"
            )));
        }
    }
    Ok(())
}

fn validate_shutdown(cfg: &ShutdownConfig) -> Result<(), ConfigError> {
    if cfg.command.trim().is_empty() {
        return Err(ConfigError::Validation(
            "shutdown.command must not be empty".to_string(),
        ));
    }
    if cfg.check_nrpe_path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "shutdown.check_nrpe_path must not be empty".to_string(),
        ));
    }
    if cfg.nrpe_port == 0 {
        return Err(ConfigError::Validation(
            "shutdown.nrpe_port must be in 1..65535".to_string(),
        ));
    }
    if cfg.timeout.is_zero() {
        return Err(ConfigError::Validation(
            "shutdown.timeout must be > 0".to_string(),
        ));
    }

    // Odd host lists are tolerated: every entry gets its own dispatch result.
    if cfg.hosts.is_empty() {
        warn!("shutdown.hosts is empty, a triggered shutdown will reach no hosts");
    }
    let mut seen = HashSet::new();
    for host in &cfg.hosts {
        if host.trim().is_empty() {
            warn!("shutdown.hosts contains an empty entry");
        } else if !seen.insert(host.trim()) {
            warn!(host = %host, "shutdown.hosts contains a duplicate entry");
        }
    }
    Ok(())
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    humantime::parse_duration(&text).map_err(serde::de::Error::custom)
}

fn serialize_duration<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*value).to_string())
}

/// Accepts either a YAML list or a single comma-delimited string.
fn deserialize_hosts<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Hosts {
        List(Vec<String>),
        Delimited(String),
    }

    Ok(match Hosts::deserialize(deserializer)? {
        Hosts::List(hosts) => hosts,
        Hosts::Delimited(text) if text.trim().is_empty() => Vec::new(),
        Hosts::Delimited(text) => text.split(',').map(|h| h.trim().to_string()).collect(),
    })
}

const fn default_snmp_port() -> u16 {
    161
}

fn default_community() -> String {
    "public".to_string()
}

fn default_model() -> String {
    "AVTECH RoomAlert 32S".to_string()
}

const fn default_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_snmpget_path() -> String {
    "snmpget".to_string()
}

fn default_shutdown_command() -> String {
    "emergency_shutdown".to_string()
}

fn default_check_nrpe_path() -> String {
    "/usr/local/nagios/libexec/check_nrpe".to_string()
}

const fn default_nrpe_port() -> u16 {
    5660
}
