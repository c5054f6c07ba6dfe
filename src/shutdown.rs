//! Emergency shutdown fan-out.
//!
//! Every host gets one independent, best-effort command invocation. A host
//! that cannot be reached, or whose invocation fails outright, is recorded
//! and the remaining hosts are still attempted. Nothing is retried.

use crate::config::ShutdownConfig;
use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time;
use tracing::{info, warn};

/// Exit code recorded when the remote mechanism could not be invoked.
pub const INVOKE_FAILED_CODE: i32 = 2;
/// Exit code recorded when the invocation did not finish in time.
pub const TIMED_OUT_CODE: i32 = 3;

const PROCESS_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Error executing {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("no answer within {0:?}")]
    Timeout(Duration),
    #[error("empty host identifier")]
    EmptyHost,
}

impl DispatchError {
    pub fn exit_code(&self) -> i32 {
        match self {
            DispatchError::Spawn { .. } | DispatchError::EmptyHost => INVOKE_FAILED_CODE,
            DispatchError::Timeout(_) => TIMED_OUT_CODE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub output: String,
}

/// Runs a named command on a remote host.
pub trait RemoteExecutor: Send + Sync {
    fn execute(
        &self,
        host: &str,
        command: &str,
    ) -> impl Future<Output = Result<CommandOutput, DispatchError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchResult {
    pub host: String,
    pub exit_code: i32,
    pub output: String,
}

impl DispatchResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Invokes `command` on every host concurrently. Returns one result per
/// entry of `hosts`, in the same order.
pub async fn dispatch<E: RemoteExecutor>(
    executor: &E,
    hosts: &[String],
    command: &str,
) -> Vec<DispatchResult> {
    let pending: Vec<_> = hosts
        .iter()
        .map(|host| dispatch_one(executor, host, command))
        .collect();
    join_all(pending).await
}

async fn dispatch_one<E: RemoteExecutor>(executor: &E, host: &str, command: &str) -> DispatchResult {
    let target = host.trim();
    let result = if target.is_empty() {
        Err(DispatchError::EmptyHost)
    } else {
        match AssertUnwindSafe(executor.execute(target, command))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_panic) => {
                return failed(host, INVOKE_FAILED_CODE, "shutdown invocation panicked");
            }
        }
    };

    match result {
        Ok(out) => {
            if out.exit_code == 0 {
                info!(host = %target, command = %command, "shutdown command accepted");
            } else {
                warn!(host = %target, code = out.exit_code, output = %out.output, "shutdown command failed");
            }
            DispatchResult {
                host: host.to_string(),
                exit_code: out.exit_code,
                output: out.output,
            }
        }
        Err(err) => failed(host, err.exit_code(), &err.to_string()),
    }
}

fn failed(host: &str, exit_code: i32, message: &str) -> DispatchResult {
    warn!(host = %host, code = exit_code, error = %message, "shutdown dispatch failed");
    DispatchResult {
        host: host.to_string(),
        exit_code,
        output: message.to_string(),
    }
}

/// Remote execution through the NRPE `check_nrpe` client.
pub struct NrpeExecutor {
    check_nrpe_path: String,
    port: u16,
    timeout: Duration,
}

impl NrpeExecutor {
    pub fn new(cfg: &ShutdownConfig) -> Self {
        Self {
            check_nrpe_path: cfg.check_nrpe_path.clone(),
            port: cfg.nrpe_port,
            timeout: cfg.timeout,
        }
    }
}

impl RemoteExecutor for NrpeExecutor {
    async fn execute(&self, host: &str, command: &str) -> Result<CommandOutput, DispatchError> {
        let timeout_secs = self.timeout.as_secs().max(1);
        let mut cmd = Command::new(&self.check_nrpe_path);
        cmd.args(["-H", host, "-p", self.port.to_string().as_str()])
            .args(["-c", command, "-t", timeout_secs.to_string().as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let spawn_error = |source| DispatchError::Spawn {
            program: self.check_nrpe_path.clone(),
            source,
        };
        let child = cmd.spawn().map_err(spawn_error)?;

        let limit = self.timeout + PROCESS_GRACE;
        let output = match time::timeout(limit, child.wait_with_output()).await {
            Ok(result) => result.map_err(spawn_error)?,
            Err(_elapsed) => return Err(DispatchError::Timeout(limit)),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let text = if stdout.is_empty() {
            String::from_utf8_lossy(&output.stderr).trim().to_string()
        } else {
            stdout
        };
        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(TIMED_OUT_CODE),
            output: text,
        })
    }
}
