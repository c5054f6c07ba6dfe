mod check;
mod config;
mod metrics;
mod quorum;
mod report;
mod sensors;
mod shutdown;
mod status;

use clap::error::ErrorKind;
use clap::{Parser, ValueEnum};
use config::Config;
use nagiosplugin::{RunResult, ServiceState};
use report::CheckReport;
use sensors::snmp::SnmpGetReader;
use shutdown::NrpeExecutor;
use std::convert::Infallible;
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "check_tss")]
#[command(version, about = "Thermal server shutdown check for AVTECH RoomAlert units")]
struct Cli {
    #[arg(long, short = 'c', default_value = config::DEFAULT_CONFIG_PATH)]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
    /// Also write the run as a Prometheus textfile-collector file
    #[arg(long)]
    metrics_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if is_informational(&err) => err.exit(),
        Err(err) => usage_fault(&err).print_and_exit(),
    };
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let report = run(&cli.config).await;
    emit(&cli, &report)
}

fn is_informational(err: &clap::Error) -> bool {
    matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion)
}

/// Bad arguments are a plugin fault like any other, never a clap exit code.
fn usage_fault(err: &clap::Error) -> RunResult<String> {
    let rendered = err.to_string();
    let reason = rendered
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("invalid arguments");
    let reason = reason.strip_prefix("error: ").unwrap_or(reason);
    RunResult::Err(ServiceState::Unknown, format!("Usage error: {reason}"))
}

async fn run(config_path: &str) -> CheckReport {
    let cfg = match Config::load_from_file(config_path) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            return CheckReport::fault(format!("Configuration error: {err}"));
        }
    };

    info!(
        device = %cfg.device.host,
        sensors = ?cfg.sensors,
        hosts = cfg.shutdown.hosts.len(),
        "starting thermal shutdown check"
    );

    let reader = SnmpGetReader::new(cfg.device.clone());
    let executor = NrpeExecutor::new(&cfg.shutdown);
    let mut task =
        tokio::spawn(async move { check::run_check(&cfg, &reader, &executor).await });

    tokio::select! {
        joined = &mut task => match joined {
            Ok(report) => report,
            Err(err) => {
                error!(error = %err, "check task failed");
                CheckReport::fault(format!("Shutdown condition check failed: {err}"))
            }
        },
        _ = termination_signal() => {
            warn!("termination signal received, abandoning check");
            task.abort();
            // Dropping the task kills any child processes still running.
            let _ = task.await;
            CheckReport::fault("Shutdown condition check interrupted")
        }
    }
}

fn emit(cli: &Cli, report: &CheckReport) -> ! {
    if let Some(path) = &cli.metrics_file {
        if let Err(err) = metrics::export_report(report, path) {
            warn!(error = %err, "metrics file not written");
        }
    }

    if let OutputFormat::Json = cli.format {
        match serde_json::to_string_pretty(report) {
            Ok(json) => {
                println!("{json}");
                std::process::exit(report.outcome.state.exit_code());
            }
            Err(err) => error!(error = %err, "failed to serialize report"),
        }
    }
    RunResult::<Infallible>::Ok(report.outcome.to_resource()).print_and_exit()
}

async fn termination_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

// stdout carries the plugin status line, so logs go to stderr.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    log_subscriber(filter, std::io::stderr, std::io::stderr().is_terminal()).init();
}

/// Colour codes only go to a terminal; schedulers store stderr verbatim.
fn log_subscriber<W>(
    filter: EnvFilter,
    writer: W,
    ansi: bool,
) -> impl tracing::Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(ansi)
        .with_writer(writer)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn unknown_message(result: RunResult<String>) -> String {
        match result {
            RunResult::Err(state, message) => {
                assert_eq!(state, ServiceState::Unknown);
                message
            }
            RunResult::Ok(_) => panic!("usage error produced a check result"),
        }
    }

    #[test]
    fn mistyped_flag_is_unknown() {
        let err = Cli::try_parse_from(["check_tss", "--formt", "json"]).expect_err("rejected");
        assert!(!is_informational(&err));
        let message = unknown_message(usage_fault(&err));
        assert!(message.starts_with("Usage error: "));
        assert!(message.contains("--formt"));
    }

    #[test]
    fn invalid_format_value_is_unknown() {
        let err = Cli::try_parse_from(["check_tss", "--format", "xml"]).expect_err("rejected");
        assert!(!is_informational(&err));
        assert!(unknown_message(usage_fault(&err)).contains("xml"));
    }

    #[test]
    fn help_and_version_exit_normally() {
        for flag in ["--help", "--version"] {
            let err = Cli::try_parse_from(["check_tss", flag]).expect_err("informational exit");
            assert!(is_informational(&err), "{flag}");
        }
    }

    #[test]
    fn defaults_parse_without_arguments() {
        let cli = Cli::try_parse_from(["check_tss"]).expect("defaults");
        assert_eq!(cli.config, config::DEFAULT_CONFIG_PATH);
        assert!(matches!(cli.format, OutputFormat::Text));
        assert!(cli.metrics_file.is_none());
    }

    #[test]
    fn captured_logs_carry_no_colour_codes() {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let logs = log_subscriber(
            EnvFilter::new("warn"),
            move || Captured(Arc::clone(&sink)),
            false,
        );
        tracing::subscriber::with_default(logs, || {
            info!("below the default level");
            error!(host = "web02", "shutdown dispatch failed");
        });

        let text = String::from_utf8(buf.lock().unwrap().clone()).expect("utf8 logs");
        assert!(text.contains("ERROR"));
        assert!(text.contains("shutdown dispatch failed"));
        assert!(!text.contains("below the default level"));
        assert!(!text.contains('\u{1b}'));
    }
}
