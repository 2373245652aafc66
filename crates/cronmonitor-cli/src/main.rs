//! `cronmonitor-run`: run a command as a monitored job.
//!
//! The command's success is reported to CronMonitor. A failed, unspawnable or
//! interrupted command sends no ping, so the monitoring service raises the
//! alert itself.
//!
//! Exit codes: 0 when the job succeeded (whether or not the ping got through),
//! 1 when the job failed or was interrupted, 2 for invalid arguments or
//! configuration.

use std::future::Future;
use std::process::{ExitCode, ExitStatus};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use tokio::process::{Child, Command};
use tracing_subscriber::EnvFilter;

use cronmonitor::config::{
    DEFAULT_BASE_URL, DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT_SECS, parse_bool,
};
use cronmonitor::{Notifier, NotifierConfig};

/// Parse a boolean flag value from the command line or environment.
fn parse_bool_flag(s: &str) -> Result<bool, String> {
    parse_bool(s).ok_or_else(|| {
        format!(
            "invalid boolean value '{}', expected 1/true/yes/on or 0/false/no/off",
            s
        )
    })
}

#[derive(Debug, Parser)]
#[command(name = "cronmonitor-run")]
#[command(about = "Run a job and ping CronMonitor when it succeeds", long_about = None)]
struct Cli {
    /// Ping token of the monitored job
    #[arg(long, env = "CRONMONITOR_TOKEN", hide_env_values = true)]
    token: String,

    /// CronMonitor base URL
    #[arg(long, env = "CRONMONITOR_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Ping request timeout in seconds
    #[arg(long = "timeout", env = "CRONMONITOR_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout_secs: u64,

    /// Number of ping attempts
    #[arg(long, env = "CRONMONITOR_RETRIES", default_value_t = DEFAULT_MAX_ATTEMPTS)]
    retries: u32,

    /// Log every ping attempt.
    /// The environment variable accepts 1/true/yes/on or 0/false/no/off.
    #[arg(long, env = "CRONMONITOR_VERBOSE", value_parser = parse_bool_flag)]
    verbose: bool,

    /// Job command and its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

impl Cli {
    fn notifier_config(&self) -> NotifierConfig {
        NotifierConfig::new(self.token.clone())
            .with_base_url(self.base_url.clone())
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_max_attempts(self.retries)
            .with_verbose(self.verbose)
    }
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Logs go to stderr so the job keeps stdout to itself
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("cronmonitor=info,cronmonitor_run=info")
        }))
        .with_writer(std::io::stderr)
        .init();

    let notifier = match Notifier::new(cli.notifier_config()) {
        Ok(notifier) => notifier,
        Err(e) => {
            tracing::error!(error = %e, "Invalid CronMonitor configuration");
            return ExitCode::from(2);
        }
    };

    tracing::info!(command = %cli.command.join(" "), "Starting job");

    match notifier.run_reported(|| run_job(&cli.command)) {
        Ok(((), true)) => {
            tracing::info!("Job completed successfully, ping delivered");
            ExitCode::SUCCESS
        }
        Ok(((), false)) => {
            tracing::warn!("Job completed successfully, ping not delivered");
            ExitCode::SUCCESS
        }
        Err(e) => {
            let error = format!("{e:#}");
            tracing::error!(%error, "Job failed, no ping sent");
            ExitCode::FAILURE
        }
    }
}

/// Run the command to completion, stopping it on Ctrl+C.
///
/// The job gets its own single-threaded runtime; the blocking ping client
/// must not run inside one.
fn run_job(command: &[String]) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start job runtime")?;

    runtime.block_on(async {
        let interrupt = interrupted();
        tokio::pin!(interrupt);

        // First poll installs the Ctrl+C handler before the child starts
        tokio::select! {
            biased;
            () = &mut interrupt => bail!("Job interrupted"),
            () = std::future::ready(()) => {}
        }

        let child = spawn_job(command)?;
        supervise(child, interrupt).await
    })
}

fn spawn_job(command: &[String]) -> anyhow::Result<Child> {
    let (program, args) = command.split_first().context("No command given")?;
    Command::new(program)
        .args(args)
        .spawn()
        .with_context(|| format!("Failed to start '{program}'"))
}

/// Wait for the job, or kill it once `interrupt` resolves.
async fn supervise(mut child: Child, interrupt: impl Future<Output = ()>) -> anyhow::Result<()> {
    let status = tokio::select! {
        status = child.wait() => Some(status),
        () = interrupt => None,
    };

    match status {
        Some(status) => check_status(status.context("Failed to wait for job")?),
        None => {
            tracing::warn!("Received interrupt, stopping job");
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "Failed to stop job");
            }
            bail!("Job interrupted")
        }
    }
}

/// Resolves on Ctrl+C. Never resolves if the handler cannot be installed.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Cannot listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

fn check_status(status: ExitStatus) -> anyhow::Result<()> {
    if status.success() {
        return Ok(());
    }
    match status.code() {
        Some(code) => bail!("Command exited with status {code}"),
        None => bail!("Command was terminated by a signal"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use clap::CommandFactory;

    use super::*;

    /// Serializes tests that touch `CRONMONITOR_*` variables.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_VARS: [&str; 5] = [
        "CRONMONITOR_TOKEN",
        "CRONMONITOR_BASE_URL",
        "CRONMONITOR_TIMEOUT_SECS",
        "CRONMONITOR_RETRIES",
        "CRONMONITOR_VERBOSE",
    ];

    /// Parse `args` with exactly `vars` set among the `CRONMONITOR_*` variables.
    fn parse_with_env(vars: &[(&str, &str)], args: &[&str]) -> Result<Cli, clap::Error> {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        // SAFETY: every test reading or writing these variables holds ENV_LOCK.
        unsafe {
            for var in ENV_VARS {
                std::env::remove_var(var);
            }
            for (key, value) in vars {
                std::env::set_var(key, value);
            }
        }

        let result = Cli::try_parse_from(args);

        // SAFETY: as above.
        unsafe {
            for var in ENV_VARS {
                std::env::remove_var(var);
            }
        }

        result
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_flags_and_trailing_command() {
        let cli = parse_with_env(
            &[],
            &[
                "cronmonitor-run",
                "--token",
                "abc",
                "--base-url",
                "http://localhost:9000",
                "--timeout",
                "5",
                "--retries",
                "1",
                "--verbose",
                "--",
                "pg_dump",
                "-Fc",
                "mydb",
            ],
        )
        .unwrap();

        assert_eq!(cli.command, vec!["pg_dump", "-Fc", "mydb"]);

        let config = cli.notifier_config();
        assert_eq!(config.ping_url(), "http://localhost:9000/ping/abc");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.max_attempts, 1);
        assert!(config.verbose);
    }

    #[test]
    fn test_flags_fall_back_to_env() {
        let cli = parse_with_env(
            &[
                ("CRONMONITOR_TOKEN", "env-token"),
                ("CRONMONITOR_BASE_URL", "http://monitor.internal"),
                ("CRONMONITOR_TIMEOUT_SECS", "30"),
                ("CRONMONITOR_RETRIES", "5"),
                ("CRONMONITOR_VERBOSE", "1"),
            ],
            &["cronmonitor-run", "--", "true"],
        )
        .unwrap();

        let config = cli.notifier_config();
        assert_eq!(config.ping_url(), "http://monitor.internal/ping/env-token");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.max_attempts, 5);
        assert!(config.verbose);
    }

    #[test]
    fn test_defaults_without_env() {
        let cli = parse_with_env(&[], &["cronmonitor-run", "--token", "abc", "--", "true"]).unwrap();

        assert_eq!(cli.notifier_config(), NotifierConfig::new("abc"));
    }

    #[test]
    fn test_flags_override_env() {
        let cli = parse_with_env(
            &[("CRONMONITOR_TOKEN", "env-token"), ("CRONMONITOR_RETRIES", "5")],
            &["cronmonitor-run", "--token", "flag-token", "--retries", "2", "--", "true"],
        )
        .unwrap();

        assert_eq!(cli.token, "flag-token");
        assert_eq!(cli.retries, 2);
    }

    #[test]
    fn test_verbose_env_boolean_forms() {
        let args = ["cronmonitor-run", "--token", "abc", "--", "true"];

        for value in ["1", "true", "YES", "on"] {
            let cli = parse_with_env(&[("CRONMONITOR_VERBOSE", value)], &args).unwrap();
            assert!(cli.verbose, "CRONMONITOR_VERBOSE={value}");
        }
        for value in ["0", "false", "no", "off"] {
            let cli = parse_with_env(&[("CRONMONITOR_VERBOSE", value)], &args).unwrap();
            assert!(!cli.verbose, "CRONMONITOR_VERBOSE={value}");
        }
    }

    #[test]
    fn test_verbose_env_rejects_garbage() {
        let result = parse_with_env(
            &[("CRONMONITOR_VERBOSE", "maybe")],
            &["cronmonitor-run", "--token", "abc", "--", "true"],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_retries_env_is_rejected() {
        let result = parse_with_env(
            &[("CRONMONITOR_TOKEN", "abc"), ("CRONMONITOR_RETRIES", "three")],
            &["cronmonitor-run", "--", "true"],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_token_is_required() {
        let result = parse_with_env(&[], &["cronmonitor-run", "--", "true"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_command_is_required() {
        let result = parse_with_env(&[], &["cronmonitor-run", "--token", "abc"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_run_job_empty_command() {
        assert!(run_job(&[]).is_err());
    }

    #[test]
    fn test_run_job_missing_program() {
        let err = run_job(&["cronmonitor-no-such-program".to_string()]).unwrap_err();
        assert!(err.to_string().contains("Failed to start"));
    }

    #[cfg(unix)]
    mod unix {
        use std::os::unix::process::ExitStatusExt;
        use std::sync::{Arc, Mutex};
        use std::time::Instant;

        use cronmonitor::error::DeliveryError;
        use cronmonitor::{Sleeper, Transport};

        use super::super::*;

        struct CountingTransport(Mutex<u32>);

        impl Transport for CountingTransport {
            fn get(&self, _url: &str, _timeout: Duration) -> Result<u16, DeliveryError> {
                *self.0.lock().unwrap() += 1;
                Ok(200)
            }
        }

        struct NoSleep;

        impl Sleeper for NoSleep {
            fn sleep(&self, _duration: Duration) {}
        }

        fn counting_notifier() -> (Notifier, Arc<CountingTransport>) {
            let transport = Arc::new(CountingTransport(Mutex::new(0)));
            let notifier = Notifier::with_parts(
                NotifierConfig::new("abc"),
                transport.clone(),
                Arc::new(NoSleep),
            )
            .unwrap();
            (notifier, transport)
        }

        #[test]
        fn test_run_job_success_and_failure() {
            assert!(run_job(&["true".to_string()]).is_ok());
            assert!(run_job(&["false".to_string()]).is_err());
        }

        #[test]
        fn test_job_pings_only_on_success() {
            let (notifier, transport) = counting_notifier();

            let ok = notifier.run_reported(|| run_job(&["true".to_string()]));
            assert!(matches!(ok, Ok(((), true))));
            assert_eq!(*transport.0.lock().unwrap(), 1);

            let failed = notifier.run_reported(|| run_job(&["false".to_string()]));
            assert!(failed.is_err());
            assert_eq!(*transport.0.lock().unwrap(), 1);
        }

        #[tokio::test]
        async fn test_interrupt_stops_job() {
            let started = Instant::now();
            let child = spawn_job(&["sleep".to_string(), "30".to_string()]).unwrap();

            let err = supervise(child, std::future::ready(())).await.unwrap_err();

            assert_eq!(err.to_string(), "Job interrupted");
            assert!(started.elapsed() < Duration::from_secs(10));
        }

        #[tokio::test]
        async fn test_finished_job_is_not_interrupted() {
            let child = spawn_job(&["true".to_string()]).unwrap();
            assert!(supervise(child, std::future::pending()).await.is_ok());
        }

        #[test]
        fn test_check_status() {
            assert!(check_status(ExitStatus::from_raw(0)).is_ok());

            // Raw wait status: exit code lives in the high byte
            let err = check_status(ExitStatus::from_raw(3 << 8)).unwrap_err();
            assert_eq!(err.to_string(), "Command exited with status 3");

            // SIGINT (2), as left behind by Ctrl+C
            let err = check_status(ExitStatus::from_raw(2)).unwrap_err();
            assert_eq!(err.to_string(), "Command was terminated by a signal");
        }
    }
}
