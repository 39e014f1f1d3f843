//! Command line and process lifecycle of the daemon binary.
//!
//! ```bash
//! webtimed start          # foreground
//! webtimed start -d       # fork to background
//! webtimed stop
//! webtimed status
//! WEBTIME_SOCKET=/run/webtime.sock webtimed start
//! RUST_LOG=webtimed=debug webtimed start
//! ```
//!
//! SIGTERM and SIGINT trigger a graceful shutdown: the server stops
//! accepting, the alarms stop, and the engine flushes the open session
//! before exiting.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use webtime_core::SystemClock;

use crate::config::DaemonConfig;
use crate::engine::{spawn_alarms, spawn_engine};
use crate::server::DaemonServer;
use crate::store::SqliteStore;

/// webtime daemon - per-site browsing time and limits
#[derive(Parser, Debug)]
#[command(name = "webtimed", version, about)]
pub struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("webtime")
}

fn pid_file_path() -> PathBuf {
    state_dir().join("webtimed.pid")
}

fn log_file_path() -> PathBuf {
    state_dir().join("webtimed.log")
}

fn read_pid() -> Option<u32> {
    let mut file = File::open(pid_file_path()).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

/// Running daemon's PID; removes a stale PID file.
fn is_daemon_running() -> Option<u32> {
    let pid = read_pid()?;
    if is_process_running(pid) {
        return Some(pid);
    }
    remove_pid_file();
    None
}

fn stop_daemon(pid: u32) -> Result<()> {
    let pid = i32::try_from(pid).context("PID out of range")?;
    // SAFETY: kill(2) has no memory-safety preconditions.
    let result = unsafe { libc::kill(pid, libc::SIGTERM) };
    if result != 0 {
        bail!("Failed to send SIGTERM to process {pid}");
    }
    Ok(())
}

/// Entry point shared by the daemon binaries.
pub fn main() -> Result<()> {
    let args = Args::parse();
    let command = args.command.unwrap_or(Command::Start { daemon: false });

    match command {
        Command::Start { daemon } => {
            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'webtimed stop' to stop it first.");
                process::exit(1);
            }

            let config = DaemonConfig::load().context("Failed to load configuration")?;

            if daemon {
                // Fork before the tokio runtime exists.
                daemonize()?;
            }

            write_pid()?;
            let result = run_daemon(config);
            remove_pid_file();
            result
        }
        Command::Stop => {
            let Some(pid) = is_daemon_running() else {
                println!("Daemon is not running.");
                return Ok(());
            };

            println!("Stopping daemon (PID {pid})...");
            stop_daemon(pid)?;

            for _ in 0..50 {
                if !is_process_running(pid) {
                    println!("Daemon stopped.");
                    return Ok(());
                }
                std::thread::sleep(std::time::Duration::from_millis(100));
            }

            eprintln!("Daemon did not stop within 5 seconds.");
            process::exit(1);
        }
        Command::Status => {
            let Some(pid) = is_daemon_running() else {
                println!("Daemon is not running.");
                process::exit(1);
            };

            println!("Daemon is running (PID {pid})");
            if let Ok(config) = DaemonConfig::load() {
                if config.socket_path.exists() {
                    println!("Socket: {}", config.socket_path.display());
                }
                println!("Database: {}", config.database_path.display());
            }
            Ok(())
        }
    }
}

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

#[tokio::main]
async fn run_daemon(config: DaemonConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("webtimed=info".parse()?)
                .add_directive("webtime_core=info".parse()?)
                .add_directive("webtime_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        database = %config.database_path.display(),
        "webtime daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let store = SqliteStore::open(&config.database_path).with_context(|| {
        format!("Failed to open database {}", config.database_path.display())
    })?;
    let engine = spawn_engine(Box::new(store), Arc::new(SystemClock), &config.engine())
        .context("Failed to load engine state")?;
    info!("Engine started");

    spawn_alarms(&engine, config.alarms(), cancel_token.clone());

    let server = DaemonServer::new(
        &config.socket_path,
        engine.clone(),
        cancel_token.clone(),
        config.idle_threshold_secs,
    );
    info!(socket = %config.socket_path.display(), "Starting server");

    let served = server.run().await;
    cancel_token.cancel();

    // Final flush of the open session.
    if let Err(e) = engine.shutdown().await {
        warn!(error = %e, "Engine already stopped");
    }

    if let Err(e) = served {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("webtime daemon stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_start_daemon_flag() {
        let args = Args::try_parse_from(["webtimed", "start", "-d"]).unwrap();
        assert!(matches!(args.command, Some(Command::Start { daemon: true })));
    }

    #[test]
    fn test_pid_file_under_state_dir() {
        assert!(pid_file_path().ends_with("webtime/webtimed.pid"));
    }
}
