//! MeterGuard Daemon (meterguardd)
//!
//! Privileged service that owns the relay GPIO lines and the meter camera.
//! Clients talk to it over a Unix domain socket.
//!
//! # Responsibilities
//! - Restore persisted relay state onto the pins at boot
//! - Run a sensing cycle every `sensing.interval_secs` and cut every relay
//!   off when a reading exceeds the configured threshold
//! - Serve relay, group and reading requests from the CLI
//!
//! # Hardening
//! - Restrictive umask (0077)
//! - Symlink attack prevention on socket creation
//! - Maximum message size and connection limits
//! - Peer credential logging for every mutating request
//! - Graceful shutdown: the current cycle finishes, pins are released

mod sensing_loop;
mod server;
mod state;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use mg_core::constants::paths;
use state::DaemonState;

const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Hardening
// ============================================================================

fn set_secure_umask() {
    // SAFETY: umask only replaces the process file creation mask.
    unsafe { libc::umask(0o077) };
    debug!("Umask set to 0077");
}

/// Warn when not running as root; sysfs GPIO usually needs it
fn verify_privileges() {
    // SAFETY: geteuid and getuid only return the process's user IDs.
    let euid = unsafe { libc::geteuid() };
    let uid = unsafe { libc::getuid() };

    if euid != 0 {
        warn!("Running as uid={} euid={}; GPIO export may be denied", uid, euid);
    } else {
        info!("Running as root (uid={}, euid={})", uid, euid);
    }
}

fn validate_socket_path(path: &Path) -> Result<(), String> {
    if !path.is_absolute() {
        return Err("Socket path must be absolute".into());
    }

    let text = path.to_string_lossy();
    if text.contains("..") {
        return Err("Socket path contains path traversal".into());
    }
    if text.contains('\0') {
        return Err("Socket path contains null byte".into());
    }

    let safe_dirs = ["/run/", "/var/run/", "/tmp/"];
    if !safe_dirs.iter().any(|d| text.starts_with(d)) {
        return Err(format!("Socket path must be under {:?}", safe_dirs));
    }

    if let Some(parent) = path.parent() {
        if !parent.exists() {
            return Err(format!("Parent directory does not exist: {:?}", parent));
        }
    }

    if path.symlink_metadata().map(|m| m.file_type().is_symlink()).unwrap_or(false) {
        return Err("Socket path is a symlink - refusing".into());
    }

    Ok(())
}

fn cleanup(socket_path: &Path) {
    if socket_path.exists() {
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!("Failed to remove socket: {}", e);
        }
    }
    info!("Cleanup complete");
}

// ============================================================================
// CLI
// ============================================================================

fn print_help() {
    eprintln!("meterguardd {} - MeterGuard relay and meter daemon", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    meterguardd [OPTIONS]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -c, --config PATH   Settings file (default {}/{})", paths::CONFIG_DIR, paths::CONFIG_FILE);
    eprintln!("    -s, --socket PATH   Socket path (overrides daemon.socket_path)");
    eprintln!("    -v, --version       Print version");
    eprintln!("    -h, --help          Print this help");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    METERGUARD_LOG      Log filter (trace, debug, info, warn, error)");
    eprintln!("    {}   Settings file path", paths::CONFIG_ENV);
}

struct Args {
    config: Option<PathBuf>,
    socket: Option<PathBuf>,
}

/// `None` means the process should exit successfully (help or version)
fn parse_args() -> Option<Args> {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args { config: None, socket: None };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                return None;
            }
            "-v" | "--version" => {
                println!("meterguardd {}", VERSION);
                return None;
            }
            flag @ ("-c" | "--config" | "-s" | "--socket") => {
                i += 1;
                let Some(value) = args.get(i) else {
                    eprintln!("Error: {} requires a path argument", flag);
                    std::process::exit(1);
                };
                if matches!(flag, "-c" | "--config") {
                    parsed.config = Some(PathBuf::from(value));
                } else {
                    parsed.socket = Some(PathBuf::from(value));
                }
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    Some(parsed)
}

/// Journald when the journal socket exists, stdout otherwise
fn init_logging(log_level: &str) -> bool {
    use tracing_subscriber::prelude::*;

    if Path::new("/run/systemd/journal/socket").exists() {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(log_level))
                    .init();
                return true;
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(log_level)
        .init();
    false
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // PHASE 0: Panics are logged before the process unwinds
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("PANIC at {}: {}", location, message);
    }));

    // PHASE 1: Arguments
    let Some(args) = parse_args() else {
        return Ok(());
    };

    // PHASE 2: Logging
    let log_level = std::env::var("METERGUARD_LOG").unwrap_or_else(|_| "info".to_string());
    let use_journald = init_logging(&log_level);

    info!("STARTUP: meterguardd {} starting", VERSION);
    info!("STARTUP: Logging to {}", if use_journald { "systemd journal" } else { "stdout" });

    set_secure_umask();
    verify_privileges();

    // PHASE 3: Settings
    let config_path = args.config.unwrap_or_else(paths::config_path);
    let mut settings = match mg_core::load_settings(&config_path) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Invalid settings in {:?}: {}", config_path, e);
            std::process::exit(1);
        }
    };
    if let Some(socket) = args.socket {
        settings.daemon.socket_path = socket;
    }
    let socket_path = settings.daemon.socket_path.clone();

    if let Err(e) = validate_socket_path(&socket_path) {
        error!("Invalid socket path: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = std::fs::create_dir_all(&settings.storage.data_dir) {
        error!("Cannot create data directory {:?}: {}", settings.storage.data_dir, e);
        std::process::exit(1);
    }

    info!("STARTUP: Settings: {:?}", config_path);
    info!("STARTUP: Socket path: {:?}", socket_path);
    info!("STARTUP: Data directory: {:?}", settings.storage.data_dir);
    info!("STARTUP: PID: {}", std::process::id());

    // PHASE 4: Relay registry, pins and sensing pipeline
    let state = match DaemonState::from_settings(&settings) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Startup failed: {}", e);
            std::process::exit(1);
        }
    };

    // PHASE 5: Drive every pin to its persisted state before serving
    let coordinator = state.coordinator.clone();
    let report = tokio::task::spawn_blocking(move || coordinator.restore()).await?;
    if report.failed_pins.is_empty() {
        info!("STARTUP: Restored {} relays", report.affected);
    } else {
        warn!("STARTUP: Restore failed on pins {:?}", report.failed_pins);
    }

    // PHASE 6: Signals
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_tx = shutdown_tx.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("SIGNAL: Received SIGINT/SIGTERM - initiating shutdown");
        let _ = signal_tx.send(true);
    }) {
        warn!("Failed to set signal handler: {}. Shutdown via signals may not work cleanly.", e);
    }

    // PHASE 7: Sensing loop
    let sensing_handle = tokio::spawn(sensing_loop::run_sensing_loop(
        state.cycle.clone(),
        Duration::from_secs(settings.sensing.interval_secs),
        shutdown_rx.clone(),
    ));

    // PHASE 8: Serve until shutdown
    let result = server::run_server(&socket_path, state.clone(), shutdown_rx).await;

    // PHASE 9: Let the running cycle finish, then release the pins
    let _ = shutdown_tx.send(true);
    if let Err(e) = sensing_handle.await {
        error!("Sensing loop task failed: {}", e);
    }
    let coordinator = state.coordinator.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || coordinator.release()).await {
        error!("Pin release task failed: {}", e);
    }

    cleanup(&socket_path);

    if let Err(e) = result {
        error!("Server error: {:#}", e);
        std::process::exit(1);
    }

    info!("SHUTDOWN: Daemon terminated gracefully");
    Ok(())
}
