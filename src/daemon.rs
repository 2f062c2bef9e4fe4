use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use crate::config::{AppPaths, Settings};
use crate::engine::Engine;
use crate::errors::{ClipError, Result};

pub fn write_pid_file(path: &Path) -> Result<()> {
    let pid = std::process::id();
    fs::write(path, pid.to_string()).map_err(|e| ClipError::Daemon(e.to_string()))
}

pub fn read_pid_file(path: &Path) -> Result<Option<u32>> {
    match fs::read_to_string(path) {
        Ok(contents) => match contents.trim().parse::<u32>() {
            Ok(pid) => Ok(Some(pid)),
            Err(_) => Ok(None),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ClipError::Daemon(e.to_string())),
    }
}

pub fn remove_pid_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ClipError::Daemon(e.to_string())),
    }
}

/// Sends `signal` to a single process. Pids outside `1..=i32::MAX` would
/// address a process group under `kill(2)` and are refused.
fn send_signal(pid: u32, signal: libc::c_int) -> bool {
    match i32::try_from(pid) {
        Ok(pid) if pid > 0 => unsafe { libc::kill(pid, signal) == 0 },
        _ => false,
    }
}

pub fn is_process_running(pid: u32) -> bool {
    send_signal(pid, 0)
}

/// Sends SIGTERM to a live watcher. Stale pid files are cleaned up.
pub fn stop_daemon(paths: &AppPaths) -> Result<bool> {
    match read_pid_file(&paths.pid_file)? {
        Some(pid) if is_process_running(pid) => {
            if !send_signal(pid, libc::SIGTERM) {
                warn!(pid, "watcher exited before SIGTERM was delivered");
            }
            remove_pid_file(&paths.pid_file)?;
            info!(pid, "sent SIGTERM to watcher");
            Ok(true)
        }
        Some(_) => {
            remove_pid_file(&paths.pid_file)?;
            Ok(false)
        }
        None => Ok(false),
    }
}

pub fn daemon_status(paths: &AppPaths) -> Result<Option<u32>> {
    match read_pid_file(&paths.pid_file)? {
        Some(pid) if is_process_running(pid) => Ok(Some(pid)),
        Some(_) => {
            remove_pid_file(&paths.pid_file)?;
            Ok(None)
        }
        None => Ok(None),
    }
}

/// Foreground watcher: runs the clipboard monitor until Ctrl-C or SIGTERM.
pub fn run_watcher(paths: &AppPaths, settings: Settings) -> Result<()> {
    paths.ensure_dirs()?;

    if let Some(pid) = daemon_status(paths)?
        && pid != std::process::id()
    {
        return Err(ClipError::Daemon(format!(
            "watcher already running (pid {})",
            pid
        )));
    }
    write_pid_file(&paths.pid_file)?;

    let engine = match Engine::open(paths.clone(), settings) {
        Ok(engine) => engine,
        Err(e) => {
            remove_pid_file(&paths.pid_file)?;
            return Err(e);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    info!(
        pid = std::process::id(),
        db = %paths.db_path.display(),
        "watching clipboard"
    );
    engine.monitor().run(&running);

    info!("shutting down");
    remove_pid_file(&paths.pid_file)?;
    Ok(())
}

fn ctrlc_handler(running: Arc<AtomicBool>) {
    if let Err(e) = ctrlc::set_handler(move || {
        running.store(false, Ordering::Relaxed);
    }) {
        warn!(error = %e, "could not install signal handler");
    }
}
