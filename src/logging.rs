//! Logging setup for pngcomp.
//!
//! Installs env_logger behind the `log` facade. Lines are also appended to a
//! daily log file when a log directory is configured, with size-based
//! rotation and cleanup of old files.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use parking_lot::Mutex;

use crate::config::LoggingConfig;
use crate::error::{CompositeResult, ResultExt};

/// Maximum log file size before rotation (5MB)
const MAX_LOG_SIZE: u64 = 5 * 1024 * 1024;

/// Maximum number of log files to keep
const MAX_LOG_FILES: usize = 5;

lazy_static::lazy_static! {
    /// Global log file handle
    static ref LOG_FILE: Mutex<Option<File>> = Mutex::new(None);
    /// Log directory path
    static ref LOG_DIR: Mutex<Option<PathBuf>> = Mutex::new(None);
}

/// Initialize logging. Calling it again after success is a no-op.
pub fn init_logging(config: &LoggingConfig) -> CompositeResult<()> {
    if let Some(dir) = &config.dir {
        open_log_dir(dir)?;
    }

    let env = env_logger::Env::default().default_filter_or(config.level.as_str());
    let result = env_logger::Builder::from_env(env)
        .format(|buf, record| {
            let line = format_line(record.level(), record.target(), &record.args().to_string());
            append_to_file(&line);
            writeln!(buf, "{}", line)
        })
        .try_init();

    match result {
        Ok(()) => {
            log::info!("[LOGGING] Logging system initialized");
            if let Some(dir) = &config.dir {
                log::info!("[LOGGING] Log directory: {}", dir.display());
            }
        },
        Err(_) => log::debug!("[LOGGING] Logger already installed"),
    }

    Ok(())
}

/// Format a log line: `[timestamp] [LEVEL] [target] message`.
fn format_line(level: log::Level, target: &str, message: &str) -> String {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    format!("[{}] [{}] [{}] {}", timestamp, level, target, message)
}

fn open_log_dir(dir: &Path) -> CompositeResult<()> {
    fs::create_dir_all(dir).context("Failed to create log directory")?;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(current_log_path(dir))
        .context("Failed to open log file")?;

    *LOG_DIR.lock() = Some(dir.to_path_buf());
    *LOG_FILE.lock() = Some(file);

    cleanup_old_logs(dir);
    Ok(())
}

/// Get the path for the current log file (one per day)
fn current_log_path(log_dir: &Path) -> PathBuf {
    let date = Local::now().format("%Y-%m-%d");
    log_dir.join(format!("pngcomp_{}.log", date))
}

/// Clean up old log files, keeping only the most recent MAX_LOG_FILES
fn cleanup_old_logs(log_dir: &Path) {
    if let Ok(entries) = fs::read_dir(log_dir) {
        let mut log_files: Vec<_> = entries
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "log")
                    .unwrap_or(false)
            })
            .collect();

        // Sort by modification time (newest first)
        log_files.sort_by(|a, b| {
            let a_time = a.metadata().and_then(|m| m.modified()).ok();
            let b_time = b.metadata().and_then(|m| m.modified()).ok();
            b_time.cmp(&a_time)
        });

        for file in log_files.into_iter().skip(MAX_LOG_FILES) {
            let _ = fs::remove_file(file.path());
        }
    }
}

fn append_to_file(line: &str) {
    {
        let mut log_file = LOG_FILE.lock();
        match log_file.as_mut() {
            Some(file) => {
                let _ = writeln!(file, "{}", line);
            },
            None => return,
        }
    }

    check_rotation();
}

/// Check if log rotation is needed and rotate if necessary
fn check_rotation() {
    let log_dir = match LOG_DIR.lock().as_ref() {
        Some(dir) => dir.clone(),
        None => return,
    };

    let current_path = current_log_path(&log_dir);
    let needs_rotation = fs::metadata(&current_path)
        .map(|m| m.len() > MAX_LOG_SIZE)
        .unwrap_or(false);
    if !needs_rotation {
        return;
    }

    let timestamp = Local::now().format("%Y-%m-%d_%H%M%S");
    let rotated_path = log_dir.join(format!("pngcomp_{}.log", timestamp));
    let _ = fs::rename(&current_path, &rotated_path);

    if let Ok(file) = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&current_path)
    {
        *LOG_FILE.lock() = Some(file);
    }

    cleanup_old_logs(&log_dir);
}
