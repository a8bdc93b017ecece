//! Session logger: backs the `log` facade with a single file.
//!
//! The file is truncated at each launch, so it only holds the latest session.
//! Location:
//!   Windows:  `%APPDATA%\inkcell\inkcell.log`
//!   Linux:    `~/.local/share/inkcell/inkcell.log`
//!   macOS:    `~/Library/Application Support/inkcell/inkcell.log`
//!
//! The library never installs a logger; binaries call [`init`] or [`init_at`].
//! Warnings and errors are mirrored to stderr, and panics are mirrored into
//! the file by a hook.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{Level, LevelFilter, Log, Metadata, Record};

static LOGGER: OnceLock<SessionLogger> = OnceLock::new();

struct SessionLogger {
    file: Mutex<File>,
    path: PathBuf,
    level: LevelFilter,
}

impl Log for SessionLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!("[{}] [{}] {}: {}", timestamp(), record.level(), record.target(), record.args());
        if record.level() <= Level::Warn {
            eprintln!("{}", line);
        }
        self.write_line(&line);
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

impl SessionLogger {
    /// I/O errors are swallowed so logging never takes the host down.
    fn write_line(&self, line: &str) {
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{}", line);
        }
    }
}

/// Path of the active session log, once initialised.
pub fn log_path() -> Option<&'static Path> {
    LOGGER.get().map(|l| l.path.as_path())
}

/// Initialise at the platform default location.
pub fn init(level: LevelFilter) -> std::io::Result<()> {
    init_at(&default_log_path(), level)
}

/// Initialise writing to `path`, truncating it. A second call is a no-op.
pub fn init_at(path: &Path, level: LevelFilter) -> std::io::Result<()> {
    if LOGGER.get().is_some() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).write(true).truncate(true).open(path)?;
    let logger = LOGGER.get_or_init(|| SessionLogger {
        file: Mutex::new(file),
        path: path.to_path_buf(),
        level,
    });
    if log::set_logger(logger).is_err() {
        // Someone else owns the facade; keep the file for the panic hook only.
        eprintln!("[logger] another logger is already installed");
    } else {
        log::set_max_level(level);
    }

    logger.write_line(&format!("=== inkcell session started {} ===", human_timestamp()));
    logger.write_line(&format!("Log file: {}", path.display()));
    logger.write_line("");

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        if let Some(logger) = LOGGER.get() {
            logger.write_line(&format!("[{}] [PANIC] {}", timestamp(), info));
            logger.flush();
        }
        prev(info);
    }));
    Ok(())
}

fn default_log_path() -> PathBuf {
    data_dir().join("inkcell").join("inkcell.log")
}

/// Platform data directory (without the app sub-folder).
fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join("Library").join("Application Support");
        }
    }
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    PathBuf::from(".")
}

/// HH:MM:SS (UTC) within the current day.
fn timestamp() -> String {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => {
            let secs = d.as_secs();
            format!("{:02}:{:02}:{:02}", (secs % 86400) / 3600, (secs % 3600) / 60, secs % 60)
        }
        Err(_) => "??:??:??".to_string(),
    }
}

fn human_timestamp() -> String {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => format!("(unix {})", d.as_secs()),
        Err(_) => "(unknown time)".to_string(),
    }
}
