//! Session logger: a `log` backend writing to a single file in the OS data directory.
//!
//! The file is **truncated at each launch**, so it only ever holds the
//! most-recent session.
//!
//! Log location:
//!   Windows:  `%APPDATA%\EpiGimp\epigimp.log`
//!   Linux:    `~/.local/share/EpiGimp/epigimp.log`
//!   macOS:    `~/Library/Application Support/EpiGimp/epigimp.log`
//!
//! Library code logs through the usual `log::info!` / `log::warn!` macros;
//! nothing is recorded until [`init`] installs this backend.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::OnceLock;

use log::{Level, LevelFilter, Log, Metadata, Record};
use parking_lot::Mutex;

static LOGGER: OnceLock<SessionLogger> = OnceLock::new();
static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Returns the path to the current session log file.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}

struct SessionLogger {
    file: Option<Mutex<File>>,
    /// Mirror warnings and errors to stderr (the CLI's `--verbose`).
    echo: bool,
}

impl SessionLogger {
    fn write_line(&self, line: &str) {
        if let Some(file) = &self.file {
            let _ = writeln!(file.lock(), "{line}");
        }
    }
}

impl Log for SessionLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(record.level(), &record.args().to_string());
        self.write_line(&line);
        if self.echo && record.level() <= Level::Warn {
            eprintln!("{line}");
        }
    }

    fn flush(&self) {
        if let Some(file) = &self.file {
            let _ = file.lock().flush();
        }
    }
}

fn format_line(level: Level, msg: &str) -> String {
    format!("[{}] [{}] {}", chrono::Local::now().format("%H:%M:%S"), level, msg)
}

/// Install the session logger. Later calls are no-ops.
///
/// * Creates (or truncates) the log file. Failure to open it is not fatal:
///   records are then only echoed to stderr.
/// * Installs a panic hook that writes the panic message to the log before
///   running the previous handler.
pub fn init(level: LevelFilter, verbose: bool) {
    if LOGGER.get().is_some() {
        return;
    }
    let path = log_file_path();
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    let file = match OpenOptions::new().create(true).write(true).truncate(true).open(&path) {
        Ok(f) => {
            let _ = LOG_PATH.set(path.clone());
            Some(Mutex::new(f))
        }
        Err(e) => {
            eprintln!("[logger] Failed to open log file {}: {e}", path.display());
            None
        }
    };
    let has_file = file.is_some();

    let logger = LOGGER.get_or_init(|| SessionLogger { file, echo: verbose });
    if log::set_logger(logger).is_err() {
        // Another backend got there first (e.g. a test harness).
        return;
    }
    log::set_max_level(level);

    if has_file {
        logger.write_line(&format!(
            "=== EpiGimp session started {} ===",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        ));
        logger.write_line(&format!("Log file: {}", path.display()));
        logger.write_line("");
    }

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        if let Some(logger) = LOGGER.get() {
            logger.write_line(&format_line(Level::Error, &format!("PANIC: {info}")));
            logger.flush();
        }
        prev(info);
    }));
}

fn log_file_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("EpiGimp")
        .join("epigimp.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_format_has_time_and_level() {
        let line = format_line(Level::Warn, "disk full");
        // "[HH:MM:SS] [WARN] disk full"
        assert_eq!(&line[0..1], "[");
        assert_eq!(&line[9..10], "]");
        assert!(line.ends_with("] [WARN] disk full"));
    }

    #[test]
    fn log_file_lives_under_app_folder() {
        let path = log_file_path();
        assert!(path.ends_with("EpiGimp/epigimp.log"));
    }
}
