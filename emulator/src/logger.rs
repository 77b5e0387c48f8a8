//! `log` backend for the emulator.
//!
//! Records go to stderr, colored by level, and are also kept in memory until
//! the session drains them into its transcript.

use std::sync::{Mutex, PoisonError};

use crossterm::style::Stylize;
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

pub struct ConsoleLogger {
    captured: Mutex<Vec<String>>,
}

static LOGGER: ConsoleLogger = ConsoleLogger::new();

impl ConsoleLogger {
    const fn new() -> Self {
        Self {
            captured: Mutex::new(Vec::new()),
        }
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let level = record.level();
        let label = format!("{level:<5}");
        let styled = match level {
            Level::Error => label.red().bold(),
            Level::Warn => label.yellow(),
            Level::Info => label.green(),
            Level::Debug => label.blue(),
            Level::Trace => label.dark_grey(),
        };
        eprintln!("{styled} {}: {}", record.target(), record.args());

        let line = format!("{level:<5} {}: {}", record.target(), record.args());
        self.captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line);
    }

    fn flush(&self) {}
}

/// Installs the console logger as the global `log` backend.
///
/// # Errors
///
/// Fails when another logger was installed first.
pub fn install(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

/// Returns and forgets every record captured since the last call.
pub fn drain() -> Vec<String> {
    std::mem::take(
        &mut *LOGGER
            .captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner),
    )
}
