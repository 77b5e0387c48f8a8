//! Forwards `log` records from `badge-core` to defmt.

use defmt::Display2Format;
use log::{Level, LevelFilter, Log, Metadata, Record};

struct DefmtLogger;

static LOGGER: DefmtLogger = DefmtLogger;

impl Log for DefmtLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        let args = Display2Format(record.args());
        match record.level() {
            Level::Error => defmt::error!("{}", args),
            Level::Warn => defmt::warn!("{}", args),
            Level::Info => defmt::info!("{}", args),
            Level::Debug => defmt::debug!("{}", args),
            Level::Trace => defmt::trace!("{}", args),
        }
    }

    fn flush(&self) {}
}

/// Installs the forwarder. Must run once, before any task is spawned.
pub fn init() {
    // Cortex-M0+ has no compare-and-swap, so the racy setters are the only
    // ones available; nothing else runs yet.
    unsafe {
        if log::set_logger_racy(&LOGGER).is_ok() {
            log::set_max_level_racy(LevelFilter::Debug);
        }
    }
}
