//! Replays scripted sessions against the demo apps and writes their
//! transcripts under `transcripts/`.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use badge_core::power::PowerConfig;

#[allow(dead_code)]
#[path = "../badge.rs"]
mod badge;
#[allow(dead_code)]
#[path = "../command.rs"]
mod command;
#[allow(dead_code)]
#[path = "../demo.rs"]
mod demo;
#[allow(dead_code)]
#[path = "../logger.rs"]
mod logger;
#[allow(dead_code)]
#[path = "../session.rs"]
mod session;

use session::{Options, Session};

fn main() -> io::Result<()> {
    if let Err(err) = logger::install(log::LevelFilter::Debug) {
        eprintln!("logging unavailable: {err}");
    }

    record(
        "idle-sleep",
        true,
        &[
            "services",
            "tasks",
            "advance 6000",
            "idle",
            "press",
            "advance 12000",
            "screen",
            "press",
            "tasks",
        ],
    )?;
    record(
        "no-wifi",
        false,
        &["services", "advance 3000", "events", "wifi on", "draw"],
    )?;
    Ok(())
}

fn record(name: &str, wifi: bool, script: &[&str]) -> io::Result<()> {
    let mut session = Session::new(Options {
        root: PathBuf::from("demos"),
        period: Duration::from_millis(50),
        power: PowerConfig::new(Duration::from_millis(2_000), Duration::from_millis(10_000)),
        wifi,
        transcript: Some(PathBuf::from(format!("transcripts/{name}.log"))),
    })?;

    for line in script {
        let _ = session.handle_command(line)?;
    }
    Ok(())
}
