mod badge;
mod command;
mod demo;
mod logger;
mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use badge_core::power::PowerConfig;
use log::LevelFilter;

use badge::HostSettings;
use session::{Options, Session};

const USAGE: &str = "Usage: badge-emulator [--root <dir>] [--period <ms>] [--urt <ms>] \
                     [--transcript <path>] [--no-wifi] [--verbose]";

fn main() -> io::Result<()> {
    let (options, level) = parse_options().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    if let Err(err) = logger::install(level) {
        eprintln!("logging unavailable: {err}");
    }

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut session = Session::new(options)?;
    let mut line = String::new();

    writeln!(
        writer,
        "Badge emulator ready. Type `help` for commands or `exit` to quit."
    )?;

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        let responses = session.handle_command(trimmed)?;
        for response in responses {
            writeln!(writer, "{response}")?;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_options() -> Result<(Options, LevelFilter), String> {
    let mut options = Options::default();
    let mut settings = HostSettings::default();
    let mut level = LevelFilter::Info;
    let mut args = env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--root" => options.root = PathBuf::from(value(&mut args, &arg)?),
            "--transcript" => options.transcript = Some(PathBuf::from(value(&mut args, &arg)?)),
            "--period" => {
                let millis = millis(&value(&mut args, &arg)?)?;
                options.period = Duration::from_millis(millis);
            }
            "--urt" => {
                let millis = millis(&value(&mut args, &arg)?)?;
                let millis = u16::try_from(millis)
                    .map_err(|_| format!("--urt must be at most {}ms", u16::MAX))?;
                settings.user_response_time_ms = Some(millis);
            }
            "--no-wifi" => options.wifi = false,
            "--verbose" => level = LevelFilter::Debug,
            other => return Err(format!("Unknown argument `{other}`")),
        }
    }

    options.power = PowerConfig::load(&settings);
    Ok((options, level))
}

fn value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
    args.next().ok_or_else(|| format!("Expected value after {flag}"))
}

fn millis(text: &str) -> Result<u64, String> {
    text.parse()
        .map_err(|_| format!("`{text}` is not a number of milliseconds"))
}
