//! Console command grammar.

use std::fmt;
use std::time::Duration;

use winnow::ascii::{dec_uint, multispace1};
use winnow::combinator::{alt, opt, preceded};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::rest;

type Parsed<T> = Result<T, ErrMode<ContextError>>;

/// A parsed console command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command<'a> {
    /// Let simulated time pass, ticking the scheduler as it goes.
    Advance(Duration),
    /// Deliver a number of timer interrupts.
    Tick(u32),
    /// User input: feeds the power manager or wakes the badge.
    Press,
    Tasks,
    Services,
    Events,
    Idle,
    Wifi(bool),
    /// Run every service draw callback right now.
    Draw,
    Screen,
    Help(Option<&'a str>),
}

/// The line did not match the grammar.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CommandError {
    pub offset: usize,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized input at column {}", self.offset + 1)
    }
}

impl<'a> Command<'a> {
    /// Parses a trimmed console line.
    pub fn parse(line: &'a str) -> Result<Self, CommandError> {
        command.parse(line).map_err(|err| CommandError {
            offset: err.offset(),
        })
    }
}

fn command<'a>(input: &mut &'a str) -> Parsed<Command<'a>> {
    alt((
        preceded(("advance", multispace1), dec_uint)
            .map(|millis: u64| Command::Advance(Duration::from_millis(millis))),
        preceded("tick", opt(preceded(multispace1, dec_uint)))
            .map(|count: Option<u32>| Command::Tick(count.unwrap_or(1))),
        "press".value(Command::Press),
        "tasks".value(Command::Tasks),
        "services".value(Command::Services),
        "events".value(Command::Events),
        "idle".value(Command::Idle),
        preceded(
            ("wifi", multispace1),
            alt(("on".value(true), "off".value(false))),
        )
        .map(Command::Wifi),
        "draw".value(Command::Draw),
        "screen".value(Command::Screen),
        preceded("help", opt(preceded(multispace1, rest))).map(Command::Help),
    ))
    .parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_with_arguments() {
        assert_eq!(
            Command::parse("advance 1500"),
            Ok(Command::Advance(Duration::from_millis(1500)))
        );
        assert_eq!(Command::parse("tick"), Ok(Command::Tick(1)));
        assert_eq!(Command::parse("tick 12"), Ok(Command::Tick(12)));
        assert_eq!(Command::parse("wifi off"), Ok(Command::Wifi(false)));
        assert_eq!(Command::parse("help tasks"), Ok(Command::Help(Some("tasks"))));
        assert_eq!(Command::parse("help"), Ok(Command::Help(None)));
    }

    #[test]
    fn rejects_trailing_garbage_and_unknown_words() {
        assert!(Command::parse("ticks").is_err());
        assert!(Command::parse("advance soon").is_err());
        assert!(Command::parse("reboot").is_err());
    }
}
