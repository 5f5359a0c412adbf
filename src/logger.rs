use std::fmt;

/// Log verbosity level, least to most detailed.
///
/// Warn and Info always print; Verbose, Debug and Trace need `-v`, `-vv`
/// and `-vvv` respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Warn,
    Info,
    Verbose,
    Debug,
    Trace,
}

impl Level {
    /// Smallest `-v` count at which this level prints.
    fn threshold(self) -> u8 {
        match self {
            Level::Warn | Level::Info => 0,
            Level::Verbose => 1,
            Level::Debug => 2,
            Level::Trace => 3,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Level::Warn    => "WARN",
            Level::Info    => "INFO",
            Level::Verbose => "VERB",
            Level::Debug   => "DEBG",
            Level::Trace   => "TRCE",
        };
        write!(f, "{tag}")
    }
}

/// Verbosity-gated logger used by the arbiter loop and both binaries.
///
/// Every log method accepts any [`fmt::Display`] value, so call sites pass
/// plain strings, `format_args!(…)` expressions, or the event enums the
/// server and runner define for their own occurrences:
///
/// ```text
/// log.info(ServerEvent::Listening { addr });
/// log.debug(format_args!("session {id}: {raw:?}"));
/// ```
///
/// Nothing is formatted unless the level is enabled at the current
/// verbosity, so trace-level events cost nothing in a quiet run.
pub struct Logger {
    verbosity: u8,
}

impl Logger {
    pub fn new(verbosity: u8) -> Self {
        Self { verbosity }
    }

    pub fn enabled(&self, level: Level) -> bool {
        self.verbosity >= level.threshold()
    }

    fn emit(&self, level: Level, msg: &dyn fmt::Display) {
        if self.enabled(level) {
            eprintln!("[{level}] {msg}");
        }
    }

    pub fn warn   (&self, msg: impl fmt::Display) { self.emit(Level::Warn,    &msg); }
    pub fn info   (&self, msg: impl fmt::Display) { self.emit(Level::Info,    &msg); }
    pub fn verbose(&self, msg: impl fmt::Display) { self.emit(Level::Verbose, &msg); }
    pub fn debug  (&self, msg: impl fmt::Display) { self.emit(Level::Debug,   &msg); }
    pub fn trace  (&self, msg: impl fmt::Display) { self.emit(Level::Trace,   &msg); }
}
