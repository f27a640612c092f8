// IPC Logging Front-End
//
// Structured, leveled logging shared by every IPC module. Call sites use the
// `log_debug!`/`log_info!`/`log_warn!`/`log_error!` macros with a subsystem
// origin tag; records are routed through the `log` facade with the origin as
// the record target, so any `log` backend can filter per module.
//
// Key responsibilities:
// - Provide the origin-tagged convenience macros used across the stack
// - Capture `file!()` and `line!()` at the call site
// - Ship a minimal stderr backend (`Logger`) for programs that do not
//   install their own
//
// Output format of the bundled backend:
//   [t=<seconds>.<millis>s] [LEVEL] [origin] message
// DEBUG entries additionally carry `(file:line)`.
//
// Correctness and safety notes:
// - Records below the facade's max level are dropped before formatting
// - `init` is idempotent; a second call only adjusts the level
// - Timestamps are relative to the first `init` and monotonic

use std::fmt;
use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

pub use ::log::{Level, LevelFilter};

static LOGGER: Logger = Logger;
static START: OnceLock<Instant> = OnceLock::new();

/// Stderr backend for the `log` facade
pub struct Logger;

const fn level_str(level: Level) -> &'static str {
    match level {
        Level::Trace => "TRACE",
        Level::Debug => "DEBUG",
        Level::Info => "INFO ",
        Level::Warn => "WARN ",
        Level::Error => "ERROR",
    }
}

fn elapsed_ms() -> u128 {
    START.get_or_init(Instant::now).elapsed().as_millis()
}

impl ::log::Log for Logger {
    fn enabled(&self, metadata: &::log::Metadata) -> bool {
        metadata.level() <= ::log::max_level()
    }

    fn log(&self, record: &::log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let ms = elapsed_ms();
        let seconds = ms / 1000;
        let milliseconds = ms % 1000;

        let mut out = std::io::stderr().lock();
        let _ = if record.level() >= Level::Debug {
            writeln!(
                out,
                "[t={}.{:03}s] [{}] [{}] {} ({}:{})",
                seconds,
                milliseconds,
                level_str(record.level()),
                record.target(),
                record.args(),
                record.file().unwrap_or("?"),
                record.line().unwrap_or(0)
            )
        } else {
            writeln!(
                out,
                "[t={}.{:03}s] [{}] [{}] {}",
                seconds,
                milliseconds,
                level_str(record.level()),
                record.target(),
                record.args()
            )
        };
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Install the stderr backend and set the maximum level.
pub fn init(level: LevelFilter) {
    START.get_or_init(Instant::now);
    let _ = ::log::set_logger(&LOGGER);
    ::log::set_max_level(level);
}

pub fn set_level(level: LevelFilter) {
    ::log::set_max_level(level);
}

pub fn level() -> LevelFilter {
    ::log::max_level()
}

pub fn _log(level: Level, origin: &str, args: fmt::Arguments, file: &'static str, line: u32) {
    if level > ::log::max_level() {
        return;
    }

    ::log::logger().log(
        &::log::Record::builder()
            .level(level)
            .target(origin)
            .args(args)
            .file_static(Some(file))
            .line(Some(line))
            .build(),
    );
}

#[macro_export]
macro_rules! log_debug {
    ($origin:expr, $($arg:tt)*) => {
        $crate::log::_log(
            $crate::log::Level::Debug,
            $origin,
            format_args!($($arg)*),
            file!(),
            line!()
        )
    };
}

#[macro_export]
macro_rules! log_info {
    ($origin:expr, $($arg:tt)*) => {
        $crate::log::_log(
            $crate::log::Level::Info,
            $origin,
            format_args!($($arg)*),
            file!(),
            line!()
        )
    };
}

#[macro_export]
macro_rules! log_warn {
    ($origin:expr, $($arg:tt)*) => {
        $crate::log::_log(
            $crate::log::Level::Warn,
            $origin,
            format_args!($($arg)*),
            file!(),
            line!()
        )
    };
}

#[macro_export]
macro_rules! log_error {
    ($origin:expr, $($arg:tt)*) => {
        $crate::log::_log(
            $crate::log::Level::Error,
            $origin,
            format_args!($($arg)*),
            file!(),
            line!()
        )
    };
}
