//! Logger construction.

use slog::Logger;
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

/// Build the root logger for the process. Diagnostics go to stderr so the
/// observation stream on stdout stays machine-readable.
pub fn init(level: Severity) -> Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(level);
    builder.destination(Destination::Stderr);
    builder.build().expect("failed to build terminal logger")
}
