//! Logger configuration and structured output formatting.
//!
//! Column-aligned, optionally colored log output:
//!
//! ```text
//! Aug 01 26 09:15:02 AM | [INFO ] | routing.rs:214     | tenant 'acme' registered
//! Aug 01 26 09:15:04 AM | [WARN ] | circuit_breaker.rs:231 | circuit breaker billing opened
//! ```
//!
//! Colors honour the `NO_COLOR` environment variable; log levels come from
//! `RUST_LOG` in the usual `env_logger` way.

use env_logger::Builder;
use log::LevelFilter;
use std::env;
use std::io::Write;

/// Visible width of the `[LEVEL]` column.
const LEVEL_FIELD_WIDTH: usize = 7;

/// Visible width of the `file:line` column.
const FILE_LINE_FIELD_WIDTH: usize = 22;

/// Configures and initializes the process-wide logger.
///
/// Call once at startup. Padding is applied to the plain level text before
/// coloring, so column alignment survives ANSI sequences.
pub fn configure_logger() {
    let no_color = env::var("NO_COLOR").is_ok();

    Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(move |buf, record| {
            let level_padded = format!("[{:<width$}]", record.level(), width = LEVEL_FIELD_WIDTH - 2);

            let level_display = if no_color {
                level_padded
            } else {
                let color = match record.level() {
                    log::Level::Error => "\x1b[31m",
                    log::Level::Warn => "\x1b[33m",
                    log::Level::Info => "\x1b[32m",
                    log::Level::Debug => "\x1b[34m",
                    log::Level::Trace => "\x1b[35m",
                };
                format!("{}{}\x1b[0m", color, level_padded)
            };

            let file_line = format!(
                "{}:{}",
                record
                    .file()
                    .map(|f| f.rsplit('/').next().unwrap_or(f))
                    .unwrap_or("unknown"),
                record.line().unwrap_or(0)
            );

            writeln!(
                buf,
                "{} | {} | {:<file_width$} | {}",
                chrono::Local::now().format("%b %d %y %I:%M:%S %p"),
                level_display,
                file_line,
                record.args(),
                file_width = FILE_LINE_FIELD_WIDTH,
            )
        })
        .init();

    log::set_max_level(LevelFilter::Trace);
}
