//! Log formatting and output with ANSI colors
//!
//! Console lines are colored and aligned; file lines carry a full timestamp
//! and no color codes. Broken pipes (e.g. `| head`) are ignored.

use super::file::write_to_file;
use super::levels::LogLevel;
use super::tags::LogTag;
use chrono::Local;
use colored::*;
use std::io::{stdout, ErrorKind, Write};

/// Log format widths for alignment
const TAG_WIDTH: usize = 10;
const LEVEL_WIDTH: usize = 7;

pub fn format_and_log(tag: LogTag, level: LogLevel, message: &str) {
    let now = Local::now();

    let console_line = format!(
        "{} [{}] [{}] {}",
        now.format("%H:%M:%S").to_string().dimmed(),
        format_tag(&tag),
        format_level(level),
        message
    );
    print_stdout_safe(&console_line);

    let file_line = format!(
        "{} [{}] [{}] {}",
        now.format("%Y-%m-%d %H:%M:%S"),
        tag.to_plain_string(),
        level.as_str(),
        message
    );
    write_to_file(&file_line);
}

fn format_tag(tag: &LogTag) -> ColoredString {
    let padded = format!("{:<width$}", tag.to_plain_string(), width = TAG_WIDTH);
    match tag {
        LogTag::System => padded.bright_yellow().bold(),
        LogTag::Config => padded.yellow(),
        LogTag::Ledger => padded.bright_cyan().bold(),
        LogTag::Detector => padded.bright_magenta().bold(),
        LogTag::Decision => padded.bright_red().bold(),
        LogTag::Dispatch => padded.bright_green().bold(),
        LogTag::Source => padded.bright_blue().bold(),
        LogTag::Persistence => padded.blue(),
        LogTag::Audit => padded.white().bold(),
    }
}

fn format_level(level: LogLevel) -> ColoredString {
    let padded = format!("{:<width$}", level.as_str(), width = LEVEL_WIDTH);
    match level {
        LogLevel::Error => padded.bright_red().bold(),
        LogLevel::Warning => padded.bright_yellow(),
        LogLevel::Info => padded.bright_white(),
        LogLevel::Debug => padded.bright_black(),
        LogLevel::Verbose => padded.dimmed(),
    }
}

/// Print to stdout, swallowing broken pipe errors
fn print_stdout_safe(line: &str) {
    let mut out = stdout().lock();
    if let Err(e) = writeln!(out, "{}", line) {
        if e.kind() != ErrorKind::BrokenPipe {
            eprintln!("{}", line);
        }
    }
}
