//! Output formatting utilities for the CLI.

use colored::Colorize;
use serde::Serialize;

use crate::OutputFormat;

/// Print `value` as pretty JSON when the format asks for it.
pub fn print<T: Serialize>(value: &T, format: OutputFormat, quiet: bool) {
    if quiet || format != OutputFormat::Json {
        return;
    }
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => warning(&format!("could not serialize output: {}", e), OutputFormat::Text, false),
    }
}

/// Print a success message.
pub fn success(msg: &str, format: OutputFormat, quiet: bool) {
    if quiet || format != OutputFormat::Text {
        return;
    }
    println!("{} {}", "✓".green().bold(), msg);
}

/// Print an info message.
pub fn info(msg: &str, format: OutputFormat, quiet: bool) {
    if quiet || format != OutputFormat::Text {
        return;
    }
    println!("{}", msg);
}

/// Print aligned `label: value` rows.
pub fn rows(rows: &[(&str, String)], format: OutputFormat, quiet: bool) {
    if quiet || format != OutputFormat::Text {
        return;
    }
    let width = rows.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
    for (label, value) in rows {
        let label = format!("{:<width$}", format!("{}:", label), width = width + 1);
        println!("  {} {}", label.dimmed(), value);
    }
}

/// Print a warning message.
pub fn warning(msg: &str, format: OutputFormat, quiet: bool) {
    if quiet || format != OutputFormat::Text {
        return;
    }
    eprintln!("{} {}", "⚠".yellow().bold(), msg);
}

/// Print a fatal error with its cause chain. Never suppressed.
pub fn error(err: &anyhow::Error) {
    eprintln!("{} {:#}", "error:".red().bold(), err);
}
