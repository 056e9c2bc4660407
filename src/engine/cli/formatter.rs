//! Terminal output for the otabundle CLI

use colored::{ColoredString, Colorize};
use std::fs;
use std::path::PathBuf;

use crate::engine::store::{BundleRecord, Slot};

/// Outcome shown in front of a one-line message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Done,
    Notice,
    Failed,
}

impl Tone {
    fn marker(self) -> ColoredString {
        match self {
            Self::Done => "✓".green().bold(),
            Self::Notice => "•".yellow().bold(),
            Self::Failed => "✗".red().bold(),
        }
    }
}

pub struct CliFormatter;

impl CliFormatter {
    /// Failures go to stderr
    pub fn say(tone: Tone, message: &str) {
        match tone {
            Tone::Failed => eprintln!("{} {}", tone.marker(), message),
            _ => println!("{} {}", tone.marker(), message),
        }
    }

    pub fn record(record: &BundleRecord) {
        for (slot, rows) in slot_rows(record) {
            println!("{}", format!("[{}]", slot).bright_cyan().bold());
            for (label, value) in rows {
                println!("  {:<10} {}", label.bright_white(), shown(&value));
            }
        }
        println!("{:<12} {}", "metadata".bright_white(), shown(&record.metadata));
    }

    pub fn removed(paths: &[PathBuf]) {
        if paths.is_empty() {
            Self::say(Tone::Done, "Nothing to clean up");
            return;
        }
        Self::say(Tone::Done, &format!("Removed {} director(ies)", paths.len()));
        for path in paths {
            println!("  {}", path.display().to_string().bright_black());
        }
    }
}

/// Per-slot rows; size is read from disk and left out when the file is gone
fn slot_rows(record: &BundleRecord) -> Vec<(Slot, Vec<(&'static str, String)>)> {
    let slot = |slot, path: &str, version: &str| {
        let mut rows = vec![("path", path.to_string()), ("version", version.to_string())];
        if let Ok(meta) = fs::metadata(path) {
            rows.push(("size", format_size(meta.len())));
        }
        (slot, rows)
    };

    let mut current = slot(Slot::Current, &record.path, &record.version);
    current.1.push(("build", record.installed_build_id.clone()));
    vec![
        current,
        slot(Slot::Previous, &record.previous_path, &record.previous_version),
    ]
}

fn shown(value: &str) -> ColoredString {
    if value.is_empty() {
        "(unset)".bright_black()
    } else {
        value.normal()
    }
}

/// Format file size in human-readable format
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}
