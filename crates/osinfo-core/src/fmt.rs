//! Formatting helpers for label values and log messages.
//!
//! Label values that carry sizes or times are rendered as stable strings so
//! that an unchanged observation always yields an identical label tuple.

use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};

/// Controls compact (log lines) vs verbose (label values) output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FmtStyle {
    /// Compact: no spaces, short suffixes ("1.5G", "512B")
    Compact,
    /// Detail: spaces, binary suffixes ("1.5 GiB", "512 B")
    Detail,
}

const UNITS: [(&str, &str); 6] = [
    ("K", " KiB"),
    ("M", " MiB"),
    ("G", " GiB"),
    ("T", " TiB"),
    ("P", " PiB"),
    ("E", " EiB"),
];

/// Format byte count as human-readable size with one decimal.
///
/// Compact: `"1.5G"`, `"100.3M"`, `"512B"`
/// Detail:  `"1.5 GiB"`, `"100.3 MiB"`, `"512 B"`
pub fn format_bytes(bytes: u64, style: FmtStyle) -> String {
    if bytes < 1024 {
        return match style {
            FmtStyle::Compact => format!("{}B", bytes),
            FmtStyle::Detail => format!("{} B", bytes),
        };
    }
    let mut div = 1024u64;
    let mut exp = 0;
    while bytes / div >= 1024 && exp < UNITS.len() - 1 {
        div *= 1024;
        exp += 1;
    }
    let (compact, detail) = UNITS[exp];
    let suffix = match style {
        FmtStyle::Compact => compact,
        FmtStyle::Detail => detail,
    };
    format!("{:.1}{}", bytes as f64 / div as f64, suffix)
}

/// Format duration in seconds as human-readable.
///
/// `"45s"`, `"3m 5s"`, `"2h 0m"`, `"1d 3h"`
pub fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

/// Format a file time as RFC 3339 in UTC with second precision
/// (`"2023-11-14T22:13:20Z"`).
pub fn format_rfc3339(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Secs, true)
}
