use chrono::{DateTime, Utc};
use colored::Colorize;
use once_cell::sync::Lazy;

pub static SUCCESS: Lazy<colored::ColoredString> = Lazy::new(|| "[FLEETD]".green());
pub static FAIL: Lazy<colored::ColoredString> = Lazy::new(|| "[FLEETD]".red());
pub static WARN: Lazy<colored::ColoredString> = Lazy::new(|| "[FLEETD]".yellow());

/// Compact age of a timestamp, e.g. `5m` or `2d`
pub fn format_duration(since: DateTime<Utc>) -> String { format_seconds(Utc::now().signed_duration_since(since).num_seconds()) }

fn format_seconds(seconds: i64) -> String {
    match seconds {
        s if s >= 86400 => format!("{}d", s / 86400),
        s if s >= 3600 => format!("{}h", s / 3600),
        s if s >= 60 => format!("{}m", s / 60),
        s => format!("{}s", s.max(0)),
    }
}
