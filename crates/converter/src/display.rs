//! Human-readable renderings for reports and the CLI

use anyhow::Result;
use humansize::{format_size, WINDOWS};
use crate::ffprobe::parse_duration;

/// Byte count with binary units (`1.5 KB` is 1536 bytes)
pub fn format_bytes(bytes: u64) -> String {
    format_size(bytes, WINDOWS)
}

/// Size saved relative to `original`, in percent. Negative when the output
/// grew; zero when the original size is unknown.
pub fn compression_ratio(original: u64, converted: u64) -> f64 {
    if original == 0 {
        return 0.0;
    }
    (1.0 - converted as f64 / original as f64) * 100.0
}

/// Size change as shown to the user: `-40.0%` when smaller, `+12.5%` when
/// larger, `0%` when unchanged.
pub fn compression_label(original: u64, converted: u64) -> String {
    let ratio = compression_ratio(original, converted);
    if ratio > 0.0 {
        format!("-{:.1}%", ratio)
    } else if ratio < 0.0 {
        format!("+{:.1}%", -ratio)
    } else {
        "0%".to_string()
    }
}

/// Seconds as `HH:MM:SS`, truncating fractions
pub fn format_timestamp(secs: f64) -> String {
    let total = if secs.is_finite() && secs > 0.0 { secs.floor() as u64 } else { 0 };
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Parse `HH:MM:SS[.fff]` or plain seconds
pub fn parse_timestamp(input: &str) -> Result<f64> {
    let secs = parse_duration(input)?;
    if !secs.is_finite() || secs < 0.0 {
        anyhow::bail!("timestamp must be a non-negative time, got {}", input);
    }
    Ok(secs)
}
