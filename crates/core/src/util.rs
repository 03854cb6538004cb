//! Utility functions that can't be grouped into any other module.

#[cfg(not(feature = "std"))]
use crate::no_std::*;

/// Converts a file size in bytes to a human-readable format.
///
/// Sizes below 1 KB are printed as-is, anything larger gets two decimals and the relevant unit.
#[must_use]
pub fn format_size(length: usize) -> String {
    const UNITS: [&str; 5] = ["bytes", "KB", "MB", "GB", "TB"];

    if length < 1024 {
        return format!("{length} bytes");
    }

    let mut size = length as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", size, UNITS[unit])
}
