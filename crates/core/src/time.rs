//! Utility module for getting the current time as a log-friendly string.

pub use time::Error;
use time::OffsetDateTime;

/// Returns a formatted [`String`] with the current time.
///
/// Note that this may be the local time, or may be based off UTC if the local offset cannot be
/// determined.
#[must_use]
#[inline]
pub fn current_time() -> String {
    let time = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    format!(
        "{}-{:02}-{:02} {:02}:{:02}:{:02}",
        time.year(),
        time.month() as u8,
        time.day(),
        time.hour(),
        time.minute(),
        time.second()
    )
}
