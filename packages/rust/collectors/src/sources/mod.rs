//! Built-in collectors.
//!
//! Each module exposes `NAME`, `SOURCE_KEY`, and an `ENTRY` for the registry.

pub mod arxiv;
pub mod hackernews;
pub mod reddit;
pub mod rss;

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use digest_shared::{DigestError, Result};

/// Fixed politeness delay between emitted items.
pub(crate) async fn pause(delay_ms: u64) {
    if delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
}

/// Start of a `days_back` window ending at `now`. Negative or out-of-range
/// values are a configuration error for `collector`.
pub(crate) fn window_start(
    collector: &str,
    days_back: i64,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    if days_back < 0 {
        return Err(DigestError::config(format!(
            "[collectors.{collector}]: days_back must not be negative, got {days_back}"
        )));
    }
    TimeDelta::try_days(days_back)
        .and_then(|window| now.checked_sub_signed(window))
        .ok_or_else(|| {
            DigestError::config(format!(
                "[collectors.{collector}]: days_back {days_back} is out of range"
            ))
        })
}
