//! Rate-limit header parsing helpers shared by the dialects.
//!
//! OpenAI reports resets as Go-style durations (`6m0s`, `20ms`, `1.5s`);
//! Anthropic reports absolute RFC 3339 instants.

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use std::time::Duration;

use crate::dialect::header_str;

/// Parse a Go `time.Duration` string such as `1h2m3.5s` or `20ms`.
pub fn parse_go_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if s == "0" {
        return Some(Duration::ZERO);
    }

    let mut total = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_len == 0 {
            return None;
        }
        let value: f64 = rest[..num_len].parse().ok()?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "h" => 3600.0,
            "m" => 60.0,
            "s" => 1.0,
            "ms" => 1e-3,
            "us" | "µs" => 1e-6,
            "ns" => 1e-9,
            _ => return None,
        };
        rest = &rest[unit_len..];
        total += value * scale;
    }
    Some(Duration::from_secs_f64(total))
}

/// Reset instant from a duration header, relative to `now`.
pub fn reset_after(now: DateTime<Utc>, value: &str) -> Option<DateTime<Utc>> {
    let duration = parse_go_duration(value)?;
    let delta = chrono::Duration::from_std(duration).ok()?;
    Some(now + delta)
}

/// Reset instant from an RFC 3339 header.
pub fn reset_at(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    header_str(headers, name).and_then(|v| v.parse().ok())
}

/// Seconds to wait after a 429, from `retry-after` (default 5).
pub fn retry_after_secs(headers: &HeaderMap) -> u64 {
    header_str(headers, "retry-after")
        .and_then(|v| v.parse::<f64>().ok())
        .map(|secs| secs.ceil().max(0.0) as u64)
        .unwrap_or(5)
}
