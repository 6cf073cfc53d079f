//! Client configuration and refresh-schedule parsing.

use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{DriveError, DriveResult};
use crate::types::{API_ENDPOINT, AUTH_ENDPOINT};

/// Default part size for chunked uploads (10 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;
pub const DEFAULT_REFRESH_SCHEDULE: &str = "@every 1h30m";

const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(90 * 60);

/// Top-level configuration for a [`crate::client::DriveClient`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriveConfig {
    /// Run the background refresh job.
    pub auto_refresh: bool,
    /// `@every 1h30m`, `every 90 minutes`, or a cron expression.
    pub refresh_schedule: String,
    /// Upload throughput cap in bytes/sec; 0 disables limiting.
    pub upload_rate_limit: u64,
    /// Refresh tokens registered at construction.
    #[serde(skip)]
    pub initial_credentials: Vec<String>,
    pub chunk_size: u64,
    pub cache_ttl_secs: u64,
    pub cache_sweep_secs: u64,
    pub timeout_secs: u64,
    pub api_endpoint: String,
    pub auth_endpoint: String,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            auto_refresh: false,
            refresh_schedule: DEFAULT_REFRESH_SCHEDULE.to_string(),
            upload_rate_limit: 0,
            initial_credentials: Vec::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            cache_ttl_secs: 300,
            cache_sweep_secs: 60,
            timeout_secs: 120,
            api_endpoint: API_ENDPOINT.to_string(),
            auth_endpoint: AUTH_ENDPOINT.to_string(),
        }
    }
}

impl DriveConfig {
    /// Reject settings that would make the client misbehave.
    pub fn validate(&self) -> DriveResult<()> {
        if self.chunk_size == 0 {
            return Err(DriveError::config("chunkSize must be positive"));
        }
        if self.cache_ttl_secs == 0 {
            return Err(DriveError::config("cacheTtlSecs must be positive"));
        }
        if self.cache_sweep_secs == 0 {
            return Err(DriveError::config("cacheSweepSecs must be positive"));
        }
        if self.api_endpoint.is_empty() || self.auth_endpoint.is_empty() {
            return Err(DriveError::config("endpoints must not be empty"));
        }
        url::Url::parse(&self.api_endpoint)
            .map_err(|e| DriveError::config(format!("apiEndpoint: {e}")))?;
        url::Url::parse(&self.auth_endpoint)
            .map_err(|e| DriveError::config(format!("authEndpoint: {e}")))?;
        if self.auto_refresh {
            RefreshSchedule::parse(&self.refresh_schedule)?;
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ── Refresh schedule ─────────────────────────────────────────────

/// When the background refresh job fires.
#[derive(Debug, Clone)]
pub enum RefreshSchedule {
    Every(Duration),
    Cron(Box<cron::Schedule>),
}

impl RefreshSchedule {
    pub fn parse(expr: &str) -> DriveResult<Self> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Ok(Self::Every(DEFAULT_REFRESH_INTERVAL));
        }
        if let Some(rest) = expr.strip_prefix("@every") {
            return parse_compact_duration(rest.trim()).map(Self::Every);
        }
        let lower = expr.to_ascii_lowercase();
        if let Some(rest) = lower.strip_prefix("every ") {
            return parse_worded_duration(rest.trim()).map(Self::Every);
        }

        // 5-field expressions get a leading seconds column.
        let fields = expr.split_whitespace().count();
        let normalized = if fields == 5 {
            format!("0 {expr}")
        } else {
            expr.to_string()
        };
        cron::Schedule::from_str(&normalized)
            .map(|s| Self::Cron(Box::new(s)))
            .map_err(|e| DriveError::config(format!("Invalid refresh schedule '{expr}': {e}")))
    }

    /// Time until the next run, measured from now.
    pub fn next_delay(&self) -> Duration {
        match self {
            Self::Every(d) => *d,
            Self::Cron(schedule) => schedule
                .upcoming(Utc)
                .next()
                .and_then(|at| (at - Utc::now()).to_std().ok())
                .unwrap_or(DEFAULT_REFRESH_INTERVAL),
        }
    }
}

impl Default for RefreshSchedule {
    fn default() -> Self {
        Self::Every(DEFAULT_REFRESH_INTERVAL)
    }
}

/// `1h30m`, `90m`, `45s`, `1h2m3s`, `500ms`.
fn parse_compact_duration(s: &str) -> DriveResult<Duration> {
    let bad = || DriveError::config(format!("Invalid duration '{s}'"));
    if s.is_empty() {
        return Err(bad());
    }
    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(bad());
        }
        let value: u64 = rest[..digits].parse().map_err(|_| bad())?;
        rest = &rest[digits..];
        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];
        total += unit_duration(value, unit).ok_or_else(bad)?;
    }
    if total.is_zero() {
        return Err(bad());
    }
    Ok(total)
}

/// `90 minutes`, `2 hours`, `30 seconds`.
fn parse_worded_duration(s: &str) -> DriveResult<Duration> {
    let bad = || DriveError::config(format!("Invalid interval 'every {s}'"));
    let mut parts = s.split_whitespace();
    let value: u64 = parts.next().and_then(|v| v.parse().ok()).ok_or_else(bad)?;
    let unit = parts.next().ok_or_else(bad)?;
    if parts.next().is_some() || value == 0 {
        return Err(bad());
    }
    unit_duration(value, unit).ok_or_else(bad)
}

fn unit_duration(value: u64, unit: &str) -> Option<Duration> {
    let secs = match unit {
        "ms" => return Some(Duration::from_millis(value)),
        "s" | "sec" | "secs" | "second" | "seconds" => value,
        "m" | "min" | "mins" | "minute" | "minutes" => value * 60,
        "h" | "hour" | "hours" => value * 3600,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
