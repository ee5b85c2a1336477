use std::time::Duration;

use anyhow::{Context, Result};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_ALERT_WINDOW_MINUTES: u64 = 5;
pub const DEFAULT_LOCATION_REFRESH_MINUTES: u64 = 15;

/// Upper bound for every minute-valued setting (one year).
pub const MAX_MINUTES: u64 = 366 * 24 * 60;

/// Runtime settings read from the environment (and `.env`, when present).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub poll_interval: Duration,
    pub alert_window: Duration,
    pub location_refresh: Duration,
    pub push_token: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set to a Postgres instance")?;

        Self::from_lookup(database_url, |key| std::env::var(key).ok())
    }

    fn from_lookup<F>(database_url: String, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let poll_secs = parse_u64(&lookup, "REPORT_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?;
        let window_minutes =
            parse_u64(&lookup, "ALERT_WINDOW_MINUTES", DEFAULT_ALERT_WINDOW_MINUTES)?;
        let refresh_minutes = parse_u64(
            &lookup,
            "LOCATION_REFRESH_MINUTES",
            DEFAULT_LOCATION_REFRESH_MINUTES,
        )?;

        Ok(Self {
            database_url,
            poll_interval: Duration::from_secs(poll_secs.max(1)),
            alert_window: minutes("ALERT_WINDOW_MINUTES", window_minutes)?,
            location_refresh: minutes("LOCATION_REFRESH_MINUTES", refresh_minutes.max(1))?,
            push_token: lookup("PUSH_TOKEN").filter(|token| !token.trim().is_empty()),
        })
    }
}

fn parse_u64<F>(lookup: &F, key: &str, default: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a whole number, got {raw:?}")),
        None => Ok(default),
    }
}

fn minutes(key: &str, value: u64) -> Result<Duration> {
    if value > MAX_MINUTES {
        anyhow::bail!("{key} must be at most {MAX_MINUTES} minutes, got {value}");
    }
    let secs = value
        .checked_mul(60)
        .with_context(|| format!("{key} of {value} minutes overflows"))?;
    Ok(Duration::from_secs(secs))
}
