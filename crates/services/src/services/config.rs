//! Pipeline settings, read from the environment with defaults.

use std::{str::FromStr, time::Duration};

use tracing::warn;

use super::ranking::DEFAULT_TOP_K;

#[derive(Debug, Clone)]
pub struct AdSpyConfig {
    /// Number of creatives kept by the ranker
    pub top_k: usize,
    pub default_window_days: i32,
    pub max_window_days: i32,
    /// Per-creative pipelines allowed in flight; 1 keeps the loop sequential
    pub item_concurrency: usize,
    /// Pending/analyzing runs older than this are swept to failed
    pub stale_run_minutes: i64,
    pub sweep_interval: Duration,
    pub schedule_poll_interval: Duration,
    /// A1 range read from the script spreadsheet
    pub script_sheet_range: String,
}

impl Default for AdSpyConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            default_window_days: 7,
            max_window_days: 365,
            item_concurrency: 1,
            stale_run_minutes: 30,
            sweep_interval: Duration::from_secs(60),
            schedule_poll_interval: Duration::from_secs(60),
            script_sheet_range: "A:Z".to_string(),
        }
    }
}

impl AdSpyConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            top_k: env_or("AD_SPY_TOP_K", defaults.top_k).max(1),
            default_window_days: env_or("AD_SPY_WINDOW_DAYS", defaults.default_window_days),
            max_window_days: defaults.max_window_days,
            item_concurrency: env_or("AD_SPY_ITEM_CONCURRENCY", defaults.item_concurrency).max(1),
            stale_run_minutes: env_or("AD_SPY_STALE_RUN_MINUTES", defaults.stale_run_minutes),
            sweep_interval: Duration::from_secs(env_or(
                "AD_SPY_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval.as_secs(),
            )),
            schedule_poll_interval: Duration::from_secs(env_or(
                "AD_SPY_SCHEDULE_POLL_SECS",
                defaults.schedule_poll_interval.as_secs(),
            )),
            script_sheet_range: std::env::var("AD_SPY_SHEET_RANGE")
                .unwrap_or(defaults.script_sheet_range),
        }
    }
}

fn env_or<T: FromStr + Copy>(key: &str, default: T) -> T {
    parse_or(key, std::env::var(key).ok(), default)
}

fn parse_or<T: FromStr + Copy>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        Some(value) => value.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %value, "Ignoring unparseable setting, using default");
            default
        }),
        None => default,
    }
}
