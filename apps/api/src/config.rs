use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::FixedOffset;

use crate::best_time::{EstimatorParams, VolumeTiers};

/// Headroom kept between the host's maximum request duration and the budget a
/// dispatch or sync pass is allowed to spend. This is the one minimum gap the
/// deadline checks are built around.
pub const DEADLINE_SAFETY_MARGIN: Duration = Duration::from_secs(30);

/// Grouping parameters for a bounded-concurrency pass.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub group_size: usize,
    pub group_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub batch: BatchSettings,
    /// Upper bound on one outbound send; kept below the safety margin so a
    /// group started just before the deadline still ends inside the ceiling.
    pub send_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub batch: BatchSettings,
    pub page_size: u32,
    pub profile_timeout: Duration,
    pub messages_timeout: Duration,
    pub tiers: VolumeTiers,
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub tick_budget: Duration,
    pub max_campaigns_per_tick: i64,
    pub max_recipients_per_campaign: i64,
    pub group_size: usize,
    pub retry_ceiling: i32,
    pub default_hour: u8,
    pub generation_timeout: Duration,
    pub send_timeout: Duration,
    pub tick_interval: Option<Duration>,
}

/// Application configuration loaded from environment variables.
/// Startup fails if a required variable is missing or a tunable does not parse.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub anthropic_api_key: Option<String>,
    pub cron_secret: Option<String>,
    pub graph_api_version: String,
    pub port: u16,
    pub rust_log: String,
    /// Hard ceiling the hosting environment puts on one request.
    pub max_request_duration: Duration,
    pub dispatch: DispatchSettings,
    pub sync: SyncSettings,
    pub loop_settings: LoopSettings,
    pub best_time: EstimatorParams,
    pub contact_offset: FixedOffset,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let max_request_duration = Duration::from_secs(env_or("MAX_REQUEST_DURATION_SECS", 300)?);
        if max_request_duration <= DEADLINE_SAFETY_MARGIN {
            bail!(
                "MAX_REQUEST_DURATION_SECS must exceed the {}s safety margin",
                DEADLINE_SAFETY_MARGIN.as_secs()
            );
        }

        let send_timeout = Duration::from_millis(env_or("SEND_TIMEOUT_MS", 10_000)?);
        if send_timeout.is_zero() || send_timeout >= DEADLINE_SAFETY_MARGIN {
            bail!(
                "SEND_TIMEOUT_MS must be positive and below the {}s safety margin",
                DEADLINE_SAFETY_MARGIN.as_secs()
            );
        }

        let offset_hours: i32 = env_or("CONTACT_UTC_OFFSET_HOURS", 0)?;
        let contact_offset = FixedOffset::east_opt(offset_hours * 3600)
            .context("CONTACT_UTC_OFFSET_HOURS must be between -23 and 23")?;

        let default_hour: u8 = env_or("LOOP_DEFAULT_HOUR", 12)?;
        if default_hour > 23 {
            bail!("LOOP_DEFAULT_HOUR must be between 0 and 23");
        }

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            anthropic_api_key: optional_env("ANTHROPIC_API_KEY"),
            cron_secret: optional_env("CRON_SECRET"),
            graph_api_version: std::env::var("GRAPH_API_VERSION")
                .unwrap_or_else(|_| "v21.0".to_string()),
            port: env_or("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            max_request_duration,
            dispatch: DispatchSettings {
                batch: BatchSettings {
                    group_size: positive(
                        env_or("DISPATCH_GROUP_SIZE", 10)?,
                        "DISPATCH_GROUP_SIZE",
                    )?,
                    group_delay: Duration::from_millis(env_or("DISPATCH_GROUP_DELAY_MS", 1000)?),
                },
                send_timeout,
            },
            sync: SyncSettings {
                batch: BatchSettings {
                    group_size: positive(env_or("SYNC_GROUP_SIZE", 5)?, "SYNC_GROUP_SIZE")?,
                    group_delay: Duration::from_millis(env_or("SYNC_GROUP_DELAY_MS", 500)?),
                },
                page_size: env_or("SYNC_PAGE_SIZE", 50)?,
                profile_timeout: Duration::from_millis(env_or("PROFILE_TIMEOUT_MS", 3000)?),
                messages_timeout: Duration::from_millis(env_or("MESSAGES_TIMEOUT_MS", 5000)?),
                tiers: VolumeTiers {
                    high: env_or("SYNC_CONFIDENCE_HIGH_MIN", 10)?,
                    medium: env_or("SYNC_CONFIDENCE_MEDIUM_MIN", 5)?,
                    low: env_or("SYNC_CONFIDENCE_LOW_MIN", 2)?,
                },
            },
            loop_settings: LoopSettings {
                tick_budget: Duration::from_secs(env_or("LOOP_TICK_BUDGET_SECS", 8)?),
                max_campaigns_per_tick: env_or("LOOP_MAX_CAMPAIGNS_PER_TICK", 5)?,
                max_recipients_per_campaign: env_or("LOOP_MAX_RECIPIENTS_PER_CAMPAIGN", 10)?,
                group_size: positive(env_or("LOOP_GROUP_SIZE", 5)?, "LOOP_GROUP_SIZE")?,
                retry_ceiling: env_or("LOOP_RETRY_CEILING", 3)?,
                default_hour,
                generation_timeout: Duration::from_millis(env_or("GENERATION_TIMEOUT_MS", 4000)?),
                send_timeout,
                tick_interval: optional_env("LOOP_TICK_INTERVAL_SECS")
                    .map(|v| v.parse::<u64>())
                    .transpose()
                    .context("LOOP_TICK_INTERVAL_SECS must be a whole number of seconds")?
                    .map(Duration::from_secs),
            },
            best_time: EstimatorParams {
                neighbor_window: env_or("BEST_TIME_NEIGHBOR_WINDOW", 2)?,
                high_min: env_or("BEST_TIME_HIGH_MIN", 5)?,
                medium_min: env_or("BEST_TIME_MEDIUM_MIN", 2)?,
            },
            contact_offset,
        })
    }

    /// Wall-clock budget for one dispatch or sync invocation.
    pub fn operation_budget(&self) -> Duration {
        self.max_request_duration.saturating_sub(DEADLINE_SAFETY_MARGIN)
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{key} has an invalid value '{raw}': {e}")),
        Err(_) => Ok(default),
    }
}

fn positive(value: usize, key: &str) -> Result<usize> {
    if value == 0 {
        bail!("{key} must be at least 1");
    }
    Ok(value)
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        database_url: "postgres://localhost/pagereach_test".to_string(),
        anthropic_api_key: None,
        cron_secret: Some("test-secret".to_string()),
        graph_api_version: "v21.0".to_string(),
        port: 8080,
        rust_log: "info".to_string(),
        max_request_duration: Duration::from_secs(300),
        dispatch: DispatchSettings {
            batch: BatchSettings {
                group_size: 2,
                group_delay: Duration::from_millis(100),
            },
            send_timeout: Duration::from_secs(20),
        },
        sync: SyncSettings {
            batch: BatchSettings {
                group_size: 2,
                group_delay: Duration::from_millis(100),
            },
            page_size: 2,
            profile_timeout: Duration::from_millis(300),
            messages_timeout: Duration::from_millis(500),
            tiers: VolumeTiers::default(),
        },
        loop_settings: LoopSettings {
            tick_budget: Duration::from_secs(8),
            max_campaigns_per_tick: 5,
            max_recipients_per_campaign: 10,
            group_size: 5,
            retry_ceiling: 3,
            default_hour: 12,
            generation_timeout: Duration::from_millis(500),
            send_timeout: Duration::from_secs(20),
            tick_interval: None,
        },
        best_time: EstimatorParams::default(),
        contact_offset: FixedOffset::east_opt(0).expect("zero offset is valid"),
    }
}
