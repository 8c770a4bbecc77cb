//! Environment-driven configuration.
//!
//! Every value has a default; `.env` files are honoured through `dotenvy`
//! in the binary before [`Config::from_env`] runs.

use anyhow::{Context, Result};
use chrono_tz::Tz;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::fusion::FusionConfig;
use crate::precache::PrecacheConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub timezone: Tz,
    pub agencies: Vec<String>,
    pub data_dir: PathBuf,
    pub partners_path: Option<PathBuf>,
    pub fusion: FusionConfig,
    pub precache: PrecacheConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup, so tests need not
    /// touch the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let timezone_name =
            lookup("NEARBY_TIMEZONE").unwrap_or_else(|| "America/New_York".to_string());
        let timezone = Tz::from_str(&timezone_name)
            .map_err(|e| anyhow::anyhow!("NEARBY_TIMEZONE: {e}"))?;

        let agencies = lookup("NEARBY_AGENCIES")
            .unwrap_or_else(|| "MTA NYCT".to_string())
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect();

        let data_dir = PathBuf::from(lookup("NEARBY_DATA_DIR").unwrap_or_else(|| "data".into()));
        let partners_path = lookup("NEARBY_PARTNERS").map(PathBuf::from);

        let fusion = FusionConfig {
            workers: parse_or(&lookup, "NEARBY_FUSION_WORKERS", 10)?,
            queue_capacity: parse_or(&lookup, "NEARBY_FUSION_QUEUE", 10_000)?,
            call_timeout: secs_or(&lookup, "NEARBY_PARTNER_TIMEOUT_SECS", 20)?,
            request_timeout: secs_or(&lookup, "NEARBY_REQUEST_TIMEOUT_SECS", 30)?,
        };

        let precache = PrecacheConfig {
            workers_per_agency: parse_or(&lookup, "NEARBY_PRECACHE_WORKERS", 20)?,
            queue_capacity: parse_or(&lookup, "NEARBY_PRECACHE_QUEUE", 50_000)?,
            delay: secs_or(&lookup, "NEARBY_PRECACHE_DELAY_SECS", 60)?,
            err_delay: secs_or(&lookup, "NEARBY_PRECACHE_ERR_DELAY_SECS", 10)?,
            cache_ttl: secs_or(&lookup, "NEARBY_CACHE_TTL_SECS", 90)?,
            call_timeout: secs_or(&lookup, "NEARBY_PARTNER_TIMEOUT_SECS", 20)?,
        };

        Ok(Self {
            timezone,
            agencies,
            data_dir,
            partners_path,
            fusion,
            precache,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has invalid value '{raw}'")),
        None => Ok(default),
    }
}

fn secs_or<F>(lookup: &F, key: &str, default: u64) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(lookup, key, default).map(Duration::from_secs)
}
