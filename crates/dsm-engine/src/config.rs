//! Process configuration, read from `DSM_*` environment variables.

use dsm_common::{Result, ServiceError};
use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_DOCKER_HOST: &str = "DSM_DOCKER_HOST";
pub const ENV_BLACKLIST: &str = "DSM_BLACKLIST";
pub const ENV_UPDATE_CHECK_INTERVAL: &str = "DSM_UPDATE_CHECK_INTERVAL_SECS";
pub const ENV_HEALTH_CHECK_INTERVAL: &str = "DSM_HEALTH_CHECK_INTERVAL_SECS";
pub const ENV_LOG_STREAM_BUFFER: &str = "DSM_LOG_STREAM_BUFFER";
pub const ENV_LOG_READ_TIMEOUT: &str = "DSM_LOG_READ_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Daemon endpoint override; `None` uses the local defaults.
    pub docker_host: Option<String>,
    /// Container ids, names and image references protected from stop, restart and update.
    pub blacklist: BTreeSet<String>,
    pub update_check_interval: Duration,
    pub health_check_interval: Duration,
    pub log_stream_buffer: usize,
    /// Deadline of a historical log read.
    pub log_read_timeout: Option<Duration>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            docker_host: None,
            blacklist: BTreeSet::new(),
            update_check_interval: Duration::from_secs(300),
            health_check_interval: Duration::from_secs(30),
            log_stream_buffer: 256,
            log_read_timeout: None,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let docker_host = lookup(ENV_DOCKER_HOST)
            .map(|host| host.trim().to_string())
            .filter(|host| !host.is_empty());

        let blacklist = lookup(ENV_BLACKLIST)
            .map(|raw| parse_blacklist(&raw))
            .unwrap_or_default();

        let update_check_interval = parse_period(&lookup, ENV_UPDATE_CHECK_INTERVAL)?
            .unwrap_or(defaults.update_check_interval);
        let health_check_interval = parse_period(&lookup, ENV_HEALTH_CHECK_INTERVAL)?
            .unwrap_or(defaults.health_check_interval);

        let log_stream_buffer = match parse_number::<usize>(&lookup, ENV_LOG_STREAM_BUFFER)? {
            Some(0) => {
                return Err(ServiceError::Config(format!(
                    "{ENV_LOG_STREAM_BUFFER} must be greater than zero"
                )))
            }
            Some(size) => size,
            None => defaults.log_stream_buffer,
        };

        let log_read_timeout = match parse_number::<u64>(&lookup, ENV_LOG_READ_TIMEOUT)? {
            Some(0) | None => None,
            Some(secs) => Some(Duration::from_secs(secs)),
        };

        Ok(Self {
            docker_host,
            blacklist,
            update_check_interval,
            health_check_interval,
            log_stream_buffer,
            log_read_timeout,
        })
    }
}

/// Splits a comma-separated list, trimming entries and dropping empty ones.
pub fn parse_blacklist(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

/// Monitor periods must be non-zero.
fn parse_period(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<Duration>> {
    match parse_number::<u64>(lookup, key)? {
        Some(0) => Err(ServiceError::Config(format!("{key} must be greater than zero"))),
        secs => Ok(secs.map(Duration::from_secs)),
    }
}

fn parse_number<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ServiceError::Config(format!("{key}={raw}: {e}"))),
    }
}
