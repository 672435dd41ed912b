// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

/// Default SQLite database location.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:.data/flowx.db?mode=rwc";

/// flowx configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL
    pub database_url: String,
    /// Work queue sizing
    pub queue: QueueConfig,
    /// Per-task retry policy
    pub retry: RetryPolicy,
}

/// Work queue sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Capacity of the bounded queue.
    pub size: usize,
    /// Number of long-lived workers draining the queue.
    pub workers: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            size: 50,
            workers: 5,
        }
    }
}

/// Bounded retry with a fixed backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per task before the task is reported as failed.
    pub max_attempts: u32,
    /// Pause after every failed attempt.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Policy with the given attempt count and backoff.
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `FLOWX_DATABASE_URL`: SQLite connection string (default: `sqlite:.data/flowx.db?mode=rwc`)
    /// - `FLOWX_QUEUE_SIZE`: Queue capacity (default: 50)
    /// - `FLOWX_QUEUE_WORKERS`: Worker count (default: 5)
    /// - `FLOWX_TASK_MAX_ATTEMPTS`: Attempts per task (default: 3)
    /// - `FLOWX_TASK_RETRY_BACKOFF_SECS`: Seconds between attempts (default: 60)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("FLOWX_DATABASE_URL")
            .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
        if database_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "FLOWX_DATABASE_URL",
                "cannot be empty",
            ));
        }

        let size = positive_var("FLOWX_QUEUE_SIZE", 50)?;
        let workers = positive_var("FLOWX_QUEUE_WORKERS", 5)?;
        let max_attempts = u32::try_from(positive_var("FLOWX_TASK_MAX_ATTEMPTS", 3)?)
            .map_err(|_| ConfigError::Invalid("FLOWX_TASK_MAX_ATTEMPTS", "is too large"))?;

        let backoff_secs: u64 = std::env::var("FLOWX_TASK_RETRY_BACKOFF_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(
                    "FLOWX_TASK_RETRY_BACKOFF_SECS",
                    "must be a non-negative integer",
                )
            })?;

        Ok(Self {
            database_url,
            queue: QueueConfig { size, workers },
            retry: RetryPolicy::new(max_attempts, Duration::from_secs(backoff_secs)),
        })
    }
}

fn positive_var(key: &'static str, default: usize) -> Result<usize, ConfigError> {
    let value: usize = match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid(key, "must be a positive integer"))?,
        Err(_) => default,
    };

    if value == 0 {
        return Err(ConfigError::Invalid(key, "must be a positive integer"));
    }
    Ok(value)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
