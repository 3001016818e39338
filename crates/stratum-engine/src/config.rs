// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for stratum-engine.

use stratum_core::DEFAULT_RESERVED_HEAD;

/// Default number of task executor workers.
pub const DEFAULT_WORKERS: usize = 4;

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// SQLite URL or file path. In-memory store when unset.
    pub database_url: Option<String>,
    /// Task executor pool size.
    pub workers: usize,
    /// Addresses skipped after the network address of every prefix.
    pub reserved_head: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            workers: DEFAULT_WORKERS,
            reserved_head: DEFAULT_RESERVED_HEAD,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("STRATUM_DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        let workers: usize = parse_var("STRATUM_WORKERS", DEFAULT_WORKERS)?;
        if workers == 0 {
            return Err(ConfigError::InvalidValue {
                var: "STRATUM_WORKERS",
                value: "0".to_string(),
            });
        }

        let reserved_head = parse_var("STRATUM_RESERVED_HEAD", DEFAULT_RESERVED_HEAD)?;

        Ok(Self {
            database_url,
            workers,
            reserved_head,
        })
    }
}

fn parse_var<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable holds an unusable value.
    #[error("Invalid value '{value}' for {var}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },
}
