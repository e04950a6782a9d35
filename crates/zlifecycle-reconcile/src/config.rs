// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for zlifecycle-reconcile.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database URL (PostgreSQL, or `sqlite:` for embedded use)
    pub database_url: String,
    /// Deployment environment tag embedded in bucket names
    pub deployment_env: String,
    /// Leading segment of every bucket name
    pub bucket_prefix: String,
    /// HTTP API address
    pub http_addr: SocketAddr,
    /// Period of the "nothing changed" heartbeat on every stream
    pub heartbeat_interval: Duration,
    /// Buffered events per broadcast class before slow subscribers lag
    pub channel_capacity: usize,
    /// Root directory of the filesystem object store
    pub object_store_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("ZLIFECYCLE_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .map_err(|_| ConfigError::MissingEnvVar("ZLIFECYCLE_DATABASE_URL or DATABASE_URL"))?;

        let deployment_env =
            std::env::var("ZL_ENVIRONMENT").unwrap_or_else(|_| "multitenant".to_string());

        let bucket_prefix =
            std::env::var("ZLIFECYCLE_BUCKET_PREFIX").unwrap_or_else(|_| "zlifecycle".to_string());

        let port: u16 = std::env::var("ZLIFECYCLE_HTTP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let http_addr = SocketAddr::from(([0, 0, 0, 0], port));

        let heartbeat_secs: u64 = std::env::var("ZLIFECYCLE_HEARTBEAT_INTERVAL_SECS")
            .unwrap_or_else(|_| "20".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidNumber("ZLIFECYCLE_HEARTBEAT_INTERVAL_SECS"))?;
        if heartbeat_secs == 0 {
            return Err(ConfigError::InvalidNumber(
                "ZLIFECYCLE_HEARTBEAT_INTERVAL_SECS",
            ));
        }

        let channel_capacity: usize = std::env::var("ZLIFECYCLE_CHANNEL_CAPACITY")
            .unwrap_or_else(|_| "256".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidNumber("ZLIFECYCLE_CHANNEL_CAPACITY"))?;
        if channel_capacity == 0 {
            return Err(ConfigError::InvalidNumber("ZLIFECYCLE_CHANNEL_CAPACITY"));
        }

        let object_store_dir = PathBuf::from(
            std::env::var("ZLIFECYCLE_OBJECT_STORE_DIR")
                .unwrap_or_else(|_| ".data/objects".to_string()),
        );

        Ok(Self {
            database_url,
            deployment_env,
            bucket_prefix,
            http_addr,
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
            channel_capacity,
            object_store_dir,
        })
    }

    /// Bucket name prefix shared by the plan and state buckets,
    /// e.g. `zlifecycle-multitenant`.
    pub fn bucket_namespace(&self) -> String {
        format!("{}-{}", self.bucket_prefix, self.deployment_env)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// The port number is invalid.
    #[error("Invalid port number")]
    InvalidPort,
    /// A numeric setting is not a positive integer.
    #[error("Invalid value for {0}: expected a positive integer")]
    InvalidNumber(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_namespace() {
        let config = Config {
            database_url: "sqlite::memory:".to_string(),
            deployment_env: "multitenant".to_string(),
            bucket_prefix: "zlifecycle".to_string(),
            http_addr: "127.0.0.1:3000".parse().unwrap(),
            heartbeat_interval: Duration::from_secs(20),
            channel_capacity: 16,
            object_store_dir: PathBuf::from(".data/objects"),
        };

        assert_eq!(config.bucket_namespace(), "zlifecycle-multitenant");
    }
}
