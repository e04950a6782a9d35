// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for zlifecycle-reconcile.

use thiserror::Error;

use crate::object_store::StorageError;

/// Reconciliation engine errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Object storage operation failed.
    #[error("Object storage error: {0}")]
    Storage(#[from] StorageError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A run, parent run, audit entry or notification does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record that was looked up.
        entity: &'static str,
        /// Identifier used for the lookup.
        id: String,
    },

    /// Request is malformed and must not be retried.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Write collides with current state, e.g. reopening a superseded run
    /// while a newer run for the same name is open.
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<sqlx::Error> for Error {
    fn from(value: sqlx::Error) -> Self {
        match &value {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Conflict(db.message().to_string())
            }
            _ => Self::Database(value),
        }
    }
}

impl Error {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether the failure came from the database or object storage transport.
    ///
    /// Upstream failures are never retried here; retry policy belongs to the caller.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Storage(_) | Self::Migrate(_))
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Database(_) | Self::Migrate(_) | Self::Storage(_) => "UPSTREAM_FAILURE",
            Self::Json(_) => "JSON_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::Conflict(_) => "CONFLICT",
        }
    }
}

/// Result type using the engine Error.
pub type Result<T> = std::result::Result<T, Error>;
