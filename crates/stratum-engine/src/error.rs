// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for stratum-engine.

use stratum_core::CoreError;
use thiserror::Error;

use crate::provider::ProviderError;

/// Engine errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Resource registry, topology or allocation rule violated.
    #[error("{0}")]
    Core(CoreError),

    /// Resource graph could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(CoreError),

    /// Store operation failed.
    #[error("Persistence error: {0}")]
    Persistence(CoreError),

    /// Back-end provider failed. Passed through untranslated.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Instance was not found.
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    /// Instance id collision.
    #[error("Instance already exists: {0}")]
    InstanceAlreadyExists(String),

    /// Instance is protected against deletion.
    #[error("Instance {0} is protected")]
    ProtectedInstance(String),

    /// Instance state could not be persisted or restored.
    #[error("Instance {0} is corrupted")]
    CorruptedInstance(String),

    /// No blueprint is registered under this type.
    #[error("Unknown blueprint type: {0}")]
    UnknownBlueprintType(String),

    /// No provider factory is registered for this back-end kind.
    #[error("Unknown provider type: {0}")]
    UnknownProviderType(String),

    /// The child is already registered on the parent.
    #[error("Instance {child} is already a child of {parent}")]
    AlreadyChild {
        /// Parent instance id.
        parent: String,
        /// Child instance id.
        child: String,
    },

    /// The child is not registered on the parent.
    #[error("Instance {child} is not a child of {parent}")]
    ChildNotFound {
        /// Parent instance id.
        parent: String,
        /// Child instance id.
        child: String,
    },

    /// The operation cannot start from the current status.
    #[error("Cannot {operation} instance {instance_id} while {status}")]
    InvalidTransition {
        /// Instance id.
        instance_id: String,
        /// Requested operation.
        operation: &'static str,
        /// Current status.
        status: String,
    },

    /// The blueprint does not implement this operation.
    #[error("Blueprint {blueprint} has no operation '{operation}'")]
    UnknownOperation {
        /// Blueprint type.
        blueprint: String,
        /// Requested operation.
        operation: String,
    },

    /// Blueprint logic failed.
    #[error("Operation failed: {0}")]
    Operation(String),

    /// The task executor no longer accepts tasks.
    #[error("Task executor is shut down")]
    ExecutorClosed,
}

impl From<CoreError> for Error {
    fn from(err: CoreError) -> Self {
        if err.is_codec_error() {
            Error::Codec(err)
        } else if matches!(err, CoreError::DatabaseError { .. }) {
            Error::Persistence(err)
        } else {
            Error::Core(err)
        }
    }
}

impl Error {
    /// Wrap a blueprint failure message.
    pub fn operation(message: impl Into<String>) -> Self {
        Error::Operation(message.into())
    }
}

/// Result type using engine Error.
pub type Result<T> = std::result::Result<T, Error>;
