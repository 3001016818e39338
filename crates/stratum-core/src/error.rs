// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for stratum-core.
//!
//! One error type covers resource registry violations, codec failures,
//! address allocation and persistence. Every variant carries a stable
//! machine-readable code so callers can branch without matching on text.

use std::fmt;
use std::net::Ipv4Addr;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors raised by the resource graph, codec, allocator, topology and
/// persistence layers.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum CoreError {
    /// A resource with the same id is already registered.
    DuplicateResource {
        /// The duplicated resource id.
        id: String,
    },

    /// The resource is not present in the registry.
    ResourceNotRegistered {
        /// The missing resource id.
        id: String,
    },

    /// The resource carries no id.
    MissingResourceId {
        /// Discriminator of the offending resource.
        resource_type: String,
    },

    /// A deployable resource is still targeted by a configuration resource.
    ResourceInUse {
        /// The deployable resource id.
        id: String,
        /// The configuration holding the reference.
        configuration_id: String,
    },

    /// The area does not resolve to any known site.
    UnknownArea {
        /// The requested area.
        area: u32,
    },

    /// The discriminator is not present in the resource type registry.
    UnknownResourceType {
        /// The unknown discriminator.
        resource_type: String,
    },

    /// A resource found while encoding is missing from the registry.
    UnregisteredResource {
        /// Id of the resource found in the graph.
        id: String,
        /// Document path where it was found.
        path: String,
    },

    /// A `REF=<id>` token points at nothing.
    UnresolvedReference {
        /// The referenced id.
        id: String,
        /// Document path of the token.
        path: String,
    },

    /// A document could not be produced or read.
    Serialization {
        /// Error details.
        details: String,
    },

    /// An address range is malformed or outside its prefix.
    InvalidRange {
        /// Range start.
        start: Ipv4Addr,
        /// Range end.
        end: Ipv4Addr,
        /// Why the range was rejected.
        reason: String,
    },

    /// No free range of the requested length exists.
    RangeExhausted {
        /// The prefix that was searched.
        prefix: String,
        /// Requested number of addresses.
        requested: u32,
    },

    /// A topology entry with the same name already exists.
    TopologyConflict {
        /// Entry kind (vim, network, router, pdu, kubernetes).
        kind: &'static str,
        /// Entry name.
        name: String,
    },

    /// A topology entry was not found.
    TopologyEntryNotFound {
        /// Entry kind (vim, network, router, pdu, kubernetes).
        kind: &'static str,
        /// Entry name.
        name: String,
    },

    /// Database operation failed.
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DuplicateResource { .. } => "DUPLICATE_RESOURCE",
            Self::ResourceNotRegistered { .. } => "RESOURCE_NOT_REGISTERED",
            Self::MissingResourceId { .. } => "MISSING_RESOURCE_ID",
            Self::ResourceInUse { .. } => "RESOURCE_IN_USE",
            Self::UnknownArea { .. } => "UNKNOWN_AREA",
            Self::UnknownResourceType { .. } => "UNKNOWN_RESOURCE_TYPE",
            Self::UnregisteredResource { .. } => "UNREGISTERED_RESOURCE",
            Self::UnresolvedReference { .. } => "UNRESOLVED_REFERENCE",
            Self::Serialization { .. } => "SERIALIZATION_ERROR",
            Self::InvalidRange { .. } => "INVALID_RANGE",
            Self::RangeExhausted { .. } => "RANGE_EXHAUSTED",
            Self::TopologyConflict { .. } => "TOPOLOGY_CONFLICT",
            Self::TopologyEntryNotFound { .. } => "TOPOLOGY_ENTRY_NOT_FOUND",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
        }
    }

    /// Whether this error comes from the reference codec.
    ///
    /// Codec errors are contained at the persistence boundary instead of
    /// being raised to the caller.
    pub fn is_codec_error(&self) -> bool {
        matches!(
            self,
            Self::UnregisteredResource { .. }
                | Self::UnresolvedReference { .. }
                | Self::MissingResourceId { .. }
                | Self::UnknownResourceType { .. }
                | Self::Serialization { .. }
        )
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateResource { id } => {
                write!(f, "Resource '{}' is already registered", id)
            }
            Self::ResourceNotRegistered { id } => {
                write!(f, "Resource '{}' is not registered", id)
            }
            Self::MissingResourceId { resource_type } => {
                write!(f, "Resource of type '{}' has no id", resource_type)
            }
            Self::ResourceInUse {
                id,
                configuration_id,
            } => write!(
                f,
                "Resource '{}' is still referenced by configuration '{}'",
                id, configuration_id
            ),
            Self::UnknownArea { area } => {
                write!(f, "Area {} does not resolve to a known site", area)
            }
            Self::UnknownResourceType { resource_type } => {
                write!(f, "Unknown resource type '{}'", resource_type)
            }
            Self::UnregisteredResource { id, path } => write!(
                f,
                "Resource '{}' at '{}' is not present in the registry",
                id, path
            ),
            Self::UnresolvedReference { id, path } => {
                write!(f, "Reference to '{}' at '{}' cannot be resolved", id, path)
            }
            Self::Serialization { details } => write!(f, "Serialization error: {}", details),
            Self::InvalidRange { start, end, reason } => {
                write!(f, "Invalid range {}-{}: {}", start, end, reason)
            }
            Self::RangeExhausted { prefix, requested } => write!(
                f,
                "No free range of {} addresses left in {}",
                requested, prefix
            ),
            Self::TopologyConflict { kind, name } => {
                write!(f, "Topology {} '{}' already exists", kind, name)
            }
            Self::TopologyEntryNotFound { kind, name } => {
                write!(f, "Topology {} '{}' not found", kind, name)
            }
            Self::DatabaseError { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization {
            details: err.to_string(),
        }
    }
}
