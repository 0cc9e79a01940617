//! Errors reported by the registry and its configuration.
//!
//! The collections themselves never fail: a full queue, a missing key or an empty queue
//! are reported through their return values.

use crate::registry::CollectionKind;
use thiserror::Error;

/// Errors that can occur when creating or addressing a named collection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no collection named {0:?}")]
    NotFound(String),

    #[error("a collection named {0:?} already exists")]
    AlreadyExists(String),

    #[error("{name:?} holds a collection of kind {found}, expected {expected}")]
    KindMismatch {
        name: String,
        expected: CollectionKind,
        found: CollectionKind
    },

    #[error("queue capacity must be positive")]
    InvalidCapacity,

    #[error("replica id must not be empty")]
    InvalidReplicaId
}

/// Errors that can occur when loading a [`RegistryConfig`](crate::RegistryConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("max_retired must be positive")]
    ZeroMaxRetired,

    #[error("default_queue_capacity must be positive")]
    ZeroQueueCapacity,

    #[error("initial_map_capacity {0} exceeds the largest initial capacity")]
    MapCapacityTooLarge(usize)
}
