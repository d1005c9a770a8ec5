//! Cart error taxonomy.
//!
//! None of these errors ever reaches a caller of the cart store. Each one is
//! logged where it happens and the store degrades to the safest observable
//! state: an empty cart when a snapshot cannot be read, the in-memory cart
//! when a snapshot cannot be written.

use thiserror::Error;

use crate::storage::StorageError;

/// Failures inside the cart's persistence and sync paths.
#[derive(Debug, Error)]
pub enum CartError {
    /// The durable snapshot could not be read or decoded during hydration.
    #[error("hydration decode failed for key {key}: {source}")]
    HydrationDecode {
        key: String,
        #[source]
        source: DecodeError,
    },

    /// The durable snapshot could not be written.
    #[error("persistence write failed for key {key}: {source}")]
    PersistenceWrite {
        key: String,
        #[source]
        source: StorageError,
    },

    /// A snapshot received from another context could not be decoded.
    #[error("broadcast decode failed for key {key}: {source}")]
    BroadcastDecode {
        key: String,
        #[source]
        source: DecodeError,
    },

    /// The in-memory cart could not be serialized.
    #[error("snapshot encode failed: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Why a stored snapshot could not be turned into cart lines.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The text is not a valid JSON array of cart lines.
    #[error("malformed snapshot: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The storage backend failed while reading.
    #[error("storage read failed: {0}")]
    Storage(#[from] StorageError),
}

impl CartError {
    /// Short stable name for structured logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::HydrationDecode { .. } => "hydration_decode",
            Self::PersistenceWrite { .. } => "persistence_write",
            Self::BroadcastDecode { .. } => "broadcast_decode",
            Self::Encode(_) => "encode",
        }
    }
}
