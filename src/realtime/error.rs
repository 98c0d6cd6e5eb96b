//! Error types for the realtime hub

use thiserror::Error;

use crate::error::{ErrorCategory, TrendcastErrorTrait};

/// Result type for realtime operations
pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// Realtime hub errors
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// The hub already serves the configured maximum number of subscribers
    #[error("Realtime capacity reached: {current}/{max} subscribers")]
    CapacityExceeded { current: usize, max: usize },

    /// The hub was stopped and no longer registers subscribers
    #[error("Realtime hub is shut down")]
    Closed,

    /// The injected snapshot loader failed
    #[error("Snapshot loader failed: {0:#}")]
    Loader(#[source] anyhow::Error),

    /// The snapshot envelope could not be serialized
    #[error("Failed to serialize snapshot: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TrendcastErrorTrait for RealtimeError {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::CapacityExceeded { .. } => true,
            Self::Closed => false,
            Self::Loader(_) => true,
            Self::Serialization(_) => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::CapacityExceeded { .. } => ErrorCategory::Capacity,
            Self::Closed => ErrorCategory::Unavailable,
            Self::Loader(_) => ErrorCategory::Loader,
            Self::Serialization(_) => ErrorCategory::Serialization,
        }
    }
}

impl RealtimeError {
    /// Whether this is the "temporarily saturated" condition
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }
}
