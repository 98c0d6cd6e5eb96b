//! Unified error handling for the trendcast crate
//!
//! Domain errors (realtime hub, configuration, server) are folded into a
//! single [`Error`] enum so they can cross module boundaries, while each
//! domain keeps its own precise error type.
//!
//! # Architecture
//!
//! - [`TrendcastErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use trendcast::error::{Error, ErrorCategory, TrendcastErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.category() == ErrorCategory::Capacity {
//!         // surface as "temporarily saturated"
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::config::ConfigError;
pub use crate::realtime::RealtimeError;
pub use crate::server::ServerError;

/// Common trait for all trendcast error types
pub trait TrendcastErrorTrait: std::error::Error {
    /// Check if this error is recoverable (a later attempt may succeed)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// A bounded resource is saturated (e.g. realtime subscribers)
    Capacity,
    /// The component is shutting down and accepts no new work
    Unavailable,
    /// A snapshot or cache loader failed
    Loader,
    /// Invalid caller input
    Validation,
    /// Serialization errors
    Serialization,
    /// Configuration errors
    Config,
    /// Storage and I/O errors
    Storage,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Short machine-readable label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Capacity => "capacity",
            Self::Unavailable => "unavailable",
            Self::Loader => "loader",
            Self::Validation => "validation",
            Self::Serialization => "serialization",
            Self::Config => "config",
            Self::Storage => "storage",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the trendcast crate
#[derive(Error, Debug)]
pub enum Error {
    /// Realtime hub errors (capacity, loader, serialization)
    #[error("Realtime error: {0}")]
    Realtime(#[from] RealtimeError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// HTTP server errors
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    /// Caller supplied invalid input
    #[error("Invalid input: {0}")]
    Validation(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl TrendcastErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Realtime(e) => e.is_recoverable(),
            Self::Config(_) => false,
            Self::Server(_) => false,
            Self::Validation(_) => false,
            Self::Io(_) => true, // I/O errors are often transient
            Self::Json(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Realtime(e) => e.category(),
            Self::Config(_) => ErrorCategory::Config,
            Self::Server(_) => ErrorCategory::Other,
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Io(_) => ErrorCategory::Storage,
            Self::Json(_) => ErrorCategory::Serialization,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

// Loader and store failures arrive as anyhow errors
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: format!("{err:#}"),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
