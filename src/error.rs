//! Unified error handling for the pifleet crate
//!
//! Every module keeps its own error enum; [`Error`] wraps them so callers
//! crossing module boundaries (the CLI, mostly) can use a single type.
//!
//! - [`FleetErrorTrait`] - Common interface implemented by the error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use pifleet::error::{Error, FleetErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(category = ?err.category(), "Retrying: {err}");
//!     } else {
//!         eprintln!("Fatal error: {err}");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::announce::AnnounceError;
pub use crate::config::ConfigError;
pub use crate::discovery::{BackendError, DiscoveryError};
pub use crate::notify::NotifyError;
pub use crate::reconcile::ReconcileError;
pub use crate::storage::StorageError;

/// Common trait for pifleet error types
pub trait FleetErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Sockets, multicast, HTTP
    Network,
    /// Node registry and file I/O
    Storage,
    /// Configuration and validation errors
    Config,
    /// Discovery service lifecycle
    Discovery,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Discovery => "discovery",
            Self::Other => "other",
        }
    }
}

impl FleetErrorTrait for BackendError {
    fn is_recoverable(&self) -> bool {
        !self.is_config() && !matches!(self, Self::NoInterface(_))
    }

    fn category(&self) -> ErrorCategory {
        if self.is_config() {
            ErrorCategory::Config
        } else {
            ErrorCategory::Network
        }
    }
}

impl FleetErrorTrait for StorageError {
    fn is_recoverable(&self) -> bool {
        self.is_transient()
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Storage
    }
}

/// Unified error type for the pifleet crate
#[derive(Error, Debug)]
pub enum Error {
    /// Discovery service lifecycle errors
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Discovery backend errors
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Node registry errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Reconciliation errors
    #[error("Reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// Announcement beacon errors
    #[error("Announce error: {0}")]
    Announce(#[from] AnnounceError),

    /// Notifier errors
    #[error("Notify error: {0}")]
    Notify(#[from] NotifyError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl FleetErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Discovery(DiscoveryError::Backend(e)) | Self::Backend(e) => e.is_recoverable(),
            Self::Discovery(_) => false,
            Self::Storage(e) => e.is_recoverable(),
            Self::Reconcile(e) => e.is_transient(),
            Self::Announce(_) => true,
            Self::Notify(e) => e.is_retryable(),
            Self::Config(_) => false,
            Self::Io(_) => true, // I/O errors are often transient
            Self::Json(_) => false,
            Self::Http(_) => true,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Discovery(DiscoveryError::Backend(e)) | Self::Backend(e) => e.category(),
            Self::Discovery(DiscoveryError::Config(_)) | Self::Config(_) => ErrorCategory::Config,
            Self::Discovery(_) => ErrorCategory::Discovery,
            Self::Storage(_) | Self::Reconcile(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Announce(_) | Self::Notify(_) | Self::Http(_) => ErrorCategory::Network,
            Self::Json(_) | Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config(ConfigError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        })
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

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(StorageError::Database(err))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
