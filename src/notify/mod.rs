//! Live-status notification
//!
//! Notifiers are membership observers that forward events to something
//! outside the process. They run on their own observer queue, so a slow
//! endpoint only ever delays its own deliveries.

pub mod webhook;

pub use webhook::WebhookNotifier;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::discovery::{EventKind, MembershipEvent, ObservedNode};

/// Result type for notifier operations
pub type NotifyResult<T> = Result<T, NotifyError>;

/// Errors that can occur while delivering a notification
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// HTTP request failed before a response arrived
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Endpoint answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Invalid notifier configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl NotifyError {
    /// Client errors other than rate limiting are not worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Status { status, .. } => *status == 429 || !(400..500).contains(status),
            Self::InvalidConfig(_) => false,
        }
    }
}

/// JSON body delivered for each membership event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPayload {
    pub event: EventKind,
    pub node: ObservedNode,
    pub emitted_at: DateTime<Utc>,
}

impl From<&MembershipEvent> for EventPayload {
    fn from(event: &MembershipEvent) -> Self {
        Self {
            event: event.kind,
            node: event.node.clone(),
            emitted_at: Utc::now(),
        }
    }
}
