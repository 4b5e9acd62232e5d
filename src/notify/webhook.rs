//! Webhook notifier
//!
//! POSTs every membership event as JSON to a configured endpoint.
//!
//! # Payload Format
//!
//! ```json
//! {
//!   "event": "discovered",
//!   "node": {
//!     "id": "pi-kitchen._pifleet._tcp.local.",
//!     "name": "pi-kitchen",
//!     "ip": "192.168.1.50",
//!     "port": 9091,
//!     "service_type": "_pifleet._tcp",
//!     "metadata": { "arch": "arm64", "model": "Raspberry Pi 4 Model B" },
//!     "capabilities": ["gpio"],
//!     "last_seen": "2024-01-01T12:00:00Z"
//!   },
//!   "emitted_at": "2024-01-01T12:00:00Z"
//! }
//! ```

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::{EventPayload, NotifyError, NotifyResult};
use crate::config::NotifyConfig;
use crate::discovery::{MembershipEvent, MembershipObserver, ObserverError};
use crate::utils::retry::{with_retry_if, RetryConfig};

/// Webhook membership observer
pub struct WebhookNotifier {
    url: String,
    auth_token: Option<String>,
    retry: RetryConfig,
    client: Client,
}

impl WebhookNotifier {
    /// Create a notifier posting to `url`
    pub fn new(url: impl Into<String>, timeout: Duration) -> NotifyResult<Self> {
        let url = url.into();
        validate_url(&url)?;
        if timeout.is_zero() {
            return Err(NotifyError::InvalidConfig(
                "Timeout must be greater than 0".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::InvalidConfig(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            url,
            auth_token: None,
            retry: RetryConfig::default(),
            client,
        })
    }

    /// Build from configuration; `None` when no webhook is configured
    pub fn from_config(config: &NotifyConfig) -> NotifyResult<Option<Self>> {
        let Some(url) = config.webhook_url.as_deref().filter(|u| !u.trim().is_empty()) else {
            return Ok(None);
        };

        let mut notifier = Self::new(url.trim(), config.notify_timeout())?
            .with_retry(RetryConfig::new(config.max_retries));
        if let Some(token) = &config.auth_token {
            notifier = notifier.with_auth_token(token);
        }
        Ok(Some(notifier))
    }

    /// Send a bearer token with each request
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Override the retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Deliver one event, retrying transient failures
    pub async fn deliver(&self, event: &MembershipEvent) -> NotifyResult<()> {
        let payload = EventPayload::from(event);
        with_retry_if(&self.retry, || self.post(&payload), NotifyError::is_retryable).await
    }

    async fn post(&self, payload: &EventPayload) -> NotifyResult<()> {
        let mut request = self.client.post(&self.url);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.json(payload).send().await?;
        let status = response.status();
        if status.is_success() {
            tracing::debug!(url = %self.url, status = %status, "Webhook delivered");
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response body".to_string());
        Err(NotifyError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

fn validate_url(url: &str) -> NotifyResult<()> {
    if url.is_empty() {
        return Err(NotifyError::InvalidConfig("Webhook URL cannot be empty".to_string()));
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(NotifyError::InvalidConfig(
            "Webhook URL must start with http:// or https://".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl MembershipObserver for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn on_event(&self, event: &MembershipEvent) -> Result<(), ObserverError> {
        self.deliver(event).await.map_err(|e| {
            tracing::warn!(url = %self.url, event = %event, error = %e, "Webhook delivery failed");
            e.into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::ObservedNode;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn event() -> MembershipEvent {
        MembershipEvent::discovered(ObservedNode::new(
            "n1",
            "n1",
            "192.168.1.50".parse().unwrap(),
            9091,
        ))
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig::with_delays(max_retries, 1, 5)
    }

    #[test]
    fn test_url_validation() {
        assert!(WebhookNotifier::new("https://example.com/hook", Duration::from_secs(5)).is_ok());
        assert!(WebhookNotifier::new("", Duration::from_secs(5)).is_err());
        assert!(WebhookNotifier::new("example.com/hook", Duration::from_secs(5)).is_err());
        assert!(WebhookNotifier::new("https://example.com", Duration::ZERO).is_err());
    }

    #[test]
    fn test_from_config_disabled_without_url() {
        let config = NotifyConfig::default();
        assert!(WebhookNotifier::from_config(&config).unwrap().is_none());

        let config = NotifyConfig {
            webhook_url: Some("https://example.com/hook".to_string()),
            auth_token: Some("secret".to_string()),
            ..Default::default()
        };
        let notifier = WebhookNotifier::from_config(&config).unwrap().unwrap();
        assert_eq!(notifier.url(), "https://example.com/hook");
        assert_eq!(notifier.retry.max_retries, config.max_retries);
    }

    #[tokio::test]
    async fn test_delivers_json_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(format!("{}/hook", server.uri()), Duration::from_secs(5))
            .unwrap()
            .with_auth_token("secret");
        notifier.on_event(&event()).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["event"], "discovered");
        assert_eq!(body["node"]["ip"], "192.168.1.50");
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(server.uri(), Duration::from_secs(5))
            .unwrap()
            .with_retry(fast_retry(2));
        let err = notifier.deliver(&event()).await.unwrap_err();
        assert!(matches!(err, NotifyError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_no_retry_on_client_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad payload"))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(server.uri(), Duration::from_secs(5))
            .unwrap()
            .with_retry(fast_retry(3));
        let err = notifier.deliver(&event()).await.unwrap_err();
        assert!(err.to_string().contains("bad payload"));
    }
}
