//! Replay transport
//!
//! [`IRequestTransport`] delivers one queued request and reports the HTTP
//! status. Whether a status counts as success is the queue's decision.

use std::time::Duration;

use reqwest::{Client, Method};
use tracing::debug;

use tidepool_core::domain::QueuedRequest;

use crate::QueueError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Delivers queued requests
#[async_trait::async_trait]
pub trait IRequestTransport: Send + Sync {
    /// Sends the request and returns the response status code
    ///
    /// # Errors
    /// Returns [`QueueError::Transport`] if no response was received.
    async fn send(&self, request: &QueuedRequest) -> Result<u16, QueueError>;
}

/// reqwest-backed transport
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            timeout,
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

#[async_trait::async_trait]
impl IRequestTransport for HttpTransport {
    async fn send(&self, request: &QueuedRequest) -> Result<u16, QueueError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| QueueError::InvalidRequest(format!("method {}", request.method)))?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(self.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                QueueError::Transport(format!("request timed out: {e}"))
            } else {
                QueueError::Transport(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        debug!(id = %request.id, method = %request.method, status, "Replayed request");
        Ok(status)
    }
}
