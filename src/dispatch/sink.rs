//! Outbound trigger delivery.
//!
//! [`TriggerSink`] is the seam between the dispatcher and the network.
//! [`HttpTrigger`] is the production sink: one `POST` with an empty JSON
//! object per trigger.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::time::Instant;

/// Longest response body kept in an error.
const MAX_ERROR_BODY: usize = 200;

/// Errors from a single delivery attempt.
#[derive(thiserror::Error, Debug)]
pub enum DeliveryError {
    /// The endpoint answered with a non-2xx status.
    #[error("endpoint returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Start of the response body
        body: String,
    },

    /// Connection, TLS or timeout failure.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Something that can fire one reindex trigger.
pub trait TriggerSink: Send + Sync + 'static {
    /// Fire once. `Ok` carries the status code of a successful response.
    fn fire(&self) -> impl Future<Output = Result<u16, DeliveryError>> + Send;
}

impl<T: TriggerSink> TriggerSink for Arc<T> {
    fn fire(&self) -> impl Future<Output = Result<u16, DeliveryError>> + Send {
        (**self).fire()
    }
}

/// HTTP sink posting `{}` to the configured endpoint.
#[derive(Debug, Clone)]
pub struct HttpTrigger {
    client: Client,
    endpoint: String,
}

impl HttpTrigger {
    /// Build a client with the request `timeout`.
    ///
    /// `insecure` disables TLS certificate verification.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Transport`] if the TLS backend cannot be
    /// initialised.
    pub fn new(endpoint: impl Into<String>, timeout: Duration, insecure: bool) -> Result<Self, DeliveryError> {
        if insecure {
            log::warn!("TLS certificate verification is disabled for trigger delivery");
        }
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(insecure)
            .user_agent(concat!("docwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// The URL triggers are posted to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Poll `url` until it answers 2xx or `timeout` elapses.
    ///
    /// Waits 1s between tries, doubling up to 5s. Returns whether the
    /// service came up.
    pub async fn wait_for_health(&self, url: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut delay = Duration::from_secs(1);

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let probe = self
                .client
                .get(url)
                .timeout(remaining.clamp(Duration::from_millis(100), Duration::from_secs(5)))
                .send()
                .await;
            match probe {
                Ok(response) if response.status().is_success() => {
                    log::info!("Downstream service is healthy url={}", url);
                    return true;
                }
                Ok(response) => {
                    log::debug!("Health check not ready url={} status={}", url, response.status());
                }
                Err(e) => log::debug!("Health check failed url={}: {}", url, e),
            }

            let now = Instant::now();
            if now + delay > deadline {
                log::warn!(
                    "Downstream service not healthy after {:?}, starting anyway url={}",
                    timeout,
                    url
                );
                return false;
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(Duration::from_secs(5));
        }
    }
}

impl TriggerSink for HttpTrigger {
    async fn fire(&self) -> Result<u16, DeliveryError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({}))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(status.as_u16());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Err(DeliveryError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
