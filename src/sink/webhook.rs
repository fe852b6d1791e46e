use std::time::Duration;

use reqwest::{header, Client};
use serde_json::{json, Map, Value};
use tokio::time::sleep;
use tracing::warn;

use crate::error::SinkError;
use crate::model::EventState;

const MAX_ATTEMPTS: u32 = 10;

/// Posts one JSON document per transaction event to the configured sink.
/// Delivery is fire-and-forget beyond the retry loop; the watermark is the
/// only durable acknowledgement.
pub struct WebhookSender {
    http: Client,
    url: String,
    retry_base: Duration,
}

impl WebhookSender {
    pub fn new(url: String) -> Result<Self, SinkError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        let http = Client::builder()
            .default_headers(headers)
            .user_agent("activity-sync-worker")
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            url,
            retry_base: Duration::from_secs(1),
        })
    }

    /// Shrinks the backoff base so tests do not sleep for real.
    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    /// Sends `{contact, transaction, state}`. Any 2xx counts as delivered;
    /// everything else retries with `2^i` second backoff.
    pub async fn send(
        &self,
        contact: &Map<String, Value>,
        transaction: &Value,
        state: EventState,
    ) -> Result<(), SinkError> {
        let payload = json!({
            "contact": contact,
            "transaction": transaction,
            "state": state.to_string(),
        });
        let mut last = String::new();
        for attempt in 0..MAX_ATTEMPTS {
            match self.http.post(&self.url).json(&payload).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => {
                    last = format!("HTTP {}", resp.status());
                    warn!(url = %self.url, attempt = attempt + 1, status = %resp.status(), "webhook delivery failed");
                }
                Err(e) => {
                    last = e.to_string();
                    warn!(url = %self.url, attempt = attempt + 1, error = %e, "webhook delivery failed");
                }
            }
            if attempt + 1 < MAX_ATTEMPTS {
                sleep(self.retry_base * 2u32.pow(attempt)).await;
            }
        }
        Err(SinkError::WebhookExhausted {
            url: self.url.clone(),
            attempts: MAX_ATTEMPTS,
            last,
        })
    }
}
