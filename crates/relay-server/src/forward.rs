//! Best-effort forwarding of raw webhook payloads to an automation endpoint.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use relay_settings::ForwardingSettings;
use relay_telemetry::metrics::FORWARD_ATTEMPTS_TOTAL;

pub struct Forwarder {
    client: reqwest::Client,
    url: String,
}

impl Forwarder {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// `None` when forwarding is not configured.
    pub fn from_settings(settings: &ForwardingSettings) -> Result<Option<Self>, reqwest::Error> {
        settings
            .webhook_url
            .as_ref()
            .map(|url| Self::new(url.clone(), Duration::from_millis(settings.timeout_ms)))
            .transpose()
    }

    /// Post `payload` as JSON in a background task. Failures are logged and
    /// never retried.
    pub fn forward(self: &Arc<Self>, payload: HashMap<String, String>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = match this.client.post(&this.url).json(&payload).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(status = resp.status().as_u16(), "forwarded webhook payload");
                    "ok"
                }
                Ok(resp) => {
                    warn!(status = resp.status().as_u16(), "automation endpoint rejected payload");
                    "rejected"
                }
                Err(e) => {
                    warn!(error = %e, "failed to forward webhook payload");
                    "error"
                }
            };
            counter!(FORWARD_ATTEMPTS_TOTAL, "outcome" => outcome).increment(1);
        })
    }
}
