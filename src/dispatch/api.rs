// SPDX-License-Identifier: MIT
//! Conversion API client.
//!
//! One event per call, fire-and-forget from the product's perspective — the
//! dispatcher decides what a failure means. The HTTP implementation maps
//! status codes onto the retry taxonomy: 401/403 are authorization (token
//! propagation), 400/422 are validation (do not retry), timeouts and
//! connection failures are connectivity.

use async_trait::async_trait;
use tracing::debug;

use super::payload::EventPayload;
use crate::error::PipelineError;

/// Delivery seam to the external ad-attribution API.
#[async_trait]
pub trait ConversionApi: Send + Sync {
    /// Deliver one event. `Ok(())` means the API confirmed acceptance.
    async fn send(&self, payload: &EventPayload) -> Result<(), PipelineError>;
}

// ─── HttpConversionApi ────────────────────────────────────────────────────────

pub struct HttpConversionApi {
    client: reqwest::Client,
    base_url: String,
    app_id: String,
    access_token: Option<String>,
}

impl HttpConversionApi {
    pub fn new(
        base_url: &str,
        app_id: &str,
        access_token: Option<&str>,
        timeout: std::time::Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            app_id: app_id.to_string(),
            access_token: access_token.map(str::to_string),
        })
    }
}

#[async_trait]
impl ConversionApi for HttpConversionApi {
    async fn send(&self, payload: &EventPayload) -> Result<(), PipelineError> {
        let url = format!("{}/{}/activities", self.base_url, self.app_id);
        let mut req = self.client.post(&url).json(payload);
        if let Some(token) = self.access_token.as_deref() {
            req = req.query(&[("access_token", token)]);
        }
        req.send().await?.error_for_status()?;
        debug!(event = payload.event, "conversion event accepted");
        Ok(())
    }
}
