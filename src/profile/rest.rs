// SPDX-License-Identifier: MIT
//! REST implementation of [`ProfileStore`] against the managed document
//! backend.
//!
//! Documents are addressed as `GET/PATCH {base}/users/{userId}`. PATCH merges
//! the supplied fields into the document. Requests carry the bearer token
//! installed by the auth readiness gate; the backend rejects stale tokens
//! with 401/403, which classify as authorization errors and retry on the
//! longer schedule.
//!
//! `link_attribution` is check-then-act rather than transactional: the user
//! record has exactly one writer per field in this subsystem, so a lost-update
//! race would require the same user linking on two devices in the same
//! instant — out of scope by design.

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;

use super::{LinkOutcome, LinkedAttribution, ProfileStore, PromptHistoryEntry, UserRecord};
use crate::attribution::AttributionRecord;
use crate::consent::TrackingConsentStatus;
use crate::error::PipelineError;

pub struct RestProfileStore {
    client: reqwest::Client,
    base_url: String,
    bearer: RwLock<Option<String>>,
}

impl RestProfileStore {
    pub fn new(base_url: &str, timeout: std::time::Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer: RwLock::new(None),
        })
    }

    /// Install the freshly refreshed identity token. Called by the flow after
    /// the auth readiness gate confirms the session.
    pub async fn install_token(&self, token: &str) {
        *self.bearer.write().await = Some(token.to_string());
    }

    fn user_url(&self, user_id: &str) -> String {
        format!("{}/users/{user_id}", self.base_url)
    }

    async fn get(&self, user_id: &str) -> Result<Option<UserRecord>, PipelineError> {
        let mut req = self.client.get(self.user_url(user_id));
        if let Some(token) = self.bearer.read().await.as_deref() {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let record: UserRecord = resp.error_for_status()?.json().await?;
        Ok(Some(record))
    }

    async fn patch(&self, user_id: &str, body: serde_json::Value) -> Result<(), PipelineError> {
        let mut req = self.client.patch(self.user_url(user_id)).json(&body);
        if let Some(token) = self.bearer.read().await.as_deref() {
            req = req.bearer_auth(token);
        }
        req.send().await?.error_for_status()?;
        debug!(user_id, "user record patched");
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for RestProfileStore {
    async fn fetch(&self, user_id: &str) -> Result<Option<UserRecord>, PipelineError> {
        self.get(user_id).await
    }

    async fn link_attribution(
        &self,
        user_id: &str,
        record: &AttributionRecord,
    ) -> Result<LinkOutcome, PipelineError> {
        if let Some(existing) = self.get(user_id).await? {
            if existing.attribution.is_some() {
                return Ok(LinkOutcome::AlreadyLinked);
            }
        }
        let linked = LinkedAttribution::from_record(record);
        self.patch(user_id, json!({ "attribution": linked })).await?;
        Ok(LinkOutcome::Linked)
    }

    async fn set_first_login_at(&self, user_id: &str, at: &str) -> Result<(), PipelineError> {
        self.patch(user_id, json!({ "firstAppLoginAt": at })).await
    }

    async fn set_consent_status(
        &self,
        user_id: &str,
        status: TrackingConsentStatus,
    ) -> Result<(), PipelineError> {
        self.patch(user_id, json!({ "trackingPermissionStatus": status }))
            .await
    }

    async fn append_prompt_history(
        &self,
        user_id: &str,
        entry: PromptHistoryEntry,
    ) -> Result<(), PipelineError> {
        // Document PATCH replaces arrays wholesale; read-modify-write.
        let mut history = self
            .get(user_id)
            .await?
            .map(|r| r.tracking_prompt_history)
            .unwrap_or_default();
        history.push(entry);
        self.patch(user_id, json!({ "trackingPromptHistory": history }))
            .await
    }
}
