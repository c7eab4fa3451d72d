// SPDX-License-Identifier: MIT
//! Attribution capture and user linking.
//!
//! An [`AttributionRecord`] is captured once per install, before any user
//! exists, and parked in device-local storage. After authentication,
//! [`AttributionStore::consume_for_user`] migrates it onto the user's durable
//! record and deletes the local copy — in that order, so a failed durable
//! write leaves the local record intact for a later retry. Attribution data
//! is never silently lost and never overwrites what the server already has.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::profile::{LinkOutcome, LinkedAttribution, ProfileStore};
use crate::storage::Storage;

// ─── Types ────────────────────────────────────────────────────────────────────

/// Attribution parameters as observed at install or referral-click time.
#[derive(Debug, Clone, Default)]
pub struct AttributionParams {
    pub click_id: Option<String>,
    pub campaign_id: Option<String>,
    pub network: Option<String>,
}

/// The captured record. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributionRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub click_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// RFC 3339 capture timestamp. Doubles as the Install event time.
    pub captured_at: String,
}

impl AttributionRecord {
    pub fn capture_now(params: AttributionParams) -> Self {
        Self {
            click_id: params.click_id,
            campaign_id: params.campaign_id,
            network: params.network,
            captured_at: Utc::now().to_rfc3339(),
        }
    }
}

/// What [`AttributionStore::consume_for_user`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Device-local record migrated onto the user record.
    Linked,
    /// The user already carried attribution; local copy consumed, nothing
    /// overwritten.
    AlreadyLinked,
    /// No device-local record to consume (organic install or already linked).
    NoLocalRecord,
}

// ─── AttributionStore ─────────────────────────────────────────────────────────

/// Two-tier attribution storage: device-local until authentication, per-user
/// durable afterwards.
#[derive(Clone)]
pub struct AttributionStore {
    storage: Arc<Storage>,
    profiles: Arc<dyn ProfileStore>,
}

impl AttributionStore {
    pub fn new(storage: Arc<Storage>, profiles: Arc<dyn ProfileStore>) -> Self {
        Self { storage, profiles }
    }

    /// Capture attribution parameters if none were captured yet. The first
    /// parameters observed win; later calls are no-ops.
    ///
    /// Returns the record that is durably stored after the call.
    pub async fn capture(&self, params: AttributionParams) -> Result<AttributionRecord, PipelineError> {
        let record = AttributionRecord::capture_now(params);
        let wrote = self
            .storage
            .store_attribution_if_absent(&record)
            .await
            .map_err(PipelineError::storage)?;
        if wrote {
            info!(
                click_id = record.click_id.as_deref().unwrap_or(""),
                campaign_id = record.campaign_id.as_deref().unwrap_or(""),
                "attribution captured"
            );
            return Ok(record);
        }
        // Someone captured first — return what is actually stored.
        let existing = self
            .storage
            .attribution_record()
            .await
            .map_err(PipelineError::storage)?;
        Ok(existing.unwrap_or(record))
    }

    /// Migrate the device-local record onto `user_id`'s durable record and
    /// delete the local copy.
    ///
    /// First-writer-wins: if the user record already carries attribution the
    /// durable side is left untouched. The local copy is deleted only once
    /// linking is settled (written or found already present); any earlier
    /// failure keeps it for the next attempt.
    pub async fn consume_for_user(&self, user_id: &str) -> Result<ConsumeOutcome, PipelineError> {
        let Some(record) = self
            .storage
            .attribution_record()
            .await
            .map_err(PipelineError::storage)?
        else {
            return Ok(ConsumeOutcome::NoLocalRecord);
        };

        let outcome = match self.profiles.link_attribution(user_id, &record).await {
            Ok(LinkOutcome::Linked) => {
                info!(user_id, "attribution linked to user");
                ConsumeOutcome::Linked
            }
            Ok(LinkOutcome::AlreadyLinked) => {
                info!(user_id, "user already carries attribution — local copy consumed");
                ConsumeOutcome::AlreadyLinked
            }
            Err(e) => {
                warn!(user_id, err = %e, "attribution link failed — keeping local record");
                return Err(e);
            }
        };

        self.storage
            .clear_attribution_record()
            .await
            .map_err(PipelineError::storage)?;
        Ok(outcome)
    }

    /// The attribution linked to `user_id`, if any.
    pub async fn get_for_user(
        &self,
        user_id: &str,
    ) -> Result<Option<LinkedAttribution>, PipelineError> {
        Ok(self
            .profiles
            .fetch(user_id)
            .await?
            .and_then(|record| record.attribution))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{MemoryProfileStore, PromptHistoryEntry, UserRecord};
    use crate::consent::TrackingConsentStatus;
    use async_trait::async_trait;
    use tempfile::TempDir;

    async fn fixture() -> (AttributionStore, Arc<MemoryProfileStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(dir.path()).await.unwrap());
        let profiles = Arc::new(MemoryProfileStore::new());
        (
            AttributionStore::new(storage, profiles.clone()),
            profiles,
            dir,
        )
    }

    fn params(click: &str) -> AttributionParams {
        AttributionParams {
            click_id: Some(click.to_string()),
            campaign_id: Some("spring".to_string()),
            network: Some("meta".to_string()),
        }
    }

    #[tokio::test]
    async fn capture_is_idempotent_first_wins() {
        let (store, _profiles, _dir) = fixture().await;
        let first = store.capture(params("click-1")).await.unwrap();
        let second = store.capture(params("click-2")).await.unwrap();

        assert_eq!(first.click_id.as_deref(), Some("click-1"));
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn consume_links_and_clears_local_copy() {
        let (store, _profiles, _dir) = fixture().await;
        store.capture(params("click-1")).await.unwrap();

        assert_eq!(
            store.consume_for_user("u1").await.unwrap(),
            ConsumeOutcome::Linked
        );
        let linked = store.get_for_user("u1").await.unwrap().unwrap();
        assert_eq!(linked.click_id.as_deref(), Some("click-1"));

        // Local record is gone; a second consume is a no-op.
        assert_eq!(
            store.consume_for_user("u1").await.unwrap(),
            ConsumeOutcome::NoLocalRecord
        );
    }

    #[tokio::test]
    async fn consume_never_overwrites_server_side_attribution() {
        let (store, profiles, _dir) = fixture().await;
        let earlier = AttributionRecord {
            click_id: Some("server-click".to_string()),
            campaign_id: None,
            network: None,
            captured_at: Utc::now().to_rfc3339(),
        };
        profiles.link_attribution("u1", &earlier).await.unwrap();

        store.capture(params("device-click")).await.unwrap();
        assert_eq!(
            store.consume_for_user("u1").await.unwrap(),
            ConsumeOutcome::AlreadyLinked
        );

        let linked = store.get_for_user("u1").await.unwrap().unwrap();
        assert_eq!(linked.click_id.as_deref(), Some("server-click"));
    }

    #[tokio::test]
    async fn failed_link_keeps_local_record() {
        struct FailingStore;

        #[async_trait]
        impl ProfileStore for FailingStore {
            async fn fetch(&self, _: &str) -> Result<Option<UserRecord>, PipelineError> {
                Err(PipelineError::Connectivity("offline".into()))
            }
            async fn link_attribution(
                &self,
                _: &str,
                _: &AttributionRecord,
            ) -> Result<LinkOutcome, PipelineError> {
                Err(PipelineError::Connectivity("offline".into()))
            }
            async fn set_first_login_at(&self, _: &str, _: &str) -> Result<(), PipelineError> {
                Err(PipelineError::Connectivity("offline".into()))
            }
            async fn set_consent_status(
                &self,
                _: &str,
                _: TrackingConsentStatus,
            ) -> Result<(), PipelineError> {
                Err(PipelineError::Connectivity("offline".into()))
            }
            async fn append_prompt_history(
                &self,
                _: &str,
                _: PromptHistoryEntry,
            ) -> Result<(), PipelineError> {
                Err(PipelineError::Connectivity("offline".into()))
            }
        }

        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(dir.path()).await.unwrap());
        let store = AttributionStore::new(storage.clone(), Arc::new(FailingStore));

        store.capture(params("click-1")).await.unwrap();
        assert!(store.consume_for_user("u1").await.is_err());

        // Local record survives the failed link for a later retry.
        assert!(storage.attribution_record().await.unwrap().is_some());
    }
}
