// SPDX-License-Identifier: MIT
//! Per-user durable record — the user tier of attribution storage.
//!
//! The record lives in the managed document backend and survives app
//! reinstalls, which is what makes `firstAppLoginAt` the authoritative
//! idempotency source. [`ProfileStore`] is the seam: [`RestProfileStore`]
//! talks to the real backend, [`MemoryProfileStore`] backs tests and local
//! runs.

pub mod rest;

pub use rest::RestProfileStore;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::attribution::AttributionRecord;
use crate::consent::{PromptAction, TrackingConsentStatus};
use crate::error::PipelineError;

// ─── Record types ─────────────────────────────────────────────────────────────

/// One `{timestamp, action}` entry in the append-only prompt history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptHistoryEntry {
    /// RFC 3339 timestamp.
    pub timestamp: String,
    pub action: PromptAction,
}

/// Attribution parameters after linking to a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedAttribution {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub click_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// When the device-local record was captured (RFC 3339).
    pub captured_at: String,
    /// When it was linked to this user (RFC 3339).
    pub linked_at: String,
}

impl LinkedAttribution {
    pub fn from_record(record: &AttributionRecord) -> Self {
        Self {
            click_id: record.click_id.clone(),
            campaign_id: record.campaign_id.clone(),
            network: record.network.clone(),
            captured_at: record.captured_at.clone(),
            linked_at: Utc::now().to_rfc3339(),
        }
    }
}

/// The pipeline-relevant slice of the durable user record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserRecord {
    /// Set if and only if both first-login conversion events were confirmed
    /// delivered. RFC 3339. Terminal once set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_app_login_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking_permission_status: Option<TrackingConsentStatus>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tracking_prompt_history: Vec<PromptHistoryEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution: Option<LinkedAttribution>,
}

/// Result of a first-writer-wins link attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// The record was written.
    Linked,
    /// The user already carried attribution; nothing was overwritten.
    AlreadyLinked,
}

// ─── ProfileStore ─────────────────────────────────────────────────────────────

/// Durable per-user record operations.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Fetch the user record, `None` if it does not exist yet.
    async fn fetch(&self, user_id: &str) -> Result<Option<UserRecord>, PipelineError>;

    /// Write attribution onto the user record unless one is already present.
    /// Never overwrites existing server-side attribution.
    async fn link_attribution(
        &self,
        user_id: &str,
        record: &AttributionRecord,
    ) -> Result<LinkOutcome, PipelineError>;

    /// Commit the first-login completion marker (RFC 3339 timestamp).
    async fn set_first_login_at(&self, user_id: &str, at: &str) -> Result<(), PipelineError>;

    async fn set_consent_status(
        &self,
        user_id: &str,
        status: TrackingConsentStatus,
    ) -> Result<(), PipelineError>;

    async fn append_prompt_history(
        &self,
        user_id: &str,
        entry: PromptHistoryEntry,
    ) -> Result<(), PipelineError>;
}

// ─── MemoryProfileStore ───────────────────────────────────────────────────────

/// In-memory [`ProfileStore`] for tests and local dry runs.
#[derive(Default)]
pub struct MemoryProfileStore {
    records: RwLock<HashMap<String, UserRecord>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn fetch(&self, user_id: &str) -> Result<Option<UserRecord>, PipelineError> {
        Ok(self.records.read().await.get(user_id).cloned())
    }

    async fn link_attribution(
        &self,
        user_id: &str,
        record: &AttributionRecord,
    ) -> Result<LinkOutcome, PipelineError> {
        let mut records = self.records.write().await;
        let entry = records.entry(user_id.to_string()).or_default();
        if entry.attribution.is_some() {
            return Ok(LinkOutcome::AlreadyLinked);
        }
        entry.attribution = Some(LinkedAttribution::from_record(record));
        Ok(LinkOutcome::Linked)
    }

    async fn set_first_login_at(&self, user_id: &str, at: &str) -> Result<(), PipelineError> {
        let mut records = self.records.write().await;
        let entry = records.entry(user_id.to_string()).or_default();
        entry.first_app_login_at = Some(at.to_string());
        Ok(())
    }

    async fn set_consent_status(
        &self,
        user_id: &str,
        status: TrackingConsentStatus,
    ) -> Result<(), PipelineError> {
        let mut records = self.records.write().await;
        records.entry(user_id.to_string()).or_default().tracking_permission_status = Some(status);
        Ok(())
    }

    async fn append_prompt_history(
        &self,
        user_id: &str,
        entry: PromptHistoryEntry,
    ) -> Result<(), PipelineError> {
        let mut records = self.records.write().await;
        records
            .entry(user_id.to_string())
            .or_default()
            .tracking_prompt_history
            .push(entry);
        Ok(())
    }
}
