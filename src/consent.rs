// SPDX-License-Identifier: MIT
//! Tracking-consent recording.
//!
//! The consent UI collaborator shows the system prompt and hands the raw
//! result here. This module is the only writer of the consent status field
//! and the append-only prompt history on the user record.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::PipelineError;
use crate::profile::{ProfileStore, PromptHistoryEntry};

/// System tracking-consent state, mirroring the platform's four-way answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrackingConsentStatus {
    #[default]
    NotDetermined,
    Authorized,
    Denied,
    Restricted,
}

impl TrackingConsentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotDetermined => "not_determined",
            Self::Authorized => "authorized",
            Self::Denied => "denied",
            Self::Restricted => "restricted",
        }
    }

    /// History action corresponding to a prompt outcome. `NotDetermined`
    /// yields none — the prompt was dismissed without an answer.
    fn as_action(self) -> Option<PromptAction> {
        match self {
            Self::Authorized => Some(PromptAction::Granted),
            Self::Denied => Some(PromptAction::Denied),
            Self::Restricted => Some(PromptAction::Restricted),
            Self::NotDetermined => None,
        }
    }
}

impl FromStr for TrackingConsentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_determined" => Ok(Self::NotDetermined),
            "authorized" => Ok(Self::Authorized),
            "denied" => Ok(Self::Denied),
            "restricted" => Ok(Self::Restricted),
            other => Err(format!("unknown consent status: {other}")),
        }
    }
}

/// Entry kind in the append-only prompt history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptAction {
    Shown,
    Granted,
    Denied,
    Restricted,
}

// ─── ConsentRecorder ──────────────────────────────────────────────────────────

/// Writes consent outcomes to the durable user record.
#[derive(Clone)]
pub struct ConsentRecorder {
    profiles: Arc<dyn ProfileStore>,
}

impl ConsentRecorder {
    pub fn new(profiles: Arc<dyn ProfileStore>) -> Self {
        Self { profiles }
    }

    /// Record that the system prompt was displayed.
    pub async fn record_prompt_shown(&self, user_id: &str) -> Result<(), PipelineError> {
        self.profiles
            .append_prompt_history(
                user_id,
                PromptHistoryEntry {
                    timestamp: Utc::now().to_rfc3339(),
                    action: PromptAction::Shown,
                },
            )
            .await
    }

    /// Record the prompt outcome: status transition plus history entry.
    pub async fn record_result(
        &self,
        user_id: &str,
        status: TrackingConsentStatus,
    ) -> Result<(), PipelineError> {
        self.profiles.set_consent_status(user_id, status).await?;
        if let Some(action) = status.as_action() {
            self.profiles
                .append_prompt_history(
                    user_id,
                    PromptHistoryEntry {
                        timestamp: Utc::now().to_rfc3339(),
                        action,
                    },
                )
                .await?;
        }
        info!(user_id, status = status.as_str(), "consent recorded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::MemoryProfileStore;

    #[tokio::test]
    async fn result_sets_status_and_appends_history() {
        let store = Arc::new(MemoryProfileStore::new());
        let recorder = ConsentRecorder::new(store.clone());

        recorder.record_prompt_shown("u1").await.unwrap();
        recorder
            .record_result("u1", TrackingConsentStatus::Authorized)
            .await
            .unwrap();

        let record = store.fetch("u1").await.unwrap().unwrap();
        assert_eq!(
            record.tracking_permission_status,
            Some(TrackingConsentStatus::Authorized)
        );
        let actions: Vec<_> = record
            .tracking_prompt_history
            .iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(actions, vec![PromptAction::Shown, PromptAction::Granted]);
    }

    #[tokio::test]
    async fn dismissed_prompt_records_no_action() {
        let store = Arc::new(MemoryProfileStore::new());
        let recorder = ConsentRecorder::new(store.clone());

        recorder
            .record_result("u1", TrackingConsentStatus::NotDetermined)
            .await
            .unwrap();

        let record = store.fetch("u1").await.unwrap().unwrap();
        assert_eq!(
            record.tracking_permission_status,
            Some(TrackingConsentStatus::NotDetermined)
        );
        assert!(record.tracking_prompt_history.is_empty());
    }
}
