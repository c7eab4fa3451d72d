// SPDX-License-Identifier: MIT
//! Conversion event payloads.
//!
//! Payloads are ephemeral — built fresh for every attempt, sent, discarded.
//! Identity hints are hashed before they reach the payload; raw identity
//! never leaves the process.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::event_time;
use crate::fingerprint::DeviceSnapshot;
use crate::profile::LinkedAttribution;

/// The two conversion kinds this pipeline reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionKind {
    Install,
    Registration,
}

impl ConversionKind {
    /// Event name on the wire.
    pub fn event_name(self) -> &'static str {
        match self {
            Self::Install => "AppInstall",
            Self::Registration => "CompleteRegistration",
        }
    }
}

/// Optional identity attached to an event for match-rate purposes.
#[derive(Debug, Clone, Default)]
pub struct IdentityHints {
    pub user_id: Option<String>,
    pub email: Option<String>,
}

/// SHA-256 hex digest of a lowercased, trimmed email.
pub fn hash_email(email: &str) -> String {
    let normalized = email.trim().to_lowercase();
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

/// One conversion event, ready for the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    pub event: &'static str,
    /// Unix seconds, already clamped to the acceptance window.
    pub event_time: i64,
    /// Fixed 16-field device descriptor.
    pub extinfo: [String; 16],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hashed_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub click_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_method: Option<String>,
}

impl EventPayload {
    /// Build a payload for `kind` occurring at `event_at`.
    pub fn build(
        kind: ConversionKind,
        event_at: DateTime<Utc>,
        device: &DeviceSnapshot,
        hints: &IdentityHints,
        attribution: Option<&LinkedAttribution>,
        registration_method: Option<&str>,
    ) -> Self {
        Self {
            event: kind.event_name(),
            event_time: event_time::normalize_now(event_at),
            extinfo: device.descriptor(),
            hashed_email: hints.email.as_deref().map(hash_email),
            external_id: hints.user_id.clone(),
            click_id: attribution.and_then(|a| a.click_id.clone()),
            campaign_id: attribution.and_then(|a| a.campaign_id.clone()),
            registration_method: registration_method.map(str::to_string),
        }
    }
}
