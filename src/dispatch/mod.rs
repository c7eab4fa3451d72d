// SPDX-License-Identifier: MIT
//! Conversion-event dispatch, exactly-once in effect.
//!
//! The dispatcher reports `AppInstall` and `CompleteRegistration` exactly once
//! per user *in effect*, despite crashes, offline periods and token races.
//! Two pieces of durable state carry that guarantee:
//!
//! - `firstAppLoginAt` on the user record: the authoritative completion
//!   marker. Survives reinstalls; written only after both sends are confirmed.
//! - the device-local Install-sent flag: fast-path guard preventing a
//!   duplicate Install on crash-retry. Never the sole basis for a skip.
//!
//! A crash between the sends and the marker write leaves the marker unset, so
//! the whole sequence re-runs on the next login: Install is suppressed by the
//! local flag, Registration re-sends (a tolerated duplicate; a low-cost event
//! is cheaper than a missed conversion). Caller-supplied "first login" hints
//! are exactly that, hints; every dispatch decision re-verifies against the
//! durable marker.

pub mod api;
pub mod payload;

pub use api::{ConversionApi, HttpConversionApi};
pub use payload::{ConversionKind, EventPayload, IdentityHints};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::attribution::AttributionStore;
use crate::error::PipelineError;
use crate::fingerprint::DeviceSnapshot;
use crate::profile::{LinkedAttribution, ProfileStore};
use crate::retry::RetryPolicy;
use crate::storage::Storage;

// ─── IdempotencyGuard ─────────────────────────────────────────────────────────

/// Decides, from durable state, whether a conversion event still needs to be
/// delivered.
#[derive(Clone)]
pub struct IdempotencyGuard {
    storage: Arc<Storage>,
    profiles: Arc<dyn ProfileStore>,
}

impl IdempotencyGuard {
    pub fn new(storage: Arc<Storage>, profiles: Arc<dyn ProfileStore>) -> Self {
        Self { storage, profiles }
    }

    /// Authoritative check: false once `firstAppLoginAt` is set on the user
    /// record, regardless of what local session state claims.
    pub async fn should_dispatch_first_login(
        &self,
        user_id: &str,
    ) -> Result<bool, PipelineError> {
        let record = self.profiles.fetch(user_id).await?;
        Ok(record
            .map(|r| r.first_app_login_at.is_none())
            .unwrap_or(true))
    }

    /// Fast-path check against the device-local Install-sent flag.
    pub async fn should_send_install(&self) -> Result<bool, PipelineError> {
        Ok(!self
            .storage
            .install_event_sent()
            .await
            .map_err(PipelineError::storage)?)
    }

    /// Record external confirmation of the Install event.
    pub async fn mark_install_sent(&self) -> Result<(), PipelineError> {
        self.storage
            .mark_install_event_sent()
            .await
            .map_err(PipelineError::storage)
    }

    /// Commit the terminal completion marker.
    pub async fn mark_first_login_complete(&self, user_id: &str) -> Result<(), PipelineError> {
        self.profiles
            .set_first_login_at(user_id, &Utc::now().to_rfc3339())
            .await
    }
}

// ─── DispatchReport ───────────────────────────────────────────────────────────

/// What one first-login dispatch attempt actually did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// The durable marker was already set — nothing was sent.
    pub skipped: bool,
    /// An Install event was sent and confirmed during this attempt.
    pub install_sent: bool,
    /// A Registration event was sent and confirmed during this attempt.
    pub registration_sent: bool,
    /// The completion marker was written during this attempt.
    pub marker_written: bool,
}

// ─── EventDispatcher ──────────────────────────────────────────────────────────

/// Builds payloads, delivers them through the retry policy, and commits the
/// durable completion marker only on confirmed success.
pub struct EventDispatcher {
    guard: IdempotencyGuard,
    attribution: AttributionStore,
    api: Arc<dyn ConversionApi>,
    retry: RetryPolicy,
    device: DeviceSnapshot,
}

impl EventDispatcher {
    pub fn new(
        storage: Arc<Storage>,
        profiles: Arc<dyn ProfileStore>,
        api: Arc<dyn ConversionApi>,
        retry: RetryPolicy,
        device: DeviceSnapshot,
    ) -> Self {
        Self {
            guard: IdempotencyGuard::new(storage.clone(), profiles.clone()),
            attribution: AttributionStore::new(storage, profiles),
            api,
            retry,
            device,
        }
    }

    pub fn guard(&self) -> &IdempotencyGuard {
        &self.guard
    }

    /// Deliver an `AppInstall` event. The event time is the attribution
    /// capture time when known (the install itself), normalized to the API's
    /// acceptance window.
    pub async fn send_install_event(
        &self,
        attribution: Option<&LinkedAttribution>,
        hints: &IdentityHints,
    ) -> Result<(), PipelineError> {
        let event_at = attribution
            .and_then(|a| DateTime::parse_from_rfc3339(&a.captured_at).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        self.retry
            .execute(|| async move {
                // Payloads are never persisted — rebuilt fresh per attempt.
                let payload = EventPayload::build(
                    ConversionKind::Install,
                    event_at,
                    &self.device,
                    hints,
                    attribution,
                    None,
                );
                self.api.send(&payload).await
            })
            .await
    }

    /// Deliver a `CompleteRegistration` event.
    pub async fn send_registration_event(
        &self,
        hints: &IdentityHints,
        method: &str,
        attribution: Option<&LinkedAttribution>,
    ) -> Result<(), PipelineError> {
        self.retry
            .execute(|| async move {
                let payload = EventPayload::build(
                    ConversionKind::Registration,
                    Utc::now(),
                    &self.device,
                    hints,
                    attribution,
                    Some(method),
                );
                self.api.send(&payload).await
            })
            .await
    }

    /// The first-login dispatch sequence: marker check → Install if needed →
    /// Registration always → marker write. Strictly sequential; the marker is
    /// only committed after both sends are confirmed.
    ///
    /// Send and marker-write failures are logged and absorbed into the
    /// returned report — the onboarding flow never blocks on telemetry. The
    /// only hard errors are failures to *read* the idempotency state, where
    /// proceeding blind could produce sends that were already confirmed.
    pub async fn report_first_login(
        &self,
        user_id: &str,
        hints: &IdentityHints,
        registration_method: &str,
    ) -> Result<DispatchReport, PipelineError> {
        let dispatch_id = Uuid::new_v4().to_string();
        let mut report = DispatchReport::default();

        if !self.guard.should_dispatch_first_login(user_id).await? {
            info!(%dispatch_id, user_id, "first-login marker already set — skipping dispatch");
            report.skipped = true;
            return Ok(report);
        }

        let attribution = self.attribution.get_for_user(user_id).await?;

        // Install, unless a previous attempt already got confirmation.
        let install_ok = if self.guard.should_send_install().await? {
            match self
                .send_install_event(attribution.as_ref(), hints)
                .await
            {
                Ok(()) => {
                    report.install_sent = true;
                    if let Err(e) = self.guard.mark_install_sent().await {
                        // The send is confirmed; the marker below still gates
                        // future dispatches even without the local flag.
                        warn!(%dispatch_id, err = %e, "install-sent flag write failed");
                    }
                    true
                }
                Err(e) => {
                    warn!(%dispatch_id, user_id, err = %e, "install event delivery failed");
                    false
                }
            }
        } else {
            info!(%dispatch_id, "install event already sent — local flag set");
            true
        };

        // Registration fires on every first-login dispatch, even when Install
        // was delivered through an earlier attempt.
        let registration_ok = match self
            .send_registration_event(hints, registration_method, attribution.as_ref())
            .await
        {
            Ok(()) => {
                report.registration_sent = true;
                true
            }
            Err(e) => {
                warn!(%dispatch_id, user_id, err = %e, "registration event delivery failed");
                false
            }
        };

        if install_ok && registration_ok {
            match self.guard.mark_first_login_complete(user_id).await {
                Ok(()) => {
                    report.marker_written = true;
                    info!(%dispatch_id, user_id, "first-login events delivered, marker committed");
                }
                Err(e) => {
                    // The next login re-runs the sequence: the local flag
                    // suppresses a duplicate Install, Registration re-sends.
                    warn!(%dispatch_id, user_id, err = %e, "marker write failed after successful sends");
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribution::{AttributionParams, AttributionStore};
    use crate::consent::TrackingConsentStatus;
    use crate::profile::{
        LinkOutcome, MemoryProfileStore, PromptHistoryEntry, UserRecord,
    };
    use crate::attribution::AttributionRecord;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records every accepted event name; optionally refuses one kind.
    #[derive(Default)]
    struct RecordingApi {
        sent: Mutex<Vec<String>>,
        fail_install: AtomicBool,
        fail_registration: AtomicBool,
    }

    impl RecordingApi {
        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ConversionApi for RecordingApi {
        async fn send(&self, payload: &EventPayload) -> Result<(), PipelineError> {
            let refuse = match payload.event {
                "AppInstall" => self.fail_install.load(Ordering::Relaxed),
                "CompleteRegistration" => self.fail_registration.load(Ordering::Relaxed),
                _ => false,
            };
            if refuse {
                return Err(PipelineError::Connectivity("simulated outage".into()));
            }
            self.sent.lock().unwrap().push(payload.event.to_string());
            Ok(())
        }
    }

    /// Delegates to a memory store but can refuse marker writes.
    struct FlakyMarkerStore {
        inner: MemoryProfileStore,
        fail_marker: AtomicBool,
    }

    impl FlakyMarkerStore {
        fn new() -> Self {
            Self {
                inner: MemoryProfileStore::new(),
                fail_marker: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl ProfileStore for FlakyMarkerStore {
        async fn fetch(&self, user_id: &str) -> Result<Option<UserRecord>, PipelineError> {
            self.inner.fetch(user_id).await
        }
        async fn link_attribution(
            &self,
            user_id: &str,
            record: &AttributionRecord,
        ) -> Result<LinkOutcome, PipelineError> {
            self.inner.link_attribution(user_id, record).await
        }
        async fn set_first_login_at(&self, user_id: &str, at: &str) -> Result<(), PipelineError> {
            if self.fail_marker.load(Ordering::Relaxed) {
                return Err(PipelineError::Connectivity("marker write refused".into()));
            }
            self.inner.set_first_login_at(user_id, at).await
        }
        async fn set_consent_status(
            &self,
            user_id: &str,
            status: TrackingConsentStatus,
        ) -> Result<(), PipelineError> {
            self.inner.set_consent_status(user_id, status).await
        }
        async fn append_prompt_history(
            &self,
            user_id: &str,
            entry: PromptHistoryEntry,
        ) -> Result<(), PipelineError> {
            self.inner.append_prompt_history(user_id, entry).await
        }
    }

    struct Fixture {
        dispatcher: EventDispatcher,
        storage: Arc<Storage>,
        profiles: Arc<FlakyMarkerStore>,
        api: Arc<RecordingApi>,
        _dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(dir.path()).await.unwrap());
        let profiles = Arc::new(FlakyMarkerStore::new());
        let api = Arc::new(RecordingApi::default());
        let dispatcher = EventDispatcher::new(
            storage.clone(),
            profiles.clone(),
            api.clone(),
            RetryPolicy::instant(),
            DeviceSnapshot::default(),
        );
        Fixture {
            dispatcher,
            storage,
            profiles,
            api,
            _dir: dir,
        }
    }

    fn hints() -> IdentityHints {
        IdentityHints {
            user_id: Some("u1".into()),
            email: Some("user@example.com".into()),
        }
    }

    #[tokio::test]
    async fn full_success_sends_both_and_commits_marker() {
        let f = fixture().await;
        // Linked attribution flows into the payloads.
        let attribution = AttributionStore::new(f.storage.clone(), f.profiles.clone());
        attribution
            .capture(AttributionParams {
                click_id: Some("click-1".into()),
                campaign_id: None,
                network: None,
            })
            .await
            .unwrap();
        attribution.consume_for_user("u1").await.unwrap();

        let report = f
            .dispatcher
            .report_first_login("u1", &hints(), "email")
            .await
            .unwrap();

        assert_eq!(
            report,
            DispatchReport {
                skipped: false,
                install_sent: true,
                registration_sent: true,
                marker_written: true,
            }
        );
        assert_eq!(f.api.sent(), vec!["AppInstall", "CompleteRegistration"]);
        assert!(f.storage.install_event_sent().await.unwrap());
        let record = f.profiles.fetch("u1").await.unwrap().unwrap();
        assert!(record.first_app_login_at.is_some());
    }

    #[tokio::test]
    async fn marker_gates_redispatch_regardless_of_local_flags() {
        let f = fixture().await;
        f.profiles
            .set_first_login_at("u1", "2026-07-01T00:00:00+00:00")
            .await
            .unwrap();
        // Local flag deliberately out of sync with the durable marker.
        assert!(!f.storage.install_event_sent().await.unwrap());

        let report = f
            .dispatcher
            .report_first_login("u1", &hints(), "email")
            .await
            .unwrap();

        assert!(report.skipped);
        assert!(f.api.sent().is_empty());
    }

    #[tokio::test]
    async fn crash_retry_resends_registration_but_not_install() {
        let f = fixture().await;

        // First attempt: both sends succeed, marker write refused (crash
        // window between sends and commit).
        f.profiles.fail_marker.store(true, Ordering::Relaxed);
        let first = f
            .dispatcher
            .report_first_login("u1", &hints(), "email")
            .await
            .unwrap();
        assert!(first.install_sent && first.registration_sent);
        assert!(!first.marker_written);

        // Second attempt: marker still absent, so the sequence re-runs.
        f.profiles.fail_marker.store(false, Ordering::Relaxed);
        let second = f
            .dispatcher
            .report_first_login("u1", &hints(), "email")
            .await
            .unwrap();

        assert!(!second.skipped);
        assert!(!second.install_sent, "install guarded by the local flag");
        assert!(second.registration_sent, "registration duplicate is tolerated");
        assert!(second.marker_written);
        assert_eq!(
            f.api.sent(),
            vec!["AppInstall", "CompleteRegistration", "CompleteRegistration"]
        );

        // End state: marker set, third attempt is a pure skip.
        let third = f
            .dispatcher
            .report_first_login("u1", &hints(), "email")
            .await
            .unwrap();
        assert!(third.skipped);
        assert_eq!(f.api.sent().len(), 3);
    }

    #[tokio::test]
    async fn failed_install_blocks_marker_but_not_registration() {
        let f = fixture().await;
        f.api.fail_install.store(true, Ordering::Relaxed);

        let report = f
            .dispatcher
            .report_first_login("u1", &hints(), "email")
            .await
            .unwrap();

        assert!(!report.install_sent);
        assert!(report.registration_sent);
        assert!(!report.marker_written);
        assert_eq!(f.api.sent(), vec!["CompleteRegistration"]);
        // Install flag must not be set without external confirmation.
        assert!(!f.storage.install_event_sent().await.unwrap());
        assert!(f
            .profiles
            .fetch("u1")
            .await
            .unwrap()
            .and_then(|r| r.first_app_login_at)
            .is_none());
    }

    #[tokio::test]
    async fn failed_registration_blocks_marker() {
        let f = fixture().await;
        f.api.fail_registration.store(true, Ordering::Relaxed);

        let report = f
            .dispatcher
            .report_first_login("u1", &hints(), "email")
            .await
            .unwrap();

        assert!(report.install_sent);
        assert!(!report.registration_sent);
        assert!(!report.marker_written);
        // Install confirmation still recorded — the retry must not resend it.
        assert!(f.storage.install_event_sent().await.unwrap());

        f.api.fail_registration.store(false, Ordering::Relaxed);
        let retry = f
            .dispatcher
            .report_first_login("u1", &hints(), "email")
            .await
            .unwrap();
        assert!(!retry.install_sent);
        assert!(retry.registration_sent);
        assert!(retry.marker_written);
        assert_eq!(f.api.sent(), vec!["AppInstall", "CompleteRegistration"]);
    }
}
