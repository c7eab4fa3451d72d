pub mod attribution;
pub mod auth;
pub mod config;
pub mod consent;
pub mod dispatch;
pub mod error;
pub mod event_time;
pub mod fingerprint;
pub mod profile;
pub mod retry;
pub mod storage;

use std::sync::Arc;

use anyhow::Result;

use attribution::AttributionStore;
use auth::{AuthReadinessGate, IdentityProvider};
use config::PipelineConfig;
use consent::ConsentRecorder;
use dispatch::{ConversionApi, EventDispatcher, HttpConversionApi};
use profile::{ProfileStore, RestProfileStore};
use storage::Storage;

/// Wired-up pipeline handed to the onboarding flow and the operator CLI.
#[derive(Clone)]
pub struct Pipeline {
    pub config: Arc<PipelineConfig>,
    pub storage: Arc<Storage>,
    pub profiles: Arc<dyn ProfileStore>,
    pub attribution: AttributionStore,
    pub dispatcher: Arc<EventDispatcher>,
    pub consent: ConsentRecorder,
    pub gate: AuthReadinessGate,
}

impl Pipeline {
    /// Assemble the pipeline from explicit collaborators. Tests and the CLI
    /// pick their own stores; nothing is read from ambient state.
    pub async fn new(
        config: PipelineConfig,
        profiles: Arc<dyn ProfileStore>,
        identity: Arc<dyn IdentityProvider>,
        api: Arc<dyn ConversionApi>,
    ) -> Result<Self> {
        let storage = Arc::new(Storage::new(&config.data_dir).await?);
        let dispatcher = Arc::new(EventDispatcher::new(
            storage.clone(),
            profiles.clone(),
            api,
            config.retry_policy(),
            config.device.clone(),
        ));
        Ok(Self {
            attribution: AttributionStore::new(storage.clone(), profiles.clone()),
            consent: ConsentRecorder::new(profiles.clone()),
            gate: AuthReadinessGate::new(identity),
            config: Arc::new(config),
            storage,
            profiles,
            dispatcher,
        })
    }

    /// Assemble against the configured HTTP backends.
    pub async fn connect(
        config: PipelineConfig,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<(Self, Arc<RestProfileStore>)> {
        let profiles = Arc::new(RestProfileStore::new(
            &config.profile_base_url,
            config.http_timeout(),
        )?);
        let api = Arc::new(HttpConversionApi::new(
            &config.api_base_url,
            &config.app_id,
            config.access_token.as_deref(),
            config.http_timeout(),
        )?);
        let pipeline = Self::new(config, profiles.clone(), identity, api).await?;
        Ok((pipeline, profiles))
    }
}
