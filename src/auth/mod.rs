// SPDX-License-Identifier: MIT
//! Auth readiness gate.
//!
//! The identity provider reports "signed in" slightly before the token it
//! minted is accepted by the document backend's authorization layer. The gate
//! closes that race: before the first privileged read of a session it checks
//! that a credential is present, that it belongs to the expected user, and
//! that a *forced* token refresh succeeded — a cached token proves nothing
//! about propagation.
//!
//! Callers invoke [`AuthReadinessGate::ensure_ready`] once per session before
//! the first privileged operation; later operations in the same flow do not
//! re-invoke it.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::PipelineError;

/// The currently signed-in user as reported by the identity provider.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub email: Option<String>,
}

/// Seam to the authentication collaborator.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The signed-in user, if any.
    async fn current_user(&self) -> Option<AuthUser>;

    /// Force-mint a fresh authorization token. Implementations must not
    /// serve a cached token here.
    async fn refresh_token(&self) -> Result<String, PipelineError>;
}

// ─── AuthReadinessGate ────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AuthReadinessGate {
    provider: Arc<dyn IdentityProvider>,
}

impl AuthReadinessGate {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider }
    }

    /// Confirm the session is ready for privileged reads of `expected_user_id`
    /// and return the freshly minted token.
    pub async fn ensure_ready(&self, expected_user_id: &str) -> Result<String, PipelineError> {
        let user = self
            .provider
            .current_user()
            .await
            .ok_or_else(|| PipelineError::AuthNotReady("no credential present".into()))?;

        if user.user_id != expected_user_id {
            return Err(PipelineError::AuthNotReady(format!(
                "credential belongs to {}, expected {expected_user_id}",
                user.user_id
            )));
        }

        let token = self
            .provider
            .refresh_token()
            .await
            .map_err(|e| PipelineError::AuthNotReady(format!("token refresh failed: {e}")))?;

        debug!(user_id = expected_user_id, "auth readiness confirmed");
        Ok(token)
    }
}

// ─── StaticIdentity ───────────────────────────────────────────────────────────

/// Fixed-credential [`IdentityProvider`] for the operator CLI and tests.
pub struct StaticIdentity {
    user: AuthUser,
    token: String,
}

impl StaticIdentity {
    pub fn new(user_id: &str, email: Option<&str>, token: &str) -> Self {
        Self {
            user: AuthUser {
                user_id: user_id.to_string(),
                email: email.map(str::to_string),
            },
            token: token.to_string(),
        }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_user(&self) -> Option<AuthUser> {
        Some(self.user.clone())
    }

    async fn refresh_token(&self) -> Result<String, PipelineError> {
        Ok(self.token.clone())
    }
}
