// SPDX-License-Identifier: MIT
//! Closed error taxonomy for the delivery pipeline.
//!
//! Every failure that crosses a component boundary is classified into one of
//! four [`ErrorClass`] values. The class drives retry behaviour: connectivity
//! and unknown errors back off exponentially, authorization errors back off
//! with a doubled base (token propagation is slower than a network blip), and
//! validation errors are never retried.

use thiserror::Error;

/// Retry-relevant failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Offline, timeout, connection refused — retryable.
    Connectivity,
    /// Credential not yet propagated or rejected — retryable, longer backoff.
    Authorization,
    /// Malformed payload — deterministic, never retried.
    Validation,
    /// Anything else — retried like connectivity.
    Unknown,
}

/// Error type shared by the profile store, the conversion API client and the
/// dispatcher.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("connectivity: {0}")]
    Connectivity(String),

    #[error("authorization: {0}")]
    Authorization(String),

    #[error("validation: {0}")]
    Validation(String),

    /// The auth readiness gate found no usable credential. Propagates as a
    /// hard error — proceeding would only produce a misleading authorization
    /// failure deeper in the call stack.
    #[error("auth not ready: {0}")]
    AuthNotReady(String),

    #[error("{0}")]
    Unknown(String),
}

impl PipelineError {
    /// Classification used by the retry policy.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Connectivity(_) => ErrorClass::Connectivity,
            Self::Authorization(_) | Self::AuthNotReady(_) => ErrorClass::Authorization,
            Self::Validation(_) => ErrorClass::Validation,
            Self::Unknown(_) => ErrorClass::Unknown,
        }
    }

    /// Wrap a device-storage failure. Local SQLite errors carry no useful
    /// retry class of their own.
    pub(crate) fn storage(e: anyhow::Error) -> Self {
        Self::Unknown(format!("storage: {e:#}"))
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            return Self::Connectivity(e.to_string());
        }
        if let Some(status) = e.status() {
            return match status.as_u16() {
                401 | 403 => Self::Authorization(format!("server returned {status}")),
                400 | 422 => Self::Validation(format!("server returned {status}")),
                _ => Self::Unknown(format!("server returned {status}")),
            };
        }
        Self::Unknown(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_mapping() {
        assert_eq!(
            PipelineError::Connectivity("offline".into()).class(),
            ErrorClass::Connectivity
        );
        assert_eq!(
            PipelineError::Authorization("401".into()).class(),
            ErrorClass::Authorization
        );
        assert_eq!(
            PipelineError::AuthNotReady("no credential".into()).class(),
            ErrorClass::Authorization
        );
        assert_eq!(
            PipelineError::Validation("bad payload".into()).class(),
            ErrorClass::Validation
        );
        assert_eq!(
            PipelineError::Unknown("?".into()).class(),
            ErrorClass::Unknown
        );
    }
}
