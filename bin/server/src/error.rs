//! Error types for the server.
//!
//! `StartupError` covers everything that can stop the server from coming up.
//! `ApiError` is what handlers return; it renders as a translated JSON body.

use crate::i18n::{Catalog, MessageKey};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::fmt;
use waypoint_workflow::TransitionError;

/// Errors that prevent the server from starting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupError {
    Config { details: String },
    Definition { details: String },
    Storage { details: String },
    Webhook { details: String },
    Plugin { details: String },
    Bind { address: String, details: String },
    Serve { details: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "invalid configuration: {details}"),
            Self::Definition { details } => write!(f, "failed to load workflow: {details}"),
            Self::Storage { details } => write!(f, "storage unavailable: {details}"),
            Self::Webhook { details } => write!(f, "webhook setup failed: {details}"),
            Self::Plugin { details } => write!(f, "plugin setup failed: {details}"),
            Self::Bind { address, details } => write!(f, "failed to bind {address}: {details}"),
            Self::Serve { details } => write!(f, "server error: {details}"),
        }
    }
}

impl std::error::Error for StartupError {}

/// A failed request, already translated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: &'static str,
}

impl ApiError {
    /// Maps a transition failure to a status and a translated message.
    ///
    /// Rejections all read the same so clients cannot tell a missing edge
    /// from a missing state.
    #[must_use]
    pub fn from_transition(error: &TransitionError, catalog: &Catalog, locale: &str) -> Self {
        let (status, key) = match error {
            e if e.is_rejection() => (StatusCode::BAD_REQUEST, MessageKey::TransitionRejected),
            TransitionError::NoPreviousState => (StatusCode::CONFLICT, MessageKey::NoPreviousState),
            TransitionError::StorageFailed { .. } => {
                tracing::error!(%error, "persisting workflow state failed");
                (StatusCode::SERVICE_UNAVAILABLE, MessageKey::StorageUnavailable)
            }
            _ => (StatusCode::BAD_REQUEST, MessageKey::TransitionFailed),
        };

        Self {
            status,
            message: catalog.translate(locale, key),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "success": false, "error": self.message })),
        )
            .into_response()
    }
}
