use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_derive::Serialize;
use thiserror::Error;

use crm_common::cache::CacheError;
use crm_common::crm::CrmError;
use crm_common::mapping::MappingError;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

/// Enumeration of errors raised while receiving a webhook delivery or syncing one of its events.
/// Authentication and parse errors reject the whole delivery; the rest are per-event and are
/// collected by the dispatcher instead of being returned to the sender.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("webhook secret is not configured")]
    MissingSecret,
    #[error("missing webhook signature")]
    MissingSignature,
    #[error("invalid webhook signature")]
    InvalidSignature,
    #[error("failed to parse webhook payload: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("failed to fetch object from CRM: {0}")]
    CrmError(#[from] CrmError),
    #[error("failed to map CRM object: {0}")]
    MappingError(#[from] MappingError),
    #[error("failed to write to cache: {0}")]
    CacheError(#[from] CacheError),
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let status = match self {
            SyncError::MissingSignature | SyncError::InvalidSignature => StatusCode::UNAUTHORIZED,

            SyncError::MissingSecret
            | SyncError::ParseError(_)
            | SyncError::CrmError(_)
            | SyncError::MappingError(_)
            | SyncError::CacheError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (
            status,
            Json(ErrorResponse {
                success: false,
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
