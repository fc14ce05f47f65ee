//! Actor identity extractor for Axum handlers.
//!
//! Identity is not authenticated by this crate: an upstream gateway is
//! expected to validate the caller and forward the result as headers. This
//! extractor only parses that header pair into a typed value.

use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::errors::AppError;
use crate::AppState;

/// Caller identity forwarded by the upstream gateway.
///
/// Use as an Axum extractor in handlers that require a known actor:
/// ```ignore
/// async fn handler(actor: CurrentActor) -> impl IntoResponse { ... }
/// ```
#[derive(Debug, Clone)]
pub struct CurrentActor {
    pub id: Uuid,
    pub org_id: Option<Uuid>,
}

impl FromRequestParts<AppState> for CurrentActor {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let raw_id = parts
            .headers
            .get("X-Actor-Id")
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::Unauthorized)?;

        let id: Uuid = raw_id.parse().map_err(|_| AppError::Unauthorized)?;

        let org_id = parts
            .headers
            .get("X-Actor-Org")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok());

        Ok(CurrentActor { id, org_id })
    }
}
