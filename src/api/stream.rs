//! Stream issuance endpoint
//!
//! `POST /api/stream/url` checks entitlement, burns one view on metered
//! orders, and returns a time-limited signed media URL. The decrement lands
//! before the URL is produced, so an exhausted order never gets a URL.

use axum::{extract::State, routing::post, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::ItemType;
use crate::error::AppResult;
use crate::middleware::identity::RequestIdentity;
use crate::services::{StreamGrant, StreamingService};

#[derive(Clone)]
pub struct StreamState {
    pub streaming: StreamingService,
}

pub fn router(state: StreamState) -> Router {
    Router::new()
        .route("/api/stream/url", post(issue_stream_url))
        .with_state(state)
}

// ============================================================================
// Request / response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StreamUrlRequest {
    pub item_id: Uuid,
    pub item_type: ItemType,
    /// Container claim, mirrored from the entitlement query shape. An order
    /// against it grants inherited access for container types that allow it.
    #[serde(default)]
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct StreamUrlResponse {
    pub url: String,
    pub url_expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_views: Option<i32>,
}

impl From<StreamGrant> for StreamUrlResponse {
    fn from(grant: StreamGrant) -> Self {
        Self {
            url: grant.url,
            url_expires_at: grant.url_expires_at,
            remaining_views: grant.remaining_views,
        }
    }
}

// ============================================================================
// Handler
// ============================================================================

pub async fn issue_stream_url(
    State(state): State<StreamState>,
    identity: RequestIdentity,
    Json(request): Json<StreamUrlRequest>,
) -> AppResult<Json<StreamUrlResponse>> {
    let streaming = state.streaming.clone();
    let user_id = identity.user_id;

    // The view decrement must land even if the caller goes away while the
    // grant is being issued.
    let grant = super::run_detached("stream issuance", async move {
        streaming
            .issue_stream(
                user_id,
                request.item_type,
                request.item_id,
                request.parent_id,
            )
            .await
    })
    .await
    .map_err(|e| identity.tag(e))?;

    Ok(Json(grant.into()))
}
