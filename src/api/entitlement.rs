//! Entitlement query endpoint
//!
//! `GET /api/entitlement` answers whether the caller may stream an item,
//! without consuming a view. Clients poll this before rendering a play
//! button; the stream endpoint is what actually burns a view.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::catalog::ItemType;
use crate::error::AppResult;
use crate::middleware::identity::RequestIdentity;
use crate::services::{AccessDecision, DenialReason, EntitlementService};

#[derive(Clone)]
pub struct EntitlementState {
    pub entitlement: EntitlementService,
}

pub fn router(state: EntitlementState) -> Router {
    Router::new()
        .route("/api/entitlement", get(check_entitlement))
        .with_state(state)
}

// ============================================================================
// Request / response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct EntitlementQuery {
    pub item_id: Uuid,
    pub item_type: ItemType,
    /// Container the client claims covers this item. An order against it
    /// grants inherited access for container types that allow it.
    #[serde(default)]
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessStatus {
    Authorized,
    NotPurchased,
    Expired,
}

#[derive(Debug, Serialize)]
pub struct EntitlementResponse {
    pub status: AccessStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_views: Option<i32>,
}

impl From<AccessDecision> for EntitlementResponse {
    fn from(decision: AccessDecision) -> Self {
        match decision {
            AccessDecision::Granted {
                order_id,
                expires_at,
                remaining_views,
            } => Self {
                status: AccessStatus::Authorized,
                order_id: Some(order_id),
                expires_at,
                remaining_views,
            },
            AccessDecision::Denied { reason } => Self {
                status: match reason {
                    DenialReason::NotPurchased => AccessStatus::NotPurchased,
                    DenialReason::Expired => AccessStatus::Expired,
                },
                order_id: None,
                expires_at: None,
                remaining_views: None,
            },
        }
    }
}

// ============================================================================
// Handler
// ============================================================================

pub async fn check_entitlement(
    State(state): State<EntitlementState>,
    identity: RequestIdentity,
    Query(query): Query<EntitlementQuery>,
) -> AppResult<Json<EntitlementResponse>> {
    info!(
        user_id = %identity.user_id,
        item_id = %query.item_id,
        item_type = %query.item_type,
        parent_id = ?query.parent_id,
        "Entitlement check"
    );

    let decision = state
        .entitlement
        .check_access(
            identity.user_id,
            query.item_type,
            query.item_id,
            query.parent_id,
        )
        .await
        .map_err(|e| identity.tag(e))?;

    Ok(Json(decision.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn granted_decision_serializes_as_authorized() {
        let order_id = Uuid::new_v4();
        let response = EntitlementResponse::from(AccessDecision::Granted {
            order_id,
            expires_at: None,
            remaining_views: Some(3),
        });

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "authorized");
        assert_eq!(json["remaining_views"], 3);
        assert!(json.get("expires_at").is_none());
    }

    #[test]
    fn denial_reasons_map_to_distinct_statuses() {
        let not_purchased = EntitlementResponse::from(AccessDecision::Denied {
            reason: DenialReason::NotPurchased,
        });
        let expired = EntitlementResponse::from(AccessDecision::Denied {
            reason: DenialReason::Expired,
        });

        assert_eq!(not_purchased.status, AccessStatus::NotPurchased);
        assert_eq!(expired.status, AccessStatus::Expired);
        assert!(not_purchased.order_id.is_none());
    }
}
