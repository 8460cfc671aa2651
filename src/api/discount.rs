//! Discount code endpoints
//!
//! `POST /api/discount/verify` is the redemption contract: a successful
//! verify counts as a use and bumps the counter. `GET /api/discount/{code}`
//! reads the same row without touching the counter.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::database::repository::{DiscountCode, DiscountLedger};
use crate::error::{AppError, AppResult};
use crate::middleware::identity::RequestIdentity;

#[derive(Clone)]
pub struct DiscountState {
    pub discounts: Arc<dyn DiscountLedger>,
}

pub fn router(state: DiscountState) -> Router {
    Router::new()
        .route("/api/discount/verify", post(verify_code))
        .route("/api/discount/{code}", get(lookup_code))
        .with_state(state)
}

// ============================================================================
// Request / response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct DiscountResponse {
    pub code: String,
    pub percentage: i32,
    pub usage_count: i64,
}

impl From<DiscountCode> for DiscountResponse {
    fn from(discount: DiscountCode) -> Self {
        Self {
            code: discount.code,
            percentage: discount.percentage,
            usage_count: discount.usage_count,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn verify_code(
    State(state): State<DiscountState>,
    identity: RequestIdentity,
    Json(request): Json<VerifyRequest>,
) -> AppResult<Json<DiscountResponse>> {
    if request.code.trim().is_empty() {
        return Err(identity.tag(AppError::missing_field("code")));
    }

    let discount = state
        .discounts
        .validate(&request.code)
        .await
        .map_err(|e| identity.tag(e.into()))?
        .ok_or_else(|| identity.tag(AppError::invalid_discount_code(&request.code)))?;

    Ok(Json(discount.into()))
}

pub async fn lookup_code(
    State(state): State<DiscountState>,
    identity: RequestIdentity,
    Path(code): Path<String>,
) -> AppResult<Json<DiscountResponse>> {
    let discount = state
        .discounts
        .peek(&code)
        .await
        .map_err(|e| identity.tag(e.into()))?
        .ok_or_else(|| identity.tag(AppError::invalid_discount_code(&code)))?;

    Ok(Json(discount.into()))
}
