//! Order history endpoint
//!
//! `GET /api/orders` lists the caller's entitlement orders, newest first.
//! Donations never create orders, so they do not appear here; the purchase
//! audit is where donation history lives.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::catalog::ItemType;
use crate::currency::Currency;
use crate::database::repository::{Order, OrderLedger, PaymentKind};
use crate::error::AppResult;
use crate::middleware::identity::RequestIdentity;

#[derive(Clone)]
pub struct OrdersState {
    pub orders: Arc<dyn OrderLedger>,
}

pub fn router(state: OrdersState) -> Router {
    Router::new()
        .route("/api/orders", get(list_orders))
        .with_state(state)
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct OrderSummary {
    pub order_id: Uuid,
    pub item_id: Uuid,
    pub item_type: ItemType,
    pub payment_kind: PaymentKind,
    pub paid_price: BigDecimal,
    pub paid_currency: Currency,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_views: Option<i32>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renewed_at: Option<DateTime<Utc>>,
}

impl From<Order> for OrderSummary {
    fn from(order: Order) -> Self {
        Self {
            order_id: order.id,
            item_id: order.item_id,
            item_type: order.item_type,
            payment_kind: order.payment_kind,
            paid_price: order.paid_price,
            paid_currency: order.paid_currency,
            tx_ref: order.tx_ref,
            expires_at: order.expires_at,
            remaining_views: order.remaining_views,
            created_at: order.created_at,
            renewed_at: order.renewed_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OrdersResponse {
    pub orders: Vec<OrderSummary>,
}

// ============================================================================
// Handler
// ============================================================================

pub async fn list_orders(
    State(state): State<OrdersState>,
    identity: RequestIdentity,
) -> AppResult<Json<OrdersResponse>> {
    let orders = state
        .orders
        .find_by_user(identity.user_id)
        .await
        .map_err(|e| identity.tag(e.into()))?;

    Ok(Json(OrdersResponse {
        orders: orders.into_iter().map(OrderSummary::from).collect(),
    }))
}
