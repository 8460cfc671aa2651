//! Checkout endpoints
//!
//! `POST /api/purchase/wallet` debits the prepaid wallet; `POST
//! /api/purchase/card` verifies an already-made gateway charge. Prices come
//! from the catalog, never from the request body; the only caller-chosen
//! amount is a donation.

use axum::{extract::State, routing::post, Json, Router};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::{ItemTerms, ItemType};
use crate::currency::Currency;
use crate::database::repository::PaymentKind;
use crate::error::{AppError, AppResult};
use crate::middleware::identity::RequestIdentity;
use crate::services::{CardCheckout, PurchaseReceipt, PurchaseService, WalletCheckout};

#[derive(Clone)]
pub struct PurchaseState {
    pub purchases: PurchaseService,
    pub default_currency: Currency,
}

pub fn router(state: PurchaseState) -> Router {
    Router::new()
        .route("/api/purchase/wallet", post(wallet_purchase))
        .route("/api/purchase/card", post(card_purchase))
        .with_state(state)
}

// ============================================================================
// Request / response types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutKind {
    #[default]
    Purchase,
    Donation,
}

#[derive(Debug, Deserialize)]
pub struct WalletPurchaseRequest {
    pub item_id: Uuid,
    pub item_type: ItemType,
    #[serde(default)]
    pub payment_type: CheckoutKind,
    /// Donation amount. Ignored for purchases, which are always priced from
    /// the catalog.
    #[serde(default)]
    pub price: Option<BigDecimal>,
    #[serde(default)]
    pub discount_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CardPurchaseRequest {
    pub item_id: Uuid,
    pub item_type: ItemType,
    /// Gateway transaction id to verify.
    pub payment_id: String,
    /// Merchant reference the client paid under.
    pub tx_ref: String,
    #[serde(default)]
    pub payment_type: CheckoutKind,
    /// Entitlement span in days, used only when the catalog entry leaves it
    /// unset.
    #[serde(default)]
    pub item_span: Option<i64>,
    #[serde(default)]
    pub item_valid_views: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    Completed,
    AlreadyProcessed,
}

#[derive(Debug, Serialize)]
pub struct PurchaseResponse {
    pub status: PurchaseStatus,
    pub kind: PaymentKind,
    /// Absent for donations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    pub amount: BigDecimal,
    pub currency: Currency,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_balance: Option<BigDecimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_views: Option<i32>,
}

impl From<PurchaseReceipt> for PurchaseResponse {
    fn from(receipt: PurchaseReceipt) -> Self {
        let status = if receipt.already_processed {
            PurchaseStatus::AlreadyProcessed
        } else {
            PurchaseStatus::Completed
        };
        Self {
            status,
            kind: receipt.kind,
            order_id: receipt.order.as_ref().map(|o| o.id),
            amount: receipt.amount,
            currency: receipt.currency,
            wallet_balance: receipt.wallet_balance,
            expires_at: receipt.order.as_ref().and_then(|o| o.expires_at),
            remaining_views: receipt.order.as_ref().and_then(|o| o.remaining_views),
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn wallet_purchase(
    State(state): State<PurchaseState>,
    identity: RequestIdentity,
    Json(request): Json<WalletPurchaseRequest>,
) -> AppResult<Json<PurchaseResponse>> {
    let donation_amount = match request.payment_type {
        CheckoutKind::Donation => match request.price {
            Some(amount) => Some(amount),
            None => return Err(identity.tag(AppError::missing_field("price"))),
        },
        CheckoutKind::Purchase => None,
    };

    let checkout = WalletCheckout {
        user_id: identity.user_id,
        item_type: request.item_type,
        item_id: request.item_id,
        currency: identity.currency_or(state.default_currency),
        donation_amount,
        discount_code: request.discount_code,
    };

    let purchases = state.purchases.clone();
    let receipt = super::run_detached("wallet checkout", async move {
        purchases.wallet_checkout(checkout).await
    })
    .await
    .map_err(|e| identity.tag(e))?;

    Ok(Json(receipt.into()))
}

pub async fn card_purchase(
    State(state): State<PurchaseState>,
    identity: RequestIdentity,
    Json(request): Json<CardPurchaseRequest>,
) -> AppResult<Json<PurchaseResponse>> {
    let checkout = CardCheckout {
        user_id: identity.user_id,
        item_type: request.item_type,
        item_id: request.item_id,
        currency: identity.currency_or(state.default_currency),
        transaction_id: request.payment_id,
        tx_ref: request.tx_ref,
        is_donation: request.payment_type == CheckoutKind::Donation,
        fallback_terms: ItemTerms {
            expiration_span_days: request.item_span,
            view_allotment: request.item_valid_views,
        },
    };

    let purchases = state.purchases.clone();
    let receipt = super::run_detached("card checkout", async move {
        purchases.card_checkout(checkout).await
    })
    .await
    .map_err(|e| identity.tag(e))?;

    Ok(Json(receipt.into()))
}
