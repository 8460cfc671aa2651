//! Wallet endpoints
//!
//! `GET /api/wallet/balance` reports the caller's per-currency buckets plus
//! their converted total; `POST /api/wallet/topup` credits a bucket after
//! verifying the gateway charge behind it.

use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::currency::{Currency, CurrencyConverter};
use crate::database::repository::WalletLedger;
use crate::error::AppResult;
use crate::middleware::identity::RequestIdentity;
use crate::services::{PurchaseService, TopUpRequest};

#[derive(Clone)]
pub struct WalletState {
    pub wallets: Arc<dyn WalletLedger>,
    pub purchases: PurchaseService,
    pub converter: Arc<CurrencyConverter>,
    pub default_currency: Currency,
}

pub fn router(state: WalletState) -> Router {
    Router::new()
        .route("/api/wallet/balance", get(get_balance))
        .route("/api/wallet/topup", post(top_up))
        .with_state(state)
}

// ============================================================================
// Request / response types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct BalanceEntry {
    pub currency: Currency,
    pub amount: BigDecimal,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub balances: Vec<BalanceEntry>,
    /// Currency the total is expressed in.
    pub currency: Currency,
    /// All buckets converted and summed.
    pub total: BigDecimal,
}

#[derive(Debug, Deserialize)]
pub struct TopUpApiRequest {
    /// Gateway transaction id to verify.
    pub payment_id: String,
    pub tx_ref: String,
    /// Amount the caller says was charged; verification rejects the top-up
    /// when the gateway disagrees.
    pub price: BigDecimal,
}

#[derive(Debug, Serialize)]
pub struct TopUpResponse {
    pub currency: Currency,
    pub new_balance: BigDecimal,
    /// False when this reference was credited by an earlier request.
    pub applied: bool,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn get_balance(
    State(state): State<WalletState>,
    identity: RequestIdentity,
) -> AppResult<Json<BalanceResponse>> {
    let target = identity.currency_or(state.default_currency);

    let buckets = state
        .wallets
        .balances(identity.user_id)
        .await
        .map_err(|e| identity.tag(e.into()))?;

    let mut total = BigDecimal::from(0);
    let mut balances = Vec::with_capacity(buckets.len());
    for bucket in buckets {
        total += state
            .converter
            .convert(&bucket.amount, bucket.currency, target)
            .map_err(|e| identity.tag(e.into()))?;
        balances.push(BalanceEntry {
            currency: bucket.currency,
            amount: bucket.amount,
        });
    }

    Ok(Json(BalanceResponse {
        balances,
        currency: target,
        total,
    }))
}

pub async fn top_up(
    State(state): State<WalletState>,
    identity: RequestIdentity,
    Json(request): Json<TopUpApiRequest>,
) -> AppResult<Json<TopUpResponse>> {
    let top_up = TopUpRequest {
        user_id: identity.user_id,
        currency: identity.currency_or(state.default_currency),
        amount: request.price,
        transaction_id: request.payment_id,
        tx_ref: request.tx_ref,
    };

    let purchases = state.purchases.clone();
    let receipt = super::run_detached("wallet top-up", async move {
        purchases.top_up(top_up).await
    })
    .await
    .map_err(|e| identity.tag(e))?;

    Ok(Json(TopUpResponse {
        currency: receipt.currency,
        new_balance: receipt.new_balance,
        applied: !receipt.already_processed,
    }))
}
