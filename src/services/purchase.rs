//! Purchase orchestration.
//!
//! Routes wallet and card checkouts through pricing, payment, entitlement
//! and audit as one ordered flow. Money always moves before entitlement is
//! written; when the entitlement write fails afterwards the flow records a
//! partial failure for the reconciliation worker instead of losing the
//! payment.

use bigdecimal::BigDecimal;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::catalog::{ItemResolver, ItemTerms, ItemType, ResolvedItem};
use crate::currency::{Currency, AMOUNT_SCALE};
use crate::database::repository::{
    AuditAppend, DebitOutcome, DiscountLedger, Order, OrderDraft, OrderLedger, PaymentKind,
    PurchaseAudit, PurchaseDraft, PurchaseOutcome, TopUpOutcome, WalletLedger,
};
use crate::error::{AppError, AppResult};
use crate::gateway::{GatewayError, PaymentVerifier, VerifiedCharge};
use crate::services::notification::{Notifier, PurchaseEvent};

// ============================================================================
// Request / receipt types
// ============================================================================

/// A checkout paid from the prepaid wallet.
#[derive(Debug, Clone)]
pub struct WalletCheckout {
    pub user_id: Uuid,
    pub item_type: ItemType,
    pub item_id: Uuid,
    /// Currency the caller wants to be charged in.
    pub currency: Currency,
    /// `Some` turns the checkout into a donation of that amount: money moves
    /// and is logged, but no entitlement is created.
    pub donation_amount: Option<BigDecimal>,
    pub discount_code: Option<String>,
}

/// A checkout paid at the card gateway, presented for server-side
/// verification.
#[derive(Debug, Clone)]
pub struct CardCheckout {
    pub user_id: Uuid,
    pub item_type: ItemType,
    pub item_id: Uuid,
    /// Fallback pricing currency when the gateway omits one.
    pub currency: Currency,
    /// Gateway transaction id to verify.
    pub transaction_id: String,
    /// Merchant reference the client claims it paid under.
    pub tx_ref: String,
    pub is_donation: bool,
    /// Client-supplied terms, applied only where the catalog leaves the
    /// corresponding term unset.
    pub fallback_terms: ItemTerms,
}

/// A wallet top-up paid at the card gateway.
#[derive(Debug, Clone)]
pub struct TopUpRequest {
    pub user_id: Uuid,
    pub currency: Currency,
    pub amount: BigDecimal,
    pub transaction_id: String,
    pub tx_ref: String,
}

/// What a completed checkout produced.
#[derive(Debug, Clone)]
pub struct PurchaseReceipt {
    /// `None` for donations, which never create entitlement.
    pub order: Option<Order>,
    pub kind: PaymentKind,
    pub amount: BigDecimal,
    pub currency: Currency,
    /// Remaining spendable balance after a wallet debit.
    pub wallet_balance: Option<BigDecimal>,
    /// True when this transaction reference had already been processed and
    /// nothing was charged or granted again.
    pub already_processed: bool,
}

#[derive(Debug, Clone)]
pub struct TopUpReceipt {
    pub currency: Currency,
    pub new_balance: BigDecimal,
    pub already_processed: bool,
}

// ============================================================================
// Service
// ============================================================================

#[derive(Clone)]
pub struct PurchaseService {
    resolver: ItemResolver,
    wallets: Arc<dyn WalletLedger>,
    orders: Arc<dyn OrderLedger>,
    discounts: Arc<dyn DiscountLedger>,
    audit: Arc<dyn PurchaseAudit>,
    verifier: Option<Arc<dyn PaymentVerifier>>,
    notifier: Arc<dyn Notifier>,
}

impl PurchaseService {
    pub fn new(
        resolver: ItemResolver,
        wallets: Arc<dyn WalletLedger>,
        orders: Arc<dyn OrderLedger>,
        discounts: Arc<dyn DiscountLedger>,
        audit: Arc<dyn PurchaseAudit>,
        verifier: Option<Arc<dyn PaymentVerifier>>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            resolver,
            wallets,
            orders,
            discounts,
            audit,
            verifier,
            notifier,
        }
    }

    // =========================================================================
    // Wallet path
    // =========================================================================

    pub async fn wallet_checkout(&self, checkout: WalletCheckout) -> AppResult<PurchaseReceipt> {
        let resolved = self
            .resolver
            .resolve(checkout.item_type, checkout.item_id)
            .await?;

        let (kind, amount) = match &checkout.donation_amount {
            Some(amount) => {
                if amount <= &BigDecimal::from(0) {
                    return Err(AppError::invalid_amount(
                        amount,
                        "donation amount must be positive",
                    ));
                }
                (PaymentKind::Donation, amount.clone())
            }
            None => {
                let price = resolved.item.prices.price_in(checkout.currency).clone();
                let amount = match &checkout.discount_code {
                    Some(code) => self.apply_discount(&price, code).await?,
                    None => price,
                };
                (PaymentKind::Wallet, amount)
            }
        };

        // Debit first; entitlement is only ever written against money that
        // actually moved.
        let wallet_balance = match self
            .wallets
            .debit(checkout.user_id, checkout.currency, &amount)
            .await?
        {
            DebitOutcome::Debited { new_balance } => new_balance,
            DebitOutcome::Insufficient { available } => {
                return Err(AppError::insufficient_funds(available, &amount));
            }
        };

        if kind == PaymentKind::Donation {
            let record_outcome = self
                .append_audit(&checkout_draft(
                    checkout.user_id,
                    Some(&resolved),
                    kind,
                    &amount,
                    checkout.currency,
                    None,
                    None,
                    PurchaseOutcome::Completed,
                    None,
                ))
                .await;
            if let Err(e) = record_outcome {
                warn!(error = %e, "donation audit append failed");
            }

            info!(
                user_id = %checkout.user_id,
                item_id = %checkout.item_id,
                amount = %amount,
                currency = %checkout.currency,
                "Donation completed"
            );
            self.notify_later(event_for(&checkout.user_id, Some(&resolved), kind, &amount, checkout.currency));

            return Ok(PurchaseReceipt {
                order: None,
                kind,
                amount,
                currency: checkout.currency,
                wallet_balance: Some(wallet_balance),
                already_processed: false,
            });
        }

        let now = Utc::now();
        let draft = OrderDraft {
            user_id: checkout.user_id,
            item_id: checkout.item_id,
            item_type: checkout.item_type,
            payment_kind: PaymentKind::Wallet,
            paid_price: amount.clone(),
            paid_currency: checkout.currency,
            tx_ref: None,
            expires_at: resolved.item.terms.expires_at(now),
            remaining_views: resolved.item.terms.view_allotment,
        };

        let order = match self.orders.create_or_renew(draft).await {
            Ok(order) => order,
            Err(e) => {
                return Err(self
                    .record_partial_failure(
                        checkout.user_id,
                        Some(&resolved),
                        PaymentKind::Wallet,
                        &amount,
                        checkout.currency,
                        None,
                        &e.to_string(),
                    )
                    .await);
            }
        };

        if let Err(e) = self
            .append_audit(&checkout_draft(
                checkout.user_id,
                Some(&resolved),
                PaymentKind::Wallet,
                &amount,
                checkout.currency,
                None,
                Some(order.id),
                PurchaseOutcome::Completed,
                None,
            ))
            .await
        {
            warn!(order_id = %order.id, error = %e, "purchase audit append failed");
        }

        info!(
            user_id = %checkout.user_id,
            item_id = %checkout.item_id,
            order_id = %order.id,
            amount = %amount,
            currency = %checkout.currency,
            renewed = order.renewed_at.is_some(),
            "Wallet purchase completed"
        );
        self.notify_later(event_for(
            &checkout.user_id,
            Some(&resolved),
            PaymentKind::Wallet,
            &amount,
            checkout.currency,
        ));

        Ok(PurchaseReceipt {
            order: Some(order),
            kind: PaymentKind::Wallet,
            amount,
            currency: checkout.currency,
            wallet_balance: Some(wallet_balance),
            already_processed: false,
        })
    }

    // =========================================================================
    // Card path
    // =========================================================================

    pub async fn card_checkout(&self, checkout: CardCheckout) -> AppResult<PurchaseReceipt> {
        if checkout.transaction_id.trim().is_empty() {
            return Err(AppError::missing_field("transaction_id"));
        }
        if checkout.tx_ref.trim().is_empty() {
            return Err(AppError::missing_field("tx_ref"));
        }

        let resolved = self
            .resolver
            .resolve(checkout.item_type, checkout.item_id)
            .await?;

        // A reference that already completed is a client retry; answer it
        // without touching the gateway or writing the ledgers again. The
        // retry still carries the order the first notification created.
        if let Some(existing) = self.audit.find_completed_by_ref(&checkout.tx_ref).await? {
            info!(
                tx_ref = %checkout.tx_ref,
                record_id = %existing.id,
                "Duplicate card notification ignored"
            );
            let order = if existing.kind.grants_entitlement() {
                self.orders
                    .find_active(checkout.user_id, checkout.item_id, checkout.item_type)
                    .await?
            } else {
                None
            };
            return Ok(PurchaseReceipt {
                order,
                kind: existing.kind,
                amount: existing.amount,
                currency: existing.currency,
                wallet_balance: None,
                already_processed: true,
            });
        }

        let charge = self
            .verify_charge(&checkout.transaction_id, &checkout.tx_ref)
            .await?;

        let kind = if checkout.is_donation {
            PaymentKind::Donation
        } else {
            PaymentKind::Card
        };
        let currency = charge.currency.unwrap_or(checkout.currency);
        let amount = match charge.amount {
            Some(amount) => amount,
            None => resolved.item.prices.price_in(currency).clone(),
        };

        if kind == PaymentKind::Donation {
            let append = self
                .append_audit(&checkout_draft(
                    checkout.user_id,
                    Some(&resolved),
                    kind,
                    &amount,
                    currency,
                    Some(&checkout.tx_ref),
                    None,
                    PurchaseOutcome::Completed,
                    None,
                ))
                .await?;
            let already_processed = matches!(append, AuditAppend::AlreadyRecorded(_));

            if !already_processed {
                info!(
                    user_id = %checkout.user_id,
                    item_id = %checkout.item_id,
                    tx_ref = %checkout.tx_ref,
                    amount = %amount,
                    "Card donation completed"
                );
                self.notify_later(event_for(&checkout.user_id, Some(&resolved), kind, &amount, currency));
            }

            return Ok(PurchaseReceipt {
                order: None,
                kind,
                amount,
                currency,
                wallet_balance: None,
                already_processed,
            });
        }

        let now = Utc::now();
        let terms = resolved.item.terms.or(checkout.fallback_terms);
        let draft = OrderDraft {
            user_id: checkout.user_id,
            item_id: checkout.item_id,
            item_type: checkout.item_type,
            payment_kind: PaymentKind::Card,
            paid_price: amount.clone(),
            paid_currency: currency,
            tx_ref: Some(checkout.tx_ref.clone()),
            expires_at: terms.expires_at(now),
            remaining_views: terms.view_allotment,
        };

        let order = match self.orders.create_or_renew(draft).await {
            Ok(order) => order,
            Err(e) => {
                return Err(self
                    .record_partial_failure(
                        checkout.user_id,
                        Some(&resolved),
                        PaymentKind::Card,
                        &amount,
                        currency,
                        Some(&checkout.tx_ref),
                        &e.to_string(),
                    )
                    .await);
            }
        };

        let append = self
            .append_audit(&checkout_draft(
                checkout.user_id,
                Some(&resolved),
                PaymentKind::Card,
                &amount,
                currency,
                Some(&checkout.tx_ref),
                Some(order.id),
                PurchaseOutcome::Completed,
                None,
            ))
            .await?;
        let already_processed = matches!(append, AuditAppend::AlreadyRecorded(_));

        if !already_processed {
            info!(
                user_id = %checkout.user_id,
                item_id = %checkout.item_id,
                order_id = %order.id,
                tx_ref = %checkout.tx_ref,
                amount = %amount,
                currency = %currency,
                renewed = order.renewed_at.is_some(),
                "Card purchase completed"
            );
            self.notify_later(event_for(
                &checkout.user_id,
                Some(&resolved),
                PaymentKind::Card,
                &amount,
                currency,
            ));
        }

        Ok(PurchaseReceipt {
            order: Some(order),
            kind: PaymentKind::Card,
            amount,
            currency,
            wallet_balance: None,
            already_processed,
        })
    }

    // =========================================================================
    // Top-up path
    // =========================================================================

    pub async fn top_up(&self, request: TopUpRequest) -> AppResult<TopUpReceipt> {
        if request.transaction_id.trim().is_empty() {
            return Err(AppError::missing_field("transaction_id"));
        }
        if request.tx_ref.trim().is_empty() {
            return Err(AppError::missing_field("tx_ref"));
        }
        if request.amount <= BigDecimal::from(0) {
            return Err(AppError::invalid_amount(
                &request.amount,
                "top-up amount must be positive",
            ));
        }

        let charge = self
            .verify_charge(&request.transaction_id, &request.tx_ref)
            .await?;

        // The gateway's word on amount and currency is final; a claim that
        // does not match it buys nothing.
        if let Some(charged) = &charge.amount {
            if charged != &request.amount {
                return Err(AppError::verification_failed(
                    &request.tx_ref,
                    format!(
                        "charged amount {} does not match requested {}",
                        charged, request.amount
                    ),
                ));
            }
        }
        if let Some(charged_currency) = charge.currency {
            if charged_currency != request.currency {
                return Err(AppError::verification_failed(
                    &request.tx_ref,
                    format!(
                        "charged currency {} does not match requested {}",
                        charged_currency, request.currency
                    ),
                ));
            }
        }

        let outcome = self
            .wallets
            .credit_from_topup(
                request.user_id,
                request.currency,
                &request.amount,
                &request.tx_ref,
            )
            .await?;

        let receipt = match outcome {
            TopUpOutcome::Credited { new_balance } => {
                info!(
                    user_id = %request.user_id,
                    tx_ref = %request.tx_ref,
                    amount = %request.amount,
                    currency = %request.currency,
                    "Wallet top-up applied"
                );
                self.notify_later(PurchaseEvent {
                    user_id: request.user_id,
                    item_id: None,
                    item_title: None,
                    kind: PaymentKind::TopUp,
                    amount: request.amount.clone(),
                    currency: request.currency,
                    recipients: vec![],
                });
                TopUpReceipt {
                    currency: request.currency,
                    new_balance,
                    already_processed: false,
                }
            }
            TopUpOutcome::AlreadyApplied { new_balance } => {
                info!(
                    user_id = %request.user_id,
                    tx_ref = %request.tx_ref,
                    "Duplicate top-up notification ignored"
                );
                TopUpReceipt {
                    currency: request.currency,
                    new_balance,
                    already_processed: true,
                }
            }
        };

        Ok(receipt)
    }

    // =========================================================================
    // Shared steps
    // =========================================================================

    /// Confirms a charge at the gateway and checks the claimed reference
    /// against the one the gateway settled.
    async fn verify_charge(
        &self,
        transaction_id: &str,
        claimed_tx_ref: &str,
    ) -> AppResult<VerifiedCharge> {
        let verifier = self
            .verifier
            .as_ref()
            .ok_or(GatewayError::Unconfigured)
            .map_err(AppError::from)?;

        let charge = verifier.verify(transaction_id).await.map_err(AppError::from)?;

        if !charge.is_successful() {
            let reason = charge
                .failure_reason
                .clone()
                .unwrap_or_else(|| format!("charge status is {}", charge.status.as_str()));
            return Err(AppError::verification_failed(claimed_tx_ref, reason));
        }

        match charge.tx_ref.as_deref() {
            Some(settled) if settled == claimed_tx_ref => Ok(charge),
            Some(settled) => Err(AppError::verification_failed(
                claimed_tx_ref,
                format!("gateway settled reference '{}' instead", settled),
            )),
            None => Err(AppError::verification_failed(
                claimed_tx_ref,
                "gateway reported no transaction reference",
            )),
        }
    }

    async fn apply_discount(&self, price: &BigDecimal, code: &str) -> AppResult<BigDecimal> {
        let discount = self
            .discounts
            .validate(code)
            .await?
            .ok_or_else(|| AppError::invalid_discount_code(code))?;

        let factor = BigDecimal::from(100 - discount.percentage);
        let discounted = (price * factor / BigDecimal::from(100))
            .with_scale_round(AMOUNT_SCALE, bigdecimal::RoundingMode::HalfUp);

        info!(
            code = %discount.code,
            percentage = discount.percentage,
            usage_count = discount.usage_count,
            "Discount applied"
        );
        Ok(discounted)
    }

    async fn append_audit(&self, draft: &PurchaseDraft) -> AppResult<AuditAppend> {
        Ok(self.audit.append(draft.clone()).await?)
    }

    /// Money moved but the entitlement write failed: record it for the
    /// reconciliation sweep and surface the retryable error.
    async fn record_partial_failure(
        &self,
        user_id: Uuid,
        resolved: Option<&ResolvedItem>,
        kind: PaymentKind,
        amount: &BigDecimal,
        currency: Currency,
        tx_ref: Option<&str>,
        detail: &str,
    ) -> AppError {
        error!(
            user_id = %user_id,
            tx_ref = tx_ref.unwrap_or("-"),
            detail = %detail,
            "Entitlement write failed after payment; recording partial failure"
        );

        let draft = checkout_draft(
            user_id,
            resolved,
            kind,
            amount,
            currency,
            tx_ref,
            None,
            PurchaseOutcome::PartialFailure,
            Some(detail),
        );
        if let Err(e) = self.audit.append(draft).await {
            error!(error = %e, "Partial-failure audit append failed");
        }

        AppError::partial_failure(tx_ref.map(|s| s.to_string()))
    }

    fn notify_later(&self, event: PurchaseEvent) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            notifier.purchase_completed(&event).await;
        });
    }
}

fn event_for(
    user_id: &Uuid,
    resolved: Option<&ResolvedItem>,
    kind: PaymentKind,
    amount: &BigDecimal,
    currency: Currency,
) -> PurchaseEvent {
    PurchaseEvent {
        user_id: *user_id,
        item_id: resolved.map(|r| r.item.id),
        item_title: resolved.map(|r| r.item.title.clone()),
        kind,
        amount: amount.clone(),
        currency,
        recipients: resolved.map(|r| r.recipients.clone()).unwrap_or_default(),
    }
}

#[allow(clippy::too_many_arguments)]
fn checkout_draft(
    user_id: Uuid,
    resolved: Option<&ResolvedItem>,
    kind: PaymentKind,
    amount: &BigDecimal,
    currency: Currency,
    tx_ref: Option<&str>,
    order_id: Option<Uuid>,
    outcome: PurchaseOutcome,
    detail: Option<&str>,
) -> PurchaseDraft {
    PurchaseDraft {
        user_id,
        item_id: resolved.map(|r| r.item.id),
        item_type: resolved.map(|r| r.item.item_type),
        kind,
        amount: amount.clone(),
        currency,
        tx_ref: tx_ref.map(|s| s.to_string()),
        order_id,
        outcome,
        detail: detail.map(|s| s.to_string()),
    }
}
