//! Storage ports for the entitlement and payment ledgers, plus the entities
//! they exchange. Postgres adapters live in the sibling `*_repository`
//! modules; `memory` provides a single in-process implementation of every
//! port for tests and database-less runs.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::catalog::{CatalogItem, ItemType};
use crate::currency::Currency;
use crate::database::error::DatabaseError;

// ============================================================================
// Entities
// ============================================================================

/// How a purchase was paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    Wallet,
    Card,
    Donation,
    TopUp,
}

impl PaymentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentKind::Wallet => "wallet",
            PaymentKind::Card => "card",
            PaymentKind::Donation => "donation",
            PaymentKind::TopUp => "topup",
        }
    }

    pub fn from_db_tag(tag: &str) -> Option<Self> {
        match tag {
            "wallet" => Some(PaymentKind::Wallet),
            "card" => Some(PaymentKind::Card),
            "donation" => Some(PaymentKind::Donation),
            "topup" => Some(PaymentKind::TopUp),
            _ => None,
        }
    }

    /// Donations never grant entitlement.
    pub fn grants_entitlement(&self) -> bool {
        matches!(self, PaymentKind::Wallet | PaymentKind::Card)
    }
}

impl fmt::Display for PaymentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_tag(s.trim().to_ascii_lowercase().as_str())
            .ok_or_else(|| format!("unknown payment kind: {s}"))
    }
}

/// One (user, item) entitlement. At most one non-donation order exists per
/// pair; repurchase renews this record in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub item_id: Uuid,
    pub item_type: ItemType,
    pub payment_kind: PaymentKind,
    pub paid_price: BigDecimal,
    pub paid_currency: Currency,
    /// External gateway reference for card purchases.
    pub tx_ref: Option<String>,
    /// Absolute entitlement expiry; `None` never expires.
    pub expires_at: Option<DateTime<Utc>>,
    /// Remaining stream grants; `None` is uncapped.
    pub remaining_views: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub renewed_at: Option<DateTime<Utc>>,
}

/// Input for [`OrderLedger::create_or_renew`].
#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub user_id: Uuid,
    pub item_id: Uuid,
    pub item_type: ItemType,
    pub payment_kind: PaymentKind,
    pub paid_price: BigDecimal,
    pub paid_currency: Currency,
    pub tx_ref: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub remaining_views: Option<i32>,
}

/// Result of one atomic view decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewOutcome {
    /// Counter decremented; this many grants remain.
    Remaining(i32),
    /// No counter on the order; nothing to consume.
    Uncapped,
    /// Counter present and already at zero.
    Exhausted,
    /// No such order.
    Missing,
}

/// One per-currency wallet bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct WalletBalance {
    pub currency: Currency,
    pub amount: BigDecimal,
}

/// Result of an atomic wallet debit.
#[derive(Debug, Clone, PartialEq)]
pub enum DebitOutcome {
    /// Debit applied; remaining spendable balance expressed in the debit
    /// currency.
    Debited { new_balance: BigDecimal },
    /// Converted holdings were below the requested amount; nothing changed.
    Insufficient { available: BigDecimal },
}

/// Result of a replay-safe top-up credit.
#[derive(Debug, Clone, PartialEq)]
pub enum TopUpOutcome {
    Credited { new_balance: BigDecimal },
    /// This transaction reference was already applied; balance unchanged.
    AlreadyApplied { new_balance: BigDecimal },
}

/// A coupon code with its running usage counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscountCode {
    pub code: String,
    pub percentage: i32,
    pub usage_count: i64,
}

/// Terminal state of a purchase audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOutcome {
    Completed,
    /// Money moved but the entitlement write failed; reconciliation target.
    PartialFailure,
}

impl PurchaseOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseOutcome::Completed => "completed",
            PurchaseOutcome::PartialFailure => "partial_failure",
        }
    }

    pub fn from_db_tag(tag: &str) -> Option<Self> {
        match tag {
            "completed" => Some(PurchaseOutcome::Completed),
            "partial_failure" => Some(PurchaseOutcome::PartialFailure),
            _ => None,
        }
    }
}

/// Append-only audit row for one money-moving event. Orders are the current
/// entitlement projection; these records keep the purchase history renewal
/// would otherwise overwrite.
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub item_id: Option<Uuid>,
    pub item_type: Option<ItemType>,
    pub kind: PaymentKind,
    pub amount: BigDecimal,
    pub currency: Currency,
    pub tx_ref: Option<String>,
    pub order_id: Option<Uuid>,
    pub outcome: PurchaseOutcome,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for [`PurchaseAudit::append`].
#[derive(Debug, Clone)]
pub struct PurchaseDraft {
    pub user_id: Uuid,
    pub item_id: Option<Uuid>,
    pub item_type: Option<ItemType>,
    pub kind: PaymentKind,
    pub amount: BigDecimal,
    pub currency: Currency,
    pub tx_ref: Option<String>,
    pub order_id: Option<Uuid>,
    pub outcome: PurchaseOutcome,
    pub detail: Option<String>,
}

/// Result of appending to the purchase audit.
#[derive(Debug, Clone, PartialEq)]
pub enum AuditAppend {
    Recorded(PurchaseRecord),
    /// A completed record with the same transaction reference already exists
    /// (duplicate purchase notification); the existing record is returned.
    AlreadyRecorded(PurchaseRecord),
}

// ============================================================================
// Ports
// ============================================================================

/// Read access to the priced catalog, one fetch per item-type variant.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn movie(&self, id: Uuid) -> Result<Option<CatalogItem>, DatabaseError>;
    async fn season(&self, id: Uuid) -> Result<Option<CatalogItem>, DatabaseError>;
    async fn episode(&self, id: Uuid) -> Result<Option<CatalogItem>, DatabaseError>;
    async fn course(&self, id: Uuid) -> Result<Option<CatalogItem>, DatabaseError>;
    /// Recipient list of any catalog row (including non-purchasable
    /// containers); empty when the row is missing.
    async fn recipients_of(&self, id: Uuid) -> Result<Vec<String>, DatabaseError>;
}

/// Per-user, per-currency prepaid balances. Every mutating operation is
/// atomic with respect to concurrent operations on the same user.
#[async_trait]
pub trait WalletLedger: Send + Sync {
    async fn balances(&self, user_id: Uuid) -> Result<Vec<WalletBalance>, DatabaseError>;

    /// Atomically checks the converted total of all buckets against `amount`
    /// and deducts it, draining the requested-currency bucket first. Fails
    /// closed: on [`DebitOutcome::Insufficient`] nothing is mutated.
    async fn debit(
        &self,
        user_id: Uuid,
        currency: Currency,
        amount: &BigDecimal,
    ) -> Result<DebitOutcome, DatabaseError>;

    /// Unconditional credit; returns the bucket balance after the credit.
    async fn credit(
        &self,
        user_id: Uuid,
        currency: Currency,
        amount: &BigDecimal,
    ) -> Result<BigDecimal, DatabaseError>;

    /// Credit tied to an external transaction reference: the reference is
    /// claimed in the purchase audit and the credit applied as one atomic
    /// step, so a replayed notification credits at most once.
    async fn credit_from_topup(
        &self,
        user_id: Uuid,
        currency: Currency,
        amount: &BigDecimal,
        tx_ref: &str,
    ) -> Result<TopUpOutcome, DatabaseError>;
}

/// The entitlement store.
#[async_trait]
pub trait OrderLedger: Send + Sync {
    /// Active non-donation order for exactly (user, item, type).
    async fn find_active(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        item_type: ItemType,
    ) -> Result<Option<Order>, DatabaseError>;

    /// Entitlement lookup. With `parent_id` it matches the item itself or the
    /// claimed container under a type that grants child access; without it,
    /// only an exact (user, item, type) order. Donation orders are never
    /// returned.
    async fn find_entitling(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        item_type: ItemType,
        parent_id: Option<Uuid>,
    ) -> Result<Option<Order>, DatabaseError>;

    /// Creates the (user, item) order or renews the existing one in place,
    /// resetting expiry and view counter to the draft's terms. The same order
    /// id survives renewal.
    async fn create_or_renew(&self, draft: OrderDraft) -> Result<Order, DatabaseError>;

    /// Atomic conditional decrement of the remaining-views counter.
    async fn decrement_view(&self, order_id: Uuid) -> Result<ViewOutcome, DatabaseError>;

    /// Non-donation purchase history for one user, newest first.
    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<Order>, DatabaseError>;
}

/// Coupon codes with usage accounting.
#[async_trait]
pub trait DiscountLedger: Send + Sync {
    /// Looks up `code` and, when present, atomically increments its usage
    /// counter; returns the post-increment row. `None` for unknown codes.
    async fn validate(&self, code: &str) -> Result<Option<DiscountCode>, DatabaseError>;

    /// Side-effect-free lookup.
    async fn peek(&self, code: &str) -> Result<Option<DiscountCode>, DatabaseError>;
}

/// Append-only purchase audit; also the idempotency key store for external
/// transaction references.
#[async_trait]
pub trait PurchaseAudit: Send + Sync {
    async fn append(&self, draft: PurchaseDraft) -> Result<AuditAppend, DatabaseError>;

    async fn find_completed_by_ref(
        &self,
        tx_ref: &str,
    ) -> Result<Option<PurchaseRecord>, DatabaseError>;

    /// Oldest partial-failure records, for the reconciliation sweep.
    async fn partial_failures(&self, limit: i64) -> Result<Vec<PurchaseRecord>, DatabaseError>;

    /// Transitions partial_failure → completed, optionally attaching the
    /// reconciled order. Returns false if the record was not in
    /// partial_failure state (already reconciled elsewhere).
    async fn mark_completed(
        &self,
        record_id: Uuid,
        order_id: Option<Uuid>,
    ) -> Result<bool, DatabaseError>;
}
