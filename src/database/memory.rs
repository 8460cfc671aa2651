//! In-process implementation of every storage port, for tests and for
//! running the service without a database. One mutex guards all state, so
//! each port operation is atomic exactly like its Postgres counterpart.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::catalog::{CatalogItem, ItemType};
use crate::currency::{Currency, CurrencyConverter};
use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::{
    AuditAppend, CatalogStore, DebitOutcome, DiscountCode, DiscountLedger, Order, OrderDraft,
    OrderLedger, PurchaseAudit, PurchaseDraft, PurchaseOutcome, PurchaseRecord, TopUpOutcome,
    ViewOutcome, WalletBalance, WalletLedger,
};

#[derive(Default)]
struct Inner {
    catalog: HashMap<Uuid, CatalogItem>,
    /// Recipient lists for non-purchasable container rows (shows).
    container_recipients: HashMap<Uuid, Vec<String>>,
    wallets: HashMap<(Uuid, Currency), BigDecimal>,
    /// Keyed by (user, item): the at-most-one-order invariant is the map key.
    orders: HashMap<(Uuid, Uuid), Order>,
    discounts: HashMap<String, DiscountCode>,
    audit: Vec<PurchaseRecord>,
}

pub struct MemoryStore {
    converter: Arc<CurrencyConverter>,
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new(converter: Arc<CurrencyConverter>) -> Self {
        Self {
            converter,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub async fn put_item(&self, item: CatalogItem) {
        self.inner.lock().await.catalog.insert(item.id, item);
    }

    /// Registers a recipient-only container row (a show above its seasons).
    pub async fn put_container(&self, id: Uuid, recipients: Vec<String>) {
        self.inner
            .lock()
            .await
            .container_recipients
            .insert(id, recipients);
    }

    pub async fn put_discount(&self, code: &str, percentage: i32) {
        self.inner.lock().await.discounts.insert(
            code.to_string(),
            DiscountCode {
                code: code.to_string(),
                percentage,
                usage_count: 0,
            },
        );
    }

    fn conversion_error(e: crate::currency::ConversionError) -> DatabaseError {
        DatabaseError::new(DatabaseErrorKind::Unknown {
            message: format!("wallet conversion failed: {e}"),
        })
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn movie(&self, id: Uuid) -> Result<Option<CatalogItem>, DatabaseError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .catalog
            .get(&id)
            .filter(|i| i.item_type == ItemType::Movie)
            .cloned())
    }

    async fn season(&self, id: Uuid) -> Result<Option<CatalogItem>, DatabaseError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .catalog
            .get(&id)
            .filter(|i| i.item_type == ItemType::Season)
            .cloned())
    }

    async fn episode(&self, id: Uuid) -> Result<Option<CatalogItem>, DatabaseError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .catalog
            .get(&id)
            .filter(|i| i.item_type == ItemType::Episode)
            .cloned())
    }

    async fn course(&self, id: Uuid) -> Result<Option<CatalogItem>, DatabaseError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .catalog
            .get(&id)
            .filter(|i| i.item_type == ItemType::Course)
            .cloned())
    }

    async fn recipients_of(&self, id: Uuid) -> Result<Vec<String>, DatabaseError> {
        let inner = self.inner.lock().await;
        if let Some(item) = inner.catalog.get(&id) {
            return Ok(item.recipients.clone());
        }
        Ok(inner.container_recipients.get(&id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl WalletLedger for MemoryStore {
    async fn balances(&self, user_id: Uuid) -> Result<Vec<WalletBalance>, DatabaseError> {
        let inner = self.inner.lock().await;
        let mut buckets: Vec<WalletBalance> = inner
            .wallets
            .iter()
            .filter(|((user, _), _)| *user == user_id)
            .map(|((_, currency), amount)| WalletBalance {
                currency: *currency,
                amount: amount.clone(),
            })
            .collect();
        buckets.sort_by_key(|b| b.currency.as_str());
        Ok(buckets)
    }

    async fn debit(
        &self,
        user_id: Uuid,
        currency: Currency,
        amount: &BigDecimal,
    ) -> Result<DebitOutcome, DatabaseError> {
        let zero = BigDecimal::from(0);
        let mut inner = self.inner.lock().await;

        let mut total = zero.clone();
        for cur in Currency::ALL {
            if let Some(balance) = inner.wallets.get(&(user_id, cur)) {
                let in_target = self
                    .converter
                    .convert(balance, cur, currency)
                    .map_err(Self::conversion_error)?;
                total = &total + &in_target;
            }
        }

        if &total < amount {
            return Ok(DebitOutcome::Insufficient { available: total });
        }

        let mut need = amount.clone();
        let order = std::iter::once(currency)
            .chain(Currency::ALL.into_iter().filter(|c| *c != currency));
        for cur in order {
            if need <= zero {
                break;
            }
            let Some(balance) = inner.wallets.get(&(user_id, cur)).cloned() else {
                continue;
            };
            if balance <= zero {
                continue;
            }
            let in_target = self
                .converter
                .convert(&balance, cur, currency)
                .map_err(Self::conversion_error)?;
            if in_target <= need {
                need = &need - &in_target;
                inner.wallets.insert((user_id, cur), zero.clone());
            } else {
                let native_take = if cur == currency {
                    need.clone()
                } else {
                    self.converter
                        .convert(&need, currency, cur)
                        .map_err(Self::conversion_error)?
                };
                let native_take = if native_take > balance {
                    balance.clone()
                } else {
                    native_take
                };
                inner.wallets.insert((user_id, cur), &balance - &native_take);
                need = zero.clone();
            }
        }

        Ok(DebitOutcome::Debited {
            new_balance: &total - amount,
        })
    }

    async fn credit(
        &self,
        user_id: Uuid,
        currency: Currency,
        amount: &BigDecimal,
    ) -> Result<BigDecimal, DatabaseError> {
        let mut inner = self.inner.lock().await;
        let bucket = inner
            .wallets
            .entry((user_id, currency))
            .or_insert_with(|| BigDecimal::from(0));
        *bucket = &*bucket + amount;
        Ok(bucket.clone())
    }

    async fn credit_from_topup(
        &self,
        user_id: Uuid,
        currency: Currency,
        amount: &BigDecimal,
        tx_ref: &str,
    ) -> Result<TopUpOutcome, DatabaseError> {
        let mut inner = self.inner.lock().await;

        let replayed = inner.audit.iter().any(|r| {
            r.outcome == PurchaseOutcome::Completed && r.tx_ref.as_deref() == Some(tx_ref)
        });
        if replayed {
            let balance = inner
                .wallets
                .get(&(user_id, currency))
                .cloned()
                .unwrap_or_else(|| BigDecimal::from(0));
            return Ok(TopUpOutcome::AlreadyApplied {
                new_balance: balance,
            });
        }

        let now = Utc::now();
        inner.audit.push(PurchaseRecord {
            id: Uuid::new_v4(),
            user_id,
            item_id: None,
            item_type: None,
            kind: crate::database::repository::PaymentKind::TopUp,
            amount: amount.clone(),
            currency,
            tx_ref: Some(tx_ref.to_string()),
            order_id: None,
            outcome: PurchaseOutcome::Completed,
            detail: None,
            created_at: now,
            updated_at: now,
        });

        let bucket = inner
            .wallets
            .entry((user_id, currency))
            .or_insert_with(|| BigDecimal::from(0));
        *bucket = &*bucket + amount;
        Ok(TopUpOutcome::Credited {
            new_balance: bucket.clone(),
        })
    }
}

#[async_trait]
impl OrderLedger for MemoryStore {
    async fn find_active(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        item_type: ItemType,
    ) -> Result<Option<Order>, DatabaseError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .orders
            .get(&(user_id, item_id))
            .filter(|o| o.item_type == item_type)
            .cloned())
    }

    async fn find_entitling(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        item_type: ItemType,
        parent_id: Option<Uuid>,
    ) -> Result<Option<Order>, DatabaseError> {
        let inner = self.inner.lock().await;
        match parent_id {
            Some(parent) => {
                if let Some(order) = inner.orders.get(&(user_id, item_id)) {
                    return Ok(Some(order.clone()));
                }
                if let Some(order) = inner.orders.get(&(user_id, parent)) {
                    if order.item_type.grants_child_access() {
                        return Ok(Some(order.clone()));
                    }
                }
                Ok(None)
            }
            // Without a parent claim only an exact (user, item, type) order
            // counts, matching the SQL adapter.
            None => Ok(inner
                .orders
                .get(&(user_id, item_id))
                .filter(|o| o.item_type == item_type)
                .cloned()),
        }
    }

    async fn create_or_renew(&self, draft: OrderDraft) -> Result<Order, DatabaseError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let key = (draft.user_id, draft.item_id);

        let order = match inner.orders.get(&key) {
            Some(existing) => Order {
                id: existing.id,
                created_at: existing.created_at,
                renewed_at: Some(now),
                user_id: draft.user_id,
                item_id: draft.item_id,
                item_type: draft.item_type,
                payment_kind: draft.payment_kind,
                paid_price: draft.paid_price,
                paid_currency: draft.paid_currency,
                tx_ref: draft.tx_ref,
                expires_at: draft.expires_at,
                remaining_views: draft.remaining_views,
            },
            None => Order {
                id: Uuid::new_v4(),
                created_at: now,
                renewed_at: None,
                user_id: draft.user_id,
                item_id: draft.item_id,
                item_type: draft.item_type,
                payment_kind: draft.payment_kind,
                paid_price: draft.paid_price,
                paid_currency: draft.paid_currency,
                tx_ref: draft.tx_ref,
                expires_at: draft.expires_at,
                remaining_views: draft.remaining_views,
            },
        };

        inner.orders.insert(key, order.clone());
        Ok(order)
    }

    async fn decrement_view(&self, order_id: Uuid) -> Result<ViewOutcome, DatabaseError> {
        let mut inner = self.inner.lock().await;
        let Some(order) = inner.orders.values_mut().find(|o| o.id == order_id) else {
            return Ok(ViewOutcome::Missing);
        };
        match order.remaining_views {
            None => Ok(ViewOutcome::Uncapped),
            Some(0) => Ok(ViewOutcome::Exhausted),
            Some(n) => {
                order.remaining_views = Some(n - 1);
                Ok(ViewOutcome::Remaining(n - 1))
            }
        }
    }

    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<Order>, DatabaseError> {
        let inner = self.inner.lock().await;
        let mut orders: Vec<Order> = inner
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }
}

#[async_trait]
impl DiscountLedger for MemoryStore {
    async fn validate(&self, code: &str) -> Result<Option<DiscountCode>, DatabaseError> {
        let mut inner = self.inner.lock().await;
        Ok(inner.discounts.get_mut(code).map(|d| {
            d.usage_count += 1;
            d.clone()
        }))
    }

    async fn peek(&self, code: &str) -> Result<Option<DiscountCode>, DatabaseError> {
        let inner = self.inner.lock().await;
        Ok(inner.discounts.get(code).cloned())
    }
}

#[async_trait]
impl PurchaseAudit for MemoryStore {
    async fn append(&self, draft: PurchaseDraft) -> Result<AuditAppend, DatabaseError> {
        let mut inner = self.inner.lock().await;

        if draft.outcome == PurchaseOutcome::Completed {
            if let Some(tx_ref) = draft.tx_ref.as_deref() {
                let existing = inner.audit.iter().find(|r| {
                    r.outcome == PurchaseOutcome::Completed
                        && r.tx_ref.as_deref() == Some(tx_ref)
                });
                if let Some(existing) = existing {
                    return Ok(AuditAppend::AlreadyRecorded(existing.clone()));
                }
            }
        }

        let now = Utc::now();
        let record = PurchaseRecord {
            id: Uuid::new_v4(),
            user_id: draft.user_id,
            item_id: draft.item_id,
            item_type: draft.item_type,
            kind: draft.kind,
            amount: draft.amount,
            currency: draft.currency,
            tx_ref: draft.tx_ref,
            order_id: draft.order_id,
            outcome: draft.outcome,
            detail: draft.detail,
            created_at: now,
            updated_at: now,
        };
        inner.audit.push(record.clone());
        Ok(AuditAppend::Recorded(record))
    }

    async fn find_completed_by_ref(
        &self,
        tx_ref: &str,
    ) -> Result<Option<PurchaseRecord>, DatabaseError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .audit
            .iter()
            .find(|r| {
                r.outcome == PurchaseOutcome::Completed && r.tx_ref.as_deref() == Some(tx_ref)
            })
            .cloned())
    }

    async fn partial_failures(&self, limit: i64) -> Result<Vec<PurchaseRecord>, DatabaseError> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<PurchaseRecord> = inner
            .audit
            .iter()
            .filter(|r| r.outcome == PurchaseOutcome::PartialFailure)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn mark_completed(
        &self,
        record_id: Uuid,
        order_id: Option<Uuid>,
    ) -> Result<bool, DatabaseError> {
        let mut inner = self.inner.lock().await;

        let Some(index) = inner.audit.iter().position(|r| r.id == record_id) else {
            return Ok(false);
        };
        if inner.audit[index].outcome != PurchaseOutcome::PartialFailure {
            return Ok(false);
        }
        if let Some(tx_ref) = inner.audit[index].tx_ref.clone() {
            let taken = inner.audit.iter().any(|r| {
                r.id != record_id
                    && r.outcome == PurchaseOutcome::Completed
                    && r.tx_ref.as_deref() == Some(tx_ref.as_str())
            });
            if taken {
                return Ok(false);
            }
        }

        let record = &mut inner.audit[index];
        record.outcome = PurchaseOutcome::Completed;
        if order_id.is_some() {
            record.order_id = order_id;
        }
        record.updated_at = Utc::now();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ItemTerms, PriceTable};
    use crate::database::repository::PaymentKind;
    use std::str::FromStr;

    fn store() -> MemoryStore {
        MemoryStore::new(Arc::new(CurrencyConverter::from_defaults()))
    }

    fn draft(user: Uuid, item: Uuid) -> OrderDraft {
        OrderDraft {
            user_id: user,
            item_id: item,
            item_type: ItemType::Movie,
            payment_kind: PaymentKind::Wallet,
            paid_price: BigDecimal::from(10),
            paid_currency: Currency::Usd,
            tx_ref: None,
            expires_at: None,
            remaining_views: Some(3),
        }
    }

    #[tokio::test]
    async fn insufficient_debit_leaves_balances_untouched() {
        let store = store();
        let user = Uuid::new_v4();
        store
            .credit(user, Currency::Usd, &BigDecimal::from(5))
            .await
            .unwrap();

        let outcome = store
            .debit(user, Currency::Usd, &BigDecimal::from(10))
            .await
            .unwrap();
        assert!(matches!(outcome, DebitOutcome::Insufficient { .. }));

        let balances = store.balances(user).await.unwrap();
        assert_eq!(balances[0].amount, BigDecimal::from(5));
    }

    #[tokio::test]
    async fn renewal_preserves_the_order_id() {
        let store = store();
        let user = Uuid::new_v4();
        let item = Uuid::new_v4();

        let first = store.create_or_renew(draft(user, item)).await.unwrap();
        let second = store.create_or_renew(draft(user, item)).await.unwrap();

        assert_eq!(first.id, second.id);
        assert!(first.renewed_at.is_none());
        assert!(second.renewed_at.is_some());
    }

    #[tokio::test]
    async fn entitling_lookup_without_parent_requires_matching_type() {
        let store = store();
        let user = Uuid::new_v4();
        let item = Uuid::new_v4();
        store.create_or_renew(draft(user, item)).await.unwrap();

        let mismatched = store
            .find_entitling(user, item, ItemType::Course, None)
            .await
            .unwrap();
        assert!(mismatched.is_none());

        let matched = store
            .find_entitling(user, item, ItemType::Movie, None)
            .await
            .unwrap();
        assert!(matched.is_some());
    }

    #[tokio::test]
    async fn replayed_reference_is_reported_not_reinserted() {
        let store = store();
        let user = Uuid::new_v4();
        let base = PurchaseDraft {
            user_id: user,
            item_id: None,
            item_type: None,
            kind: PaymentKind::Card,
            amount: BigDecimal::from_str("12.50").unwrap(),
            currency: Currency::Usd,
            tx_ref: Some("FLW-123".to_string()),
            order_id: None,
            outcome: PurchaseOutcome::Completed,
            detail: None,
        };

        let first = store.append(base.clone()).await.unwrap();
        let second = store.append(base).await.unwrap();

        let AuditAppend::Recorded(first) = first else {
            panic!("first append should record");
        };
        let AuditAppend::AlreadyRecorded(existing) = second else {
            panic!("second append should dedupe");
        };
        assert_eq!(first.id, existing.id);
    }

    #[tokio::test]
    async fn container_recipients_are_reachable() {
        let store = store();
        let show = Uuid::new_v4();
        let season = Uuid::new_v4();
        store
            .put_container(show, vec!["owner@studio.test".into()])
            .await;
        store
            .put_item(CatalogItem {
                id: season,
                item_type: ItemType::Season,
                title: "S1".into(),
                prices: PriceTable::zero(),
                terms: ItemTerms::default(),
                recipients: vec![],
                parent_id: Some(show),
                media_key: None,
            })
            .await;

        let recipients = store.recipients_of(show).await.unwrap();
        assert_eq!(recipients, vec!["owner@studio.test".to_string()]);
    }
}
