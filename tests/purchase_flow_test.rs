//! End-to-end purchase flows over the in-memory store: wallet checkouts,
//! card verification, top-ups, and reconciliation of partial failures.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use uuid::Uuid;

use reelpass_backend::catalog::{CatalogItem, ItemResolver, ItemTerms, ItemType, PriceTable};
use reelpass_backend::currency::{Currency, CurrencyConverter};
use reelpass_backend::database::error::{DatabaseError, DatabaseErrorKind};
use reelpass_backend::database::memory::MemoryStore;
use reelpass_backend::database::repository::{
    DiscountLedger, Order, OrderDraft, OrderLedger, PaymentKind, PurchaseAudit, PurchaseOutcome,
    ViewOutcome, WalletLedger,
};
use reelpass_backend::error::ErrorCode;
use reelpass_backend::gateway::{ChargeStatus, GatewayResult, PaymentVerifier, VerifiedCharge};
use reelpass_backend::services::notification::LogNotifier;
use reelpass_backend::services::purchase::{
    CardCheckout, PurchaseService, TopUpRequest, WalletCheckout,
};
use reelpass_backend::workers::reconciliation::{ReconcilerConfig, ReconciliationWorker};

fn amount(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).expect("literal amount")
}

fn setup_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new(Arc::new(CurrencyConverter::from_defaults())))
}

fn setup_service(
    store: &Arc<MemoryStore>,
    verifier: Option<Arc<dyn PaymentVerifier>>,
) -> PurchaseService {
    PurchaseService::new(
        ItemResolver::new(store.clone()),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        verifier,
        Arc::new(LogNotifier::new()),
    )
}

async fn seed_movie(store: &MemoryStore, price_usd: &str, terms: ItemTerms) -> Uuid {
    let id = Uuid::new_v4();
    store
        .put_item(CatalogItem {
            id,
            item_type: ItemType::Movie,
            title: "Night Train".to_string(),
            prices: PriceTable::zero()
                .with_price(Currency::Usd, amount(price_usd))
                .expect("non-negative price"),
            terms,
            recipients: vec!["owner@studio.test".to_string()],
            parent_id: None,
            media_key: Some("movies/night-train.mp4".to_string()),
        })
        .await;
    id
}

fn wallet_checkout(user: Uuid, item: Uuid) -> WalletCheckout {
    WalletCheckout {
        user_id: user,
        item_type: ItemType::Movie,
        item_id: item,
        currency: Currency::Usd,
        donation_amount: None,
        discount_code: None,
    }
}

fn card_checkout(user: Uuid, item: Uuid, transaction_id: &str, tx_ref: &str) -> CardCheckout {
    CardCheckout {
        user_id: user,
        item_type: ItemType::Movie,
        item_id: item,
        currency: Currency::Usd,
        transaction_id: transaction_id.to_string(),
        tx_ref: tx_ref.to_string(),
        is_donation: false,
        fallback_terms: ItemTerms::default(),
    }
}

struct StaticVerifier(VerifiedCharge);

#[async_trait]
impl PaymentVerifier for StaticVerifier {
    async fn verify(&self, _transaction_id: &str) -> GatewayResult<VerifiedCharge> {
        Ok(self.0.clone())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

fn successful_charge(tx_ref: &str, charged: &str) -> VerifiedCharge {
    VerifiedCharge {
        status: ChargeStatus::Successful,
        tx_ref: Some(tx_ref.to_string()),
        amount: Some(amount(charged)),
        currency: Some(Currency::Usd),
        charged_at: None,
        failure_reason: None,
    }
}

/// Order ledger that always fails the entitlement write, for exercising the
/// partial-failure path.
struct BrokenOrderLedger {
    inner: Arc<MemoryStore>,
}

#[async_trait]
impl OrderLedger for BrokenOrderLedger {
    async fn find_active(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        item_type: ItemType,
    ) -> Result<Option<Order>, DatabaseError> {
        self.inner.find_active(user_id, item_id, item_type).await
    }

    async fn find_entitling(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        item_type: ItemType,
        parent_id: Option<Uuid>,
    ) -> Result<Option<Order>, DatabaseError> {
        self.inner
            .find_entitling(user_id, item_id, item_type, parent_id)
            .await
    }

    async fn create_or_renew(&self, _draft: OrderDraft) -> Result<Order, DatabaseError> {
        Err(DatabaseError::new(DatabaseErrorKind::Connection {
            message: "orders ledger unavailable".to_string(),
        }))
    }

    async fn decrement_view(&self, order_id: Uuid) -> Result<ViewOutcome, DatabaseError> {
        self.inner.decrement_view(order_id).await
    }

    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<Order>, DatabaseError> {
        self.inner.find_by_user(user_id).await
    }
}

#[tokio::test]
async fn test_wallet_purchase_debits_and_creates_order() {
    let store = setup_store();
    let service = setup_service(&store, None);
    let user = Uuid::new_v4();
    let item = seed_movie(&store, "12.00", ItemTerms::default()).await;
    store
        .credit(user, Currency::Usd, &amount("50.00"))
        .await
        .expect("seed wallet");

    let receipt = service
        .wallet_checkout(wallet_checkout(user, item))
        .await
        .expect("checkout should succeed");

    assert_eq!(receipt.kind, PaymentKind::Wallet);
    assert_eq!(receipt.amount, amount("12.00"));
    assert_eq!(receipt.wallet_balance, Some(amount("38.00")));
    assert!(!receipt.already_processed);

    let order = receipt.order.expect("wallet purchase creates an order");
    assert_eq!(order.user_id, user);
    assert_eq!(order.item_id, item);
    assert_eq!(order.payment_kind, PaymentKind::Wallet);
    // Default terms: no expiry, no view cap.
    assert!(order.expires_at.is_none());
    assert!(order.remaining_views.is_none());

    let balances = store.balances(user).await.expect("balances");
    assert_eq!(balances.len(), 1);
    assert_eq!(balances[0].amount, amount("38.00"));
}

#[tokio::test]
async fn test_wallet_purchase_applies_discount_code() {
    let store = setup_store();
    let service = setup_service(&store, None);
    let user = Uuid::new_v4();
    let item = seed_movie(&store, "20.00", ItemTerms::default()).await;
    store.put_discount("SAVE10", 10).await;
    store
        .credit(user, Currency::Usd, &amount("100.00"))
        .await
        .expect("seed wallet");

    let mut checkout = wallet_checkout(user, item);
    checkout.discount_code = Some("SAVE10".to_string());
    let receipt = service
        .wallet_checkout(checkout)
        .await
        .expect("discounted checkout should succeed");

    // 20.00 less 10% = 18.00
    assert_eq!(receipt.amount, amount("18.00"));
    assert_eq!(receipt.wallet_balance, Some(amount("82.00")));

    let code = store
        .peek("SAVE10")
        .await
        .expect("peek")
        .expect("code exists");
    assert_eq!(code.usage_count, 1);
}

#[tokio::test]
async fn test_unknown_discount_code_rejects_before_debit() {
    let store = setup_store();
    let service = setup_service(&store, None);
    let user = Uuid::new_v4();
    let item = seed_movie(&store, "20.00", ItemTerms::default()).await;
    store
        .credit(user, Currency::Usd, &amount("100.00"))
        .await
        .expect("seed wallet");

    let mut checkout = wallet_checkout(user, item);
    checkout.discount_code = Some("NOPE".to_string());
    let err = service
        .wallet_checkout(checkout)
        .await
        .expect_err("unknown code should fail");

    assert_eq!(err.error_code(), ErrorCode::InvalidDiscountCode);
    assert_eq!(err.status_code(), 400);

    let balances = store.balances(user).await.expect("balances");
    assert_eq!(balances[0].amount, amount("100.00"));
}

#[tokio::test]
async fn test_insufficient_funds_changes_nothing() {
    let store = setup_store();
    let service = setup_service(&store, None);
    let user = Uuid::new_v4();
    let item = seed_movie(&store, "12.00", ItemTerms::default()).await;
    store
        .credit(user, Currency::Usd, &amount("10.00"))
        .await
        .expect("seed wallet");

    let err = service
        .wallet_checkout(wallet_checkout(user, item))
        .await
        .expect_err("short wallet should fail");

    assert_eq!(err.error_code(), ErrorCode::InsufficientFunds);
    assert_eq!(err.status_code(), 402);
    assert!(err.user_message().contains("Available: 10.00"));

    let balances = store.balances(user).await.expect("balances");
    assert_eq!(balances[0].amount, amount("10.00"));
    let active = store
        .find_active(user, item, ItemType::Movie)
        .await
        .expect("find_active");
    assert!(active.is_none());
}

#[tokio::test]
async fn test_donation_moves_money_without_order() {
    let store = setup_store();
    let service = setup_service(&store, None);
    let user = Uuid::new_v4();
    let item = seed_movie(&store, "12.00", ItemTerms::default()).await;
    store
        .credit(user, Currency::Usd, &amount("50.00"))
        .await
        .expect("seed wallet");

    let mut checkout = wallet_checkout(user, item);
    checkout.donation_amount = Some(amount("5.00"));
    let receipt = service
        .wallet_checkout(checkout)
        .await
        .expect("donation should succeed");

    assert_eq!(receipt.kind, PaymentKind::Donation);
    assert!(receipt.order.is_none());
    assert_eq!(receipt.wallet_balance, Some(amount("45.00")));

    let active = store
        .find_active(user, item, ItemType::Movie)
        .await
        .expect("find_active");
    assert!(active.is_none());
}

#[tokio::test]
async fn test_zero_donation_is_rejected() {
    let store = setup_store();
    let service = setup_service(&store, None);
    let user = Uuid::new_v4();
    let item = seed_movie(&store, "12.00", ItemTerms::default()).await;
    store
        .credit(user, Currency::Usd, &amount("50.00"))
        .await
        .expect("seed wallet");

    let mut checkout = wallet_checkout(user, item);
    checkout.donation_amount = Some(BigDecimal::from(0));
    let err = service
        .wallet_checkout(checkout)
        .await
        .expect_err("zero donation should fail");

    assert_eq!(err.error_code(), ErrorCode::ValidationError);
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn test_repurchase_renews_the_same_order() {
    let store = setup_store();
    let service = setup_service(&store, None);
    let user = Uuid::new_v4();
    let terms = ItemTerms {
        expiration_span_days: Some(7),
        view_allotment: Some(3),
    };
    let item = seed_movie(&store, "10.00", terms).await;
    store
        .credit(user, Currency::Usd, &amount("100.00"))
        .await
        .expect("seed wallet");

    let first = service
        .wallet_checkout(wallet_checkout(user, item))
        .await
        .expect("first purchase")
        .order
        .expect("order");
    assert_eq!(first.remaining_views, Some(3));
    assert!(first.renewed_at.is_none());

    // Burn a view, then buy again: same order id, counter reset.
    let burned = store.decrement_view(first.id).await.expect("decrement");
    assert_eq!(burned, ViewOutcome::Remaining(2));

    let second = service
        .wallet_checkout(wallet_checkout(user, item))
        .await
        .expect("repurchase")
        .order
        .expect("order");

    assert_eq!(second.id, first.id);
    assert_eq!(second.remaining_views, Some(3));
    assert!(second.renewed_at.is_some());

    let balances = store.balances(user).await.expect("balances");
    assert_eq!(balances[0].amount, amount("80.00"));
}

#[tokio::test]
async fn test_card_purchase_grants_with_gateway_amount() {
    let store = setup_store();
    let verifier: Arc<dyn PaymentVerifier> =
        Arc::new(StaticVerifier(successful_charge("tx-900", "15.00")));
    let service = setup_service(&store, Some(verifier));
    let user = Uuid::new_v4();
    let item = seed_movie(&store, "12.00", ItemTerms::default()).await;

    let receipt = service
        .card_checkout(card_checkout(user, item, "991", "tx-900"))
        .await
        .expect("card checkout should succeed");

    // The gateway's settled amount wins over the catalog price.
    assert_eq!(receipt.kind, PaymentKind::Card);
    assert_eq!(receipt.amount, amount("15.00"));
    assert!(!receipt.already_processed);

    let order = receipt.order.expect("card purchase creates an order");
    assert_eq!(order.tx_ref.as_deref(), Some("tx-900"));

    let record = store
        .find_completed_by_ref("tx-900")
        .await
        .expect("audit lookup")
        .expect("completed record");
    assert_eq!(record.order_id, Some(order.id));
    assert_eq!(record.outcome, PurchaseOutcome::Completed);
}

#[tokio::test]
async fn test_card_reference_mismatch_fails_verification() {
    let store = setup_store();
    let verifier: Arc<dyn PaymentVerifier> =
        Arc::new(StaticVerifier(successful_charge("tx-other", "15.00")));
    let service = setup_service(&store, Some(verifier));
    let user = Uuid::new_v4();
    let item = seed_movie(&store, "12.00", ItemTerms::default()).await;

    let err = service
        .card_checkout(card_checkout(user, item, "991", "tx-900"))
        .await
        .expect_err("mismatched reference should fail");

    assert_eq!(err.error_code(), ErrorCode::VerificationFailed);
    assert_eq!(err.status_code(), 402);

    let active = store
        .find_active(user, item, ItemType::Movie)
        .await
        .expect("find_active");
    assert!(active.is_none());
    let record = store
        .find_completed_by_ref("tx-900")
        .await
        .expect("audit lookup");
    assert!(record.is_none());
}

#[tokio::test]
async fn test_failed_charge_fails_verification() {
    let store = setup_store();
    let charge = VerifiedCharge {
        status: ChargeStatus::Failed,
        tx_ref: Some("tx-900".to_string()),
        amount: None,
        currency: None,
        charged_at: None,
        failure_reason: Some("card declined".to_string()),
    };
    let verifier: Arc<dyn PaymentVerifier> = Arc::new(StaticVerifier(charge));
    let service = setup_service(&store, Some(verifier));
    let user = Uuid::new_v4();
    let item = seed_movie(&store, "12.00", ItemTerms::default()).await;

    let err = service
        .card_checkout(card_checkout(user, item, "991", "tx-900"))
        .await
        .expect_err("failed charge should not grant");

    assert_eq!(err.error_code(), ErrorCode::VerificationFailed);
    assert!(err.user_message().contains("card declined"));
}

#[tokio::test]
async fn test_card_replay_answers_with_existing_order() {
    let store = setup_store();
    let verifier: Arc<dyn PaymentVerifier> =
        Arc::new(StaticVerifier(successful_charge("tx-900", "15.00")));
    let service = setup_service(&store, Some(verifier));
    let user = Uuid::new_v4();
    let item = seed_movie(&store, "12.00", ItemTerms::default()).await;

    let first = service
        .card_checkout(card_checkout(user, item, "991", "tx-900"))
        .await
        .expect("first notification");
    assert!(!first.already_processed);
    let first_order = first.order.expect("first notification creates the order");

    let replay = service
        .card_checkout(card_checkout(user, item, "991", "tx-900"))
        .await
        .expect("replayed notification");

    // The retry carries the order the first notification created, without
    // renewing it or writing a second audit record.
    assert!(replay.already_processed);
    let replay_order = replay.order.expect("replay must return the existing order");
    assert_eq!(replay_order.id, first_order.id);
    assert!(replay_order.renewed_at.is_none());
    assert_eq!(replay.amount, amount("15.00"));

    let orders = store.find_by_user(user).await.expect("orders");
    assert_eq!(orders.len(), 1);
}

#[tokio::test]
async fn test_card_donation_never_creates_order() {
    let store = setup_store();
    let verifier: Arc<dyn PaymentVerifier> =
        Arc::new(StaticVerifier(successful_charge("tx-d1", "8.00")));
    let service = setup_service(&store, Some(verifier));
    let user = Uuid::new_v4();
    let item = seed_movie(&store, "12.00", ItemTerms::default()).await;

    let mut checkout = card_checkout(user, item, "991", "tx-d1");
    checkout.is_donation = true;
    let receipt = service
        .card_checkout(checkout)
        .await
        .expect("card donation should succeed");

    assert_eq!(receipt.kind, PaymentKind::Donation);
    assert!(receipt.order.is_none());

    let record = store
        .find_completed_by_ref("tx-d1")
        .await
        .expect("audit lookup")
        .expect("donation recorded");
    assert_eq!(record.kind, PaymentKind::Donation);
    assert!(store
        .find_active(user, item, ItemType::Movie)
        .await
        .expect("find_active")
        .is_none());
}

#[tokio::test]
async fn test_unconfigured_gateway_rejects_card_checkout() {
    let store = setup_store();
    let service = setup_service(&store, None);
    let user = Uuid::new_v4();
    let item = seed_movie(&store, "12.00", ItemTerms::default()).await;

    let err = service
        .card_checkout(card_checkout(user, item, "991", "tx-900"))
        .await
        .expect_err("no verifier configured");

    assert_eq!(err.error_code(), ErrorCode::ConfigurationError);
    assert_eq!(err.status_code(), 500);
}

#[tokio::test]
async fn test_top_up_credits_wallet_once() {
    let store = setup_store();
    let verifier: Arc<dyn PaymentVerifier> =
        Arc::new(StaticVerifier(successful_charge("tx-top", "25.00")));
    let service = setup_service(&store, Some(verifier));
    let user = Uuid::new_v4();

    let request = TopUpRequest {
        user_id: user,
        currency: Currency::Usd,
        amount: amount("25.00"),
        transaction_id: "577".to_string(),
        tx_ref: "tx-top".to_string(),
    };

    let first = service.top_up(request.clone()).await.expect("top-up");
    assert_eq!(first.new_balance, amount("25.00"));
    assert!(!first.already_processed);

    let replay = service.top_up(request).await.expect("replayed top-up");
    assert!(replay.already_processed);
    assert_eq!(replay.new_balance, amount("25.00"));

    let balances = store.balances(user).await.expect("balances");
    assert_eq!(balances.len(), 1);
    assert_eq!(balances[0].amount, amount("25.00"));
}

#[tokio::test]
async fn test_top_up_amount_mismatch_is_rejected() {
    let store = setup_store();
    let verifier: Arc<dyn PaymentVerifier> =
        Arc::new(StaticVerifier(successful_charge("tx-top", "25.00")));
    let service = setup_service(&store, Some(verifier));
    let user = Uuid::new_v4();

    let err = service
        .top_up(TopUpRequest {
            user_id: user,
            currency: Currency::Usd,
            amount: amount("30.00"),
            transaction_id: "577".to_string(),
            tx_ref: "tx-top".to_string(),
        })
        .await
        .expect_err("claimed amount above the charge");

    assert_eq!(err.error_code(), ErrorCode::VerificationFailed);
    assert!(store.balances(user).await.expect("balances").is_empty());
}

#[tokio::test]
async fn test_partial_failure_surfaces_and_reconciles() {
    let store = setup_store();
    let broken = Arc::new(BrokenOrderLedger {
        inner: store.clone(),
    });
    let service = PurchaseService::new(
        ItemResolver::new(store.clone()),
        store.clone(),
        broken,
        store.clone(),
        store.clone(),
        None,
        Arc::new(LogNotifier::new()),
    );
    let user = Uuid::new_v4();
    let item = seed_movie(&store, "10.00", ItemTerms::default()).await;
    store
        .credit(user, Currency::Usd, &amount("50.00"))
        .await
        .expect("seed wallet");

    let err = service
        .wallet_checkout(wallet_checkout(user, item))
        .await
        .expect_err("entitlement write fails");

    assert_eq!(err.error_code(), ErrorCode::PartialFailure);
    assert_eq!(err.status_code(), 500);
    assert!(err.is_retryable());

    // Money moved and the failure is on the books.
    let balances = store.balances(user).await.expect("balances");
    assert_eq!(balances[0].amount, amount("40.00"));
    let stranded = store.partial_failures(10).await.expect("partial failures");
    assert_eq!(stranded.len(), 1);
    assert_eq!(stranded[0].kind, PaymentKind::Wallet);
    assert_eq!(stranded[0].amount, amount("10.00"));

    // The sweep, running against a healthy ledger, completes the purchase.
    let worker = ReconciliationWorker::new(
        ItemResolver::new(store.clone()),
        store.clone(),
        store.clone(),
        ReconcilerConfig::default(),
    );
    let repaired = worker.sweep().await.expect("sweep");
    assert_eq!(repaired, 1);

    assert!(store
        .partial_failures(10)
        .await
        .expect("partial failures")
        .is_empty());
    let order = store
        .find_active(user, item, ItemType::Movie)
        .await
        .expect("find_active")
        .expect("order reconciled into place");
    assert_eq!(order.payment_kind, PaymentKind::Wallet);
    assert_eq!(order.paid_price, amount("10.00"));
}
