use std::str::FromStr;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use uuid::Uuid;

use reelpass_backend::catalog::{CatalogItem, ItemResolver, ItemTerms, ItemType, PriceTable};
use reelpass_backend::currency::{Currency, CurrencyConverter};
use reelpass_backend::database::memory::MemoryStore;
use reelpass_backend::database::repository::{DiscountLedger, WalletLedger};
use reelpass_backend::services::notification::LogNotifier;
use reelpass_backend::services::purchase::{PurchaseService, WalletCheckout};

fn amount(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).expect("literal amount")
}

fn setup_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new(Arc::new(CurrencyConverter::from_defaults())))
}

#[tokio::test]
async fn test_validation_increments_usage() {
    let store = setup_store();
    store.put_discount("LAUNCH20", 20).await;

    let first = store
        .validate("LAUNCH20")
        .await
        .expect("validate")
        .expect("known code");
    assert_eq!(first.percentage, 20);
    assert_eq!(first.usage_count, 1);

    let second = store
        .validate("LAUNCH20")
        .await
        .expect("validate")
        .expect("known code");
    assert_eq!(second.usage_count, 2);
}

#[tokio::test]
async fn test_concurrent_validations_both_count() {
    let store = setup_store();
    store.put_discount("LAUNCH20", 20).await;

    let (a, b) = tokio::join!(store.validate("LAUNCH20"), store.validate("LAUNCH20"));
    assert!(a.expect("validate").is_some());
    assert!(b.expect("validate").is_some());

    let code = store
        .peek("LAUNCH20")
        .await
        .expect("peek")
        .expect("known code");
    assert_eq!(code.usage_count, 2);
}

#[tokio::test]
async fn test_peek_is_side_effect_free() {
    let store = setup_store();
    store.put_discount("LAUNCH20", 20).await;

    for _ in 0..3 {
        let code = store
            .peek("LAUNCH20")
            .await
            .expect("peek")
            .expect("known code");
        assert_eq!(code.usage_count, 0);
    }
}

#[tokio::test]
async fn test_unknown_code_is_none() {
    let store = setup_store();

    let missing = store.validate("NOPE").await.expect("validate");
    assert!(missing.is_none());
    let missing = store.peek("NOPE").await.expect("peek");
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_discounted_price_rounds_half_up() {
    let store = setup_store();
    let service = PurchaseService::new(
        ItemResolver::new(store.clone()),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        None,
        Arc::new(LogNotifier::new()),
    );
    let user = Uuid::new_v4();
    let item = Uuid::new_v4();
    store
        .put_item(CatalogItem {
            id: item,
            item_type: ItemType::Movie,
            title: "Night Train".to_string(),
            prices: PriceTable::zero()
                .with_price(Currency::Usd, amount("10.01"))
                .expect("non-negative price"),
            terms: ItemTerms::default(),
            recipients: vec![],
            parent_id: None,
            media_key: Some("movies/night-train.mp4".to_string()),
        })
        .await;
    store.put_discount("QUARTER", 25).await;
    store
        .credit(user, Currency::Usd, &amount("100.00"))
        .await
        .expect("seed wallet");

    let receipt = service
        .wallet_checkout(WalletCheckout {
            user_id: user,
            item_type: ItemType::Movie,
            item_id: item,
            currency: Currency::Usd,
            donation_amount: None,
            discount_code: Some("QUARTER".to_string()),
        })
        .await
        .expect("discounted checkout");

    // 10.01 * 0.75 = 7.5075, which rounds up to 7.51.
    assert_eq!(receipt.amount, amount("7.51"));
    assert_eq!(receipt.wallet_balance, Some(amount("92.49")));
}
