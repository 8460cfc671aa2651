use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::currency::Currency;
use crate::database::error::DatabaseError;
use crate::database::repository::CatalogStore;

/// Errors produced while building or resolving catalog entries.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("negative price for {currency}: {price}")]
    NegativePrice { currency: Currency, price: String },

    #[error("price table is missing {currency}")]
    MissingCurrency { currency: Currency },

    #[error("unknown item type tag: {tag}")]
    UnknownItemType { tag: String },
}

/// Errors produced by [`ItemResolver::resolve`].
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The identifier does not exist in the indicated catalog. This always
    /// propagates as a checkout failure, never as a zero-price purchase.
    #[error("{item_type} {item_id} not found")]
    NotFound { item_type: ItemType, item_id: Uuid },

    #[error("catalog store error: {0}")]
    Store(#[from] DatabaseError),
}

// ============================================================================
// Item types
// ============================================================================

/// The fixed set of purchasable item kinds. Dispatch happens on these
/// variants; raw tag strings stop at the parse boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    #[serde(alias = "Movies", alias = "movies")]
    Movie,
    #[serde(alias = "Seasons", alias = "seasons")]
    Season,
    #[serde(alias = "Episodes", alias = "episodes")]
    Episode,
    #[serde(alias = "Course", alias = "Lesson", alias = "lesson")]
    Course,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Movie => "movie",
            ItemType::Season => "season",
            ItemType::Episode => "episode",
            ItemType::Course => "course",
        }
    }

    /// Whether an order against this type also entitles child items
    /// (episodes of a season, lessons of a course).
    pub fn grants_child_access(&self) -> bool {
        matches!(self, ItemType::Season | ItemType::Course)
    }

    /// Item kinds that carry a playable media asset of their own.
    pub fn is_streamable(&self) -> bool {
        matches!(self, ItemType::Movie | ItemType::Episode)
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "movie" | "movies" => Ok(ItemType::Movie),
            "season" | "seasons" => Ok(ItemType::Season),
            "episode" | "episodes" => Ok(ItemType::Episode),
            "course" | "lesson" | "lessons" => Ok(ItemType::Course),
            other => Err(CatalogError::UnknownItemType {
                tag: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// Price table
// ============================================================================

/// Per-currency prices for one catalog entry, validated at construction:
/// every supported currency has an entry and no price is negative. Lookups
/// are therefore infallible.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTable {
    prices: HashMap<Currency, BigDecimal>,
}

impl PriceTable {
    pub fn new(prices: HashMap<Currency, BigDecimal>) -> Result<Self, CatalogError> {
        for currency in Currency::ALL {
            match prices.get(&currency) {
                None => return Err(CatalogError::MissingCurrency { currency }),
                Some(price) if price < &BigDecimal::from(0) => {
                    return Err(CatalogError::NegativePrice {
                        currency,
                        price: price.to_string(),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(Self { prices })
    }

    /// All-zero table (free or not-yet-priced entries).
    pub fn zero() -> Self {
        let prices = Currency::ALL
            .into_iter()
            .map(|c| (c, BigDecimal::from(0)))
            .collect();
        Self { prices }
    }

    pub fn with_price(mut self, currency: Currency, price: BigDecimal) -> Result<Self, CatalogError> {
        if price < BigDecimal::from(0) {
            return Err(CatalogError::NegativePrice {
                currency,
                price: price.to_string(),
            });
        }
        self.prices.insert(currency, price);
        Ok(self)
    }

    pub fn price_in(&self, currency: Currency) -> &BigDecimal {
        // Complete by construction.
        &self.prices[&currency]
    }
}

// ============================================================================
// Catalog entries
// ============================================================================

/// Entitlement terms attached to a catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ItemTerms {
    /// Entitlement lifetime in days after purchase; `None` never expires.
    pub expiration_span_days: Option<i64>,
    /// Maximum number of stream grants; `None` is uncapped.
    pub view_allotment: Option<i32>,
}

impl ItemTerms {
    /// Absolute expiration for a purchase made at `now`.
    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expiration_span_days.map(|days| now + Duration::days(days))
    }

    /// Fills unset terms from `fallback` without overriding set ones.
    pub fn or(self, fallback: ItemTerms) -> ItemTerms {
        ItemTerms {
            expiration_span_days: self.expiration_span_days.or(fallback.expiration_span_days),
            view_allotment: self.view_allotment.or(fallback.view_allotment),
        }
    }
}

/// A priced catalog entry as stored.
#[derive(Debug, Clone)]
pub struct CatalogItem {
    pub id: Uuid,
    pub item_type: ItemType,
    pub title: String,
    pub prices: PriceTable,
    pub terms: ItemTerms,
    /// Notification recipients set directly on this entry.
    pub recipients: Vec<String>,
    /// Containing entry (episode → season, lesson → course, season → show).
    pub parent_id: Option<Uuid>,
    /// Storage key of the playable asset, for streamable types.
    pub media_key: Option<String>,
}

/// A catalog entry plus its effective notification recipients
/// (own, or inherited from the parent container when the entry has none).
#[derive(Debug, Clone)]
pub struct ResolvedItem {
    pub item: CatalogItem,
    pub recipients: Vec<String>,
}

// ============================================================================
// Resolver
// ============================================================================

/// Fetches priced catalog entries, dispatching per item-type variant.
#[derive(Clone)]
pub struct ItemResolver {
    store: Arc<dyn CatalogStore>,
}

impl ItemResolver {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    /// Resolves an item and its effective recipient list.
    pub async fn resolve(
        &self,
        item_type: ItemType,
        item_id: Uuid,
    ) -> Result<ResolvedItem, ResolveError> {
        let item = match item_type {
            ItemType::Movie => self.store.movie(item_id).await?,
            ItemType::Season => self.store.season(item_id).await?,
            ItemType::Episode => self.store.episode(item_id).await?,
            ItemType::Course => self.store.course(item_id).await?,
        };
        let item = item.ok_or(ResolveError::NotFound { item_type, item_id })?;

        let recipients = if !item.recipients.is_empty() {
            item.recipients.clone()
        } else if let Some(parent_id) = item.parent_id {
            self.store.recipients_of(parent_id).await?
        } else {
            Vec::new()
        };

        Ok(ResolvedItem { item, recipients })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::str::FromStr as _;

    #[test]
    fn item_type_parses_legacy_tags() {
        assert_eq!(ItemType::from_str("Movies").unwrap(), ItemType::Movie);
        assert_eq!(ItemType::from_str("Seasons").unwrap(), ItemType::Season);
        assert_eq!(ItemType::from_str("Lesson").unwrap(), ItemType::Course);
        assert_eq!(ItemType::from_str("episode").unwrap(), ItemType::Episode);
        assert!(ItemType::from_str("album").is_err());
    }

    #[test]
    fn child_access_only_for_containers() {
        assert!(ItemType::Season.grants_child_access());
        assert!(ItemType::Course.grants_child_access());
        assert!(!ItemType::Movie.grants_child_access());
        assert!(!ItemType::Episode.grants_child_access());
    }

    #[test]
    fn price_table_requires_every_currency() {
        let mut prices = HashMap::new();
        prices.insert(Currency::Usd, BigDecimal::from(10));
        let err = PriceTable::new(prices).unwrap_err();
        assert!(matches!(err, CatalogError::MissingCurrency { .. }));
    }

    #[test]
    fn price_table_rejects_negative_prices() {
        let err = PriceTable::zero().with_price(Currency::Usd, BigDecimal::from(-1));
        assert!(matches!(err, Err(CatalogError::NegativePrice { .. })));
    }

    #[test]
    fn terms_compute_absolute_expiry() {
        let now = Utc::now();
        let terms = ItemTerms {
            expiration_span_days: Some(7),
            view_allotment: Some(3),
        };
        assert_eq!(terms.expires_at(now), Some(now + Duration::days(7)));
        assert_eq!(ItemTerms::default().expires_at(now), None);
    }

    #[test]
    fn terms_fallback_fills_only_unset_fields() {
        let own = ItemTerms {
            expiration_span_days: Some(30),
            view_allotment: None,
        };
        let fallback = ItemTerms {
            expiration_span_days: Some(7),
            view_allotment: Some(5),
        };
        let merged = own.or(fallback);
        assert_eq!(merged.expiration_span_days, Some(30));
        assert_eq!(merged.view_allotment, Some(5));
    }

    struct StubCatalog {
        items: HashMap<Uuid, CatalogItem>,
    }

    #[async_trait]
    impl CatalogStore for StubCatalog {
        async fn movie(&self, id: Uuid) -> Result<Option<CatalogItem>, DatabaseError> {
            Ok(self.items.get(&id).filter(|i| i.item_type == ItemType::Movie).cloned())
        }
        async fn season(&self, id: Uuid) -> Result<Option<CatalogItem>, DatabaseError> {
            Ok(self.items.get(&id).filter(|i| i.item_type == ItemType::Season).cloned())
        }
        async fn episode(&self, id: Uuid) -> Result<Option<CatalogItem>, DatabaseError> {
            Ok(self.items.get(&id).filter(|i| i.item_type == ItemType::Episode).cloned())
        }
        async fn course(&self, id: Uuid) -> Result<Option<CatalogItem>, DatabaseError> {
            Ok(self.items.get(&id).filter(|i| i.item_type == ItemType::Course).cloned())
        }
        async fn recipients_of(&self, id: Uuid) -> Result<Vec<String>, DatabaseError> {
            Ok(self.items.get(&id).map(|i| i.recipients.clone()).unwrap_or_default())
        }
    }

    fn entry(id: Uuid, item_type: ItemType, recipients: Vec<String>, parent: Option<Uuid>) -> CatalogItem {
        CatalogItem {
            id,
            item_type,
            title: format!("{item_type} {id}"),
            prices: PriceTable::zero(),
            terms: ItemTerms::default(),
            recipients,
            parent_id: parent,
            media_key: None,
        }
    }

    #[tokio::test]
    async fn resolver_inherits_recipients_from_parent() {
        let season_id = Uuid::new_v4();
        let episode_id = Uuid::new_v4();
        let mut items = HashMap::new();
        items.insert(
            season_id,
            entry(season_id, ItemType::Season, vec!["owner@studio.test".into()], None),
        );
        items.insert(
            episode_id,
            entry(episode_id, ItemType::Episode, vec![], Some(season_id)),
        );
        let resolver = ItemResolver::new(Arc::new(StubCatalog { items }));

        let resolved = resolver.resolve(ItemType::Episode, episode_id).await.unwrap();
        assert_eq!(resolved.recipients, vec!["owner@studio.test".to_string()]);
    }

    #[tokio::test]
    async fn resolver_prefers_own_recipients() {
        let season_id = Uuid::new_v4();
        let episode_id = Uuid::new_v4();
        let mut items = HashMap::new();
        items.insert(
            season_id,
            entry(season_id, ItemType::Season, vec!["owner@studio.test".into()], None),
        );
        items.insert(
            episode_id,
            entry(
                episode_id,
                ItemType::Episode,
                vec!["editor@studio.test".into()],
                Some(season_id),
            ),
        );
        let resolver = ItemResolver::new(Arc::new(StubCatalog { items }));

        let resolved = resolver.resolve(ItemType::Episode, episode_id).await.unwrap();
        assert_eq!(resolved.recipients, vec!["editor@studio.test".to_string()]);
    }

    #[tokio::test]
    async fn resolver_misses_are_not_found() {
        let resolver = ItemResolver::new(Arc::new(StubCatalog { items: HashMap::new() }));
        let err = resolver.resolve(ItemType::Movie, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ResolveError::NotFound { .. }));
    }

    #[tokio::test]
    async fn resolver_checks_the_indicated_catalog_only() {
        let id = Uuid::new_v4();
        let mut items = HashMap::new();
        items.insert(id, entry(id, ItemType::Movie, vec![], None));
        let resolver = ItemResolver::new(Arc::new(StubCatalog { items }));

        assert!(resolver.resolve(ItemType::Movie, id).await.is_ok());
        assert!(matches!(
            resolver.resolve(ItemType::Course, id).await,
            Err(ResolveError::NotFound { .. })
        ));
    }
}
