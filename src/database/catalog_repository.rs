use async_trait::async_trait;
use bigdecimal::BigDecimal;
use sqlx::PgPool;
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::catalog::{CatalogItem, ItemTerms, ItemType, PriceTable};
use crate::currency::Currency;
use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::CatalogStore;

const CATALOG_COLUMNS: &str = "id, item_type, title, price_ngn, price_usd, price_cad, price_eur, \
     expiration_span_days, view_allotment, recipients, parent_id, media_key";

/// Postgres-backed catalog. All purchasable kinds share one table; the typed
/// fetches filter on the item_type tag so an id is only ever found through
/// the catalog it belongs to.
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_typed(
        &self,
        id: Uuid,
        item_type: ItemType,
    ) -> Result<Option<CatalogItem>, DatabaseError> {
        let row = sqlx::query_as::<_, CatalogRow>(&format!(
            "SELECT {CATALOG_COLUMNS} FROM catalog_items WHERE id = $1 AND item_type = $2"
        ))
        .bind(id)
        .bind(item_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(CatalogItem::try_from).transpose()
    }
}

#[derive(sqlx::FromRow)]
struct CatalogRow {
    id: Uuid,
    item_type: String,
    title: String,
    price_ngn: BigDecimal,
    price_usd: BigDecimal,
    price_cad: BigDecimal,
    price_eur: BigDecimal,
    expiration_span_days: Option<i64>,
    view_allotment: Option<i32>,
    recipients: Vec<String>,
    parent_id: Option<Uuid>,
    media_key: Option<String>,
}

impl TryFrom<CatalogRow> for CatalogItem {
    type Error = DatabaseError;

    fn try_from(row: CatalogRow) -> Result<Self, Self::Error> {
        let corrupt = |detail: String| {
            DatabaseError::new(DatabaseErrorKind::Unknown {
                message: format!("corrupt catalog_items row {}: {detail}", row.id),
            })
        };

        let item_type = ItemType::from_str(&row.item_type)
            .map_err(|e| corrupt(e.to_string()))?;

        let mut prices = HashMap::new();
        prices.insert(Currency::Ngn, row.price_ngn.clone());
        prices.insert(Currency::Usd, row.price_usd.clone());
        prices.insert(Currency::Cad, row.price_cad.clone());
        prices.insert(Currency::Eur, row.price_eur.clone());
        let prices = PriceTable::new(prices).map_err(|e| corrupt(e.to_string()))?;

        Ok(CatalogItem {
            id: row.id,
            item_type,
            title: row.title,
            prices,
            terms: ItemTerms {
                expiration_span_days: row.expiration_span_days,
                view_allotment: row.view_allotment,
            },
            recipients: row.recipients,
            parent_id: row.parent_id,
            media_key: row.media_key,
        })
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn movie(&self, id: Uuid) -> Result<Option<CatalogItem>, DatabaseError> {
        self.fetch_typed(id, ItemType::Movie).await
    }

    async fn season(&self, id: Uuid) -> Result<Option<CatalogItem>, DatabaseError> {
        self.fetch_typed(id, ItemType::Season).await
    }

    async fn episode(&self, id: Uuid) -> Result<Option<CatalogItem>, DatabaseError> {
        self.fetch_typed(id, ItemType::Episode).await
    }

    async fn course(&self, id: Uuid) -> Result<Option<CatalogItem>, DatabaseError> {
        self.fetch_typed(id, ItemType::Course).await
    }

    async fn recipients_of(&self, id: Uuid) -> Result<Vec<String>, DatabaseError> {
        let row = sqlx::query_as::<_, (Vec<String>,)>(
            "SELECT recipients FROM catalog_items WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(row.map(|(recipients,)| recipients).unwrap_or_default())
    }
}
