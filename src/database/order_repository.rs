use async_trait::async_trait;
use sqlx::{types::BigDecimal, FromRow, PgPool};
use std::str::FromStr;
use uuid::Uuid;

use crate::catalog::ItemType;
use crate::currency::Currency;
use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::{Order, OrderDraft, OrderLedger, PaymentKind, ViewOutcome};

/// Raw orders row; tags are converted at the edge.
#[derive(Debug, Clone, FromRow)]
struct OrderRow {
    id: Uuid,
    user_id: Uuid,
    item_id: Uuid,
    item_type: String,
    payment_kind: String,
    paid_price: BigDecimal,
    paid_currency: String,
    tx_ref: Option<String>,
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
    remaining_views: Option<i32>,
    created_at: chrono::DateTime<chrono::Utc>,
    renewed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl TryFrom<OrderRow> for Order {
    type Error = DatabaseError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let corrupt = |what: &str, value: &str| {
            DatabaseError::new(DatabaseErrorKind::Unknown {
                message: format!("corrupt orders row: bad {what} '{value}'"),
            })
        };
        Ok(Order {
            id: row.id,
            user_id: row.user_id,
            item_id: row.item_id,
            item_type: ItemType::from_str(&row.item_type)
                .map_err(|_| corrupt("item_type", &row.item_type))?,
            payment_kind: PaymentKind::from_db_tag(&row.payment_kind)
                .ok_or_else(|| corrupt("payment_kind", &row.payment_kind))?,
            paid_price: row.paid_price,
            paid_currency: Currency::from_str(&row.paid_currency)
                .map_err(|_| corrupt("paid_currency", &row.paid_currency))?,
            tx_ref: row.tx_ref,
            expires_at: row.expires_at,
            remaining_views: row.remaining_views,
            created_at: row.created_at,
            renewed_at: row.renewed_at,
        })
    }
}

/// Postgres-backed entitlement store.
pub struct PgOrderLedger {
    pool: PgPool,
}

impl PgOrderLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderLedger for PgOrderLedger {
    async fn find_active(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        item_type: ItemType,
    ) -> Result<Option<Order>, DatabaseError> {
        let row = sqlx::query_as::<_, OrderRow>(
            "SELECT id, user_id, item_id, item_type, payment_kind, paid_price, paid_currency,
                    tx_ref, expires_at, remaining_views, created_at, renewed_at
             FROM orders
             WHERE user_id = $1 AND item_id = $2 AND item_type = $3",
        )
        .bind(user_id)
        .bind(item_id)
        .bind(item_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(Order::try_from).transpose()
    }

    async fn find_entitling(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        item_type: ItemType,
        parent_id: Option<Uuid>,
    ) -> Result<Option<Order>, DatabaseError> {
        let row = match parent_id {
            Some(parent) => {
                sqlx::query_as::<_, OrderRow>(
                    "SELECT id, user_id, item_id, item_type, payment_kind, paid_price, paid_currency,
                            tx_ref, expires_at, remaining_views, created_at, renewed_at
                     FROM orders
                     WHERE user_id = $1
                       AND (item_id = $2
                            OR (item_id = $3 AND item_type IN ('season', 'course')))
                     ORDER BY created_at DESC
                     LIMIT 1",
                )
                .bind(user_id)
                .bind(item_id)
                .bind(parent)
                .fetch_optional(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, OrderRow>(
                    "SELECT id, user_id, item_id, item_type, payment_kind, paid_price, paid_currency,
                            tx_ref, expires_at, remaining_views, created_at, renewed_at
                     FROM orders
                     WHERE user_id = $1 AND item_id = $2 AND item_type = $3",
                )
                .bind(user_id)
                .bind(item_id)
                .bind(item_type.as_str())
                .fetch_optional(&self.pool)
                .await
            }
        }
        .map_err(DatabaseError::from_sqlx)?;

        row.map(Order::try_from).transpose()
    }

    async fn create_or_renew(&self, draft: OrderDraft) -> Result<Order, DatabaseError> {
        let row = sqlx::query_as::<_, OrderRow>(
            "INSERT INTO orders
                 (id, user_id, item_id, item_type, payment_kind, paid_price, paid_currency,
                  tx_ref, expires_at, remaining_views)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (user_id, item_id) DO UPDATE SET
                 item_type = EXCLUDED.item_type,
                 payment_kind = EXCLUDED.payment_kind,
                 paid_price = EXCLUDED.paid_price,
                 paid_currency = EXCLUDED.paid_currency,
                 tx_ref = EXCLUDED.tx_ref,
                 expires_at = EXCLUDED.expires_at,
                 remaining_views = EXCLUDED.remaining_views,
                 renewed_at = now()
             RETURNING id, user_id, item_id, item_type, payment_kind, paid_price, paid_currency,
                       tx_ref, expires_at, remaining_views, created_at, renewed_at",
        )
        .bind(Uuid::new_v4())
        .bind(draft.user_id)
        .bind(draft.item_id)
        .bind(draft.item_type.as_str())
        .bind(draft.payment_kind.as_str())
        .bind(draft.paid_price)
        .bind(draft.paid_currency.as_str())
        .bind(draft.tx_ref)
        .bind(draft.expires_at)
        .bind(draft.remaining_views)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Order::try_from(row)
    }

    async fn decrement_view(&self, order_id: Uuid) -> Result<ViewOutcome, DatabaseError> {
        // Conditional update is the atomic step; two racing decrements on a
        // counter of 1 serialize here and exactly one sees a row.
        let decremented = sqlx::query_as::<_, (i32,)>(
            "UPDATE orders
             SET remaining_views = remaining_views - 1
             WHERE id = $1 AND remaining_views > 0
             RETURNING remaining_views",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if let Some((remaining,)) = decremented {
            return Ok(ViewOutcome::Remaining(remaining));
        }

        let row = sqlx::query_as::<_, (Option<i32>,)>(
            "SELECT remaining_views FROM orders WHERE id = $1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(match row {
            None => ViewOutcome::Missing,
            Some((None,)) => ViewOutcome::Uncapped,
            Some((Some(_),)) => ViewOutcome::Exhausted,
        })
    }

    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<Order>, DatabaseError> {
        let rows = sqlx::query_as::<_, OrderRow>(
            "SELECT id, user_id, item_id, item_type, payment_kind, paid_price, paid_currency,
                    tx_ref, expires_at, remaining_views, created_at, renewed_at
             FROM orders
             WHERE user_id = $1
             ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        rows.into_iter().map(Order::try_from).collect()
    }
}
