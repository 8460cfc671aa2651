use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::str::FromStr;
use uuid::Uuid;

use crate::catalog::ItemType;
use crate::currency::Currency;
use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::{
    AuditAppend, PaymentKind, PurchaseAudit, PurchaseDraft, PurchaseOutcome, PurchaseRecord,
};

const AUDIT_COLUMNS: &str = "id, user_id, item_id, item_type, kind, amount, currency, tx_ref, \
     order_id, outcome, detail, created_at, updated_at";

/// Postgres-backed purchase audit. Inserts are append-only; the partial
/// unique index on completed tx_refs turns replayed gateway references into
/// [`AuditAppend::AlreadyRecorded`].
pub struct PgPurchaseAudit {
    pool: PgPool,
}

impl PgPurchaseAudit {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    user_id: Uuid,
    item_id: Option<Uuid>,
    item_type: Option<String>,
    kind: String,
    amount: BigDecimal,
    currency: String,
    tx_ref: Option<String>,
    order_id: Option<Uuid>,
    outcome: String,
    detail: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for PurchaseRecord {
    type Error = DatabaseError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        let corrupt = |detail: String| {
            DatabaseError::new(DatabaseErrorKind::Unknown {
                message: format!("corrupt purchase_records row {}: {detail}", row.id),
            })
        };

        let item_type = row
            .item_type
            .as_deref()
            .map(ItemType::from_str)
            .transpose()
            .map_err(|e| corrupt(e.to_string()))?;
        let kind = PaymentKind::from_db_tag(&row.kind)
            .ok_or_else(|| corrupt(format!("bad kind '{}'", row.kind)))?;
        let currency = Currency::from_str(&row.currency)
            .map_err(|_| corrupt(format!("bad currency '{}'", row.currency)))?;
        let outcome = PurchaseOutcome::from_db_tag(&row.outcome)
            .ok_or_else(|| corrupt(format!("bad outcome '{}'", row.outcome)))?;

        Ok(PurchaseRecord {
            id: row.id,
            user_id: row.user_id,
            item_id: row.item_id,
            item_type,
            kind,
            amount: row.amount,
            currency,
            tx_ref: row.tx_ref,
            order_id: row.order_id,
            outcome,
            detail: row.detail,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl PurchaseAudit for PgPurchaseAudit {
    async fn append(&self, draft: PurchaseDraft) -> Result<AuditAppend, DatabaseError> {
        let inserted = sqlx::query_as::<_, AuditRow>(&format!(
            "INSERT INTO purchase_records
                 (id, user_id, item_id, item_type, kind, amount, currency, tx_ref,
                  order_id, outcome, detail)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             RETURNING {AUDIT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(draft.user_id)
        .bind(draft.item_id)
        .bind(draft.item_type.map(|t| t.as_str()))
        .bind(draft.kind.as_str())
        .bind(&draft.amount)
        .bind(draft.currency.as_str())
        .bind(&draft.tx_ref)
        .bind(draft.order_id)
        .bind(draft.outcome.as_str())
        .bind(&draft.detail)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(row) => Ok(AuditAppend::Recorded(row.try_into()?)),
            Err(e) => {
                let err = DatabaseError::from_sqlx(e);
                if err.is_unique_violation() {
                    if let Some(tx_ref) = draft.tx_ref.as_deref() {
                        if let Some(existing) = self.find_completed_by_ref(tx_ref).await? {
                            return Ok(AuditAppend::AlreadyRecorded(existing));
                        }
                    }
                }
                Err(err)
            }
        }
    }

    async fn find_completed_by_ref(
        &self,
        tx_ref: &str,
    ) -> Result<Option<PurchaseRecord>, DatabaseError> {
        let row = sqlx::query_as::<_, AuditRow>(&format!(
            "SELECT {AUDIT_COLUMNS} FROM purchase_records
             WHERE tx_ref = $1 AND outcome = 'completed'"
        ))
        .bind(tx_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(PurchaseRecord::try_from).transpose()
    }

    async fn partial_failures(&self, limit: i64) -> Result<Vec<PurchaseRecord>, DatabaseError> {
        let rows = sqlx::query_as::<_, AuditRow>(&format!(
            "SELECT {AUDIT_COLUMNS} FROM purchase_records
             WHERE outcome = 'partial_failure'
             ORDER BY created_at ASC
             LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        rows.into_iter().map(PurchaseRecord::try_from).collect()
    }

    async fn mark_completed(
        &self,
        record_id: Uuid,
        order_id: Option<Uuid>,
    ) -> Result<bool, DatabaseError> {
        let updated = sqlx::query_as::<_, (Uuid,)>(
            "UPDATE purchase_records
                 SET outcome = 'completed',
                     order_id = COALESCE($2, order_id),
                     updated_at = now()
             WHERE id = $1 AND outcome = 'partial_failure'
             RETURNING id",
        )
        .bind(record_id)
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await;

        match updated {
            Ok(row) => Ok(row.is_some()),
            // Another completed record already holds this tx_ref; the sweep
            // treats that as reconciled elsewhere.
            Err(e) => {
                let err = DatabaseError::from_sqlx(e);
                if err.is_unique_violation() {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }
}
