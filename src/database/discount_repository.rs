use async_trait::async_trait;
use sqlx::PgPool;

use crate::database::error::DatabaseError;
use crate::database::repository::{DiscountCode, DiscountLedger};

/// Postgres-backed discount codes with an atomic usage counter.
pub struct PgDiscountLedger {
    pool: PgPool,
}

impl PgDiscountLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct DiscountRow {
    code: String,
    percentage: i32,
    usage_count: i64,
}

impl From<DiscountRow> for DiscountCode {
    fn from(row: DiscountRow) -> Self {
        DiscountCode {
            code: row.code,
            percentage: row.percentage,
            usage_count: row.usage_count,
        }
    }
}

#[async_trait]
impl DiscountLedger for PgDiscountLedger {
    async fn validate(&self, code: &str) -> Result<Option<DiscountCode>, DatabaseError> {
        // Single conditional update; concurrent validations of the same code
        // each land their own increment.
        let row = sqlx::query_as::<_, DiscountRow>(
            "UPDATE discount_codes
                 SET usage_count = usage_count + 1, updated_at = now()
             WHERE code = $1
             RETURNING code, percentage, usage_count",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(row.map(DiscountCode::from))
    }

    async fn peek(&self, code: &str) -> Result<Option<DiscountCode>, DatabaseError> {
        let row = sqlx::query_as::<_, DiscountRow>(
            "SELECT code, percentage, usage_count FROM discount_codes WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(row.map(DiscountCode::from))
    }
}
