use async_trait::async_trait;
use bigdecimal::BigDecimal;
use sqlx::PgPool;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::currency::{Currency, CurrencyConverter};
use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::{DebitOutcome, TopUpOutcome, WalletBalance, WalletLedger};

/// Postgres-backed multi-currency wallet.
///
/// Debits lock the user's bucket rows (`SELECT … FOR UPDATE`) for the whole
/// read-modify-write, so two debits racing for the same balance serialize and
/// at most one succeeds. Credits are single upsert statements.
pub struct PgWalletLedger {
    pool: PgPool,
    converter: Arc<CurrencyConverter>,
}

impl PgWalletLedger {
    pub fn new(pool: PgPool, converter: Arc<CurrencyConverter>) -> Self {
        Self { pool, converter }
    }
}

fn parse_bucket(currency: &str, balance: BigDecimal) -> Result<WalletBalance, DatabaseError> {
    let currency = Currency::from_str(currency).map_err(|_| {
        DatabaseError::new(DatabaseErrorKind::Unknown {
            message: format!("corrupt wallets row: bad currency '{currency}'"),
        })
    })?;
    Ok(WalletBalance {
        currency,
        amount: balance,
    })
}

/// Requested currency first, then the rest in declaration order.
fn drain_order(target: Currency) -> impl Iterator<Item = Currency> {
    std::iter::once(target).chain(Currency::ALL.into_iter().filter(move |c| *c != target))
}

#[async_trait]
impl WalletLedger for PgWalletLedger {
    async fn balances(&self, user_id: Uuid) -> Result<Vec<WalletBalance>, DatabaseError> {
        let rows = sqlx::query_as::<_, (String, BigDecimal)>(
            "SELECT currency, balance FROM wallets WHERE user_id = $1 ORDER BY currency",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        rows.into_iter()
            .map(|(currency, balance)| parse_bucket(&currency, balance))
            .collect()
    }

    async fn debit(
        &self,
        user_id: Uuid,
        currency: Currency,
        amount: &BigDecimal,
    ) -> Result<DebitOutcome, DatabaseError> {
        let zero = BigDecimal::from(0);
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let rows = sqlx::query_as::<_, (String, BigDecimal)>(
            "SELECT currency, balance FROM wallets WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let mut buckets = Vec::with_capacity(rows.len());
        for (raw, balance) in rows {
            buckets.push(parse_bucket(&raw, balance)?);
        }

        let convert = |amount: &BigDecimal, from: Currency| {
            self.converter.convert(amount, from, currency).map_err(|e| {
                DatabaseError::new(DatabaseErrorKind::Unknown {
                    message: format!("wallet conversion failed: {e}"),
                })
            })
        };

        let mut total = zero.clone();
        for bucket in &buckets {
            total = &total + &convert(&bucket.amount, bucket.currency)?;
        }

        if &total < amount {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            return Ok(DebitOutcome::Insufficient { available: total });
        }

        let mut need = amount.clone();
        let mut updates: Vec<(Currency, BigDecimal)> = Vec::new();
        for cur in drain_order(currency) {
            if need <= zero {
                break;
            }
            let Some(bucket) = buckets.iter().find(|b| b.currency == cur) else {
                continue;
            };
            if bucket.amount <= zero {
                continue;
            }
            let bucket_in_target = convert(&bucket.amount, cur)?;
            if bucket_in_target <= need {
                need = &need - &bucket_in_target;
                updates.push((cur, zero.clone()));
            } else {
                let native_take = if cur == currency {
                    need.clone()
                } else {
                    self.converter.convert(&need, currency, cur).map_err(|e| {
                        DatabaseError::new(DatabaseErrorKind::Unknown {
                            message: format!("wallet conversion failed: {e}"),
                        })
                    })?
                };
                // Rounding may ask for a hair more than the bucket holds.
                let native_take = if native_take > bucket.amount {
                    bucket.amount.clone()
                } else {
                    native_take
                };
                updates.push((cur, &bucket.amount - &native_take));
                need = zero.clone();
            }
        }

        for (cur, new_balance) in updates {
            sqlx::query(
                "UPDATE wallets SET balance = $3, updated_at = now()
                 WHERE user_id = $1 AND currency = $2",
            )
            .bind(user_id)
            .bind(cur.as_str())
            .bind(new_balance)
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        }

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

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
        let (balance,) = sqlx::query_as::<_, (BigDecimal,)>(
            "INSERT INTO wallets (user_id, currency, balance, updated_at)
             VALUES ($1, $2, $3, now())
             ON CONFLICT (user_id, currency) DO UPDATE
                 SET balance = wallets.balance + EXCLUDED.balance, updated_at = now()
             RETURNING balance",
        )
        .bind(user_id)
        .bind(currency.as_str())
        .bind(amount)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(balance)
    }

    async fn credit_from_topup(
        &self,
        user_id: Uuid,
        currency: Currency,
        amount: &BigDecimal,
        tx_ref: &str,
    ) -> Result<TopUpOutcome, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        // Claim the reference and credit in one transaction; a replayed
        // notification loses the claim and leaves the balance untouched.
        let claimed = sqlx::query_as::<_, (Uuid,)>(
            "INSERT INTO purchase_records
                 (id, user_id, kind, amount, currency, tx_ref, outcome)
             VALUES ($1, $2, 'topup', $3, $4, $5, 'completed')
             ON CONFLICT (tx_ref) WHERE tx_ref IS NOT NULL AND outcome = 'completed'
                 DO NOTHING
             RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(amount)
        .bind(currency.as_str())
        .bind(tx_ref)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if claimed.is_none() {
            let balance = sqlx::query_as::<_, (BigDecimal,)>(
                "SELECT balance FROM wallets WHERE user_id = $1 AND currency = $2",
            )
            .bind(user_id)
            .bind(currency.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(|(b,)| b)
            .unwrap_or_else(|| BigDecimal::from(0));

            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            return Ok(TopUpOutcome::AlreadyApplied {
                new_balance: balance,
            });
        }

        let (balance,) = sqlx::query_as::<_, (BigDecimal,)>(
            "INSERT INTO wallets (user_id, currency, balance, updated_at)
             VALUES ($1, $2, $3, now())
             ON CONFLICT (user_id, currency) DO UPDATE
                 SET balance = wallets.balance + EXCLUDED.balance, updated_at = now()
             RETURNING balance",
        )
        .bind(user_id)
        .bind(currency.as_str())
        .bind(amount)
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        Ok(TopUpOutcome::Credited {
            new_balance: balance,
        })
    }
}
