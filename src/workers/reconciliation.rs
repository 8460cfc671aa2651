//! Purchase reconciliation worker.
//!
//! A checkout can fail between the money step and the entitlement write;
//! the purchase flow records those as partial failures in the audit. This
//! worker sweeps the audit for stranded records and finishes the order
//! write they paid for, idempotently keyed on the transaction reference.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::catalog::{ItemResolver, ItemType, ResolveError};
use crate::database::repository::{OrderDraft, OrderLedger, PurchaseAudit, PurchaseRecord};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// How often the worker wakes up to sweep the audit.
    pub sweep_interval: Duration,
    /// Maximum number of stranded records fetched per cycle, oldest first.
    pub batch_size: i64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
            batch_size: 50,
        }
    }
}

impl ReconcilerConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.sweep_interval = Duration::from_secs(
            std::env::var("RECONCILER_SWEEP_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.sweep_interval.as_secs()),
        );
        cfg.batch_size = std::env::var("RECONCILER_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(cfg.batch_size);
        cfg
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

pub struct ReconciliationWorker {
    resolver: ItemResolver,
    orders: Arc<dyn OrderLedger>,
    audit: Arc<dyn PurchaseAudit>,
    config: ReconcilerConfig,
}

impl ReconciliationWorker {
    pub fn new(
        resolver: ItemResolver,
        orders: Arc<dyn OrderLedger>,
        audit: Arc<dyn PurchaseAudit>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            resolver,
            orders,
            audit,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            sweep_interval_secs = self.config.sweep_interval.as_secs(),
            batch_size = self.config.batch_size,
            "purchase reconciliation worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("purchase reconciliation worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.sweep_interval) => {
                    if let Err(e) = self.sweep().await {
                        warn!(error = %e, "reconciliation sweep failed");
                    }
                }
            }
        }

        info!("purchase reconciliation worker stopped");
    }

    /// One sweep over the stranded records. Returns how many were completed.
    pub async fn sweep(&self) -> anyhow::Result<usize> {
        let stranded = self.audit.partial_failures(self.config.batch_size).await?;
        if stranded.is_empty() {
            return Ok(0);
        }

        info!(count = stranded.len(), "reconciling stranded purchases");

        let mut completed = 0;
        for record in stranded {
            match self.reconcile(&record).await {
                Ok(true) => completed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        record_id = %record.id,
                        tx_ref = ?record.tx_ref,
                        error = %e,
                        "reconciliation attempt failed; will retry next sweep"
                    );
                }
            }
        }

        Ok(completed)
    }

    // -----------------------------------------------------------------------
    // Per-record reconciliation
    // -----------------------------------------------------------------------

    async fn reconcile(&self, record: &PurchaseRecord) -> anyhow::Result<bool> {
        if !record.kind.grants_entitlement() {
            // Money settled and no entitlement is owed; nothing to rebuild.
            // Left in place so an operator can see how it got here.
            warn!(
                record_id = %record.id,
                kind = %record.kind,
                "partial failure on a non-entitling payment kind; skipping"
            );
            return Ok(false);
        }

        let (item_id, item_type) = match (record.item_id, record.item_type) {
            (Some(id), Some(kind)) => (id, kind),
            _ => {
                warn!(
                    record_id = %record.id,
                    "partial failure without item identity; cannot rebuild the order"
                );
                return Ok(false);
            }
        };

        let order = match self.rebuild_order(record, item_id, item_type).await {
            Ok(order) => order,
            Err(ReconcileSkip::ItemGone) => {
                warn!(
                    record_id = %record.id,
                    item_id = %item_id,
                    "paid item no longer resolvable; leaving record for operator review"
                );
                return Ok(false);
            }
            Err(ReconcileSkip::Failed(e)) => return Err(e),
        };

        let marked = self.audit.mark_completed(record.id, Some(order.id)).await?;
        if marked {
            info!(
                record_id = %record.id,
                order_id = %order.id,
                user_id = %record.user_id,
                tx_ref = ?record.tx_ref,
                "stranded purchase reconciled"
            );
        } else {
            info!(
                record_id = %record.id,
                "record was already reconciled elsewhere"
            );
        }

        Ok(marked)
    }

    async fn rebuild_order(
        &self,
        record: &PurchaseRecord,
        item_id: Uuid,
        item_type: ItemType,
    ) -> Result<crate::database::repository::Order, ReconcileSkip> {
        // The original terms were never written; re-resolving applies the
        // item's current terms, anchored at reconcile time.
        let resolved = match self.resolver.resolve(item_type, item_id).await {
            Ok(resolved) => resolved,
            Err(ResolveError::NotFound { .. }) => return Err(ReconcileSkip::ItemGone),
            Err(ResolveError::Store(e)) => return Err(ReconcileSkip::Failed(e.into())),
        };

        let draft = OrderDraft {
            user_id: record.user_id,
            item_id,
            item_type,
            payment_kind: record.kind,
            paid_price: record.amount.clone(),
            paid_currency: record.currency,
            tx_ref: record.tx_ref.clone(),
            expires_at: resolved.item.terms.expires_at(chrono::Utc::now()),
            remaining_views: resolved.item.terms.view_allotment,
        };

        self.orders
            .create_or_renew(draft)
            .await
            .map_err(|e| ReconcileSkip::Failed(e.into()))
    }
}

enum ReconcileSkip {
    /// The catalog no longer resolves the purchased item.
    ItemGone,
    Failed(anyhow::Error),
}
