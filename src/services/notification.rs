use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::currency::Currency;
use crate::database::repository::PaymentKind;

/// A completed money-moving event, ready for delivery to the item's
/// recipient list.
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseEvent {
    pub user_id: Uuid,
    pub item_id: Option<Uuid>,
    pub item_title: Option<String>,
    pub kind: PaymentKind,
    pub amount: BigDecimal,
    pub currency: Currency,
    pub recipients: Vec<String>,
}

/// Delivery seam for purchase notifications. Failures are the notifier's
/// problem; the purchase flow never blocks or fails on delivery.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn purchase_completed(&self, event: &PurchaseEvent);
}

/// Structured-log delivery, the default until a real channel is wired up.
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn purchase_completed(&self, event: &PurchaseEvent) {
        match event.kind {
            PaymentKind::Donation => {
                info!(
                    user_id = %event.user_id,
                    item_title = event.item_title.as_deref().unwrap_or("-"),
                    amount = %event.amount,
                    currency = %event.currency,
                    recipients = event.recipients.len(),
                    "🔔 NOTIFICATION: Donation received"
                );
            }
            PaymentKind::TopUp => {
                info!(
                    user_id = %event.user_id,
                    amount = %event.amount,
                    currency = %event.currency,
                    "🔔 NOTIFICATION: Wallet top-up applied"
                );
            }
            PaymentKind::Wallet | PaymentKind::Card => {
                info!(
                    user_id = %event.user_id,
                    item_title = event.item_title.as_deref().unwrap_or("-"),
                    amount = %event.amount,
                    currency = %event.currency,
                    paid_with = %event.kind,
                    recipients = event.recipients.len(),
                    "🔔 NOTIFICATION: Purchase completed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_notifier_accepts_every_kind() {
        let notifier = LogNotifier::new();
        for kind in [
            PaymentKind::Wallet,
            PaymentKind::Card,
            PaymentKind::Donation,
            PaymentKind::TopUp,
        ] {
            notifier
                .purchase_completed(&PurchaseEvent {
                    user_id: Uuid::new_v4(),
                    item_id: None,
                    item_title: None,
                    kind,
                    amount: BigDecimal::from(10),
                    currency: Currency::Usd,
                    recipients: vec![],
                })
                .await;
        }
    }
}
