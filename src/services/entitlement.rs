use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::catalog::{ItemResolver, ItemType, ResolvedItem};
use crate::database::repository::OrderLedger;
use crate::error::AppResult;

/// Outcome of a read-only entitlement check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Granted {
        order_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
        remaining_views: Option<i32>,
    },
    Denied {
        reason: DenialReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// No order covers this item, directly or through a parent container.
    NotPurchased,
    /// An order exists but its window has passed or its views are used up.
    Expired,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::NotPurchased => "not_purchased",
            DenialReason::Expired => "expired",
        }
    }
}

/// Answers "may this user watch this item right now" without consuming
/// anything. Consumption happens on the streaming path only.
#[derive(Clone)]
pub struct EntitlementService {
    resolver: ItemResolver,
    orders: Arc<dyn OrderLedger>,
}

impl EntitlementService {
    pub fn new(resolver: ItemResolver, orders: Arc<dyn OrderLedger>) -> Self {
        Self { resolver, orders }
    }

    /// `parent_id` is the container the caller claims covers this item
    /// (season over an episode, course over a lesson). When present, an
    /// order against that container also grants access; when absent, only
    /// an exact (user, item, type) order counts.
    pub async fn check_access(
        &self,
        user_id: Uuid,
        item_type: ItemType,
        item_id: Uuid,
        parent_id: Option<Uuid>,
    ) -> AppResult<AccessDecision> {
        self.check_access_at(user_id, item_type, item_id, parent_id, Utc::now())
            .await
    }

    /// Evaluation against an explicit clock, so expiry boundaries are
    /// testable without waiting.
    pub async fn check_access_at(
        &self,
        user_id: Uuid,
        item_type: ItemType,
        item_id: Uuid,
        parent_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> AppResult<AccessDecision> {
        let (_, decision) = self
            .evaluate_at(user_id, item_type, item_id, parent_id, at)
            .await?;
        Ok(decision)
    }

    /// Resolves the item and evaluates access in one pass. The streaming
    /// path needs both.
    pub(crate) async fn evaluate_at(
        &self,
        user_id: Uuid,
        item_type: ItemType,
        item_id: Uuid,
        parent_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> AppResult<(ResolvedItem, AccessDecision)> {
        let resolved = self.resolver.resolve(item_type, item_id).await?;

        let order = self
            .orders
            .find_entitling(user_id, item_id, item_type, parent_id)
            .await?;

        let Some(order) = order else {
            return Ok((
                resolved,
                AccessDecision::Denied {
                    reason: DenialReason::NotPurchased,
                },
            ));
        };

        if let Some(expires_at) = order.expires_at {
            if expires_at <= at {
                return Ok((
                    resolved,
                    AccessDecision::Denied {
                        reason: DenialReason::Expired,
                    },
                ));
            }
        }
        if order.remaining_views == Some(0) {
            return Ok((
                resolved,
                AccessDecision::Denied {
                    reason: DenialReason::Expired,
                },
            ));
        }

        Ok((
            resolved,
            AccessDecision::Granted {
                order_id: order.id,
                expires_at: order.expires_at,
                remaining_views: order.remaining_views,
            },
        ))
    }
}
