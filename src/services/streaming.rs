use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use uuid::Uuid;

use crate::catalog::ItemType;
use crate::database::repository::{OrderLedger, ViewOutcome};
use crate::error::{AppError, AppResult};
use crate::services::entitlement::{AccessDecision, DenialReason, EntitlementService};

type HmacSha256 = Hmac<Sha256>;

/// Signs time-limited media URLs. The edge serving `/media/` recomputes the
/// HMAC over `{media_key}:{expires}` and rejects anything stale or forged.
#[derive(Clone)]
pub struct StreamSigner {
    secret: String,
    base_url: String,
    url_ttl_secs: i64,
}

impl StreamSigner {
    pub fn new(secret: String, base_url: String, url_ttl_secs: i64) -> Self {
        Self {
            secret,
            base_url: base_url.trim_end_matches('/').to_string(),
            url_ttl_secs,
        }
    }

    pub fn sign(&self, media_key: &str, now: DateTime<Utc>) -> AppResult<SignedUrl> {
        let expires_at = now + Duration::seconds(self.url_ttl_secs);
        let expires = expires_at.timestamp();

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| AppError::configuration("invalid stream signing secret"))?;
        mac.update(format!("{}:{}", media_key, expires).as_bytes());
        let sig = hex::encode(mac.finalize().into_bytes());

        Ok(SignedUrl {
            url: format!(
                "{}/media/{}?expires={}&sig={}",
                self.base_url, media_key, expires, sig
            ),
            expires_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// One granted playback: a signed URL plus what is left on the order.
#[derive(Debug, Clone)]
pub struct StreamGrant {
    pub url: String,
    pub url_expires_at: DateTime<Utc>,
    pub remaining_views: Option<i32>,
}

/// The consuming side of entitlement: a successful issue burns one view.
#[derive(Clone)]
pub struct StreamingService {
    entitlement: EntitlementService,
    orders: Arc<dyn OrderLedger>,
    signer: StreamSigner,
}

impl StreamingService {
    pub fn new(
        entitlement: EntitlementService,
        orders: Arc<dyn OrderLedger>,
        signer: StreamSigner,
    ) -> Self {
        Self {
            entitlement,
            orders,
            signer,
        }
    }

    pub async fn issue_stream(
        &self,
        user_id: Uuid,
        item_type: ItemType,
        item_id: Uuid,
        parent_id: Option<Uuid>,
    ) -> AppResult<StreamGrant> {
        self.issue_stream_at(user_id, item_type, item_id, parent_id, Utc::now())
            .await
    }

    pub async fn issue_stream_at(
        &self,
        user_id: Uuid,
        item_type: ItemType,
        item_id: Uuid,
        parent_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> AppResult<StreamGrant> {
        if !item_type.is_streamable() {
            return Err(AppError::not_streamable(item_type));
        }

        let (resolved, decision) = self
            .entitlement
            .evaluate_at(user_id, item_type, item_id, parent_id, at)
            .await?;

        let order_id = match decision {
            AccessDecision::Granted { order_id, .. } => order_id,
            AccessDecision::Denied { reason } => {
                return Err(match reason {
                    DenialReason::NotPurchased => AppError::not_purchased(item_id),
                    DenialReason::Expired => AppError::expired(item_id),
                });
            }
        };

        let media_key = resolved.item.media_key.clone().ok_or_else(|| {
            AppError::configuration(format!("catalog item {item_id} has no media asset"))
        })?;

        // Burn the view before handing out the URL. Two racing requests on a
        // counter of one serialize in the ledger; the loser gets no URL.
        let remaining_views = match self.orders.decrement_view(order_id).await? {
            ViewOutcome::Remaining(n) => Some(n),
            ViewOutcome::Uncapped => None,
            ViewOutcome::Exhausted => return Err(AppError::views_exhausted(item_id)),
            ViewOutcome::Missing => return Err(AppError::order_not_found(order_id)),
        };

        let signed = self.signer.sign(&media_key, at)?;

        Ok(StreamGrant {
            url: signed.url,
            url_expires_at: signed.expires_at,
            remaining_views,
        })
    }
}
