//! Caller identity extraction
//!
//! Authentication lives at the edge; by the time a request reaches this
//! service the gateway has already resolved the caller and stamped
//! `x-user-id`. The extractor rejects requests that arrive without it.

use std::str::FromStr;

use axum::extract::FromRequestParts;
use http::request::Parts;
use uuid::Uuid;

use crate::currency::Currency;
use crate::error::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const CURRENCY_HEADER: &str = "x-currency";

/// Identity and presentation preferences of the calling user.
#[derive(Debug, Clone)]
pub struct RequestIdentity {
    pub user_id: Uuid,
    /// Currency the caller wants to transact in, when they sent one.
    pub currency: Option<Currency>,
    pub request_id: Option<String>,
}

impl RequestIdentity {
    pub fn currency_or(&self, fallback: Currency) -> Currency {
        self.currency.unwrap_or(fallback)
    }

    /// Stamp an error with this request's id before it goes out.
    pub fn tag(&self, err: AppError) -> AppError {
        match &self.request_id {
            Some(id) => err.with_request_id(id.clone()),
            None => err,
        }
    }
}

impl<S> FromRequestParts<S> for RequestIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_id = parts
            .headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let raw_user = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| attach(AppError::missing_identity(USER_ID_HEADER), &request_id))?;

        let user_id = Uuid::parse_str(raw_user).map_err(|_| {
            attach(
                AppError::missing_identity(USER_ID_HEADER)
                    .with_context("header value is not a UUID"),
                &request_id,
            )
        })?;

        let currency = match parts
            .headers
            .get(CURRENCY_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            Some(raw) => Some(
                Currency::from_str(raw)
                    .map_err(|e| attach(AppError::from(e), &request_id))?,
            ),
            None => None,
        };

        Ok(RequestIdentity {
            user_id,
            currency,
            request_id,
        })
    }
}

fn attach(err: AppError, request_id: &Option<String>) -> AppError {
    match request_id {
        Some(id) => err.with_request_id(id.clone()),
        None => err,
    }
}
