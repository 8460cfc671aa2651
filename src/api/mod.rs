//! HTTP surface
//!
//! One module per resource, each exposing a `router()` over its own state.
//! Handlers stay thin: decode the request, call the owning service, encode
//! the receipt.

pub mod discount;
pub mod entitlement;
pub mod orders;
pub mod purchase;
pub mod stream;
pub mod wallet;

use std::future::Future;

use tracing::error;

use crate::error::{AppError, AppResult};

/// Runs a money-moving flow on its own task and awaits the result.
///
/// A dropped connection cancels the handler future mid-await; the spawned
/// task is not tied to the connection and runs to completion, so a debit or
/// verified charge always reaches its ledger write.
pub(crate) async fn run_detached<T, F>(operation: &'static str, fut: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(result) => result,
        Err(join_err) => {
            error!(operation, error = %join_err, "Detached task failed");
            Err(AppError::internal(format!("{operation} task failed")))
        }
    }
}
