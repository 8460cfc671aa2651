use async_trait::async_trait;

use crate::gateway::error::GatewayResult;
use crate::gateway::types::VerifiedCharge;

/// Looks up a charge at the gateway by its transaction id.
///
/// Implementations return `Ok` with a non-successful [`VerifiedCharge`] when
/// the gateway answered but the charge did not settle; `Err` is reserved for
/// transport and configuration failures.
#[async_trait]
pub trait PaymentVerifier: Send + Sync {
    async fn verify(&self, transaction_id: &str) -> GatewayResult<VerifiedCharge>;

    fn name(&self) -> &'static str;
}
