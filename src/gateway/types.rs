use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::currency::Currency;

/// Terminal state of a gateway charge as reported by verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    /// The one state that settles money. Anything else fails verification.
    Successful,
    Pending,
    Failed,
    Unknown,
}

impl ChargeStatus {
    pub fn from_gateway_tag(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "successful" | "success" | "completed" => ChargeStatus::Successful,
            "pending" => ChargeStatus::Pending,
            "failed" | "cancelled" | "abandoned" => ChargeStatus::Failed,
            _ => ChargeStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeStatus::Successful => "successful",
            ChargeStatus::Pending => "pending",
            ChargeStatus::Failed => "failed",
            ChargeStatus::Unknown => "unknown",
        }
    }
}

/// A charge as the gateway reports it. `tx_ref` is the merchant reference the
/// client claimed when it paid; callers must compare it against the claim
/// before trusting the charge.
#[derive(Debug, Clone)]
pub struct VerifiedCharge {
    pub status: ChargeStatus,
    pub tx_ref: Option<String>,
    pub amount: Option<BigDecimal>,
    pub currency: Option<Currency>,
    pub charged_at: Option<String>,
    pub failure_reason: Option<String>,
}

impl VerifiedCharge {
    pub fn is_successful(&self) -> bool {
        self.status == ChargeStatus::Successful
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_tags_collapse_to_known_states() {
        assert_eq!(
            ChargeStatus::from_gateway_tag("Successful"),
            ChargeStatus::Successful
        );
        assert_eq!(
            ChargeStatus::from_gateway_tag("pending"),
            ChargeStatus::Pending
        );
        assert_eq!(
            ChargeStatus::from_gateway_tag("cancelled"),
            ChargeStatus::Failed
        );
        assert_eq!(
            ChargeStatus::from_gateway_tag("weird"),
            ChargeStatus::Unknown
        );
    }
}
