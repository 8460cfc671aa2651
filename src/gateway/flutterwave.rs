use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::currency::Currency;
use crate::gateway::error::{GatewayError, GatewayResult};
use crate::gateway::types::{ChargeStatus, VerifiedCharge};
use crate::gateway::utils::GatewayHttpClient;
use crate::gateway::verifier::PaymentVerifier;

#[derive(Debug, Clone)]
pub struct FlutterwaveConfig {
    pub secret_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl FlutterwaveConfig {
    pub fn from_env() -> GatewayResult<Self> {
        let secret_key =
            std::env::var("FLUTTERWAVE_SECRET_KEY").map_err(|_| GatewayError::Unconfigured)?;

        Ok(Self {
            secret_key,
            base_url: std::env::var("FLUTTERWAVE_BASE_URL")
                .unwrap_or_else(|_| "https://api.flutterwave.com/v3".to_string()),
            timeout_secs: std::env::var("FLUTTERWAVE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            max_retries: std::env::var("FLUTTERWAVE_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(2),
        })
    }
}

#[derive(Deserialize)]
struct FlutterwaveEnvelope {
    status: String,
    message: String,
    data: Option<JsonValue>,
}

pub struct FlutterwaveVerifier {
    config: FlutterwaveConfig,
    http: GatewayHttpClient,
}

impl FlutterwaveVerifier {
    pub fn new(config: FlutterwaveConfig) -> GatewayResult<Self> {
        let http = GatewayHttpClient::new(
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::new(FlutterwaveConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }
}

fn json_amount(data: &JsonValue) -> Option<BigDecimal> {
    let value = data.get("amount")?;
    let text = value
        .as_str()
        .map(|s| s.to_string())
        .or_else(|| value.as_f64().map(|n| n.to_string()))?;
    BigDecimal::from_str(&text).ok()
}

#[async_trait]
impl PaymentVerifier for FlutterwaveVerifier {
    async fn verify(&self, transaction_id: &str) -> GatewayResult<VerifiedCharge> {
        let url = self.endpoint(&format!("/transactions/{}/verify", transaction_id));
        let raw: FlutterwaveEnvelope = self
            .http
            .request_json(reqwest::Method::GET, &url, Some(&self.config.secret_key), None)
            .await?;

        // Envelope-level failure means the gateway answered and the charge
        // cannot be trusted; report it as an unverifiable charge, not a
        // transport error.
        if raw.status.to_lowercase() != "success" {
            return Ok(VerifiedCharge {
                status: ChargeStatus::Unknown,
                tx_ref: None,
                amount: None,
                currency: None,
                charged_at: None,
                failure_reason: Some(raw.message),
            });
        }

        let data = raw.data.unwrap_or_else(|| serde_json::json!({}));
        let status = ChargeStatus::from_gateway_tag(
            data.get("status").and_then(|v| v.as_str()).unwrap_or(""),
        );

        let charge = VerifiedCharge {
            status,
            tx_ref: data
                .get("tx_ref")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            amount: json_amount(&data),
            currency: data
                .get("currency")
                .and_then(|v| v.as_str())
                .and_then(|s| Currency::from_str(s).ok()),
            charged_at: data
                .get("created_at")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            failure_reason: data
                .get("processor_response")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        };

        info!(
            transaction_id = %transaction_id,
            status = charge.status.as_str(),
            "flutterwave charge verified"
        );

        Ok(charge)
    }

    fn name(&self) -> &'static str {
        "flutterwave"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_parse_from_both_json_shapes() {
        let as_number = serde_json::json!({ "amount": 1500.5 });
        let as_string = serde_json::json!({ "amount": "1500.50" });
        let missing = serde_json::json!({});

        assert_eq!(
            json_amount(&as_number),
            Some(BigDecimal::from_str("1500.5").unwrap())
        );
        assert_eq!(
            json_amount(&as_string),
            Some(BigDecimal::from_str("1500.50").unwrap())
        );
        assert_eq!(json_amount(&missing), None);
    }

    #[test]
    fn config_requires_a_secret_key() {
        // from_env reads the process environment; only assert the error type
        // when the key is absent.
        if std::env::var("FLUTTERWAVE_SECRET_KEY").is_err() {
            assert!(matches!(
                FlutterwaveConfig::from_env(),
                Err(GatewayError::Unconfigured)
            ));
        }
    }
}
