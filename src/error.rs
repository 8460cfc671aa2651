//! Unified error handling for the ReelPass backend.
//!
//! Every failure surfaced to a client flows through [`AppError`]: a category
//! (domain, infrastructure, external, validation), an HTTP status, a stable
//! machine-readable code, and a user-facing message that never leaks
//! internals.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::catalog::{ItemType, ResolveError};
use crate::currency::ConversionError;
use crate::database::error::DatabaseError;
use crate::gateway::error::GatewayError;

/// Stable error codes for programmatic client handling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx, plus the one 5xx below)
    #[serde(rename = "INSUFFICIENT_FUNDS")]
    InsufficientFunds,
    #[serde(rename = "VERIFICATION_FAILED")]
    VerificationFailed,
    #[serde(rename = "ITEM_NOT_FOUND")]
    ItemNotFound,
    #[serde(rename = "ORDER_NOT_FOUND")]
    OrderNotFound,
    #[serde(rename = "INVALID_DISCOUNT_CODE")]
    InvalidDiscountCode,
    #[serde(rename = "VIEWS_EXHAUSTED")]
    ViewsExhausted,
    #[serde(rename = "ENTITLEMENT_EXPIRED")]
    EntitlementExpired,
    #[serde(rename = "NOT_PURCHASED")]
    NotPurchased,
    #[serde(rename = "NOT_STREAMABLE")]
    NotStreamable,
    #[serde(rename = "PARTIAL_FAILURE")]
    PartialFailure,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 504)
    #[serde(rename = "PAYMENT_GATEWAY_ERROR")]
    PaymentGatewayError,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    // Generic
    #[serde(rename = "AUTHENTICATION_REQUIRED")]
    AuthenticationRequired,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
}

/// Business-rule failures.
#[derive(Debug, Clone)]
pub enum DomainError {
    /// Converted wallet holdings were below the checkout amount.
    InsufficientFunds { available: String, required: String },
    /// Gateway charge was not successful or did not match the claimed
    /// reference.
    VerificationFailed { reference: String, reason: String },
    /// The id does not exist in the indicated catalog.
    ItemNotFound { item_type: String, item_id: String },
    OrderNotFound { order_id: String },
    InvalidDiscountCode { code: String },
    /// The view allotment on an order is used up.
    ViewsExhausted { item_id: String },
    /// The entitlement window has passed (or its views hit zero).
    Expired { item_id: String },
    NotPurchased { item_id: String },
    /// Container items have no playable asset of their own.
    NotStreamable { item_type: String },
    /// Money moved but the entitlement write failed; reconciliation will
    /// retry the write.
    PartialFailure { reference: Option<String> },
}

/// Database and configuration failures.
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Configuration { message: String },
    /// Catch-all for faults this process caused itself, like a panicked task.
    Internal { message: String },
}

/// Failures of services outside this process.
#[derive(Debug, Clone)]
pub enum ExternalError {
    PaymentGateway {
        gateway: String,
        message: String,
        is_retryable: bool,
    },
    Timeout {
        service: String,
        timeout_secs: u64,
    },
}

/// Input validation failures.
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// No caller identity on the request.
    MissingIdentity { header: String },
    InvalidCurrency { currency: String, reason: String },
    InvalidAmount { amount: String, reason: String },
    InvalidItemType { tag: String },
    MissingField { field: String },
}

/// Unified application error type.
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    // Constructors for the errors services raise directly.

    pub fn insufficient_funds(available: impl fmt::Display, required: impl fmt::Display) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::InsufficientFunds {
            available: available.to_string(),
            required: required.to_string(),
        }))
    }

    pub fn verification_failed(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::VerificationFailed {
            reference: reference.into(),
            reason: reason.into(),
        }))
    }

    pub fn item_not_found(item_type: ItemType, item_id: impl fmt::Display) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::ItemNotFound {
            item_type: item_type.to_string(),
            item_id: item_id.to_string(),
        }))
    }

    pub fn order_not_found(order_id: impl fmt::Display) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::OrderNotFound {
            order_id: order_id.to_string(),
        }))
    }

    pub fn invalid_discount_code(code: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::InvalidDiscountCode {
            code: code.into(),
        }))
    }

    pub fn views_exhausted(item_id: impl fmt::Display) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::ViewsExhausted {
            item_id: item_id.to_string(),
        }))
    }

    pub fn expired(item_id: impl fmt::Display) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::Expired {
            item_id: item_id.to_string(),
        }))
    }

    pub fn not_purchased(item_id: impl fmt::Display) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::NotPurchased {
            item_id: item_id.to_string(),
        }))
    }

    pub fn not_streamable(item_type: ItemType) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::NotStreamable {
            item_type: item_type.to_string(),
        }))
    }

    pub fn partial_failure(reference: Option<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::PartialFailure {
            reference,
        }))
    }

    pub fn missing_identity(header: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::MissingIdentity {
            header: header.into(),
        }))
    }

    pub fn invalid_amount(amount: impl fmt::Display, reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::InvalidAmount {
            amount: amount.to_string(),
            reason: reason.into(),
        }))
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::MissingField {
            field: field.into(),
        }))
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Infrastructure(
            InfrastructureError::Configuration {
                message: message.into(),
            },
        ))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Infrastructure(InfrastructureError::Internal {
            message: message.into(),
        }))
    }

    /// Map error to HTTP status code.
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientFunds { .. } => 402,
                DomainError::VerificationFailed { .. } => 402,
                DomainError::ItemNotFound { .. } => 404,
                DomainError::OrderNotFound { .. } => 404,
                DomainError::InvalidDiscountCode { .. } => 400,
                DomainError::ViewsExhausted { .. } => 409,
                DomainError::Expired { .. } => 403,
                DomainError::NotPurchased { .. } => 403,
                DomainError::NotStreamable { .. } => 400,
                // The caller's money moved; this is a server-side promise to
                // finish the job, not a client mistake.
                DomainError::PartialFailure { .. } => 500,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { .. } => 502,
                ExternalError::Timeout { .. } => 504,
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::MissingIdentity { .. } => 401,
                _ => 400,
            },
        }
    }

    /// Get error code for client handling.
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientFunds { .. } => ErrorCode::InsufficientFunds,
                DomainError::VerificationFailed { .. } => ErrorCode::VerificationFailed,
                DomainError::ItemNotFound { .. } => ErrorCode::ItemNotFound,
                DomainError::OrderNotFound { .. } => ErrorCode::OrderNotFound,
                DomainError::InvalidDiscountCode { .. } => ErrorCode::InvalidDiscountCode,
                DomainError::ViewsExhausted { .. } => ErrorCode::ViewsExhausted,
                DomainError::Expired { .. } => ErrorCode::EntitlementExpired,
                DomainError::NotPurchased { .. } => ErrorCode::NotPurchased,
                DomainError::NotStreamable { .. } => ErrorCode::NotStreamable,
                DomainError::PartialFailure { .. } => ErrorCode::PartialFailure,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
                InfrastructureError::Internal { .. } => ErrorCode::InternalError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { .. } => ErrorCode::PaymentGatewayError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::MissingIdentity { .. } => ErrorCode::AuthenticationRequired,
                _ => ErrorCode::ValidationError,
            },
        }
    }

    /// Get user-friendly error message.
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientFunds {
                    available,
                    required,
                } => {
                    format!(
                        "Insufficient wallet balance. Available: {}, Required: {}",
                        available, required
                    )
                }
                DomainError::VerificationFailed { reference, reason } => {
                    format!("Payment '{}' could not be verified: {}", reference, reason)
                }
                DomainError::ItemNotFound { item_type, item_id } => {
                    format!("{} '{}' not found", item_type, item_id)
                }
                DomainError::OrderNotFound { order_id } => {
                    format!("Order '{}' not found", order_id)
                }
                DomainError::InvalidDiscountCode { code } => {
                    format!("Discount code '{}' is not valid", code)
                }
                DomainError::ViewsExhausted { .. } => {
                    "All purchased views for this item have been used".to_string()
                }
                DomainError::Expired { .. } => "Access to this item has expired".to_string(),
                DomainError::NotPurchased { .. } => {
                    "This item has not been purchased".to_string()
                }
                DomainError::NotStreamable { item_type } => {
                    format!("A {} has no playable asset of its own", item_type)
                }
                DomainError::PartialFailure { .. } => {
                    "Your payment was received but the purchase could not be completed. \
                     It will be retried automatically"
                        .to_string()
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway {
                    gateway,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment gateway ({}) is temporarily unavailable. Please try again",
                            gateway
                        )
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => {
                    format!(
                        "{} request timed out after {} seconds. Please try again",
                        service, timeout_secs
                    )
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::MissingIdentity { header } => {
                    format!("Missing required '{}' header", header)
                }
                ValidationError::InvalidCurrency { currency, reason } => {
                    format!("Invalid currency '{}': {}", currency, reason)
                }
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::InvalidItemType { tag } => {
                    format!("Unknown item type '{}'", tag)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
            },
        }
    }

    /// Check if the client may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(err) => {
                matches!(err, DomainError::PartialFailure { .. })
            }
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
                InfrastructureError::Internal { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { is_retryable, .. } => *is_retryable,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        let is_retryable = err.is_retryable();
        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: err.to_string(),
            is_retryable,
        }))
    }
}

impl From<ResolveError> for AppError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound { item_type, item_id } => {
                AppError::item_not_found(item_type, item_id)
            }
            ResolveError::Store(e) => e.into(),
        }
    }
}

impl From<ConversionError> for AppError {
    fn from(err: ConversionError) -> Self {
        match err {
            ConversionError::UnsupportedCurrency { currency } => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidCurrency {
                    currency: currency.to_string(),
                    reason: "no exchange rate configured".to_string(),
                }))
            }
            ConversionError::UnknownCode { code } => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidCurrency {
                    currency: code,
                    reason: "unknown currency code".to_string(),
                }))
            }
            ConversionError::InvalidRate { currency, rate } => AppError::configuration(format!(
                "invalid exchange rate for {currency}: {rate}"
            )),
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        let kind = match err {
            GatewayError::Unconfigured => {
                return AppError::configuration("payment gateway is not configured");
            }
            GatewayError::Timeout { seconds } => AppErrorKind::External(ExternalError::Timeout {
                service: "payment gateway".to_string(),
                timeout_secs: seconds,
            }),
            GatewayError::Request { message } => {
                AppErrorKind::External(ExternalError::PaymentGateway {
                    gateway: "flutterwave".to_string(),
                    message,
                    is_retryable: true,
                })
            }
            GatewayError::Api { status, message } => {
                AppErrorKind::External(ExternalError::PaymentGateway {
                    gateway: "flutterwave".to_string(),
                    message,
                    is_retryable: status >= 500,
                })
            }
            GatewayError::Decode { message } => {
                AppErrorKind::External(ExternalError::PaymentGateway {
                    gateway: "flutterwave".to_string(),
                    message,
                    is_retryable: false,
                })
            }
        };
        AppError::new(kind)
    }
}

/// Result type for operations that can fail with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_funds_maps_to_payment_required() {
        let error = AppError::insufficient_funds("50.00", "100.00");

        assert_eq!(error.status_code(), 402);
        assert_eq!(error.error_code(), ErrorCode::InsufficientFunds);
        assert!(error.user_message().contains("Available: 50.00"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn verification_failure_maps_to_payment_required() {
        let error = AppError::verification_failed("FLW-42", "status was failed");

        assert_eq!(error.status_code(), 402);
        assert_eq!(error.error_code(), ErrorCode::VerificationFailed);
        assert!(!error.is_retryable());
    }

    #[test]
    fn partial_failure_is_a_retryable_server_error() {
        let error = AppError::partial_failure(Some("FLW-42".to_string()));

        assert_eq!(error.status_code(), 500);
        assert_eq!(error.error_code(), ErrorCode::PartialFailure);
        assert!(error.is_retryable());
    }

    #[test]
    fn exhausted_views_conflict_while_expiry_forbids() {
        let exhausted = AppError::views_exhausted("item-1");
        let expired = AppError::expired("item-1");

        assert_eq!(exhausted.status_code(), 409);
        assert_eq!(expired.status_code(), 403);
    }

    #[test]
    fn missing_identity_requires_authentication() {
        let error = AppError::missing_identity("X-User-Id");

        assert_eq!(error.status_code(), 401);
        assert_eq!(error.error_code(), ErrorCode::AuthenticationRequired);
    }

    #[test]
    fn resolve_miss_becomes_item_not_found() {
        let error: AppError = ResolveError::NotFound {
            item_type: ItemType::Movie,
            item_id: uuid::Uuid::new_v4(),
        }
        .into();

        assert_eq!(error.status_code(), 404);
        assert_eq!(error.error_code(), ErrorCode::ItemNotFound);
    }
}
