use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("payment gateway is not configured")]
    Unconfigured,

    #[error("gateway request failed: {message}")]
    Request { message: String },

    #[error("gateway returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid gateway response: {message}")]
    Decode { message: String },

    #[error("gateway request timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Unconfigured => false,
            GatewayError::Request { .. } => true,
            GatewayError::Api { status, .. } => *status >= 500 || *status == 429,
            GatewayError::Decode { .. } => false,
            GatewayError::Timeout { .. } => true,
        }
    }
}
