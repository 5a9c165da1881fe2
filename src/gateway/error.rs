use crate::gateway::types::DeclineDetail;
use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Payment declined: {message}")]
    DeclinedError {
        message: String,
        details: Vec<DeclineDetail>,
    },

    #[error("Webhook authenticity check failed: {message}")]
    AuthenticityError { message: String },

    #[error("Malformed webhook event: {message}")]
    MalformedEventError { message: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Gateway error: gateway={gateway}, message={message}")]
    ApiError {
        gateway: String,
        message: String,
        code: Option<String>,
        retryable: bool,
    },
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::ValidationError { .. } => false,
            GatewayError::DeclinedError { .. } => false,
            GatewayError::AuthenticityError { .. } => false,
            GatewayError::MalformedEventError { .. } => false,
            GatewayError::NetworkError { .. } => true,
            GatewayError::RateLimitError { .. } => true,
            GatewayError::ApiError { retryable, .. } => *retryable,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            GatewayError::ValidationError { message, .. } => message.clone(),
            GatewayError::DeclinedError { .. } => {
                "Payment was declined by the gateway".to_string()
            }
            GatewayError::AuthenticityError { .. } => "Invalid webhook signature".to_string(),
            GatewayError::MalformedEventError { .. } => "Invalid webhook payload".to_string(),
            GatewayError::NetworkError { .. } => {
                "Payment gateway is temporarily unavailable".to_string()
            }
            GatewayError::RateLimitError { .. } => {
                "Too many requests to payment gateway. Please retry shortly".to_string()
            }
            GatewayError::ApiError { .. } => "Payment gateway returned an error".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_flags_are_set() {
        assert!(GatewayError::NetworkError {
            message: "timeout".to_string()
        }
        .is_retryable());
        assert!(!GatewayError::DeclinedError {
            message: "declined".to_string(),
            details: Vec::new()
        }
        .is_retryable());
        assert!(!GatewayError::AuthenticityError {
            message: "bad signature".to_string()
        }
        .is_retryable());
    }
}
