//! Payment Error Types

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Billing and licensing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    /// Missing or malformed request input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No billing relationship exists for the account
    #[error("Not found: {0}")]
    NotFound(String),

    /// Stripe API error
    #[error("Stripe error: {0}")]
    Provider(String),

    /// Webhook signature verification failed
    #[error("Webhook signature invalid: {0}")]
    WebhookSignature(String),

    /// Webhook payload parsing failed
    #[error("Webhook parse error: {0}")]
    WebhookParse(String),

    /// Remote call exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),
}

impl PaymentError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentError::Provider(_) | PaymentError::Storage(_) | PaymentError::Timeout(_)
        )
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> &str {
        match self {
            PaymentError::InvalidInput(msg) | PaymentError::NotFound(msg) => msg,
            PaymentError::Provider(_) => "Payment processing failed. Please try again.",
            PaymentError::WebhookSignature(_) => "Invalid signature.",
            PaymentError::WebhookParse(_) => "Malformed webhook payload.",
            PaymentError::Timeout(_) => "An upstream service did not respond in time.",
            PaymentError::Config(_) => "Service configuration error.",
            PaymentError::Storage(_) => "Internal server error",
        }
    }

    /// Message safe to pass through to callers that asked for diagnostics.
    ///
    /// Provider messages are forwarded verbatim; everything else falls back to
    /// [`PaymentError::user_message`].
    pub fn detail(&self) -> String {
        match self {
            PaymentError::Provider(msg) | PaymentError::Storage(msg) | PaymentError::Timeout(msg) => {
                msg.clone()
            }
            other => other.user_message().to_string(),
        }
    }
}

impl From<reqwest::Error> for PaymentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PaymentError::Timeout(err.to_string())
        } else {
            PaymentError::Storage(err.to_string())
        }
    }
}

impl From<stripe::StripeError> for PaymentError {
    fn from(err: stripe::StripeError) -> Self {
        match err {
            stripe::StripeError::Stripe(request_error) => PaymentError::Provider(
                request_error
                    .message
                    .unwrap_or_else(|| format!("Stripe returned HTTP {}", request_error.http_status)),
            ),
            stripe::StripeError::Timeout => PaymentError::Timeout("Stripe request timed out".into()),
            other => PaymentError::Provider(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(PaymentError::Storage("down".into()).is_retryable());
        assert!(PaymentError::Timeout("slow".into()).is_retryable());
        assert!(!PaymentError::InvalidInput("email".into()).is_retryable());
        assert!(!PaymentError::WebhookSignature("bad".into()).is_retryable());
    }

    #[test]
    fn test_storage_detail_hidden_from_users() {
        let err = PaymentError::Storage("relation \"licenses\" does not exist".into());
        assert_eq!(err.user_message(), "Internal server error");
        assert!(err.detail().contains("licenses"));
    }

    #[test]
    fn test_provider_detail_passed_through() {
        let err = PaymentError::Provider("No such price: 'price_123'".into());
        assert_eq!(err.detail(), "No such price: 'price_123'");
    }
}
