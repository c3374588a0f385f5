//! API Error Responses

use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use tally_payments::PaymentError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Error returned from a handler, rendered as `{error, code}`
#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_INPUT", message)
    }

    pub fn payments_disabled() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "PAYMENTS_DISABLED",
            "Payments not configured",
        )
    }

    pub fn method_not_allowed() -> Self {
        Self::new(
            StatusCode::METHOD_NOT_ALLOWED,
            "METHOD_NOT_ALLOWED",
            "Method not allowed",
        )
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        let (status, code) = match &err {
            PaymentError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
            PaymentError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            PaymentError::WebhookSignature(_) => (StatusCode::BAD_REQUEST, "INVALID_SIGNATURE"),
            PaymentError::WebhookParse(_) => (StatusCode::BAD_REQUEST, "INVALID_PAYLOAD"),
            PaymentError::Provider(_) => (StatusCode::INTERNAL_SERVER_ERROR, "PROVIDER_ERROR"),
            PaymentError::Timeout(_) => (StatusCode::INTERNAL_SERVER_ERROR, "UPSTREAM_TIMEOUT"),
            PaymentError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            PaymentError::Config(_) => (StatusCode::SERVICE_UNAVAILABLE, "NOT_CONFIGURED"),
        };

        if status.is_server_error() {
            tracing::error!(error = %err, "Request failed");
        }

        // Webhook failures echo the reason back to the Stripe dashboard
        let message = match &err {
            PaymentError::WebhookSignature(_) | PaymentError::WebhookParse(_) => {
                format!("Webhook Error: {err}")
            }
            PaymentError::Storage(_) => err.user_message().to_string(),
            other => other.detail(),
        };

        Self::new(status, code, message)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
                code: self.code.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_error_status() {
        let cases = [
            (PaymentError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (PaymentError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (PaymentError::WebhookSignature("x".into()), StatusCode::BAD_REQUEST),
            (PaymentError::WebhookParse("x".into()), StatusCode::BAD_REQUEST),
            (PaymentError::Provider("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (PaymentError::Storage("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (PaymentError::Config("x".into()), StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn test_provider_message_passes_through() {
        let err = ApiError::from(PaymentError::Provider("No such price: 'price_x'".into()));
        assert_eq!(err.message, "No such price: 'price_x'");

        let err = ApiError::from(PaymentError::Storage("relation does not exist".into()));
        assert_eq!(err.message, "Internal server error");
    }
}
