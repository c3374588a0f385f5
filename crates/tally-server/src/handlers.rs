//! HTTP Handlers

use axum::{
    Json,
    body::Bytes,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderMap, StatusCode},
};
use serde::{Deserialize, Serialize};

use tally_payments::{CheckoutLink, LicenseSummary, PortalLink, UsageEvent, UsageEventKind, WebhookOutcome};

use crate::error::ApiError;
use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub store_configured: bool,
    pub payments_configured: bool,
}

#[derive(Debug, Serialize)]
pub struct DiagnosticResponse {
    pub status: &'static str,
    pub check: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub email: Option<String>,
    pub tier: Option<String>,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalRequest {
    pub email: Option<String>,
    pub return_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LicenseQuery {
    pub email: Option<String>,
}

const MAX_USAGE_COUNT: u32 = i32::MAX.unsigned_abs();

fn one() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct UsageRequest {
    pub email: Option<String>,
    pub event: Option<String>,
    #[serde(default = "one")]
    pub count: u32,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

fn present(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        store_configured: state.store_configured,
        payments_configured: state.billing.is_some(),
    })
}

/// CORS preflight on API routes
pub async fn preflight() -> StatusCode {
    StatusCode::OK
}

/// Fallback for unsupported methods on a known route
pub async fn method_not_allowed() -> ApiError {
    ApiError::method_not_allowed()
}

/// Create Stripe checkout session
pub async fn create_checkout(
    State(state): State<AppState>,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<Json<CheckoutLink>, ApiError> {
    let Json(payload) = payload?;
    let billing = state.billing()?;

    let link = billing
        .sessions
        .checkout(
            payload.email.as_deref(),
            payload.tier.as_deref(),
            payload.success_url.as_deref(),
            payload.cancel_url.as_deref(),
        )
        .await?;

    Ok(Json(link))
}

/// Create Stripe billing-portal session
pub async fn create_portal(
    State(state): State<AppState>,
    payload: Result<Json<PortalRequest>, JsonRejection>,
) -> Result<Json<PortalLink>, ApiError> {
    let Json(payload) = payload?;
    let billing = state.billing()?;

    let link = billing
        .sessions
        .portal(payload.email.as_deref(), payload.return_url.as_deref())
        .await?;

    Ok(Json(link))
}

/// License lookup; creates a free license on first sight of an email
pub async fn get_license(
    State(state): State<AppState>,
    query: Result<Query<LicenseQuery>, QueryRejection>,
) -> Result<Json<LicenseSummary>, ApiError> {
    let Query(query) = query?;
    let email = present(query.email.as_ref())
        .ok_or_else(|| ApiError::bad_request("Email parameter required"))?;

    let license = state.store.get_or_create(email).await?;
    Ok(Json(license.summary()))
}

/// Record a usage event
pub async fn track_usage(
    State(state): State<AppState>,
    payload: Result<Json<UsageRequest>, JsonRejection>,
) -> Result<Json<UsageResponse>, ApiError> {
    let Json(payload) = payload?;

    let (Some(email), Some(event)) = (present(payload.email.as_ref()), present(payload.event.as_ref()))
    else {
        return Err(ApiError::bad_request("Email and event required"));
    };
    let kind = UsageEventKind::parse(event)
        .ok_or_else(|| ApiError::bad_request(format!("Unknown event type: {event}")))?;
    // usage_events.count is a signed 32-bit column
    if payload.count == 0 || payload.count > MAX_USAGE_COUNT {
        return Err(ApiError::bad_request(format!(
            "Count must be between 1 and {MAX_USAGE_COUNT}"
        )));
    }

    state
        .usage
        .record(UsageEvent::new(email, kind, payload.count, payload.metadata))
        .await?;

    Ok(Json(UsageResponse { success: true }))
}

/// Stripe webhook handler
///
/// Takes the body as raw bytes: the signature covers the exact bytes Stripe
/// sent.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let billing = state.billing()?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            ApiError::new(
                StatusCode::BAD_REQUEST,
                "MISSING_SIGNATURE",
                "Missing Stripe signature",
            )
        })?;

    let event = billing.webhooks.verify(&body, signature).map_err(|e| {
        tracing::warn!(error = %e, "Webhook verification failed");
        ApiError::from(e)
    })?;

    if let WebhookOutcome::Ignored { reason } = billing.webhooks.handle(event).await? {
        tracing::info!(reason = %reason, "Webhook acknowledged without changes");
    }

    Ok(Json(WebhookAck { received: true }))
}

/// Store round-trip check
pub async fn diagnose_store(State(state): State<AppState>) -> Result<Json<DiagnosticResponse>, ApiError> {
    state.store.ping().await.map_err(|e| {
        tracing::error!(error = %e, "Store check failed");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "STORE_UNAVAILABLE", e.detail())
    })?;

    Ok(Json(DiagnosticResponse {
        status: "ok",
        check: "store",
    }))
}

/// Stripe API reachability check
pub async fn diagnose_provider(
    State(state): State<AppState>,
) -> Result<Json<DiagnosticResponse>, ApiError> {
    let billing = state.billing()?;

    billing.provider.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Stripe check failed");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "PROVIDER_UNAVAILABLE", e.detail())
    })?;

    Ok(Json(DiagnosticResponse {
        status: "ok",
        check: "provider",
    }))
}
