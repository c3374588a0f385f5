//! Router

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::handlers::{
    create_checkout, create_portal, diagnose_provider, diagnose_store, get_license, health_check,
    method_not_allowed, preflight, stripe_webhook, track_usage,
};
use crate::state::AppState;

/// Build the application router.
///
/// The webhook route sits outside the CORS layer; it is only ever called by
/// Stripe.
pub fn router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        // Health & diagnostics
        .route("/health", get(health_check).fallback(method_not_allowed))
        .route(
            "/api/diagnostics/store",
            get(diagnose_store).options(preflight).fallback(method_not_allowed),
        )
        .route(
            "/api/diagnostics/provider",
            get(diagnose_provider).options(preflight).fallback(method_not_allowed),
        )
        // Billing
        .route(
            "/api/checkout",
            post(create_checkout).options(preflight).fallback(method_not_allowed),
        )
        .route(
            "/api/portal",
            post(create_portal).options(preflight).fallback(method_not_allowed),
        )
        // Licensing
        .route(
            "/api/license",
            get(get_license).options(preflight).fallback(method_not_allowed),
        )
        .route(
            "/api/usage",
            post(track_usage).options(preflight).fallback(method_not_allowed),
        )
        .layer(cors);

    let webhook = Router::new().route(
        "/api/webhook",
        post(stripe_webhook).fallback(method_not_allowed),
    );

    api.merge(webhook)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use tally_payments::{
        BillingProvider, License, LicenseStatus, LicenseStore, MemoryLicenseStore,
        MockBillingProvider, RedirectUrls, Tier, signature,
    };

    use super::*;

    const WEBHOOK_SECRET: &str = "whsec_test";

    struct Harness {
        app: Router,
        store: Arc<MemoryLicenseStore>,
        provider: Arc<MockBillingProvider>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryLicenseStore::new());
        let provider = Arc::new(MockBillingProvider::new(WEBHOOK_SECRET));
        let state = AppState::new(
            store.clone(),
            Some(provider.clone() as Arc<dyn BillingProvider>),
            RedirectUrls::for_base("https://app.example.com"),
            false,
        );
        Harness {
            app: router(state),
            store,
            provider,
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn webhook_request(payload: &[u8], secret: &str) -> Request<Body> {
        let header = signature::sign(payload, secret, chrono::Utc::now().timestamp()).unwrap();
        Request::post("/api/webhook")
            .header("stripe-signature", header)
            .body(Body::from(payload.to_vec()))
            .unwrap()
    }

    fn event(event_type: &str, object: Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": "evt_1",
            "type": event_type,
            "data": { "object": object }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness();
        let (status, body) = send(&h.app, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["paymentsConfigured"], true);
        assert_eq!(body["storeConfigured"], false);
    }

    #[tokio::test]
    async fn test_license_created_once() {
        let h = harness();
        let request = || {
            Request::get("/api/license?email=new@example.com")
                .body(Body::empty())
                .unwrap()
        };

        let (status, body) = send(&h.app, request()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tier"], "free");
        assert_eq!(body["status"], "active");
        assert_eq!(body["usage"], json!({ "forms": 0, "dashboards": 0, "responses": 0 }));
        assert_eq!(body["limits"]["forms"], 1);
        assert_eq!(body["limits"]["responses"], 100);
        assert_eq!(body["canCreateDashboard"], true);

        send(&h.app, request()).await;
        assert_eq!(h.store.len().await, 1);
    }

    #[tokio::test]
    async fn test_license_limits() {
        let h = harness();
        let mut free = License::free("free@example.com");
        free.usage_forms = 1;
        h.store.insert(free).await;

        let mut pro = License::free("pro@example.com");
        pro.tier = Tier::Pro;
        pro.usage_forms = 50;
        pro.usage_responses = 10_000;
        h.store.insert(pro).await;

        let (_, body) = send(
            &h.app,
            Request::get("/api/license?email=free@example.com").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(body["overLimits"]["forms"], true);
        assert_eq!(body["overLimits"]["responses"], false);
        assert_eq!(body["canCreateDashboard"], false);

        let (_, body) = send(
            &h.app,
            Request::get("/api/license?email=pro@example.com").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(body["limits"]["forms"], -1);
        assert_eq!(body["limits"]["charts"], "all");
        assert_eq!(body["overLimits"]["forms"], false);
        assert_eq!(body["canCreateDashboard"], true);
    }

    #[tokio::test]
    async fn test_license_requires_email() {
        let h = harness();
        let (status, body) =
            send(&h.app, Request::get("/api/license").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Email parameter required");
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_checkout_without_tier_touches_nothing() {
        let h = harness();
        let (status, body) = send(
            &h.app,
            post_json("/api/checkout", &json!({ "email": "a@example.com" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_INPUT");
        assert_eq!(h.provider.calls().await.total(), 0);
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_checkout_returns_session() {
        let h = harness();
        let (status, body) = send(
            &h.app,
            post_json(
                "/api/checkout",
                &json!({ "email": "a@example.com", "tier": "pro" }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sessionId"], "cs_mock1");
        assert!(body["url"].as_str().unwrap().starts_with("https://checkout.example.com/"));
    }

    #[tokio::test]
    async fn test_malformed_json() {
        let h = harness();
        let request = Request::post("/api/checkout")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(&h.app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_portal_without_customer() {
        let h = harness();
        let (status, _) = send(
            &h.app,
            post_json("/api/portal", &json!({ "email": "a@example.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_preflight_and_method_not_allowed() {
        let h = harness();
        for uri in ["/api/checkout", "/api/portal", "/api/license", "/api/usage"] {
            let (status, body) = send(
                &h.app,
                Request::options(uri).body(Body::empty()).unwrap(),
            )
            .await;
            assert_eq!(status, StatusCode::OK, "{uri}");
            assert_eq!(body, Value::Null);
        }

        let (status, body) =
            send(&h.app, Request::get("/api/checkout").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["error"], "Method not allowed");
    }

    #[tokio::test]
    async fn test_webhook_has_no_cors() {
        let h = harness();
        let request = Request::get("/api/license?email=a@example.com")
            .header(header::ORIGIN, "https://app.example.com")
            .body(Body::empty())
            .unwrap();
        let response = h.app.clone().oneshot(request).await.unwrap();
        assert!(response.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));

        let mut request = webhook_request(b"{}", WEBHOOK_SECRET);
        request
            .headers_mut()
            .insert(header::ORIGIN, "https://app.example.com".parse().unwrap());
        let response = h.app.clone().oneshot(request).await.unwrap();
        assert!(!response.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }

    #[tokio::test]
    async fn test_usage_records_and_counts() {
        let h = harness();
        h.store.insert(License::free("a@example.com")).await;

        let (status, body) = send(
            &h.app,
            post_json(
                "/api/usage",
                &json!({ "email": "a@example.com", "event": "responses_processed", "count": 40 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true }));

        send(
            &h.app,
            post_json("/api/usage", &json!({ "email": "a@example.com", "event": "export_pdf" })),
        )
        .await;

        let license = h.store.get("a@example.com").await.unwrap().unwrap();
        assert_eq!(license.usage_responses, 40);
        assert_eq!(h.store.events().await.len(), 2);
    }

    #[tokio::test]
    async fn test_usage_validation() {
        let h = harness();
        for body in [
            json!({ "email": "a@example.com" }),
            json!({ "event": "export_pdf" }),
            json!({ "email": "a@example.com", "event": "logged_in" }),
            json!({ "email": "a@example.com", "event": "export_pdf", "count": 0 }),
            json!({ "email": "a@example.com", "event": "export_pdf", "count": 2_147_483_648_u64 }),
            json!({ "email": "a@example.com", "event": "export_pdf", "count": 4_294_967_296_u64 }),
        ] {
            let (status, _) = send(&h.app, post_json("/api/usage", &body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        }
        assert!(h.store.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_webhook_invalid_signature_does_not_mutate() {
        let h = harness();
        let payload = event(
            "checkout.session.completed",
            json!({
                "id": "cs_1",
                "customer": "cus_1",
                "subscription": "sub_1",
                "metadata": { "email": "a@example.com", "tier": "pro" }
            }),
        );

        let (status, body) = send(&h.app, webhook_request(&payload, "whsec_wrong")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_SIGNATURE");
        assert!(h.store.is_empty().await);

        let request = Request::post("/api/webhook")
            .body(Body::from(payload))
            .unwrap();
        let (status, _) = send(&h.app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_webhook_signed_garbage_is_bad_request() {
        let h = harness();
        let (status, body) = send(&h.app, webhook_request(b"not json", WEBHOOK_SECRET)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_PAYLOAD");
    }

    #[tokio::test]
    async fn test_webhook_checkout_redelivery() {
        let h = harness();
        let payload = event(
            "checkout.session.completed",
            json!({
                "id": "cs_1",
                "customer": "cus_1",
                "subscription": "sub_1",
                "metadata": { "email": "a@example.com", "tier": "pro" }
            }),
        );

        for _ in 0..2 {
            let (status, body) = send(&h.app, webhook_request(&payload, WEBHOOK_SECRET)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, json!({ "received": true }));
        }

        assert_eq!(h.store.len().await, 1);
        let license = h.store.get("a@example.com").await.unwrap().unwrap();
        assert_eq!(license.tier, Tier::Pro);
        assert_eq!(license.status, LicenseStatus::Active);
        assert_eq!(h.provider.calls().await.create_customer, 0);
    }

    #[tokio::test]
    async fn test_webhook_subscription_deleted() {
        let h = harness();
        h.provider.insert_customer("cus_1", Some("a@example.com")).await;
        let mut license = License::free("a@example.com");
        license.tier = Tier::Team;
        license.provider_customer_id = Some("cus_1".into());
        license.provider_subscription_id = Some("sub_1".into());
        h.store.insert(license).await;

        let payload = event(
            "customer.subscription.deleted",
            json!({ "id": "sub_1", "customer": "cus_1", "status": "canceled" }),
        );
        let (status, _) = send(&h.app, webhook_request(&payload, WEBHOOK_SECRET)).await;
        assert_eq!(status, StatusCode::OK);

        let license = h.store.get("a@example.com").await.unwrap().unwrap();
        assert_eq!(license.tier, Tier::Free);
        assert_eq!(license.status, LicenseStatus::Canceled);
        assert!(license.provider_subscription_id.is_none());
    }

    #[tokio::test]
    async fn test_webhook_unknown_customer_acknowledged() {
        let h = harness();
        let payload = event(
            "invoice.payment_failed",
            json!({ "id": "in_1", "customer": "cus_gone" }),
        );
        let (status, body) = send(&h.app, webhook_request(&payload, WEBHOOK_SECRET)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "received": true }));
    }

    #[tokio::test]
    async fn test_usage_accepts_max_count() {
        let h = harness();
        let (status, _) = send(
            &h.app,
            post_json(
                "/api/usage",
                &json!({ "email": "a@example.com", "event": "export_pdf", "count": 2_147_483_647 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(h.store.events().await[0].count, 2_147_483_647);
    }

    #[tokio::test]
    async fn test_webhook_handler_failure_is_500() {
        let h = harness();
        h.provider.insert_customer("cus_1", Some("a@example.com")).await;
        h.store.insert(License::free("a@example.com")).await;
        h.provider.fail_with("api down").await;

        let payload = event(
            "invoice.payment_failed",
            json!({ "id": "in_1", "customer": "cus_1" }),
        );
        let (status, body) = send(&h.app, webhook_request(&payload, WEBHOOK_SECRET)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "PROVIDER_ERROR");

        let license = h.store.get("a@example.com").await.unwrap().unwrap();
        assert_eq!(license.status, LicenseStatus::Active);
    }

    #[tokio::test]
    async fn test_payments_disabled() {
        let store = Arc::new(MemoryLicenseStore::new());
        let app = router(AppState::new(
            store,
            None,
            RedirectUrls::for_base("http://localhost:3000"),
            false,
        ));

        let (status, body) = send(
            &app,
            post_json("/api/checkout", &json!({ "email": "a@example.com", "tier": "pro" })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "PAYMENTS_DISABLED");

        let (status, _) = send(&app, webhook_request(b"{}", WEBHOOK_SECRET)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, _) = send(
            &app,
            Request::get("/api/license?email=a@example.com").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_diagnostics() {
        let h = harness();
        let (status, body) = send(
            &h.app,
            Request::get("/api/diagnostics/store").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        h.provider.fail_with("Invalid API Key provided").await;
        let (status, body) = send(
            &h.app,
            Request::get("/api/diagnostics/provider").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Invalid API Key provided");
    }
}
