//! tally HTTP Server
//!
//! Axum-based server exposing checkout, billing portal, license lookup,
//! usage tracking and the Stripe webhook.

mod error;
mod handlers;
mod routes;
mod state;

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tally_payments::{
    BillingProvider, LicenseStore, MemoryLicenseStore, RedirectUrls, RestLicenseStore,
    StoreConfig, StripeClient,
};

use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Initialize license store
    let store_config = StoreConfig::from_env();
    let store_configured = store_config.is_ok();
    let store: Arc<dyn LicenseStore> = match store_config {
        Ok(config) => {
            tracing::info!(url = %config.url, table = %config.licenses_table, "✓ License store configured");
            Arc::new(RestLicenseStore::new(config)?)
        }
        Err(e) => {
            tracing::warn!("⚠ {e} - licenses are kept in memory and lost on restart");
            tracing::warn!("  Set STORE_URL and STORE_SERVICE_KEY in .env");
            Arc::new(MemoryLicenseStore::new())
        }
    };

    // Initialize payments
    let stripe = match StripeClient::from_env() {
        Ok(client) => {
            tracing::info!("✓ Stripe configured");
            Some(client)
        }
        Err(e) => {
            tracing::warn!("⚠ Stripe not configured - payments disabled ({e})");
            tracing::warn!(
                "  Set STRIPE_SECRET_KEY, STRIPE_WEBHOOK_SECRET, STRIPE_PRICE_PRO and STRIPE_PRICE_TEAM in .env"
            );
            None
        }
    };
    let provider = stripe.map(|client| Arc::new(client) as Arc<dyn BillingProvider>);

    // Build application state
    let state = AppState::new(store, provider, RedirectUrls::from_env(), store_configured);
    let app = routes::router(state);

    // Start server
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("tally server running on http://{}", addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health                   - Health check");
    tracing::info!("  POST /api/checkout             - Create Stripe checkout");
    tracing::info!("  POST /api/portal               - Create billing portal session");
    tracing::info!("  GET  /api/license?email=       - License and limits");
    tracing::info!("  POST /api/usage                - Record usage event");
    tracing::info!("  POST /api/webhook              - Stripe webhook");
    tracing::info!("  GET  /api/diagnostics/store    - Store check");
    tracing::info!("  GET  /api/diagnostics/provider - Stripe check");
    tracing::info!("");

    axum::serve(listener, app).await?;

    Ok(())
}
