//! Application State

use std::sync::Arc;

use tally_payments::{
    BillingProvider, LicenseStore, RedirectUrls, SessionFactory, UsageTracker, WebhookProcessor,
};

use crate::error::ApiError;

/// Stripe-backed services, present only when payments are configured
#[derive(Clone)]
pub struct Billing {
    pub provider: Arc<dyn BillingProvider>,
    pub sessions: Arc<SessionFactory>,
    pub webhooks: Arc<WebhookProcessor>,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// License store (PostgREST or in-memory)
    pub store: Arc<dyn LicenseStore>,

    /// Usage event logger
    pub usage: Arc<UsageTracker>,

    /// Billing services (optional - None if Stripe is not configured)
    pub billing: Option<Billing>,

    /// Whether a persistent store is configured
    pub store_configured: bool,
}

impl AppState {
    pub fn new(
        store: Arc<dyn LicenseStore>,
        provider: Option<Arc<dyn BillingProvider>>,
        urls: RedirectUrls,
        store_configured: bool,
    ) -> Self {
        let billing = provider.map(|provider| Billing {
            sessions: Arc::new(SessionFactory::new(store.clone(), provider.clone(), urls)),
            webhooks: Arc::new(WebhookProcessor::new(store.clone(), provider.clone())),
            provider,
        });

        Self {
            usage: Arc::new(UsageTracker::new(store.clone())),
            store,
            billing,
            store_configured,
        }
    }

    /// Billing services, or 503 when payments are disabled
    pub fn billing(&self) -> Result<&Billing, ApiError> {
        self.billing.as_ref().ok_or_else(ApiError::payments_disabled)
    }
}
