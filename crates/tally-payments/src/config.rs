//! Environment Configuration

use std::time::Duration;

use crate::error::{PaymentError, Result};
use crate::license::Tier;

const DEFAULT_TIMEOUT_SECS: u64 = 10;

fn required(name: &str) -> Result<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| PaymentError::Config(format!("{name} not set")))
}

fn optional(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Deadline applied to every store and provider call (`REQUEST_TIMEOUT_SECS`)
pub fn request_timeout_from_env() -> Duration {
    let secs = std::env::var("REQUEST_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

/// Stripe price identifiers per paid tier
#[derive(Clone, Debug)]
pub struct PriceTable {
    pub pro: String,
    pub team: String,
}

impl PriceTable {
    pub fn price_for(&self, tier: Tier) -> Option<&str> {
        match tier {
            Tier::Pro => Some(self.pro.as_str()),
            Tier::Team => Some(self.team.as_str()),
            Tier::Free => None,
        }
    }
}

/// Stripe settings
#[derive(Clone, Debug)]
pub struct PaymentsConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub prices: PriceTable,
    pub timeout: Duration,
}

impl PaymentsConfig {
    /// Reads `STRIPE_SECRET_KEY`, `STRIPE_WEBHOOK_SECRET`, `STRIPE_PRICE_PRO`
    /// and `STRIPE_PRICE_TEAM`
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            secret_key: required("STRIPE_SECRET_KEY")?,
            webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
            prices: PriceTable {
                pro: required("STRIPE_PRICE_PRO")?,
                team: required("STRIPE_PRICE_TEAM")?,
            },
            timeout: request_timeout_from_env(),
        })
    }
}

/// Row store (PostgREST) settings
#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub url: String,
    pub service_key: String,
    pub licenses_table: String,
    pub events_table: String,
    pub timeout: Duration,
}

impl StoreConfig {
    pub fn new(url: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            service_key: service_key.into(),
            licenses_table: "licenses".into(),
            events_table: "usage_events".into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Reads `STORE_URL`, `STORE_SERVICE_KEY` and the optional
    /// `STORE_LICENSES_TABLE` / `STORE_EVENTS_TABLE`
    pub fn from_env() -> Result<Self> {
        let mut config = Self::new(required("STORE_URL")?, required("STORE_SERVICE_KEY")?);
        config.licenses_table = optional("STORE_LICENSES_TABLE", &config.licenses_table);
        config.events_table = optional("STORE_EVENTS_TABLE", &config.events_table);
        config.timeout = request_timeout_from_env();
        Ok(config)
    }
}

/// Default redirect targets for hosted pages
#[derive(Clone, Debug)]
pub struct RedirectUrls {
    pub success: String,
    pub cancel: String,
    pub portal_return: String,
}

impl RedirectUrls {
    pub fn for_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            success: format!("{base}/success?session_id={{CHECKOUT_SESSION_ID}}"),
            cancel: format!("{base}/pricing"),
            portal_return: format!("{base}/account"),
        }
    }

    /// Derived from `PUBLIC_BASE_URL` (default `http://localhost:3000`)
    pub fn from_env() -> Self {
        Self::for_base(&optional("PUBLIC_BASE_URL", "http://localhost:3000"))
    }
}
