//! # tally-payments
//!
//! License records, usage metering and Stripe billing for tally.
//!
//! ## Billing Flow
//!
//! Payment happens on Stripe's hosted pages; this crate only hands out the
//! session URLs and reacts to the webhooks Stripe sends afterwards.
//!
//! ```text
//! ┌─────────────┐     ┌─────────────────┐     ┌─────────────┐
//! │  Your Site  │────▶│  Stripe Hosted  │────▶│  Your Site  │
//! │  (pricing)  │     │  Checkout Page  │     │  (success)  │
//! └─────────────┘     └────────┬────────┘     └─────────────┘
//!                              │ webhook
//!                              ▼
//!                     ┌─────────────────┐     ┌─────────────┐
//!                     │ WebhookProcessor│────▶│ LicenseStore│
//!                     └─────────────────┘     └─────────────┘
//! ```
//!
//! The license row is the only state we own. Customers and subscriptions
//! live at Stripe; webhook handling always re-reads the live customer.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tally_payments::{MemoryLicenseStore, RedirectUrls, SessionFactory, StripeClient};
//!
//! let store = Arc::new(MemoryLicenseStore::new());
//! let stripe = Arc::new(StripeClient::from_env()?);
//! let sessions = SessionFactory::new(store, stripe, RedirectUrls::from_env());
//!
//! let link = sessions.checkout(Some("user@example.com"), Some("pro"), None, None).await?;
//!
//! // Redirect user to: link.url
//! ```

pub mod config;
mod checkout;
mod error;
mod license;
pub mod provider;
pub mod signature;
pub mod store;
mod usage;
mod webhook;

pub use checkout::{CheckoutLink, PortalLink, SessionFactory};
pub use config::{PaymentsConfig, PriceTable, RedirectUrls, StoreConfig};
pub use error::{PaymentError, Result};
pub use license::{
    ChartAccess, License, LicenseStatus, LicenseSummary, Limit, OverLimits, Tier, TierLimits,
    UsageCounter, UsageSnapshot,
};
pub use provider::{BillingProvider, MockBillingProvider, StripeClient};
pub use store::{LicensePatch, LicenseStore, MemoryLicenseStore, RestLicenseStore};
pub use usage::{UsageEvent, UsageEventKind, UsageTracker};
pub use webhook::{
    ProviderEvent, WebhookEvent, WebhookOutcome, WebhookProcessor, construct_event, parse_event,
};
