//! Stripe Checkout Integration
//!
//! Implements the "Stripe Checkout (Hosted)" approach: resolve the account's
//! Stripe customer, then hand out a hosted checkout or billing-portal URL.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::RedirectUrls;
use crate::error::{PaymentError, Result};
use crate::license::Tier;
use crate::provider::{BillingProvider, CheckoutRequest};
use crate::store::{LicensePatch, LicenseStore};

/// Checkout session handed back to the browser
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutLink {
    pub session_id: String,
    pub url: String,
}

/// Billing-portal session handed back to the browser
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalLink {
    pub url: String,
}

fn require<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| PaymentError::InvalidInput(format!("Missing required field: {field}")))
}

/// Creates hosted checkout and portal sessions
pub struct SessionFactory {
    store: Arc<dyn LicenseStore>,
    provider: Arc<dyn BillingProvider>,
    urls: RedirectUrls,
}

impl SessionFactory {
    pub fn new(
        store: Arc<dyn LicenseStore>,
        provider: Arc<dyn BillingProvider>,
        urls: RedirectUrls,
    ) -> Self {
        Self {
            store,
            provider,
            urls,
        }
    }

    /// Create a subscription checkout for a paid tier.
    ///
    /// Input is validated before the store or Stripe is touched.
    pub async fn checkout(
        &self,
        email: Option<&str>,
        tier: Option<&str>,
        success_url: Option<&str>,
        cancel_url: Option<&str>,
    ) -> Result<CheckoutLink> {
        let email = require(email, "email")?;
        let tier_name = require(tier, "tier")?;
        let tier = Tier::parse(tier_name)
            .filter(Tier::is_paid)
            .ok_or_else(|| PaymentError::InvalidInput(format!("Invalid tier: {tier_name}")))?;

        let customer_id = self.resolve_customer(email).await?;

        let request = CheckoutRequest {
            customer_id,
            tier,
            email: email.to_string(),
            success_url: success_url.unwrap_or(&self.urls.success).to_string(),
            cancel_url: cancel_url.unwrap_or(&self.urls.cancel).to_string(),
        };
        let session = self.provider.create_checkout_session(&request).await?;

        tracing::info!(email = %email, tier = %tier, session_id = %session.id, "Created checkout session");
        Ok(CheckoutLink {
            session_id: session.id,
            url: session.url,
        })
    }

    /// Create a billing-portal session for an existing customer
    pub async fn portal(&self, email: Option<&str>, return_url: Option<&str>) -> Result<PortalLink> {
        let email = require(email, "email")?;

        let customer_id = self
            .store
            .get(email)
            .await?
            .and_then(|license| license.provider_customer_id)
            .ok_or_else(|| PaymentError::NotFound("No subscription found".into()))?;

        let return_url = return_url.unwrap_or(&self.urls.portal_return);
        let session = self
            .provider
            .create_portal_session(&customer_id, return_url)
            .await?;

        tracing::info!(email = %email, customer_id = %customer_id, "Created portal session");
        Ok(PortalLink { url: session.url })
    }

    /// Stored customer id for the account, creating the Stripe customer once
    async fn resolve_customer(&self, email: &str) -> Result<String> {
        let existing = self
            .store
            .get(email)
            .await?
            .and_then(|license| license.provider_customer_id);
        if let Some(customer_id) = existing {
            return Ok(customer_id);
        }

        let customer_id = self.provider.create_customer(email).await?;
        let patch = LicensePatch {
            provider_customer_id: Some(customer_id.clone()),
            ..Default::default()
        };
        self.store.upsert(email, &patch).await?;

        Ok(customer_id)
    }
}
