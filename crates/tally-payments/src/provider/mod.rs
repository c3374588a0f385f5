//! Payment Provider Integration
//!
//! The provider owns customers, subscriptions and hosted payment pages; this
//! crate only keeps foreign references to them.

mod mock;
mod stripe_client;

pub use self::mock::{MockBillingProvider, ProviderCalls};
pub use self::stripe_client::StripeClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::license::Tier;

/// Live view of a provider customer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CustomerRecord {
    pub id: String,
    pub email: Option<String>,
    pub deleted: bool,
}

impl CustomerRecord {
    /// Email to address the account by, if the customer is still usable
    pub fn addressable_email(&self) -> Option<&str> {
        if self.deleted {
            return None;
        }
        self.email.as_deref().filter(|e| !e.is_empty())
    }
}

/// Request to create a checkout session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckoutRequest {
    /// Existing provider customer
    pub customer_id: String,

    /// Tier being purchased
    pub tier: Tier,

    /// Account email, echoed into session metadata
    pub email: String,

    /// URL to redirect after successful payment
    pub success_url: String,

    /// URL to redirect if checkout is cancelled
    pub cancel_url: String,
}

/// Result of creating a checkout session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Stripe session ID
    pub id: String,

    /// URL to redirect user to
    pub url: String,
}

/// Hosted billing-portal session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PortalSession {
    pub url: String,
}

/// Payment provider operations (Strategy pattern)
#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Create a customer for an email, returning its id
    async fn create_customer(&self, email: &str) -> Result<String>;

    /// Fetch the live customer; `None` when the provider does not know it
    async fn retrieve_customer(&self, customer_id: &str) -> Result<Option<CustomerRecord>>;

    /// Create a hosted subscription checkout
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession>;

    /// Create a hosted billing-portal session
    async fn create_portal_session(&self, customer_id: &str, return_url: &str) -> Result<PortalSession>;

    /// Verify the provider API is reachable with the configured key
    async fn health_check(&self) -> Result<()>;

    /// Secret used to sign webhook deliveries
    fn webhook_secret(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addressable_email() {
        let mut customer = CustomerRecord {
            id: "cus_1".into(),
            email: Some("a@example.com".into()),
            deleted: false,
        };
        assert_eq!(customer.addressable_email(), Some("a@example.com"));

        customer.email = Some(String::new());
        assert_eq!(customer.addressable_email(), None);

        customer.email = Some("a@example.com".into());
        customer.deleted = true;
        assert_eq!(customer.addressable_email(), None);
    }
}
