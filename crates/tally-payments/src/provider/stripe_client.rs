//! Stripe Integration
//!
//! Implements [`BillingProvider`] on top of `async-stripe` using the
//! "Stripe Checkout (Hosted)" flow plus the hosted billing portal.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use stripe::{
    BillingPortalSession, CheckoutSession as StripeCheckoutSession, CheckoutSessionMode, Client,
    CreateBillingPortalSession, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionPaymentMethodTypes, CreateCustomer, Customer, CustomerId, RequestStrategy,
    StripeError,
};

use super::{BillingProvider, CheckoutRequest, CheckoutSession, CustomerRecord, PortalSession};
use crate::config::{PaymentsConfig, PriceTable};
use crate::error::{PaymentError, Result};

const STRIPE_API_BASE: &str = "https://api.stripe.com";

/// Stripe client wrapper
pub struct StripeClient {
    client: Client,
    http: reqwest::Client,
    secret_key: String,
    webhook_secret: String,
    prices: PriceTable,
    timeout: Duration,
}

impl StripeClient {
    /// Create a new Stripe client
    pub fn new(config: PaymentsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PaymentError::Config(format!("http client: {e}")))?;

        Ok(Self {
            client: Client::new(&config.secret_key),
            http,
            secret_key: config.secret_key,
            webhook_secret: config.webhook_secret,
            prices: config.prices,
            timeout: config.timeout,
        })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(PaymentsConfig::from_env()?)
    }

    /// Get the underlying Stripe client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Run a Stripe call under the configured deadline
    async fn call<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, StripeError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(|e| {
                tracing::error!(operation, error = %e, "Stripe call failed");
                PaymentError::from(e)
            }),
            Err(_) => Err(PaymentError::Timeout(format!(
                "Stripe {operation} exceeded {}s",
                self.timeout.as_secs()
            ))),
        }
    }

    /// Idempotency key for creating the customer of an email, so a repeated
    /// create within Stripe's key window returns the same customer.
    ///
    /// Hashes the email exactly as the license is keyed; differently cased
    /// emails are different accounts and must not share a key.
    fn customer_idempotency_key(email: &str) -> String {
        let digest = Sha256::digest(email.as_bytes());
        format!("customer-{}", hex::encode(digest))
    }
}

fn parse_customer_id(id: &str) -> Result<CustomerId> {
    id.parse()
        .map_err(|_| PaymentError::InvalidInput(format!("Invalid customer ID: {id}")))
}

#[async_trait]
impl BillingProvider for StripeClient {
    async fn create_customer(&self, email: &str) -> Result<String> {
        let client = self
            .client
            .clone()
            .with_strategy(RequestStrategy::Idempotent(Self::customer_idempotency_key(email)));

        let mut params = CreateCustomer::new();
        params.email = Some(email);
        params.metadata = Some(HashMap::from([("source".to_string(), "tally".to_string())]));

        let customer = self
            .call("create_customer", Customer::create(&client, params))
            .await?;

        tracing::info!(customer_id = %customer.id, email = %email, "Created Stripe customer");
        Ok(customer.id.to_string())
    }

    async fn retrieve_customer(&self, customer_id: &str) -> Result<Option<CustomerRecord>> {
        let id = parse_customer_id(customer_id)?;

        let fetched = tokio::time::timeout(self.timeout, Customer::retrieve(&self.client, &id, &[])).await;
        let customer = match fetched {
            Ok(Ok(customer)) => customer,
            Ok(Err(StripeError::Stripe(request_error))) if request_error.http_status == 404 => {
                return Ok(None);
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(PaymentError::Timeout(format!(
                    "Stripe retrieve_customer exceeded {}s",
                    self.timeout.as_secs()
                )));
            }
        };

        Ok(Some(CustomerRecord {
            id: customer.id.to_string(),
            email: customer.email,
            deleted: customer.deleted,
        }))
    }

    /// Create a Stripe Checkout session (Hosted approach)
    ///
    /// Returns a URL to redirect the user to Stripe's hosted checkout page.
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
        let price = self.prices.price_for(request.tier).ok_or_else(|| {
            PaymentError::InvalidInput(format!("Tier {} cannot be purchased", request.tier))
        })?;

        let mut params = CreateCheckoutSession::new();
        params.customer = Some(parse_customer_id(&request.customer_id)?);
        params.mode = Some(CheckoutSessionMode::Subscription);
        params.payment_method_types = Some(vec![CreateCheckoutSessionPaymentMethodTypes::Card]);
        params.success_url = Some(&request.success_url);
        params.cancel_url = Some(&request.cancel_url);

        // Read back by the checkout-completed webhook
        params.metadata = Some(HashMap::from([
            ("email".to_string(), request.email.clone()),
            ("tier".to_string(), request.tier.as_str().to_string()),
        ]));

        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(price.to_string()),
            quantity: Some(1),
            ..Default::default()
        }]);

        let session = self
            .call("create_checkout_session", StripeCheckoutSession::create(&self.client, params))
            .await?;

        let url = session
            .url
            .ok_or_else(|| PaymentError::Provider("No checkout URL returned".into()))?;

        Ok(CheckoutSession {
            id: session.id.to_string(),
            url,
        })
    }

    async fn create_portal_session(&self, customer_id: &str, return_url: &str) -> Result<PortalSession> {
        let mut params = CreateBillingPortalSession::new(parse_customer_id(customer_id)?);
        params.return_url = Some(return_url);

        let session = self
            .call("create_portal_session", BillingPortalSession::create(&self.client, params))
            .await?;

        Ok(PortalSession { url: session.url })
    }

    async fn health_check(&self) -> Result<()> {
        let response = self
            .http
            .get(format!("{STRIPE_API_BASE}/v1/balance"))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| PaymentError::Provider(e.to_string()))?;

        if response.status().is_success() {
            return Ok(());
        }

        let status = response.status();
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        let message = body["error"]["message"]
            .as_str()
            .map_or_else(|| format!("Stripe returned {status}"), str::to_string);
        Err(PaymentError::Provider(message))
    }

    fn webhook_secret(&self) -> &str {
        &self.webhook_secret
    }
}
