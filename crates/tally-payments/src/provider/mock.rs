//! Mock Billing Provider
//!
//! For testing and demo purposes. Keeps customers in memory and counts calls.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{BillingProvider, CheckoutRequest, CheckoutSession, CustomerRecord, PortalSession};
use crate::error::{PaymentError, Result};

/// Calls made against the mock, by operation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProviderCalls {
    pub create_customer: u32,
    pub retrieve_customer: u32,
    pub checkout: u32,
    pub portal: u32,
}

impl ProviderCalls {
    pub fn total(&self) -> u32 {
        self.create_customer + self.retrieve_customer + self.checkout + self.portal
    }
}

#[derive(Default)]
struct MockState {
    customers: HashMap<String, CustomerRecord>,
    calls: ProviderCalls,
    next_id: u32,
    failure: Option<String>,
}

pub struct MockBillingProvider {
    webhook_secret: String,
    state: Mutex<MockState>,
}

impl MockBillingProvider {
    pub fn new(webhook_secret: impl Into<String>) -> Self {
        Self {
            webhook_secret: webhook_secret.into(),
            state: Mutex::new(MockState::default()),
        }
    }

    /// Register a customer as if it already existed at the provider
    pub async fn insert_customer(&self, id: &str, email: Option<&str>) {
        self.state.lock().await.customers.insert(
            id.to_string(),
            CustomerRecord {
                id: id.to_string(),
                email: email.map(str::to_string),
                deleted: false,
            },
        );
    }

    /// Mark a customer deleted
    pub async fn delete_customer(&self, id: &str) {
        if let Some(customer) = self.state.lock().await.customers.get_mut(id) {
            customer.deleted = true;
            customer.email = None;
        }
    }

    /// Make every subsequent call fail with a provider error
    pub async fn fail_with(&self, message: impl Into<String>) {
        self.state.lock().await.failure = Some(message.into());
    }

    pub async fn calls(&self) -> ProviderCalls {
        self.state.lock().await.calls
    }

    fn check_failure(state: &MockState) -> Result<()> {
        match &state.failure {
            Some(message) => Err(PaymentError::Provider(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BillingProvider for MockBillingProvider {
    async fn create_customer(&self, email: &str) -> Result<String> {
        let mut state = self.state.lock().await;
        state.calls.create_customer += 1;
        Self::check_failure(&state)?;

        state.next_id += 1;
        let id = format!("cus_mock{}", state.next_id);
        state.customers.insert(
            id.clone(),
            CustomerRecord {
                id: id.clone(),
                email: Some(email.to_string()),
                deleted: false,
            },
        );
        Ok(id)
    }

    async fn retrieve_customer(&self, customer_id: &str) -> Result<Option<CustomerRecord>> {
        let mut state = self.state.lock().await;
        state.calls.retrieve_customer += 1;
        Self::check_failure(&state)?;
        Ok(state.customers.get(customer_id).cloned())
    }

    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
        let mut state = self.state.lock().await;
        state.calls.checkout += 1;
        Self::check_failure(&state)?;

        let id = format!("cs_mock{}", state.calls.checkout);
        Ok(CheckoutSession {
            url: format!("https://checkout.example.com/{id}?tier={}", request.tier),
            id,
        })
    }

    async fn create_portal_session(&self, customer_id: &str, return_url: &str) -> Result<PortalSession> {
        let mut state = self.state.lock().await;
        state.calls.portal += 1;
        Self::check_failure(&state)?;

        Ok(PortalSession {
            url: format!("https://billing.example.com/p/{customer_id}?return={return_url}"),
        })
    }

    async fn health_check(&self) -> Result<()> {
        Self::check_failure(&*self.state.lock().await)
    }

    fn webhook_secret(&self) -> &str {
        &self.webhook_secret
    }
}
