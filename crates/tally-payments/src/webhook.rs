//! Stripe Webhook Handling
//!
//! Processes Stripe webhook events for subscription lifecycle management.
//! Subscription and invoice events are resolved through the live Stripe
//! customer, never through fields copied into the event.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{PaymentError, Result};
use crate::license::{LicenseStatus, Tier};
use crate::provider::BillingProvider;
use crate::signature;
use crate::store::{LicensePatch, LicenseStore};

/// Reference to a Stripe object, either bare id or expanded
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum ObjectRef {
    Id(String),
    Object { id: String },
}

impl ObjectRef {
    fn into_id(self) -> String {
        match self {
            ObjectRef::Id(id) | ObjectRef::Object { id } => id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawEventData,
}

#[derive(Debug, Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CustomerDetails {
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionObject {
    id: String,
    customer: Option<ObjectRef>,
    subscription: Option<ObjectRef>,
    customer_email: Option<String>,
    customer_details: Option<CustomerDetails>,
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionObject {
    id: String,
    customer: ObjectRef,
    status: String,
}

#[derive(Debug, Deserialize)]
struct InvoiceObject {
    id: Option<String>,
    customer: Option<ObjectRef>,
}

/// Parsed webhook event
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookEvent {
    /// Checkout completed - activate the paid tier
    CheckoutCompleted {
        session_id: String,
        email: Option<String>,
        tier: Tier,
        customer_id: Option<String>,
        subscription_id: Option<String>,
    },

    /// Subscription updated - mirror its status
    SubscriptionUpdated {
        subscription_id: String,
        customer_id: String,
        status: String,
    },

    /// Subscription deleted - back to free
    SubscriptionDeleted {
        subscription_id: String,
        customer_id: String,
    },

    /// Invoice payment failed - mark past due
    PaymentFailed {
        invoice_id: Option<String>,
        customer_id: Option<String>,
    },

    /// Unhandled event type
    Other { event_type: String },
}

/// A verified Stripe event
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderEvent {
    pub id: String,
    pub event_type: String,
    pub event: WebhookEvent,
}

/// What processing an event did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// A license row was written
    Applied {
        email: String,
        status: LicenseStatus,
    },
    /// Nothing to do; acknowledged so Stripe stops redelivering
    Ignored { reason: String },
}

fn parse_object<T: for<'de> Deserialize<'de>>(object: serde_json::Value, kind: &str) -> Result<T> {
    serde_json::from_value(object)
        .map_err(|e| PaymentError::WebhookParse(format!("Invalid {kind} data: {e}")))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Verify the signature over the raw body, then parse the event.
pub fn construct_event(payload: &[u8], signature_header: &str, secret: &str) -> Result<ProviderEvent> {
    signature::verify(payload, signature_header, secret)?;
    parse_event(payload)
}

/// Parse Stripe event JSON into our event type
pub fn parse_event(payload: &[u8]) -> Result<ProviderEvent> {
    let raw: RawEvent = serde_json::from_slice(payload)
        .map_err(|e| PaymentError::WebhookParse(e.to_string()))?;

    let event = match raw.event_type.as_str() {
        "checkout.session.completed" => {
            let session: CheckoutSessionObject = parse_object(raw.data.object, "checkout session")?;
            let metadata = session.metadata.unwrap_or_default();

            // Blank candidates fall through to the next source
            let email = non_empty(metadata.get("email").cloned())
                .or_else(|| non_empty(session.customer_email))
                .or_else(|| non_empty(session.customer_details.and_then(|d| d.email)));
            let tier = metadata
                .get("tier")
                .and_then(|t| Tier::parse(t))
                .unwrap_or(Tier::Pro);

            WebhookEvent::CheckoutCompleted {
                session_id: session.id,
                email,
                tier,
                customer_id: session.customer.map(ObjectRef::into_id),
                subscription_id: session.subscription.map(ObjectRef::into_id),
            }
        }

        "customer.subscription.updated" => {
            let sub: SubscriptionObject = parse_object(raw.data.object, "subscription")?;
            WebhookEvent::SubscriptionUpdated {
                subscription_id: sub.id,
                customer_id: sub.customer.into_id(),
                status: sub.status,
            }
        }

        "customer.subscription.deleted" => {
            let sub: SubscriptionObject = parse_object(raw.data.object, "subscription")?;
            WebhookEvent::SubscriptionDeleted {
                subscription_id: sub.id,
                customer_id: sub.customer.into_id(),
            }
        }

        "invoice.payment_failed" => {
            let invoice: InvoiceObject = parse_object(raw.data.object, "invoice")?;
            WebhookEvent::PaymentFailed {
                invoice_id: invoice.id,
                customer_id: invoice.customer.map(ObjectRef::into_id),
            }
        }

        other => WebhookEvent::Other {
            event_type: other.to_string(),
        },
    };

    Ok(ProviderEvent {
        id: raw.id,
        event_type: raw.event_type,
        event,
    })
}

/// Webhook processor
pub struct WebhookProcessor {
    store: Arc<dyn LicenseStore>,
    provider: Arc<dyn BillingProvider>,
}

impl WebhookProcessor {
    pub fn new(store: Arc<dyn LicenseStore>, provider: Arc<dyn BillingProvider>) -> Self {
        Self { store, provider }
    }

    /// Verify webhook signature and parse event
    pub fn verify(&self, payload: &[u8], signature_header: &str) -> Result<ProviderEvent> {
        construct_event(payload, signature_header, self.provider.webhook_secret())
    }

    /// Process a webhook event
    pub async fn handle(&self, event: ProviderEvent) -> Result<WebhookOutcome> {
        tracing::info!(event_id = %event.id, event_type = %event.event_type, "Processing Stripe webhook");

        let outcome = match event.event {
            WebhookEvent::CheckoutCompleted {
                session_id,
                email,
                tier,
                customer_id,
                subscription_id,
            } => {
                let Some(email) = email else {
                    tracing::error!(session_id = %session_id, "No email in checkout session");
                    return Ok(ignored("checkout session carries no email"));
                };

                let patch = LicensePatch {
                    tier: Some(tier),
                    status: Some(LicenseStatus::Active),
                    provider_customer_id: customer_id,
                    provider_subscription_id: Some(subscription_id),
                };
                self.store.upsert(&email, &patch).await?;

                tracing::info!(email = %email, tier = %tier, "Activated license");
                WebhookOutcome::Applied {
                    email,
                    status: LicenseStatus::Active,
                }
            }

            WebhookEvent::SubscriptionUpdated {
                subscription_id,
                customer_id,
                status,
            } => {
                let local = LicenseStatus::from_provider(&status);
                let patch = LicensePatch {
                    status: Some(local),
                    ..Default::default()
                };
                tracing::debug!(subscription_id = %subscription_id, status = %status, "Subscription updated");
                self.apply_to_customer(&customer_id, &patch, local).await?
            }

            WebhookEvent::SubscriptionDeleted {
                subscription_id,
                customer_id,
            } => {
                let patch = LicensePatch {
                    tier: Some(Tier::Free),
                    status: Some(LicenseStatus::Canceled),
                    provider_subscription_id: Some(None),
                    ..Default::default()
                };
                let outcome = self
                    .apply_to_customer(&customer_id, &patch, LicenseStatus::Canceled)
                    .await?;
                if let WebhookOutcome::Applied { email, .. } = &outcome {
                    tracing::info!(email = %email, subscription_id = %subscription_id, "Downgraded to free tier");
                }
                outcome
            }

            WebhookEvent::PaymentFailed {
                invoice_id,
                customer_id,
            } => {
                let Some(customer_id) = customer_id else {
                    tracing::warn!(invoice_id = ?invoice_id, "Failed invoice has no customer");
                    return Ok(ignored("invoice has no customer"));
                };
                let patch = LicensePatch {
                    status: Some(LicenseStatus::PastDue),
                    ..Default::default()
                };
                self.apply_to_customer(&customer_id, &patch, LicenseStatus::PastDue)
                    .await?
            }

            WebhookEvent::Other { event_type } => {
                tracing::debug!(event_type = %event_type, "Unhandled webhook event");
                ignored(format!("unhandled event type {event_type}"))
            }
        };

        Ok(outcome)
    }

    /// Resolve the live customer's email and patch that account's license
    async fn apply_to_customer(
        &self,
        customer_id: &str,
        patch: &LicensePatch,
        status: LicenseStatus,
    ) -> Result<WebhookOutcome> {
        let customer = self.provider.retrieve_customer(customer_id).await?;
        let Some(email) = customer
            .as_ref()
            .and_then(|c| c.addressable_email())
            .map(str::to_string)
        else {
            tracing::warn!(customer_id = %customer_id, "Customer deleted or without email, skipping");
            return Ok(ignored("customer cannot be resolved to an account"));
        };

        if !self.store.update(&email, patch).await? {
            tracing::info!(email = %email, "No license for customer email, skipping");
            return Ok(ignored("no license for customer email"));
        }

        tracing::info!(email = %email, status = %status, "Updated license");
        Ok(WebhookOutcome::Applied { email, status })
    }
}

fn ignored(reason: impl Into<String>) -> WebhookOutcome {
    WebhookOutcome::Ignored {
        reason: reason.into(),
    }
}
