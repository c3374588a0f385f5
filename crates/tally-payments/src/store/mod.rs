//! License Storage
//!
//! Every license write goes through [`LicenseStore`]. Writes are keyed on the
//! account email so replaying one is harmless.

mod memory;
mod rest;

pub use memory::MemoryLicenseStore;
pub use rest::RestLicenseStore;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::license::{License, LicenseStatus, Tier, UsageCounter};
use crate::usage::UsageEvent;

/// Partial update of a license row. `None` fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LicensePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<LicenseStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_customer_id: Option<String>,

    /// `Some(None)` clears the stored subscription
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_subscription_id: Option<Option<String>>,
}

impl LicensePatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Apply the patch to an in-memory record
    pub fn apply(&self, license: &mut License) {
        if let Some(tier) = self.tier {
            license.tier = tier;
        }
        if let Some(status) = self.status {
            license.status = status;
        }
        if let Some(customer_id) = &self.provider_customer_id {
            license.provider_customer_id = Some(customer_id.clone());
        }
        if let Some(subscription_id) = &self.provider_subscription_id {
            license.provider_subscription_id = subscription_id.clone();
        }
        license.updated_at = chrono::Utc::now();
    }
}

/// License storage trait
#[async_trait]
pub trait LicenseStore: Send + Sync {
    /// Fetch the license for an email
    async fn get(&self, email: &str) -> Result<Option<License>>;

    /// Insert a free-tier license unless one already exists
    async fn create_if_absent(&self, email: &str) -> Result<()>;

    /// Insert-or-merge keyed on email
    async fn upsert(&self, email: &str, patch: &LicensePatch) -> Result<()>;

    /// Update an existing license; returns `false` when no row matched
    async fn update(&self, email: &str, patch: &LicensePatch) -> Result<bool>;

    /// Atomic `counter += by` on the license row
    async fn increment_usage(&self, email: &str, counter: UsageCounter, by: u64) -> Result<()>;

    /// Overwrite a usage counter
    async fn set_usage(&self, email: &str, counter: UsageCounter, value: u64) -> Result<()>;

    /// Append to the usage event log
    async fn append_event(&self, event: &UsageEvent) -> Result<()>;

    /// Round-trip check against the backing store
    async fn ping(&self) -> Result<()>;

    /// Fetch the license, creating a free-tier one on first lookup
    async fn get_or_create(&self, email: &str) -> Result<License> {
        if let Some(license) = self.get(email).await? {
            return Ok(license);
        }

        self.create_if_absent(email).await?;
        tracing::info!(email = %email, "Created free license");

        // Re-read so a concurrent creator's row wins
        self.get(email).await?.ok_or_else(|| {
            crate::error::PaymentError::Storage(format!("license for {email} vanished after insert"))
        })
    }
}
