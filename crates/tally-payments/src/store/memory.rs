//! In-memory license store (for development and tests)

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{LicensePatch, LicenseStore};
use crate::error::Result;
use crate::license::{License, UsageCounter};
use crate::usage::UsageEvent;

#[derive(Default)]
pub struct MemoryLicenseStore {
    licenses: RwLock<HashMap<String, License>>,
    events: RwLock<Vec<UsageEvent>>,
}

impl MemoryLicenseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of license rows
    pub async fn len(&self) -> usize {
        self.licenses.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.licenses.read().await.is_empty()
    }

    /// Snapshot of the usage event log
    pub async fn events(&self) -> Vec<UsageEvent> {
        self.events.read().await.clone()
    }

    /// Seed or replace a license row
    pub async fn insert(&self, license: License) {
        self.licenses
            .write()
            .await
            .insert(license.email.clone(), license);
    }
}

#[async_trait]
impl LicenseStore for MemoryLicenseStore {
    async fn get(&self, email: &str) -> Result<Option<License>> {
        Ok(self.licenses.read().await.get(email).cloned())
    }

    async fn create_if_absent(&self, email: &str) -> Result<()> {
        self.licenses
            .write()
            .await
            .entry(email.to_string())
            .or_insert_with(|| License::free(email));
        Ok(())
    }

    async fn upsert(&self, email: &str, patch: &LicensePatch) -> Result<()> {
        let mut licenses = self.licenses.write().await;
        let license = licenses
            .entry(email.to_string())
            .or_insert_with(|| License::free(email));
        patch.apply(license);
        Ok(())
    }

    async fn update(&self, email: &str, patch: &LicensePatch) -> Result<bool> {
        let mut licenses = self.licenses.write().await;
        match licenses.get_mut(email) {
            Some(license) => {
                patch.apply(license);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn increment_usage(&self, email: &str, counter: UsageCounter, by: u64) -> Result<()> {
        let mut licenses = self.licenses.write().await;
        if let Some(license) = licenses.get_mut(email) {
            let value = license.usage(counter).saturating_add(by);
            license.set_usage(counter, value);
            license.updated_at = chrono::Utc::now();
        }
        Ok(())
    }

    async fn set_usage(&self, email: &str, counter: UsageCounter, value: u64) -> Result<()> {
        let mut licenses = self.licenses.write().await;
        if let Some(license) = licenses.get_mut(email) {
            license.set_usage(counter, value);
            license.updated_at = chrono::Utc::now();
        }
        Ok(())
    }

    async fn append_event(&self, event: &UsageEvent) -> Result<()> {
        self.events.write().await.push(event.clone());
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::license::{LicenseStatus, Tier};

    #[tokio::test]
    async fn test_get_or_create_creates_once() {
        let store = MemoryLicenseStore::new();

        let first = store.get_or_create("new@example.com").await.unwrap();
        assert_eq!(first.tier, Tier::Free);
        assert_eq!(first.usage_forms, 0);
        assert_eq!(first.usage_dashboards, 0);
        assert_eq!(first.usage_responses, 0);

        let second = store.get_or_create("new@example.com").await.unwrap();
        assert_eq!(second.email, first.email);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = MemoryLicenseStore::new();
        let patch = LicensePatch {
            tier: Some(Tier::Pro),
            status: Some(LicenseStatus::Active),
            provider_customer_id: Some("cus_1".into()),
            provider_subscription_id: Some(Some("sub_1".into())),
        };

        store.upsert("a@example.com", &patch).await.unwrap();
        let once = store.get("a@example.com").await.unwrap().unwrap();
        store.upsert("a@example.com", &patch).await.unwrap();
        let twice = store.get("a@example.com").await.unwrap().unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(once.tier, twice.tier);
        assert_eq!(once.provider_customer_id, twice.provider_customer_id);
        assert_eq!(once.provider_subscription_id, twice.provider_subscription_id);
    }

    #[tokio::test]
    async fn test_update_missing_row() {
        let store = MemoryLicenseStore::new();
        let patch = LicensePatch {
            status: Some(LicenseStatus::PastDue),
            ..Default::default()
        };
        assert!(!store.update("ghost@example.com", &patch).await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_increment_usage() {
        let store = MemoryLicenseStore::new();
        store.create_if_absent("a@example.com").await.unwrap();
        store
            .increment_usage("a@example.com", UsageCounter::Responses, 40)
            .await
            .unwrap();
        store
            .increment_usage("a@example.com", UsageCounter::Responses, 2)
            .await
            .unwrap();

        let license = store.get("a@example.com").await.unwrap().unwrap();
        assert_eq!(license.usage_responses, 42);
        assert_eq!(license.usage_forms, 0);
    }
}
