//! PostgREST-backed license store
//!
//! Talks to a PostgREST endpoint (`{url}/rest/v1/...`) with a service key.
//! Upserts use `on_conflict=email`, the atomic counter path calls the
//! `increment_usage` SQL function shipped in `sql/schema.sql`.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{LicensePatch, LicenseStore};
use crate::config::StoreConfig;
use crate::error::{PaymentError, Result};
use crate::license::{License, UsageCounter};
use crate::usage::UsageEvent;

/// Error body returned by PostgREST
#[derive(Debug, Deserialize)]
struct StoreErrorBody {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

pub struct RestLicenseStore {
    config: StoreConfig,
    http: reqwest::Client,
}

impl RestLicenseStore {
    pub fn new(config: StoreConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PaymentError::Config(format!("store client: {e}")))?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(StoreConfig::from_env()?)
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.url, table)
    }

    fn licenses_url(&self) -> String {
        self.table_url(&self.config.licenses_table)
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", self.config.service_key.as_str())
            .bearer_auth(&self.config.service_key)
    }

    /// Patch body with the bookkeeping timestamp
    fn patch_body(email: Option<&str>, patch: &LicensePatch) -> Result<Value> {
        let mut body = serde_json::to_value(patch)
            .map_err(|e| PaymentError::Storage(format!("encode patch: {e}")))?;
        if let Value::Object(map) = &mut body {
            if let Some(email) = email {
                map.insert("email".into(), json!(email));
            }
            map.insert("updated_at".into(), json!(Utc::now()));
        }
        Ok(body)
    }
}

async fn check(response: reqwest::Response, operation: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<StoreErrorBody>(&text) {
        Ok(body) => match body.code {
            Some(code) => format!("{} ({code})", body.message),
            None => body.message,
        },
        Err(_) => text,
    };
    Err(PaymentError::Storage(format!("{operation} failed with {status}: {message}")))
}

#[async_trait]
impl LicenseStore for RestLicenseStore {
    async fn get(&self, email: &str) -> Result<Option<License>> {
        let response = self
            .request(reqwest::Method::GET, self.licenses_url())
            .query(&[("select", "*"), ("limit", "1")])
            .query(&[("email", format!("eq.{email}"))])
            .send()
            .await?;

        let rows: Vec<License> = check(response, "select license")
            .await?
            .json()
            .await
            .map_err(|e| PaymentError::Storage(format!("decode license: {e}")))?;
        Ok(rows.into_iter().next())
    }

    async fn create_if_absent(&self, email: &str) -> Result<()> {
        let response = self
            .request(reqwest::Method::POST, self.licenses_url())
            .query(&[("on_conflict", "email")])
            .header("Prefer", "resolution=ignore-duplicates,return=minimal")
            .json(&json!({ "email": email, "tier": "free", "status": "active" }))
            .send()
            .await?;
        check(response, "insert license").await?;
        Ok(())
    }

    async fn upsert(&self, email: &str, patch: &LicensePatch) -> Result<()> {
        let response = self
            .request(reqwest::Method::POST, self.licenses_url())
            .query(&[("on_conflict", "email")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&Self::patch_body(Some(email), patch)?)
            .send()
            .await?;
        check(response, "upsert license").await?;
        Ok(())
    }

    async fn update(&self, email: &str, patch: &LicensePatch) -> Result<bool> {
        let response = self
            .request(reqwest::Method::PATCH, self.licenses_url())
            .query(&[("email", format!("eq.{email}"))])
            .header("Prefer", "return=representation")
            .json(&Self::patch_body(None, patch)?)
            .send()
            .await?;

        let rows: Vec<Value> = check(response, "update license")
            .await?
            .json()
            .await
            .map_err(|e| PaymentError::Storage(format!("decode update: {e}")))?;
        Ok(!rows.is_empty())
    }

    async fn increment_usage(&self, email: &str, counter: UsageCounter, by: u64) -> Result<()> {
        let response = self
            .request(reqwest::Method::POST, self.table_url("rpc/increment_usage"))
            .json(&json!({
                "user_email": email,
                "field_name": counter.column(),
                "increment_by": by,
            }))
            .send()
            .await?;
        check(response, "increment_usage").await?;
        Ok(())
    }

    async fn set_usage(&self, email: &str, counter: UsageCounter, value: u64) -> Result<()> {
        let mut body = serde_json::Map::new();
        body.insert(counter.column().into(), json!(value));
        body.insert("updated_at".into(), json!(Utc::now()));

        let response = self
            .request(reqwest::Method::PATCH, self.licenses_url())
            .query(&[("email", format!("eq.{email}"))])
            .header("Prefer", "return=minimal")
            .json(&body)
            .send()
            .await?;
        check(response, "set usage").await?;
        Ok(())
    }

    async fn append_event(&self, event: &UsageEvent) -> Result<()> {
        let response = self
            .request(reqwest::Method::POST, self.table_url(&self.config.events_table))
            .header("Prefer", "return=minimal")
            .json(event)
            .send()
            .await?;
        check(response, "insert usage event").await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let response = self
            .request(reqwest::Method::GET, self.licenses_url())
            .query(&[("select", "email"), ("limit", "1")])
            .send()
            .await?;
        check(response, "ping").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::license::{LicenseStatus, Tier};
    use crate::usage::UsageEventKind;
    use wiremock::matchers::{body_json, body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn store_for(server: &MockServer) -> RestLicenseStore {
        RestLicenseStore::new(StoreConfig::new(server.uri(), "service-key")).unwrap()
    }

    #[tokio::test]
    async fn test_get_license_row() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/licenses"))
            .and(query_param("email", "eq.a@example.com"))
            .and(header("apikey", "service-key"))
            .and(header("authorization", "Bearer service-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "email": "a@example.com",
                "tier": "pro",
                "status": "past_due",
                "provider_customer_id": "cus_1",
                "provider_subscription_id": null,
                "usage_forms": 3,
                "usage_dashboards": 2,
                "usage_responses": 150,
                "updated_at": "2025-01-01T12:00:00.123456+00:00"
            }])))
            .expect(1)
            .mount(&server)
            .await;

        let license = store_for(&server).await.get("a@example.com").await.unwrap().unwrap();
        assert_eq!(license.tier, Tier::Pro);
        assert_eq!(license.status, LicenseStatus::PastDue);
        assert_eq!(license.provider_customer_id.as_deref(), Some("cus_1"));
        assert_eq!(license.usage_responses, 150);
    }

    #[tokio::test]
    async fn test_get_missing_row() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/licenses"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        assert!(store_for(&server).await.get("nobody@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_merges_on_email() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/licenses"))
            .and(query_param("on_conflict", "email"))
            .and(header("prefer", "resolution=merge-duplicates,return=minimal"))
            .and(body_partial_json(json!({
                "email": "a@example.com",
                "provider_customer_id": "cus_9"
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let patch = LicensePatch {
            provider_customer_id: Some("cus_9".into()),
            ..Default::default()
        };
        store_for(&server).await.upsert("a@example.com", &patch).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_reports_missing_row() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/licenses"))
            .and(query_param("email", "eq.ghost@example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let patch = LicensePatch {
            status: Some(LicenseStatus::Canceled),
            ..Default::default()
        };
        let matched = store_for(&server).await.update("ghost@example.com", &patch).await.unwrap();
        assert!(!matched);
    }

    #[tokio::test]
    async fn test_increment_calls_rpc() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/increment_usage"))
            .and(body_json(json!({
                "user_email": "a@example.com",
                "field_name": "usage_forms",
                "increment_by": 2
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        store_for(&server)
            .await
            .increment_usage("a@example.com", UsageCounter::Forms, 2)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_store_error_message_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/usage_events"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "message": "relation \"public.usage_events\" does not exist",
                "code": "42P01"
            })))
            .mount(&server)
            .await;

        let event = UsageEvent::new("a@example.com", UsageEventKind::ShareLink, 1, None);
        let err = store_for(&server).await.append_event(&event).await.unwrap_err();
        match err {
            PaymentError::Storage(msg) => {
                assert!(msg.contains("does not exist"));
                assert!(msg.contains("42P01"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
