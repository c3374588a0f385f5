//! Usage Metering
//!
//! Usage events are appended to a log first; the aggregate counter on the
//! license row is bumped afterwards on a best-effort basis.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::license::UsageCounter;
use crate::store::LicenseStore;

/// Kinds of metered usage
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageEventKind {
    DashboardCreated,
    FormConnected,
    ResponsesProcessed,
    ExportPdf,
    ShareLink,
}

impl UsageEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageEventKind::DashboardCreated => "dashboard_created",
            UsageEventKind::FormConnected => "form_connected",
            UsageEventKind::ResponsesProcessed => "responses_processed",
            UsageEventKind::ExportPdf => "export_pdf",
            UsageEventKind::ShareLink => "share_link",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dashboard_created" => Some(UsageEventKind::DashboardCreated),
            "form_connected" => Some(UsageEventKind::FormConnected),
            "responses_processed" => Some(UsageEventKind::ResponsesProcessed),
            "export_pdf" => Some(UsageEventKind::ExportPdf),
            "share_link" => Some(UsageEventKind::ShareLink),
            _ => None,
        }
    }

    /// Aggregate counter bumped by this event, if any
    pub fn counter(&self) -> Option<UsageCounter> {
        match self {
            UsageEventKind::DashboardCreated => Some(UsageCounter::Dashboards),
            UsageEventKind::FormConnected => Some(UsageCounter::Forms),
            UsageEventKind::ResponsesProcessed => Some(UsageCounter::Responses),
            UsageEventKind::ExportPdf | UsageEventKind::ShareLink => None,
        }
    }
}

impl std::fmt::Display for UsageEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the append-only usage log
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub email: String,
    pub event_type: UsageEventKind,
    pub count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl UsageEvent {
    pub fn new(
        email: impl Into<String>,
        event_type: UsageEventKind,
        count: u32,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            email: email.into(),
            event_type,
            count,
            metadata,
            created_at: Utc::now(),
        }
    }
}

/// Records usage events and keeps the license counters in step
pub struct UsageTracker {
    store: Arc<dyn LicenseStore>,
}

impl UsageTracker {
    pub fn new(store: Arc<dyn LicenseStore>) -> Self {
        Self { store }
    }

    /// Log an event, then bump its aggregate counter.
    ///
    /// Only the log append can fail the call. The counter update prefers the
    /// store's atomic increment and falls back to read-modify-write, which can
    /// lose an update under concurrent writers.
    pub async fn record(&self, event: UsageEvent) -> Result<()> {
        self.store.append_event(&event).await?;

        tracing::debug!(
            email = %event.email,
            event_type = %event.event_type,
            count = event.count,
            "Recorded usage event"
        );

        let Some(counter) = event.event_type.counter() else {
            return Ok(());
        };
        let by = u64::from(event.count);

        if let Err(e) = self.store.increment_usage(&event.email, counter, by).await {
            tracing::warn!(
                email = %event.email,
                counter = counter.column(),
                error = %e,
                "Atomic increment failed, falling back to read-modify-write"
            );
            self.increment_by_rewrite(&event.email, counter, by).await;
        }

        Ok(())
    }

    async fn increment_by_rewrite(&self, email: &str, counter: UsageCounter, by: u64) {
        let current = match self.store.get(email).await {
            Ok(Some(license)) => license.usage(counter),
            Ok(None) => {
                tracing::debug!(email = %email, "No license row to update");
                return;
            }
            Err(e) => {
                tracing::warn!(email = %email, error = %e, "Could not read usage counter");
                return;
            }
        };

        if let Err(e) = self
            .store
            .set_usage(email, counter, current.saturating_add(by))
            .await
        {
            tracing::warn!(email = %email, error = %e, "Could not write usage counter");
        }
    }
}
