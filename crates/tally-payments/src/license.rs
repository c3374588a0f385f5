//! License Records and Tier Limits
//!
//! One license per account email. The tier decides the usage limits; the
//! status mirrors the provider subscription.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

/// Subscription tiers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Pro,
    Team,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Team => "team",
        }
    }

    /// Parse a tier name, `None` for anything unrecognised
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "free" => Some(Tier::Free),
            "pro" => Some(Tier::Pro),
            "team" => Some(Tier::Team),
            _ => None,
        }
    }

    /// Whether this tier can be bought through checkout
    pub fn is_paid(&self) -> bool {
        matches!(self, Tier::Pro | Tier::Team)
    }

    /// Static limits for this tier
    pub fn limits(&self) -> TierLimits {
        match self {
            Tier::Free => TierLimits {
                forms: Limit::Bounded(1),
                responses: Limit::Bounded(100),
                charts: ChartAccess::Only(&["pie", "bar", "column"]),
            },
            Tier::Pro | Tier::Team => TierLimits {
                forms: Limit::Unlimited,
                responses: Limit::Unlimited,
                charts: ChartAccess::All,
            },
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local license status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseStatus {
    #[default]
    Active,
    PastDue,
    Canceled,
    Trialing,
}

impl LicenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseStatus::Active => "active",
            LicenseStatus::PastDue => "past_due",
            LicenseStatus::Canceled => "canceled",
            LicenseStatus::Trialing => "trialing",
        }
    }

    /// Map a provider subscription status onto the local status.
    ///
    /// `unpaid` is folded into `past_due`; unknown statuses fall back to
    /// `active`.
    pub fn from_provider(status: &str) -> Self {
        match status {
            "active" => LicenseStatus::Active,
            "past_due" | "unpaid" => LicenseStatus::PastDue,
            "canceled" => LicenseStatus::Canceled,
            "trialing" => LicenseStatus::Trialing,
            _ => LicenseStatus::Active,
        }
    }
}

impl std::fmt::Display for LicenseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A usage limit. Serialized as the bound, or `-1` when unlimited.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Limit {
    Bounded(u64),
    Unlimited,
}

impl Limit {
    /// Sentinel used on the wire for "no limit"
    pub const UNLIMITED_SENTINEL: i64 = -1;

    /// Over the limit only when the limit is a real bound and usage has
    /// reached it.
    pub fn is_exceeded_by(&self, usage: u64) -> bool {
        match self {
            Limit::Bounded(bound) => usage >= *bound,
            Limit::Unlimited => false,
        }
    }
}

impl Serialize for Limit {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Limit::Bounded(bound) => serializer.serialize_u64(*bound),
            Limit::Unlimited => serializer.serialize_i64(Self::UNLIMITED_SENTINEL),
        }
    }
}

/// Chart types available to a tier
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChartAccess {
    Only(&'static [&'static str]),
    All,
}

impl Serialize for ChartAccess {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ChartAccess::Only(charts) => charts.serialize(serializer),
            ChartAccess::All => serializer.serialize_str("all"),
        }
    }
}

/// Limits attached to a tier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TierLimits {
    pub forms: Limit,
    pub responses: Limit,
    pub charts: ChartAccess,
}

/// A license record, one per account email
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct License {
    /// Account email (unique)
    pub email: String,

    /// Tier
    #[serde(default)]
    pub tier: Tier,

    /// Subscription status
    #[serde(default)]
    pub status: LicenseStatus,

    /// Stripe customer ID
    #[serde(default)]
    pub provider_customer_id: Option<String>,

    /// Stripe subscription ID
    #[serde(default)]
    pub provider_subscription_id: Option<String>,

    #[serde(default)]
    pub usage_forms: u64,

    #[serde(default)]
    pub usage_dashboards: u64,

    #[serde(default)]
    pub usage_responses: u64,

    /// Last mutation
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl License {
    /// A fresh free-tier license with zero usage
    pub fn free(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            tier: Tier::Free,
            status: LicenseStatus::Active,
            provider_customer_id: None,
            provider_subscription_id: None,
            usage_forms: 0,
            usage_dashboards: 0,
            usage_responses: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn usage(&self, counter: UsageCounter) -> u64 {
        match counter {
            UsageCounter::Forms => self.usage_forms,
            UsageCounter::Dashboards => self.usage_dashboards,
            UsageCounter::Responses => self.usage_responses,
        }
    }

    pub fn set_usage(&mut self, counter: UsageCounter, value: u64) {
        match counter {
            UsageCounter::Forms => self.usage_forms = value,
            UsageCounter::Dashboards => self.usage_dashboards = value,
            UsageCounter::Responses => self.usage_responses = value,
        }
    }

    /// Evaluate this license against its tier limits
    pub fn summary(&self) -> LicenseSummary {
        LicenseSummary::evaluate(self)
    }
}

/// Aggregate usage counters kept on the license row
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UsageCounter {
    Forms,
    Dashboards,
    Responses,
}

impl UsageCounter {
    /// Column holding this counter
    pub fn column(&self) -> &'static str {
        match self {
            UsageCounter::Forms => "usage_forms",
            UsageCounter::Dashboards => "usage_dashboards",
            UsageCounter::Responses => "usage_responses",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    pub forms: u64,
    pub dashboards: u64,
    pub responses: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct OverLimits {
    pub forms: bool,
    pub responses: bool,
}

/// License view returned to clients
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseSummary {
    pub email: String,
    pub tier: Tier,
    pub status: LicenseStatus,
    pub usage: UsageSnapshot,
    pub limits: TierLimits,
    pub over_limits: OverLimits,
    pub can_create_dashboard: bool,
}

impl LicenseSummary {
    pub fn evaluate(license: &License) -> Self {
        let limits = license.tier.limits();
        let over_limits = OverLimits {
            forms: limits.forms.is_exceeded_by(license.usage_forms),
            responses: limits.responses.is_exceeded_by(license.usage_responses),
        };

        Self {
            email: license.email.clone(),
            tier: license.tier,
            status: license.status,
            usage: UsageSnapshot {
                forms: license.usage_forms,
                dashboards: license.usage_dashboards,
                responses: license.usage_responses,
            },
            limits,
            can_create_dashboard: license.status == LicenseStatus::Active
                && !over_limits.forms
                && !over_limits.responses,
            over_limits,
        }
    }
}
