//! Data models for Caravan.
//!
//! Everything that crosses a component or wire boundary lives here: the
//! per-city [`Identity`], the [`Campaign`] record owned by the registry,
//! derived [`StatsSnapshot`] counters, and the [`TelemetryEvent`] union
//! pushed to observers.
//!
//! # Wire shapes
//!
//! Telemetry envelopes are snake_case (`stats_update`, `campaign_update`,
//! `log`), while payload fields are camelCase (`totalLeads`, `leadCount`,
//! `startTime`) to match the control surface that consumes them.
//! Timestamps are serialized as epoch milliseconds.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The fixed network presentation bound to one city's browsing context.
///
/// Exactly one identity exists per known city, assigned when the city is
/// provisioned and immutable for the process lifetime. Any network request
/// issued on behalf of the city's session must carry the user agent and
/// header overrides recorded here.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// City this identity is bound to (unique key).
    pub city: String,

    /// User agent applied to all traffic for this city's context.
    pub user_agent: String,

    /// Ordered header overrides applied on top of default request headers.
    pub header_policy: Vec<HeaderOverride>,
}

/// A single (name, value) header override.
#[derive(Debug, Clone, Serialize)]
pub struct HeaderOverride {
    pub name: String,
    pub value: String,
}

/// Target platform for a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Facebook,
    Olx,
    Both,
}

impl Platform {
    /// Lowercase wire/storage form, also used as the campaign-id prefix.
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Facebook => "facebook",
            Platform::Olx => "olx",
            Platform::Both => "both",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for parsing a platform from its storage form.
#[derive(Debug, Error)]
#[error("unknown platform '{0}'")]
pub struct UnknownPlatform(pub String);

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "facebook" => Ok(Platform::Facebook),
            "olx" => Ok(Platform::Olx),
            "both" => Ok(Platform::Both),
            other => Err(UnknownPlatform(other.to_string())),
        }
    }
}

/// Lifecycle state of a campaign.
///
/// Transitions are `running -> stopping -> stopped`, driven only by the
/// registry. A campaign is removed from the registry only after reaching
/// `stopped`, never while running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Running,
    Stopping,
    Stopped,
}

/// One running instance of the orchestrated workflow for a city/platform/mode.
///
/// The id is generated as `{platform}_{city}_{millis}` with a uniqueness
/// check and is immutable once assigned. `lead_count` is monotonically
/// non-decreasing while the campaign is running.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: String,
    pub city: String,
    pub platform: Platform,
    /// Opaque policy tag handed to the worker; not interpreted by the core.
    pub mode: String,
    pub status: CampaignStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    pub lead_count: i64,
}

/// Rollup counters derived from the campaign set plus ingestion events.
///
/// Never authoritative: `active_campaigns` is always recomputed from the
/// registry, and the whole snapshot can be rebuilt at any time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub total_leads: u64,
    pub messages_sent: u64,
    pub numbers_found: u64,
    pub active_campaigns: u64,
}

/// Counter categories fed by worker ingestion reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionKind {
    Leads,
    MessagesSent,
    NumbersFound,
}

/// A state-change event pushed to telemetry observers.
///
/// Ordered per observer; transient, never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryEvent {
    StatsUpdate { data: StatsSnapshot },
    CampaignUpdate { data: Campaign },
    Log { message: String },
}

// ============================================================================
// Control API request/response shapes
// ============================================================================

/// Request body for POST /campaigns/start.
#[derive(Debug, Clone, Deserialize)]
pub struct StartRequest {
    pub city: String,
    pub platform: Platform,
    pub mode: String,
}

/// Request body for POST /campaigns/stop.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRequest {
    pub campaign_id: String,
}

/// Request body for POST /worker/leads (worker -> core ingestion).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadReport {
    pub campaign_id: String,
    pub count: u32,
}

/// Request body for POST /worker/report (campaign-agnostic counters).
#[derive(Debug, Clone, Deserialize)]
pub struct IngestionReport {
    pub kind: IngestionKind,
    pub amount: u32,
}

/// Request body for POST /worker/log.
#[derive(Debug, Clone, Deserialize)]
pub struct LogReport {
    pub message: String,
}

/// Uniform control-API response envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            campaign_id: None,
            error: None,
        }
    }

    pub fn started(campaign_id: String) -> Self {
        Self {
            success: true,
            campaign_id: Some(campaign_id),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            campaign_id: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_roundtrip() {
        for p in [Platform::Facebook, Platform::Olx, Platform::Both] {
            assert_eq!(p.as_str().parse::<Platform>().unwrap(), p);
        }
        assert!("craigslist".parse::<Platform>().is_err());
    }

    #[test]
    fn test_stats_update_wire_shape() {
        let event = TelemetryEvent::StatsUpdate {
            data: StatsSnapshot {
                total_leads: 7,
                messages_sent: 3,
                numbers_found: 2,
                active_campaigns: 1,
            },
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "stats_update");
        assert_eq!(value["data"]["totalLeads"], 7);
        assert_eq!(value["data"]["activeCampaigns"], 1);
    }

    #[test]
    fn test_campaign_update_wire_shape() {
        let event = TelemetryEvent::CampaignUpdate {
            data: Campaign {
                id: "both_Delhi_1700000000000".to_string(),
                city: "Delhi".to_string(),
                platform: Platform::Both,
                mode: "fresh24".to_string(),
                status: CampaignStatus::Running,
                start_time: Utc::now(),
                lead_count: 0,
            },
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "campaign_update");
        assert_eq!(value["data"]["platform"], "both");
        assert_eq!(value["data"]["status"], "running");
        assert_eq!(value["data"]["leadCount"], 0);
        assert!(value["data"]["startTime"].is_i64());
    }

    #[test]
    fn test_log_wire_shape() {
        let event = TelemetryEvent::Log {
            message: "worker launched".to_string(),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "log");
        assert_eq!(value["message"], "worker launched");
    }

    #[test]
    fn test_control_response_omits_empty_fields() {
        let value = serde_json::to_value(ControlResponse::ok()).unwrap();
        assert_eq!(value["success"], true);
        assert!(value.get("campaignId").is_none());
        assert!(value.get("error").is_none());

        let value = serde_json::to_value(ControlResponse::failed("not found")).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"], "not found");
    }
}
