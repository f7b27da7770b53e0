//! Shared data types for the pulse incident relay.
//!
//! Feed-facing types deserialize the Statuspage v2 `incidents.json` shape.
//! Unknown fields are ignored and unrecognized enum values are preserved
//! verbatim so a new upstream status never breaks a poll cycle.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status reported for an incident or one of its updates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum IncidentStatus {
    Investigating,
    Identified,
    Monitoring,
    Resolved,
    Postmortem,
    Other(String),
}

impl IncidentStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "investigating" => Self::Investigating,
            "identified" => Self::Identified,
            "monitoring" => Self::Monitoring,
            "resolved" => Self::Resolved,
            "postmortem" => Self::Postmortem,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Investigating => "investigating",
            Self::Identified => "identified",
            Self::Monitoring => "monitoring",
            Self::Resolved => "resolved",
            Self::Postmortem => "postmortem",
            Self::Other(raw) => raw.as_str(),
        }
    }

    /// Returns true for statuses after which no further announcement changes occur.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Postmortem)
    }
}

impl From<String> for IncidentStatus {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<IncidentStatus> for String {
    fn from(value: IncidentStatus) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Impact severity attached to an incident.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum IncidentImpact {
    Critical,
    Major,
    Minor,
    #[default]
    None,
    Other(String),
}

impl IncidentImpact {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "critical" => Self::Critical,
            "major" => Self::Major,
            "minor" => Self::Minor,
            "none" | "" => Self::None,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Critical => "critical",
            Self::Major => "major",
            Self::Minor => "minor",
            Self::None => "none",
            Self::Other(raw) => raw.as_str(),
        }
    }
}

impl From<String> for IncidentImpact {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<IncidentImpact> for String {
    fn from(value: IncidentImpact) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for IncidentImpact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One status post within an incident's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentUpdate {
    pub status: IncidentStatus,
    #[serde(default)]
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// A component affected by an incident.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentComponent {
    pub name: String,
}

/// Snapshot of an incident as reported by the feed on one poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub shortlink: Option<String>,
    pub status: IncidentStatus,
    #[serde(default)]
    pub impact: IncidentImpact,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// Newest first, as published by the feed.
    #[serde(default)]
    pub incident_updates: Vec<IncidentUpdate>,
    #[serde(default)]
    pub components: Vec<IncidentComponent>,
}

impl Incident {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Latest update timestamp, independent of the order updates arrive in.
    pub fn latest_update_at(&self) -> Option<DateTime<Utc>> {
        self.incident_updates
            .iter()
            .map(|update| update.created_at)
            .max()
    }

    /// Timestamp compared against the stored record during reconciliation.
    pub fn incoming_timestamp(&self) -> Option<DateTime<Utc>> {
        self.latest_update_at().or(self.created_at)
    }
}

/// Page metadata returned alongside the incident list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedPageInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// Top-level `incidents.json` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentFeedDocument {
    #[serde(default)]
    pub page: Option<FeedPageInfo>,
    pub incidents: Vec<Incident>,
}

/// Durable memory of how an incident was last represented in the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub message_id: String,
    pub last_update: DateTime<Utc>,
    pub resolved: bool,
}

impl StoredRecord {
    pub fn new(message_id: impl Into<String>, last_update: DateTime<Utc>, resolved: bool) -> Self {
        Self {
            message_id: message_id.into(),
            last_update,
            resolved,
        }
    }
}

/// Color family used when presenting an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorTone {
    Resolved,
    Critical,
    Major,
    Minor,
    Unknown,
}

impl ColorTone {
    /// 24-bit RGB value used by chat embeds.
    pub fn rgb(self) -> u32 {
        match self {
            Self::Resolved => 0x57_F2_87,
            Self::Critical => 0xED_42_45,
            Self::Major => 0xE6_7E_22,
            Self::Minor => 0xFE_E7_5C,
            Self::Unknown => 0x23_27_2A,
        }
    }
}

/// One labelled block in a rendered incident.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayEntry {
    pub label: String,
    pub content: String,
}

/// Transport-neutral presentation of an incident.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayDocument {
    pub title: String,
    pub url: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub footer: String,
    pub tone: ColorTone,
    pub description: String,
    pub entries: Vec<DisplayEntry>,
}
