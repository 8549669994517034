use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity bucket assigned to a reading. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Normal,
    High,
    Critical,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Classification::Normal => "normal",
            Classification::High => "high",
            Classification::Critical => "critical",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Rising,
    Falling,
    Stable,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Trend::Rising => "rising",
            Trend::Falling => "falling",
            Trend::Stable => "stable",
        };
        f.write_str(label)
    }
}

/// Permission tier of a contact. Declaration order is the fan-out order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AccessLevel {
    Full,
    High,
    Low,
}

impl AccessLevel {
    /// Whether a threshold-breach alert of `severity` reaches this tier.
    pub fn permits(self, severity: Classification) -> bool {
        match self {
            AccessLevel::Full => true,
            AccessLevel::High => severity >= Classification::High,
            AccessLevel::Low => severity == Classification::Critical,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccessLevel::Full => "Full",
            AccessLevel::High => "High",
            AccessLevel::Low => "Low",
        }
    }
}

impl std::str::FromStr for AccessLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(AccessLevel::Full),
            "high" => Ok(AccessLevel::High),
            "low" => Ok(AccessLevel::Low),
            other => Err(format!("unknown access level: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ManualSos,
    ThresholdBreach,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::ManualSos => "manual_sos",
            AlertKind::ThresholdBreach => "threshold_breach",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    Unacknowledged,
    Acknowledged,
    Resolved,
}

impl AlertState {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertState::Unacknowledged => "unacknowledged",
            AlertState::Acknowledged => "acknowledged",
            AlertState::Resolved => "resolved",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub name: String,
    pub current_reading: Option<f64>,
    pub last_update: Option<DateTime<Utc>>,
    pub status: Classification,
    pub trend: Trend,
}

impl Patient {
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            current_reading: None,
            last_update: None,
            status: Classification::Normal,
            trend: Trend::Stable,
        }
    }
}

/// A single glucose measurement in mg/dL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    pub patient_id: Uuid,
    pub value: f64,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub classification: Classification,
    pub trend: Trend,
    /// Change against the oldest reading inside the trend window.
    pub delta: Option<f64>,
}

impl Evaluation {
    pub fn differs_from(&self, other: &Evaluation) -> bool {
        self.classification != other.classification || self.trend != other.trend
    }
}

/// Emitted by the ingestor when a patient's classification or trend moves.
#[derive(Debug, Clone)]
pub struct ClassificationChanged {
    pub patient_id: Uuid,
    pub reading: Reading,
    pub previous: Evaluation,
    pub current: Evaluation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub contact_id: Uuid,
    pub delivered: bool,
    pub attempts: u8,
    pub error: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub kind: AlertKind,
    pub severity: Classification,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub description: String,
    pub state: AlertState,
    pub acknowledged_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// How many breaches or SOS presses were folded into this event.
    pub occurrences: u32,
    pub deliveries: Vec<DeliveryRecord>,
    pub delivery_incomplete: bool,
}

impl AlertEvent {
    pub fn is_active(&self) -> bool {
        self.state != AlertState::Resolved
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub caregiver_id: Uuid,
    pub name: String,
    pub role: String,
    pub access_level: AccessLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewContact {
    /// Preset only when restoring a stored roster.
    #[serde(default, skip_deserializing)]
    pub id: Option<Uuid>,
    pub caregiver_id: Option<Uuid>,
    pub name: String,
    pub role: String,
    pub access_level: AccessLevel,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactUpdate {
    pub name: Option<String>,
    pub role: Option<String>,
    pub access_level: Option<AccessLevel>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_levels_filter_severity() {
        assert!(AccessLevel::Full.permits(Classification::Normal));
        assert!(AccessLevel::Full.permits(Classification::High));
        assert!(AccessLevel::High.permits(Classification::High));
        assert!(AccessLevel::High.permits(Classification::Critical));
        assert!(!AccessLevel::High.permits(Classification::Normal));
        assert!(!AccessLevel::Low.permits(Classification::High));
        assert!(AccessLevel::Low.permits(Classification::Critical));
    }

    #[test]
    fn access_level_parses_case_insensitively() {
        assert_eq!("full".parse::<AccessLevel>(), Ok(AccessLevel::Full));
        assert_eq!(" High ".parse::<AccessLevel>(), Ok(AccessLevel::High));
        assert!("admin".parse::<AccessLevel>().is_err());
    }

    #[test]
    fn classification_orders_by_severity() {
        assert!(Classification::Critical > Classification::High);
        assert!(Classification::High > Classification::Normal);
    }
}
