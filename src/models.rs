use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::geo::Coordinate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
    Catastrophic,
}

impl Severity {
    /// Tiers offered when submitting a report. `Catastrophic` is accepted on
    /// import but never offered.
    pub const SELECTABLE: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            "catastrophic" => Some(Severity::Catastrophic),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
            Severity::Catastrophic => "catastrophic",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    #[default]
    Pending,
    InProgress,
    Resolved,
}

impl ReportStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(ReportStatus::Pending),
            "in_progress" => Some(ReportStatus::InProgress),
            "resolved" => Some(ReportStatus::Resolved),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::InProgress => "in_progress",
            ReportStatus::Resolved => "resolved",
        }
    }

    pub fn label(&self) -> String {
        self.as_str().replace('_', " ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentReport {
    pub id: Uuid,
    pub disaster_type: String,
    pub description: String,
    pub severity: Option<Severity>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub contact: Option<String>,
    pub status: ReportStatus,
    pub created_at: DateTime<Utc>,
}

impl IncidentReport {
    pub fn coordinate(&self) -> Option<Coordinate> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(Coordinate::new(lat, lng)),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ReportError {
    #[error("disaster type is required")]
    MissingType,
    #[error("location is required")]
    MissingLocation,
    #[error("invalid coordinate ({lat}, {lng})")]
    InvalidCoordinate { lat: f64, lng: f64 },
}

/// A report as submitted by a user, before the store assigns an id and
/// timestamp.
#[derive(Debug, Clone)]
pub struct NewReport {
    pub disaster_type: String,
    pub description: String,
    pub severity: Option<Severity>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub contact: Option<String>,
}

impl NewReport {
    pub fn validate(&self) -> Result<Coordinate, ReportError> {
        if self.disaster_type.trim().is_empty() {
            return Err(ReportError::MissingType);
        }
        let (lat, lng) = match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => (lat, lng),
            _ => return Err(ReportError::MissingLocation),
        };
        let coord = Coordinate::new(lat, lng);
        if !coord.is_valid() {
            return Err(ReportError::InvalidCoordinate { lat, lng });
        }
        Ok(coord)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserLocationUpdate {
    pub user_id: String,
    pub location: Coordinate,
    pub geohash: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardStats {
    pub total: usize,
    pub today: usize,
    pub this_week: usize,
    pub distinct_types: usize,
    pub severity_counts: Vec<(Severity, usize)>,
    pub type_counts: Vec<(String, usize)>,
    pub status_counts: Vec<(ReportStatus, usize)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: usize,
}
