use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub mod buffer;
pub mod wire;

pub use buffer::UpdateBuffer;

/// A user-registered geographic plot tracked for weather and advisory data.
///
/// Terrain ids are assigned by the service and treated as opaque strings on
/// the client. The primary id is the canonical key everywhere: subscription
/// matching, fetch keying, and cache lookups all use it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Terrain {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub crop_type: Option<String>,
    #[serde(default)]
    pub area_hectares: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Fields the user supplies when registering or editing a terrain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TerrainDraft {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub crop_type: Option<String>,
    #[serde(default)]
    pub area_hectares: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl TerrainDraft {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty");
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err("latitude out of range");
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err("longitude out of range");
        }
        if let Some(area) = self.area_hectares {
            if !area.is_finite() || area < 0.0 {
                return Err("area must be non-negative");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherData {
    pub location: String,
    pub latitude: f64,
    pub longitude: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_complete: bool,
}

/// An AI-or-rule-generated farming suggestion set for one location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgroSuggestion {
    pub location: String,
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub weather_context: Option<WeatherData>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub suggestion_count: usize,
}

/// The authoritative snapshot pair for one terrain: weather plus advisory.
///
/// Always replaced as a whole, never field-wise, so a reader can never see
/// weather from one fetch paired with suggestions from another.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgroAnalysis {
    pub weather: Option<WeatherData>,
    pub suggestions: Option<AgroSuggestion>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(format!("Unknown priority: {other}")),
        }
    }
}

/// Aggregate numbers for the terrains owned by the current user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TerrainStats {
    pub total_terrains: usize,
    pub total_area_hectares: f64,
    #[serde(default)]
    pub crops: BTreeMap<String, usize>,
}
