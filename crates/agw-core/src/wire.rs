//! Socket protocol for the real-time push channel.
//!
//! Frames are JSON text messages of the form `{"event": ..., "data": ...}`.
//! Both directions are closed tagged unions: adding a message category is a
//! compile-time change, not a silently ignored payload shape.

use crate::Priority;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on a single frame. Larger frames are rejected before parsing.
pub const MAX_FRAME_BYTES: usize = 256 * 1024;

/// `AgroUpdate::kind` value that marks an advisory refresh trigger.
pub const AGRO_SUGGESTION_UPDATE: &str = "agro_suggestion_update";

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too large: {0} bytes")]
    TooLarge(usize),
    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// Server-initiated events delivered over the push channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    WeatherUpdate(WeatherUpdate),
    AgroUpdate(AgroUpdate),
    WeatherAlert(WeatherAlert),
    GeneralUpdate(GeneralUpdate),
    ConnectionStatus(ConnectionStatus),
    Pong(Pong),
}

impl ServerEvent {
    pub fn from_frame(raw: &str) -> Result<Self, FrameError> {
        if raw.len() > MAX_FRAME_BYTES {
            return Err(FrameError::TooLarge(raw.len()));
        }
        serde_json::from_str(raw).map_err(|err| FrameError::Malformed(err.to_string()))
    }

    pub fn category(&self) -> EventCategory {
        match self {
            ServerEvent::WeatherUpdate(_) => EventCategory::Weather,
            ServerEvent::AgroUpdate(_) => EventCategory::Agro,
            ServerEvent::WeatherAlert(_) => EventCategory::Alert,
            ServerEvent::GeneralUpdate(_) => EventCategory::General,
            ServerEvent::ConnectionStatus(_) => EventCategory::Status,
            ServerEvent::Pong(_) => EventCategory::Pong,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ServerEvent::WeatherUpdate(ev) => ev.timestamp,
            ServerEvent::AgroUpdate(ev) => ev.timestamp,
            ServerEvent::WeatherAlert(ev) => ev.timestamp,
            ServerEvent::GeneralUpdate(ev) => ev.timestamp,
            ServerEvent::ConnectionStatus(ev) => ev.timestamp,
            ServerEvent::Pong(ev) => ev.timestamp,
        }
    }
}

/// Client-initiated messages sent over the push channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    SubscribeTerrain { terrain_id: String },
    UnsubscribeTerrain { terrain_id: String },
    Ping { timestamp: DateTime<Utc> },
}

impl ClientEvent {
    pub fn to_frame(&self) -> Result<String, FrameError> {
        serde_json::to_string(self).map_err(|err| FrameError::Malformed(err.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    Weather,
    Agro,
    Alert,
    General,
    Status,
    Pong,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Weather => "weather_update",
            EventCategory::Agro => "agro_update",
            EventCategory::Alert => "weather_alert",
            EventCategory::General => "general_update",
            EventCategory::Status => "connection_status",
            EventCategory::Pong => "pong",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherUpdate {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgroUpdate {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub terrain_id: Option<String>,
    #[serde(default)]
    pub suggestions: Option<Vec<String>>,
    #[serde(default)]
    pub priority: Option<Priority>,
    pub timestamp: DateTime<Utc>,
}

impl AgroUpdate {
    /// True when this event should trigger a reconciliation fetch for
    /// the given terrain.
    pub fn refreshes(&self, terrain_id: &str) -> bool {
        self.kind == AGRO_SUGGESTION_UPDATE && self.terrain_id.as_deref() == Some(terrain_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherAlert {
    pub alert_type: String,
    pub location: String,
    pub message: String,
    #[serde(default)]
    pub severity: Priority,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralUpdate {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pong {
    pub timestamp: DateTime<Utc>,
}
