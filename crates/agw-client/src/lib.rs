//! Client engine for the AgroWatch monitoring service.
//!
//! The pieces compose the same way the service dashboard does: a
//! [`session::Session`] carries the bearer token, an [`api::ApiClient`] is
//! the authoritative REST source, a [`channel::PushChannel`] owns the one
//! long-lived socket connection and fans events out per category, and one
//! [`monitor::TerrainMonitor`] per visible terrain reconciles pushed hints
//! against a fresh REST fetch.

pub mod alert;
pub mod api;
pub mod channel;
pub mod monitor;
pub mod session;
pub mod subscription;

pub use alert::{AlertNotifier, LogNotifier};
pub use api::{AnalysisSource, ApiClient, ApiError};
pub use channel::{ChannelConfig, ConnectionState, PushChannel};
pub use monitor::{MonitorConfig, MonitorState, TerrainMonitor};
pub use session::Session;
