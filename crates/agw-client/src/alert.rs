//! Weather-alert notification seam.
//!
//! Raising an OS-level notification is an embedder capability, not a data
//! concern, so it hangs off its own trait instead of hiding inside the
//! fetch path. Nothing fires unless the caller bridges the alert category
//! to a notifier explicitly.

use agw_core::wire::{ServerEvent, WeatherAlert};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

pub trait AlertNotifier: Send + Sync {
    fn notify(&self, alert: &WeatherAlert);
}

/// Default notifier: a structured warning in the log stream.
pub struct LogNotifier;

impl AlertNotifier for LogNotifier {
    fn notify(&self, alert: &WeatherAlert) {
        warn!(
            event = "weather_alert",
            alert_type = %alert.alert_type,
            location = %alert.location,
            severity = %alert.severity,
            message = %alert.message
        );
    }
}

/// Forward every weather alert from an alert-category receiver to the
/// notifier. Ends when the channel closes.
pub fn spawn_alert_bridge(
    mut events: mpsc::Receiver<ServerEvent>,
    notifier: Arc<dyn AlertNotifier>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let ServerEvent::WeatherAlert(alert) = event {
                notifier.notify(&alert);
            }
        }
    })
}
