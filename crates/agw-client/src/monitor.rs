//! Per-terrain reconciliation.
//!
//! A monitor holds the last authoritative snapshot for one terrain and
//! decides when pushed activity warrants a fresh fetch. Triggers are the
//! initial spawn, a manual refresh, a matching advisory push newer than the
//! last completed fetch, and (optionally) a periodic resync that compensates
//! for pushes evicted from the bounded buffers. The snapshot is replaced as
//! a whole on success; on failure the previous snapshot stays and only the
//! error message changes. While a fetch is in flight further triggers are
//! dropped, not queued, so exactly one request is outstanding per terrain.

use agw_core::wire::ServerEvent;
use agw_core::AgroAnalysis;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::AnalysisSource;

const COMMAND_QUEUE_DEPTH: usize = 4;
const RESYNC_DISABLED: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Full-resync period independent of the push buffer. `None` disables;
    /// evicted push events are then lost for good.
    pub resync_interval: Option<Duration>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            resync_interval: Some(Duration::from_secs(300)),
        }
    }
}

/// What one widget displays: the snapshot, an inline error if the latest
/// fetch failed, and whether a fetch is currently outstanding.
#[derive(Debug, Clone, Default)]
pub struct MonitorState {
    pub snapshot: Option<AgroAnalysis>,
    pub error: Option<String>,
    pub fetching: bool,
    pub last_synced: Option<DateTime<Utc>>,
}

#[derive(Debug)]
enum Command {
    Refresh,
}

pub struct TerrainMonitor {
    terrain_id: String,
    state_rx: watch::Receiver<MonitorState>,
    cmd_tx: mpsc::Sender<Command>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl TerrainMonitor {
    /// Start reconciling one terrain. `events` should be an agro-category
    /// receiver from the push channel; events for other terrains are
    /// ignored here, so one shared category stream fans out to any number
    /// of monitors.
    pub fn spawn(
        terrain_id: impl Into<String>,
        source: Arc<dyn AnalysisSource>,
        events: mpsc::Receiver<ServerEvent>,
        config: MonitorConfig,
    ) -> Self {
        let terrain_id = terrain_id.into();
        let (state_tx, state_rx) = watch::channel(MonitorState::default());
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = MonitorTask {
            terrain_id: terrain_id.clone(),
            source,
            state_tx,
            last_synced: None,
        };
        let handle = tokio::spawn(task.run(events, cmd_rx, shutdown_rx, config));

        Self {
            terrain_id,
            state_rx,
            cmd_tx,
            shutdown_tx,
            task: Some(handle),
        }
    }

    pub fn terrain_id(&self) -> &str {
        &self.terrain_id
    }

    pub fn state(&self) -> watch::Receiver<MonitorState> {
        self.state_rx.clone()
    }

    pub fn current(&self) -> MonitorState {
        self.state_rx.borrow().clone()
    }

    /// Request a fetch now. A refresh that lands while one is already in
    /// flight is dropped once the in-flight fetch completes.
    pub fn refresh(&self) {
        if self.cmd_tx.try_send(Command::Refresh).is_err() {
            debug!(event = "refresh_coalesced", terrain_id = %self.terrain_id);
        }
    }

    /// Stop reconciling. An in-flight fetch is abandoned and its late
    /// result discarded; nothing is published after this begins.
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TerrainMonitor {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

struct MonitorTask {
    terrain_id: String,
    source: Arc<dyn AnalysisSource>,
    state_tx: watch::Sender<MonitorState>,
    last_synced: Option<DateTime<Utc>>,
}

impl MonitorTask {
    async fn run(
        mut self,
        mut events: mpsc::Receiver<ServerEvent>,
        mut cmds: mpsc::Receiver<Command>,
        mut shutdown_rx: watch::Receiver<bool>,
        config: MonitorConfig,
    ) {
        let period = config.resync_interval.unwrap_or(RESYNC_DISABLED);
        let mut resync =
            tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        if !self.fetch(&mut shutdown_rx, &mut cmds).await {
            return;
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                Some(event) = events.recv() => {
                    if self.wants_fetch(&event) && !self.fetch(&mut shutdown_rx, &mut cmds).await {
                        return;
                    }
                }
                Some(Command::Refresh) = cmds.recv() => {
                    if !self.fetch(&mut shutdown_rx, &mut cmds).await {
                        return;
                    }
                }
                _ = resync.tick() => {
                    debug!(event = "resync_tick", terrain_id = %self.terrain_id);
                    if !self.fetch(&mut shutdown_rx, &mut cmds).await {
                        return;
                    }
                }
            }
        }
    }

    /// A pushed advisory event triggers a fetch only when it names this
    /// terrain's primary id and is newer than the last completed fetch.
    fn wants_fetch(&self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::AgroUpdate(update) => {
                update.refreshes(&self.terrain_id)
                    && self
                        .last_synced
                        .map_or(true, |synced| update.timestamp > synced)
            }
            _ => false,
        }
    }

    /// Returns false when shutdown was requested; the caller must stop
    /// without publishing anything further.
    async fn fetch(
        &mut self,
        shutdown_rx: &mut watch::Receiver<bool>,
        cmds: &mut mpsc::Receiver<Command>,
    ) -> bool {
        self.state_tx.send_modify(|state| state.fetching = true);

        let result = tokio::select! {
            result = self.source.terrain_analysis(&self.terrain_id) => result,
            _ = shutdown_rx.changed() => {
                debug!(event = "fetch_abandoned", terrain_id = %self.terrain_id);
                return false;
            }
        };

        match result {
            Ok(analysis) => {
                let synced = Utc::now();
                self.last_synced = Some(synced);
                self.state_tx.send_modify(|state| {
                    state.fetching = false;
                    state.snapshot = Some(analysis);
                    state.error = None;
                    state.last_synced = Some(synced);
                });
                debug!(event = "snapshot_replaced", terrain_id = %self.terrain_id);
            }
            Err(err) => {
                warn!(event = "analysis_fetch_failed", terrain_id = %self.terrain_id, error = %err);
                let message = err.to_string();
                self.state_tx.send_modify(|state| {
                    state.fetching = false;
                    state.error = Some(message);
                });
            }
        }

        // Refresh requests that piled up while fetching are no-ops, not a
        // second fetch. Stale push events are filtered by wants_fetch.
        while cmds.try_recv().is_ok() {}
        true
    }
}
