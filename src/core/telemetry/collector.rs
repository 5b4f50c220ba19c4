// ─── Telemetry Collector ───
// Fixed-interval sampling of the supervised process plus the player
// counter fed from its log output.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::core::events::{Hub, Subscription};
use crate::core::session::SessionController;

use super::players::{PlayerCount, PlayerTracker, DEFAULT_MAX_PLAYERS};
use super::probe::ProcessProbe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Running,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSample {
    pub timestamp: DateTime<Utc>,
    pub status: ServerStatus,
    pub player_count: u32,
    pub max_players: u32,
    pub memory_used_bytes: u64,
    pub host_cpu_load: f64,
}

impl ResourceSample {
    pub fn player_count_label(&self) -> String {
        PlayerCount {
            online: self.player_count,
            max: self.max_players,
        }
        .to_string()
    }
}

/// Snapshot of the process at poll time.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProbeTarget {
    pub running: bool,
    pub pid: Option<u32>,
}

pub struct TelemetryCollector {
    retention: Duration,
    probe: Box<dyn ProcessProbe>,
    history: Mutex<VecDeque<ResourceSample>>,
    players: Mutex<PlayerTracker>,
    samples: Hub<ResourceSample>,
    player_counts: Hub<String>,
}

impl TelemetryCollector {
    pub fn new(retention: Duration, probe: Box<dyn ProcessProbe>) -> Self {
        Self {
            retention,
            probe,
            history: Mutex::new(VecDeque::new()),
            players: Mutex::new(PlayerTracker::new(DEFAULT_MAX_PLAYERS)),
            samples: Hub::default(),
            player_counts: Hub::default(),
        }
    }

    // ── Player count ────────────────────────────────────

    /// Resets the counter for a freshly launched server.
    pub fn session_started(&self, max_players: u32) {
        let count = {
            let mut players = lock(&self.players);
            *players = PlayerTracker::new(max_players);
            players.count()
        };
        self.player_counts.publish(count.to_string());
    }

    pub fn session_ended(&self) {
        let count = {
            let mut players = lock(&self.players);
            *players = PlayerTracker::new(players.count().max);
            players.count()
        };
        self.player_counts.publish(count.to_string());
    }

    /// Feeds one server log line. Count changes go to player-count
    /// subscribers only; full samples carry them on the next tick.
    pub fn observe_line(&self, line: &str) {
        let changed = lock(&self.players).observe(line);
        if let Some(count) = changed {
            debug!("Player count now {}", count);
            self.player_counts.publish(count.to_string());
        }
    }

    pub fn player_count(&self) -> PlayerCount {
        lock(&self.players).count()
    }

    // ── Samples ─────────────────────────────────────────

    /// Takes one sample, appends it to the history and notifies listeners.
    pub fn sample(&self, target: ProbeTarget) -> ResourceSample {
        let sample = self.measure(target);
        self.record(sample.clone());
        self.samples.publish(sample.clone());
        sample
    }

    /// Reads the process without touching the history. A stopped or
    /// vanished process yields zeroed readings.
    pub fn measure(&self, target: ProbeTarget) -> ResourceSample {
        let memory = match (target.running, target.pid) {
            (true, Some(pid)) => self.probe.memory_bytes(pid).unwrap_or(0),
            _ => 0,
        };
        let players = if target.running {
            self.player_count()
        } else {
            PlayerCount::empty(self.player_count().max)
        };

        ResourceSample {
            timestamp: Utc::now(),
            status: if target.running {
                ServerStatus::Running
            } else {
                ServerStatus::Stopped
            },
            player_count: players.online,
            max_players: players.max,
            memory_used_bytes: memory,
            host_cpu_load: self.probe.host_load(),
        }
    }

    fn record(&self, sample: ResourceSample) {
        let retention = chrono::Duration::from_std(self.retention)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let cutoff = sample.timestamp - retention;

        let mut history = lock(&self.history);
        history.push_back(sample);
        while history
            .front()
            .map_or(false, |oldest| oldest.timestamp < cutoff)
        {
            history.pop_front();
        }
    }

    pub fn history(&self) -> Vec<ResourceSample> {
        lock(&self.history).iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<ResourceSample> {
        lock(&self.history).back().cloned()
    }

    pub fn subscribe_samples(&self) -> Subscription<ResourceSample> {
        self.samples.subscribe()
    }

    pub fn subscribe_player_counts(&self) -> Subscription<String> {
        self.player_counts.subscribe()
    }

    /// `(sample, player-count)` listener totals.
    pub fn subscriber_counts(&self) -> (usize, usize) {
        (
            self.samples.subscriber_count(),
            self.player_counts.subscriber_count(),
        )
    }

    /// Poll loop. Runs until `shutdown` flips to `true`.
    pub async fn run(
        self: Arc<Self>,
        controller: Arc<SessionController>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Telemetry polling every {:?}", interval);
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(100)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let target = controller.probe_target().await;
                    self.sample(target);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Telemetry polling stopped");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
