// ─── Terminal Log Buffer ───
// Capped, write-through record of everything shown on the panel terminal.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use super::hub::{Hub, Subscription};
use crate::core::error::{PanelError, PanelResult};

pub const LOG_BUFFER_CAPACITY: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: String,
    pub message: String,
}

impl LogEvent {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            message: message.into(),
        }
    }
}

/// Ring buffer of [`LogEvent`]s persisted as a JSON array after every append.
///
/// The file is rewritten and subscribers are notified while the buffer lock
/// is held, so the persisted list always equals the in-memory one once
/// `append` returns, and [`LogBuffer::subscribe_with_recent`] sees each
/// event exactly once.
pub struct LogBuffer {
    path: PathBuf,
    capacity: usize,
    entries: Mutex<VecDeque<LogEvent>>,
    hub: Hub<LogEvent>,
}

impl LogBuffer {
    /// Reloads `path`. A missing or corrupt file starts an empty buffer.
    pub async fn load(path: PathBuf) -> Self {
        Self::load_with_capacity(path, LOG_BUFFER_CAPACITY).await
    }

    pub async fn load_with_capacity(path: PathBuf, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut entries = match read_entries(&path).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!("Log file {:?} unusable, starting empty: {}", path, err);
                VecDeque::new()
            }
        };
        while entries.len() > capacity {
            entries.pop_front();
        }

        Self {
            path,
            capacity,
            entries: Mutex::new(entries),
            hub: Hub::default(),
        }
    }

    /// Records `message`, persists the buffer, then notifies subscribers.
    pub async fn append(&self, message: impl Into<String>) -> LogEvent {
        let event = LogEvent::now(message);

        let mut entries = self.entries.lock().await;
        entries.push_back(event.clone());
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        if let Err(err) = self.persist(&entries).await {
            warn!("Failed to persist terminal log: {}", err);
        }
        self.hub.publish(event.clone());

        event
    }

    #[cfg(test)]
    pub async fn snapshot(&self) -> Vec<LogEvent> {
        self.entries.lock().await.iter().cloned().collect()
    }

    pub fn subscribe(&self) -> Subscription<LogEvent> {
        self.hub.subscribe()
    }

    /// Subscribes and reads the `n` newest entries (oldest first) in one
    /// step. An event is either in the returned backlog or delivered to the
    /// subscription.
    pub async fn subscribe_with_recent(
        &self,
        n: usize,
    ) -> (Subscription<LogEvent>, Vec<LogEvent>) {
        let entries = self.entries.lock().await;
        let subscription = self.hub.subscribe();
        let skip = entries.len().saturating_sub(n);
        (subscription, entries.iter().skip(skip).cloned().collect())
    }

    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }

    async fn persist(&self, entries: &VecDeque<LogEvent>) -> PanelResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PanelError::io(parent, e))?;
        }
        let payload = serde_json::to_vec(entries)?;
        tokio::fs::write(&self.path, payload)
            .await
            .map_err(|e| PanelError::io(&self.path, e))
    }
}

async fn read_entries(path: &Path) -> PanelResult<VecDeque<LogEvent>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(VecDeque::new()),
        Err(source) => return Err(PanelError::io(path, source)),
    };
    Ok(serde_json::from_slice(&bytes)?)
}
