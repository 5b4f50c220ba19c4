// ─── Event Broadcaster ───
// Builds one stream connection per subscriber: authorize, replay the
// backlog, then forward live log and telemetry events until dropped.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::auth::{CredentialStore, UserIdentity};
use crate::core::config::ConfigSource;
use crate::core::error::PanelResult;
use crate::core::telemetry::{ResourceSample, TelemetryCollector};

use super::hub::Subscription;
use super::log_buffer::{LogBuffer, LogEvent};

/// How many log lines a new subscriber gets replayed.
pub const INITIAL_LOG_REPLAY: usize = 20;

/// Sent before any sample has been taken.
const UNKNOWN_PLAYER_COUNT: &str = "0/0";

/// `data` of a stream message: one item or a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload<T> {
    One(T),
    Many(Vec<T>),
}

/// Server → client frame, serialized as `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StreamMessage {
    #[serde(rename = "terminal")]
    Terminal(Payload<LogEvent>),
    #[serde(rename = "playerCount")]
    PlayerCount(String),
    #[serde(rename = "resources")]
    Resources(Payload<ResourceSample>),
}

impl StreamMessage {
    pub fn to_json(&self) -> PanelResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Clone)]
pub struct EventBroadcaster {
    logs: Arc<LogBuffer>,
    telemetry: Arc<TelemetryCollector>,
    credentials: Arc<dyn CredentialStore>,
    config: Arc<dyn ConfigSource>,
}

impl EventBroadcaster {
    pub fn new(
        logs: Arc<LogBuffer>,
        telemetry: Arc<TelemetryCollector>,
        credentials: Arc<dyn CredentialStore>,
        config: Arc<dyn ConfigSource>,
    ) -> Self {
        Self {
            logs,
            telemetry,
            credentials,
            config,
        }
    }

    /// Opens a subscriber. `Ok(None)` means the token was rejected and the
    /// connection must be closed without a payload.
    ///
    /// Authorization is resolved here only; a token revoked later does not
    /// end an open connection.
    pub async fn connect(&self, token: Option<&str>) -> PanelResult<Option<StreamConnection>> {
        let settings = self.config.snapshot()?;
        let identity = if settings.disable_frontend_auth {
            None
        } else {
            let Some(token) = token.filter(|t| !t.is_empty()) else {
                debug!("Stream connection without token rejected");
                return Ok(None);
            };
            match self.credentials.user_by_token(token).await? {
                Some(identity) => Some(identity),
                None => {
                    debug!("Stream connection with unknown token rejected");
                    return Ok(None);
                }
            }
        };

        // Log backlog and live feed split at one point: no gap, no repeat.
        let (logs, replay) = self.logs.subscribe_with_recent(INITIAL_LOG_REPLAY).await;
        let player_counts = self.telemetry.subscribe_player_counts();
        let samples = self.telemetry.subscribe_samples();

        let player_count = self
            .telemetry
            .latest()
            .map(|sample| sample.player_count_label())
            .unwrap_or_else(|| UNKNOWN_PLAYER_COUNT.to_string());

        let initial = vec![
            StreamMessage::Terminal(Payload::Many(replay)),
            StreamMessage::PlayerCount(player_count),
            StreamMessage::Resources(Payload::Many(self.telemetry.history())),
        ];

        match &identity {
            Some(user) => info!("Stream subscriber connected as {}", user.id),
            None => info!("Stream subscriber connected (auth disabled)"),
        }

        Ok(Some(StreamConnection {
            identity,
            initial,
            logs,
            player_counts,
            samples,
        }))
    }
}

/// One live subscriber. Dropping it removes every registration it holds.
pub struct StreamConnection {
    identity: Option<UserIdentity>,
    initial: Vec<StreamMessage>,
    logs: Subscription<LogEvent>,
    player_counts: Subscription<String>,
    samples: Subscription<ResourceSample>,
}

impl StreamConnection {
    pub fn identity(&self) -> Option<&UserIdentity> {
        self.identity.as_ref()
    }

    /// The replay messages, in send order. Empty after the first call.
    pub fn take_initial(&mut self) -> Vec<StreamMessage> {
        std::mem::take(&mut self.initial)
    }

    /// Next live event. `None` once every source has shut down.
    pub async fn next_message(&mut self) -> Option<StreamMessage> {
        tokio::select! {
            Some(event) = self.logs.recv() => Some(StreamMessage::Terminal(Payload::One(event))),
            Some(count) = self.player_counts.recv() => Some(StreamMessage::PlayerCount(count)),
            Some(sample) = self.samples.recv() => Some(StreamMessage::Resources(Payload::One(sample))),
            else => None,
        }
    }
}
