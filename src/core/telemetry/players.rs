use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_PLAYERS: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerCount {
    pub online: u32,
    pub max: u32,
}

impl PlayerCount {
    pub fn empty(max: u32) -> Self {
        Self { online: 0, max }
    }
}

impl fmt::Display for PlayerCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.online, self.max)
    }
}

/// Follows the player count through the server's own log output.
#[derive(Debug, Clone)]
pub struct PlayerTracker {
    count: PlayerCount,
}

impl PlayerTracker {
    pub fn new(max: u32) -> Self {
        Self {
            count: PlayerCount::empty(max),
        }
    }

    pub fn count(&self) -> PlayerCount {
        self.count
    }

    /// Applies one log line. Returns the new count when it changed.
    pub fn observe(&mut self, line: &str) -> Option<PlayerCount> {
        let message = server_message(line);
        // Chat lines (`<name> ...`) must not move the counter.
        if message.starts_with('<') {
            return None;
        }

        let before = self.count;
        if let Some((online, max)) = parse_list_reply(message) {
            self.count = PlayerCount { online, max };
        } else if message.ends_with(" joined the game") {
            self.count.online = self.count.online.saturating_add(1);
        } else if message.ends_with(" left the game") {
            self.count.online = self.count.online.saturating_sub(1);
        }

        (self.count != before).then_some(self.count)
    }
}

/// Text after the `[time] [thread/LEVEL]: ` prefix, or the whole line.
fn server_message(line: &str) -> &str {
    line.split_once("]: ")
        .map(|(_, msg)| msg)
        .unwrap_or(line)
        .trim()
}

/// `There are 3 of a max of 20 players online: ...` (1.13+) and
/// `There are 3/20 players online:` (older servers).
fn parse_list_reply(message: &str) -> Option<(u32, u32)> {
    let rest = message.strip_prefix("There are ")?;

    if let Some((online, tail)) = rest.split_once(" of a max of ") {
        let max = tail.split_whitespace().next()?;
        return Some((online.trim().parse().ok()?, max.parse().ok()?));
    }

    let (counts, _) = rest.split_once(' ')?;
    let (online, max) = counts.split_once('/')?;
    Some((online.parse().ok()?, max.parse().ok()?))
}

/// `max-players` from `server.properties`, falling back to 20.
pub async fn max_players_from_properties(working_dir: &Path) -> u32 {
    tokio::fs::read_to_string(working_dir.join("server.properties"))
        .await
        .ok()
        .and_then(|text| {
            text.lines().find_map(|line| {
                let (key, value) = line.split_once('=')?;
                (key.trim() == "max-players").then(|| value.trim().parse::<u32>().ok())?
            })
        })
        .unwrap_or(DEFAULT_MAX_PLAYERS)
}
