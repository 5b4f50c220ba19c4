pub mod collector;
pub mod players;
pub mod probe;

pub use collector::{ProbeTarget, ResourceSample, ServerStatus, TelemetryCollector};
pub use players::{max_players_from_properties, PlayerCount, PlayerTracker, DEFAULT_MAX_PLAYERS};
pub use probe::{ProcessProbe, StaticProbe, SysinfoProbe};
