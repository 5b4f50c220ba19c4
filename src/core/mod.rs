// ─── CraftPanel Core ───
// Backend for supervising one Minecraft server process.
//
// Architecture:
//   core/
//     config/     - Settings snapshot (config.json + env)
//     auth/       - Token → identity lookup
//     version/    - Mojang manifest + server downloads
//     java/       - Required runtime per game version, Temurin provisioning
//     downloader/ - HTTP fetches with SHA-1 validation
//     loaders/    - Vanilla, Forge, Fabric, Paper, Spigot recipes
//     session/    - Lifecycle state machine around the server process
//     telemetry/  - Player count, memory and load sampling
//     events/     - Log buffer + real-time fan-out

pub mod auth;
pub mod config;
pub mod downloader;
pub mod error;
pub mod events;
pub mod http;
pub mod java;
pub mod loaders;
pub mod session;
pub mod telemetry;
pub mod version;
