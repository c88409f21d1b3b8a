//! # matrixmud - a multi-user text world set inside the Matrix
//!
//! matrixmud serves a persistent, shared text world over a plain line
//! protocol that any telnet-style client can speak. Many entities move
//! through the same rooms at once, fight the same agents and pick up the
//! same items, and every mutation is serialized so no two sessions ever
//! see a half-applied change.
//!
//! ## Features
//!
//! - **Line Protocol**: one command per line, telnet negotiation stripped, password echo suppressed.
//! - **Sessions**: Argon2id credentials, reconnect tokens with a grace window, idle and login timeouts.
//! - **Shared World**: rooms, exits, NPCs, items, factions, a day/night clock and training instances.
//! - **Authoring**: builders dig, link and describe rooms live; edits that strand rooms are refused.
//! - **Persistence**: sled-backed store, periodic autosave, verified tar.gz backups.
//! - **Operations**: an admin console port and a read-only JSON view of the world.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use matrixmud::config::Config;
//! use matrixmud::server::MudServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     MudServer::open(config)?.run().await
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`mud`] - world model, command parsing, rules, persistence
//! - [`server`] - listeners, sessions, output fan-out, admin console, web view
//! - [`config`] - configuration management and validation
//! - [`metrics`] - process-wide counters
//! - [`logutil`] - helpers for safe log output
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐  ┌───────────────┐  ┌────────────┐
//! │  Line protocol  │  │ Admin console │  │  Web view  │
//! └─────────────────┘  └───────────────┘  └────────────┘
//!          │                  │                 │
//! ┌─────────────────────────────────────────────────────┐
//! │        ServerContext (sessions, hub, limiter)       │
//! └─────────────────────────────────────────────────────┘
//!          │
//! ┌─────────────────┐
//! │      Game       │ ← world, registry, clock, instances
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │    MudStore     │ ← sled
//! └─────────────────┘
//! ```

pub mod config;
pub mod logutil;
pub mod metrics;
pub mod mud;
pub mod server;
