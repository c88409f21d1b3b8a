//! # Configuration Management Module
//!
//! All runtime settings live in one TOML file, deserialized with serde.
//! Every section implements `Default`, so a missing section or key falls
//! back to a working value and an empty file yields a runnable server.
//!
//! ## Configuration Structure
//!
//! - [`ServerConfig`] - listen addresses, session cap, message of the day
//! - [`SessionConfig`] - login/idle timeouts, reconnection window, rate limit
//! - [`GameConfig`] - start room, day length, autosave, builders
//! - [`StorageConfig`] - data directory, database and backup paths
//! - [`LoggingConfig`] - level and optional log files
//! - [`SecurityConfig`] - Argon2 costs and the admin channel password
//!
//! ## Usage
//!
//! ```rust,no_run
//! use matrixmud::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     config.validate()?;
//!     println!("Line protocol on {}", config.server.line_addr);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [server]
//! name = "The Matrix"
//! line_addr = "0.0.0.0:4000"
//!
//! [session]
//! reconnect_window_secs = 120
//! commands_per_second = 5
//!
//! [game]
//! builders = ["architect"]
//! ```

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

use crate::mud::GameSettings;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub game: GameConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub name: String,
    /// Line protocol listener.
    pub line_addr: String,
    /// Admin channel listener. Keep this on loopback unless a password is set.
    pub admin_addr: String,
    /// Read-only web interface; empty disables it.
    pub web_addr: String,
    pub max_sessions: usize,
    pub motd: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "The Matrix".to_string(),
            line_addr: "0.0.0.0:4000".to_string(),
            admin_addr: "127.0.0.1:4001".to_string(),
            web_addr: "127.0.0.1:8080".to_string(),
            max_sessions: 64,
            motd: "Wake up... The Matrix has you.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub login_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub reconnect_window_secs: u64,
    /// Commands accepted per entity within one one-second window.
    pub commands_per_second: u32,
    pub min_password_len: usize,
    pub max_login_attempts: u32,
    pub max_line_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            login_timeout_secs: 60,
            idle_timeout_secs: 30 * 60,
            reconnect_window_secs: 120,
            commands_per_second: 5,
            min_password_len: 4,
            max_login_attempts: 3,
            max_line_len: 1024,
        }
    }
}

impl SessionConfig {
    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn reconnect_window(&self) -> Duration {
        Duration::from_secs(self.reconnect_window_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub start_room: String,
    /// Length of one full day/night cycle.
    pub day_length_secs: u64,
    /// 0 disables periodic saves.
    pub autosave_interval_secs: u64,
    /// Names allowed to dig, generate, create, delete and edit.
    pub builders: Vec<String>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            start_room: crate::mud::START_ROOM_ID.to_string(),
            day_length_secs: 48 * 60,
            autosave_interval_secs: 300,
            builders: Vec::new(),
        }
    }
}

impl GameConfig {
    pub fn settings(&self) -> GameSettings {
        GameSettings {
            start_room: self.start_room.clone(),
            day_length: Duration::from_secs(self.day_length_secs),
            builders: self
                .builders
                .iter()
                .map(|name| name.trim().to_ascii_lowercase())
                .filter(|name| !name.is_empty())
                .collect::<HashSet<_>>(),
        }
    }

    pub fn autosave_interval(&self) -> Option<Duration> {
        (self.autosave_interval_secs > 0).then(|| Duration::from_secs(self.autosave_interval_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
    /// Defaults to `<data_dir>/world.sled`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
    /// Defaults to `<data_dir>/backups`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            db_path: None,
            backup_dir: None,
        }
    }
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        match &self.db_path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(&self.data_dir).join("world.sled"),
        }
    }

    pub fn backup_dir(&self) -> PathBuf {
        match &self.backup_dir {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(&self.data_dir).join("backups"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    #[serde(default)]
    pub security_file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("matrixmud.log".to_string()),
            security_file: Some("matrixmud-security.log".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Argon2Config {
    #[serde(default)]
    pub memory_kib: Option<u32>,
    #[serde(default)]
    pub time_cost: Option<u32>,
    #[serde(default)]
    pub parallelism: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecurityConfig {
    #[serde(default)]
    pub argon2: Option<Argon2Config>,
    /// PHC string; when set, the admin channel asks for this password first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_password_hash: Option<String>,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.session.commands_per_second == 0 {
            bail!("session.commands_per_second must be at least 1");
        }
        if self.session.reconnect_window_secs == 0 {
            bail!("session.reconnect_window_secs must be at least 1");
        }
        if self.session.min_password_len == 0 {
            bail!("session.min_password_len must be at least 1");
        }
        if self.session.max_login_attempts == 0 {
            bail!("session.max_login_attempts must be at least 1");
        }
        if self.session.max_line_len == 0 {
            bail!("session.max_line_len must be at least 1");
        }
        if self.game.start_room.trim().is_empty() {
            bail!("game.start_room must not be empty");
        }
        if self.game.day_length_secs == 0 {
            bail!("game.day_length_secs must be at least 1");
        }
        if self.server.max_sessions == 0 {
            bail!("server.max_sessions must be at least 1");
        }
        if self.server.line_addr.trim().is_empty() {
            bail!("server.line_addr must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.session.min_password_len, 4);
        assert_eq!(config.game.start_room, "construct");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_sections_fill_in() {
        let config: Config = toml::from_str(
            r#"
            [session]
            reconnect_window_secs = 30

            [game]
            builders = ["Architect", " "]
            "#,
        )
        .unwrap();
        assert_eq!(config.session.reconnect_window(), Duration::from_secs(30));
        assert_eq!(config.session.commands_per_second, 5);
        let settings = config.game.settings();
        assert!(settings.builders.contains("architect"));
        assert_eq!(settings.builders.len(), 1);
    }

    #[test]
    fn validation_rejects_unusable_values() {
        let mut config = Config::default();
        config.session.commands_per_second = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.session.reconnect_window_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.session.min_password_len = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.game.start_room = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn storage_paths_derive_from_data_dir() {
        let storage = StorageConfig {
            data_dir: "/srv/mud".into(),
            db_path: None,
            backup_dir: None,
        };
        assert_eq!(storage.db_path(), PathBuf::from("/srv/mud/world.sled"));
        assert_eq!(storage.backup_dir(), PathBuf::from("/srv/mud/backups"));
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.server.line_addr, "0.0.0.0:4000");
        assert!(parsed.game.autosave_interval().is_some());
    }
}
