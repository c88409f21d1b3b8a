//! Test utilities & fixtures.
//! Every fixture lives in a temp dir; tests never touch `./data`.

use std::sync::Arc;

use matrixmud::config::{Argon2Config, Config};
use matrixmud::mud::{Game, GameSettings, MudStoreBuilder, PlayerClass, PlayerRecord};
use matrixmud::server::ServerContext;
use tempfile::TempDir;

/// Argon2 parameters cheap enough for tests.
#[allow(dead_code)]
pub fn cheap_argon2() -> Argon2Config {
    Argon2Config {
        memory_kib: Some(8),
        time_cost: Some(1),
        parallelism: Some(1),
    }
}

/// A game over a fresh store holding the built-in world.
#[allow(dead_code)]
pub fn open_game(dir: &TempDir) -> Arc<Game> {
    let store = MudStoreBuilder::new(dir.path().join("world.sled"))
        .open()
        .expect("store");
    Arc::new(Game::open(store, GameSettings::default()).expect("game"))
}

/// Put `name` into the world at `room`.
#[allow(dead_code)]
pub fn spawn(game: &Game, name: &str, room: &str) {
    game.enter(PlayerRecord::new(name, room, PlayerClass::Operator));
}

/// Config rooted in `dir` with every listener on an ephemeral port.
#[allow(dead_code)]
pub fn test_config(dir: &TempDir) -> Config {
    let mut cfg = Config::default();
    cfg.server.line_addr = "127.0.0.1:0".into();
    cfg.server.admin_addr = String::new();
    cfg.server.web_addr = String::new();
    cfg.storage.data_dir = dir.path().to_string_lossy().to_string();
    cfg.logging.file = None;
    cfg.logging.security_file = None;
    cfg.security.argon2 = Some(cheap_argon2());
    cfg
}

/// Server context over a fresh game.
#[allow(dead_code)]
pub fn context(dir: &TempDir) -> Arc<ServerContext> {
    let cfg = test_config(dir);
    ServerContext::new(cfg, open_game(dir))
}
