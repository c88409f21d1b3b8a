//! Read-only structured view of the world for map viewers.
//!
//! `GET /api/world` returns the room graph and the live player list;
//! `GET /api/health` returns `ok`. There is no mutation path.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::mud::Game;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RoomView {
    pub name: String,
    pub description: String,
    /// Direction name to destination room id.
    pub exits: BTreeMap<String, String>,
    pub symbol: String,
    pub color: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PlayerView {
    pub name: String,
    pub room: String,
    pub level: u32,
    pub hp: u32,
    #[serde(rename = "maxHp")]
    pub max_hp: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WorldDocument {
    pub rooms: BTreeMap<String, RoomView>,
    pub players: Vec<PlayerView>,
}

pub fn world_document(game: &Game) -> WorldDocument {
    let rooms = game
        .world()
        .snapshot()
        .into_iter()
        .map(|room| {
            let view = RoomView {
                name: room.name,
                description: room.description,
                exits: room
                    .exits
                    .into_iter()
                    .map(|(direction, target)| (direction.as_str().to_string(), target))
                    .collect(),
                symbol: room.symbol.to_string(),
                color: room.color,
            };
            (room.id, view)
        })
        .collect();
    let players = game
        .registry()
        .snapshot_all()
        .into_iter()
        .map(|p| PlayerView {
            name: p.name,
            room: p.current_room,
            level: p.level,
            hp: p.health,
            max_hp: p.max_health,
        })
        .collect();
    WorldDocument { rooms, players }
}

async fn world(State(game): State<Arc<Game>>) -> Json<WorldDocument> {
    Json(world_document(&game))
}

async fn health() -> &'static str {
    "ok"
}

pub fn router(game: Arc<Game>) -> Router {
    Router::new()
        .route("/api/world", get(world))
        .route("/api/health", get(health))
        .with_state(game)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mud::types::{PlayerClass, PlayerRecord};
    use crate::mud::{GameSettings, MudStore};
    use tempfile::TempDir;

    #[test]
    fn document_lists_rooms_and_live_players() {
        let dir = TempDir::new().unwrap();
        let store = MudStore::open(dir.path().join("db")).unwrap();
        let game = Game::open(store, GameSettings::default()).unwrap();
        game.enter(PlayerRecord::new("Neo", "construct", PlayerClass::Operator));

        let doc = world_document(&game);
        let construct = doc.rooms.get("construct").unwrap();
        assert_eq!(construct.exits.get("north").map(String::as_str), Some("downtown"));
        assert_eq!(doc.players.len(), 1);

        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["players"][0]["maxHp"], serde_json::json!(100));
        assert_eq!(json["players"][0]["room"], "construct");
        assert!(json["rooms"]["construct"]["symbol"].is_string());
    }
}
