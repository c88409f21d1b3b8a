use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{debug, info};
use sled::IVec;

use crate::mud::errors::PersistenceError;
use crate::mud::instance::ChallengeRecord;
use crate::mud::types::{
    PlayerRecord, RoomRecord, LEDGER_SCHEMA_VERSION, PLAYER_SCHEMA_VERSION, ROOM_SCHEMA_VERSION,
};

const TREE_PLAYERS: &str = "players";
const TREE_CREDENTIALS: &str = "credentials";
const TREE_WORLD: &str = "world";
const TREE_LEDGER: &str = "ledger";
const TREE_META: &str = "meta";

const META_WORLD_SAVED_AT: &[u8] = b"world_saved_at";

/// Helper builder so tests can create throwaway stores with custom paths.
pub struct MudStoreBuilder {
    path: PathBuf,
    seed: Option<Vec<RoomRecord>>,
}

impl MudStoreBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            seed: None,
        }
    }

    /// Rooms to write if the store holds no world yet.
    pub fn with_seed(mut self, rooms: Vec<RoomRecord>) -> Self {
        self.seed = Some(rooms);
        self
    }

    pub fn open(self) -> Result<MudStore, PersistenceError> {
        let store = MudStore::open(&self.path)?;
        if let Some(rooms) = self.seed {
            store.seed_world_if_needed(&rooms)?;
        }
        Ok(store)
    }
}

/// Sled-backed persistence for world rooms, entities, credentials and the challenge ledger.
pub struct MudStore {
    db: sled::Db,
    players: sled::Tree,
    credentials: sled::Tree,
    world: sled::Tree,
    ledger: sled::Tree,
    meta: sled::Tree,
}

impl MudStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PersistenceError> {
        let path_ref = path.as_ref();
        std::fs::create_dir_all(path_ref)?;
        let db = sled::open(path_ref)?;
        let players = db.open_tree(TREE_PLAYERS)?;
        let credentials = db.open_tree(TREE_CREDENTIALS)?;
        let world = db.open_tree(TREE_WORLD)?;
        let ledger = db.open_tree(TREE_LEDGER)?;
        let meta = db.open_tree(TREE_META)?;
        debug!("Opened store at {}", path_ref.display());
        Ok(Self {
            db,
            players,
            credentials,
            world,
            ledger,
            meta,
        })
    }

    fn player_key(name: &str) -> Vec<u8> {
        name.trim().to_ascii_lowercase().into_bytes()
    }

    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, PersistenceError> {
        Ok(bincode::serialize(value)?)
    }

    fn deserialize<T: serde::de::DeserializeOwned>(bytes: IVec) -> Result<T, PersistenceError> {
        Ok(bincode::deserialize::<T>(&bytes)?)
    }

    fn check_schema(entity: &'static str, expected: u8, found: u8) -> Result<(), PersistenceError> {
        if expected != found {
            return Err(PersistenceError::SchemaMismatch {
                entity,
                expected,
                found,
            });
        }
        Ok(())
    }

    /// Insert or update an entity record.
    pub fn put_player(&self, player: &PlayerRecord) -> Result<(), PersistenceError> {
        let mut record = player.clone();
        record.schema_version = PLAYER_SCHEMA_VERSION;
        self.players
            .insert(Self::player_key(&record.name), Self::serialize(&record)?)?;
        self.players.flush()?;
        Ok(())
    }

    /// Write several entity records in one batch.
    pub fn put_players(&self, players: &[PlayerRecord]) -> Result<(), PersistenceError> {
        let mut batch = sled::Batch::default();
        for player in players {
            let mut record = player.clone();
            record.schema_version = PLAYER_SCHEMA_VERSION;
            batch.insert(Self::player_key(&record.name), Self::serialize(&record)?);
        }
        self.players.apply_batch(batch)?;
        self.players.flush()?;
        Ok(())
    }

    pub fn get_player(&self, name: &str) -> Result<PlayerRecord, PersistenceError> {
        let Some(bytes) = self.players.get(Self::player_key(name))? else {
            return Err(PersistenceError::NotFound(format!("player: {}", name)));
        };
        let record: PlayerRecord = Self::deserialize(bytes)?;
        Self::check_schema("player", PLAYER_SCHEMA_VERSION, record.schema_version)?;
        Ok(record)
    }

    pub fn player_exists(&self, name: &str) -> Result<bool, PersistenceError> {
        Ok(self.players.contains_key(Self::player_key(name))?)
    }

    pub fn list_player_ids(&self) -> Result<Vec<String>, PersistenceError> {
        let mut ids = Vec::new();
        for entry in self.players.iter() {
            let (key, _) = entry?;
            ids.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(ids)
    }

    pub fn load_players(&self) -> Result<Vec<PlayerRecord>, PersistenceError> {
        let mut players = Vec::new();
        for entry in self.players.iter() {
            let (_, bytes) = entry?;
            let record: PlayerRecord = Self::deserialize(bytes)?;
            Self::check_schema("player", PLAYER_SCHEMA_VERSION, record.schema_version)?;
            players.push(record);
        }
        Ok(players)
    }

    /// Store the PHC-format secret hash for an entity.
    pub fn put_credential(&self, name: &str, phc_hash: &str) -> Result<(), PersistenceError> {
        self.credentials
            .insert(Self::player_key(name), phc_hash.as_bytes())?;
        self.credentials.flush()?;
        Ok(())
    }

    pub fn get_credential(&self, name: &str) -> Result<Option<String>, PersistenceError> {
        let Some(bytes) = self.credentials.get(Self::player_key(name))? else {
            return Ok(None);
        };
        String::from_utf8(bytes.to_vec())
            .map(Some)
            .map_err(|_| PersistenceError::Corrupt(format!("credential for '{}' is not utf-8", name)))
    }

    pub fn has_world(&self) -> bool {
        !self.world.is_empty()
    }

    /// Replace the stored world with `rooms` in one atomic batch.
    pub fn save_world(&self, rooms: &[RoomRecord]) -> Result<(), PersistenceError> {
        let mut batch = sled::Batch::default();
        let mut keep = std::collections::HashSet::with_capacity(rooms.len());
        for room in rooms {
            let mut record = room.clone();
            record.schema_version = ROOM_SCHEMA_VERSION;
            keep.insert(record.id.clone().into_bytes());
            batch.insert(record.id.as_bytes(), Self::serialize(&record)?);
        }
        for entry in self.world.iter() {
            let (key, _) = entry?;
            if !keep.contains(key.as_ref()) {
                batch.remove(key);
            }
        }
        self.world.apply_batch(batch)?;
        self.meta
            .insert(META_WORLD_SAVED_AT, Utc::now().to_rfc3339().as_bytes())?;
        self.db.flush()?;
        Ok(())
    }

    pub fn load_world(&self) -> Result<Vec<RoomRecord>, PersistenceError> {
        let mut rooms = Vec::new();
        for entry in self.world.iter() {
            let (_, bytes) = entry?;
            let record: RoomRecord = Self::deserialize(bytes)?;
            Self::check_schema("room", ROOM_SCHEMA_VERSION, record.schema_version)?;
            rooms.push(record);
        }
        Ok(rooms)
    }

    pub fn get_room(&self, room_id: &str) -> Result<RoomRecord, PersistenceError> {
        let Some(bytes) = self.world.get(room_id.as_bytes())? else {
            return Err(PersistenceError::NotFound(format!("room: {}", room_id)));
        };
        let record: RoomRecord = Self::deserialize(bytes)?;
        Self::check_schema("room", ROOM_SCHEMA_VERSION, record.schema_version)?;
        Ok(record)
    }

    /// Write `rooms` if no world has been stored yet. Returns rooms written.
    pub fn seed_world_if_needed(&self, rooms: &[RoomRecord]) -> Result<usize, PersistenceError> {
        if self.has_world() {
            return Ok(0);
        }
        self.save_world(rooms)?;
        info!("Seeded world with {} rooms", rooms.len());
        Ok(rooms.len())
    }

    pub fn world_saved_at(&self) -> Result<Option<String>, PersistenceError> {
        Ok(self
            .meta
            .get(META_WORLD_SAVED_AT)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    pub fn put_record(&self, record: &ChallengeRecord) -> Result<(), PersistenceError> {
        let mut record = record.clone();
        record.schema_version = LEDGER_SCHEMA_VERSION;
        self.ledger
            .insert(record.program_id.as_bytes(), Self::serialize(&record)?)?;
        self.ledger.flush()?;
        Ok(())
    }

    pub fn load_ledger(&self) -> Result<Vec<ChallengeRecord>, PersistenceError> {
        let mut records = Vec::new();
        for entry in self.ledger.iter() {
            let (_, bytes) = entry?;
            let record: ChallengeRecord = Self::deserialize(bytes)?;
            Self::check_schema("challenge record", LEDGER_SCHEMA_VERSION, record.schema_version)?;
            records.push(record);
        }
        Ok(records)
    }

    pub fn flush(&self) -> Result<(), PersistenceError> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mud::seed::{canonical_world, item_catalog, CANONICAL_ROOM_IDS};
    use crate::mud::types::PlayerClass;
    use tempfile::TempDir;

    #[test]
    fn store_round_trip_player() {
        let dir = TempDir::new().expect("tempdir");
        let store = MudStoreBuilder::new(dir.path()).open().expect("store");
        let mut player = PlayerRecord::new("Trinity", "construct", PlayerClass::Hacker);
        player.currency = 42;
        store.put_player(&player).expect("put");
        let fetched = store.get_player("trinity").expect("get");
        assert_eq!(fetched, player);
        assert!(store.player_exists("TRINITY").expect("exists"));
        assert!(matches!(
            store.get_player("smith"),
            Err(PersistenceError::NotFound(_))
        ));
    }

    #[test]
    fn seeding_world_only_happens_once() {
        let dir = TempDir::new().expect("tempdir");
        let rooms = canonical_world(&item_catalog());
        {
            let store = MudStoreBuilder::new(dir.path())
                .with_seed(rooms.clone())
                .open()
                .expect("store");
            for id in CANONICAL_ROOM_IDS {
                store.get_room(id).expect("room present");
            }
        }
        let store = MudStore::open(dir.path()).expect("reopen");
        assert_eq!(store.seed_world_if_needed(&rooms).expect("seed"), 0);
        assert_eq!(store.load_world().expect("load").len(), rooms.len());
    }

    #[test]
    fn save_world_drops_deleted_rooms() {
        let dir = TempDir::new().expect("tempdir");
        let store = MudStore::open(dir.path()).expect("store");
        let mut rooms = canonical_world(&item_catalog());
        store.save_world(&rooms).expect("save");
        rooms.retain(|room| room.id != "server_room");
        store.save_world(&rooms).expect("save again");
        assert!(store.get_room("server_room").is_err());
        assert_eq!(store.load_world().expect("load").len(), rooms.len());
        assert!(store.world_saved_at().expect("meta").is_some());
    }

    #[test]
    fn credentials_live_apart_from_players() {
        let dir = TempDir::new().expect("tempdir");
        let store = MudStore::open(dir.path()).expect("store");
        assert_eq!(store.get_credential("neo").expect("get"), None);
        store.put_credential("Neo", "$argon2id$v=19$stub").expect("put");
        assert_eq!(
            store.get_credential("neo").expect("get").as_deref(),
            Some("$argon2id$v=19$stub")
        );
        assert!(store.list_player_ids().expect("ids").is_empty());
    }
}
