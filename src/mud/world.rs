//! Canonical room graph.
//!
//! Each room sits behind its own mutex so independent rooms can be mutated
//! concurrently. The outer map lock is only held long enough to clone a room
//! handle and is never held while a room lock is being acquired.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use log::debug;

use crate::mud::errors::{GameError, GameResult, PersistenceError};
use crate::mud::items::ItemCatalog;
use crate::mud::sync::{lock, read, write};
use crate::mud::types::{Direction, RoomRecord};

pub type RoomHandle = Arc<Mutex<RoomRecord>>;

#[derive(Debug)]
pub struct WorldStore {
    rooms: RwLock<HashMap<String, RoomHandle>>,
    catalog: ItemCatalog,
    start_room: String,
}

impl WorldStore {
    /// Build the store, refusing a world that lacks its start room.
    pub fn new(
        rooms: Vec<RoomRecord>,
        catalog: ItemCatalog,
        start_room: &str,
    ) -> Result<Self, PersistenceError> {
        let map: HashMap<String, RoomHandle> = rooms
            .into_iter()
            .map(|room| (room.id.clone(), Arc::new(Mutex::new(room))))
            .collect();
        if !map.contains_key(start_room) {
            return Err(PersistenceError::Corrupt(format!(
                "start room '{}' missing from world ({} rooms loaded)",
                start_room,
                map.len()
            )));
        }
        debug!("World store ready with {} rooms", map.len());
        Ok(Self {
            rooms: RwLock::new(map),
            catalog,
            start_room: start_room.to_string(),
        })
    }

    pub fn start_room(&self) -> &str {
        &self.start_room
    }

    pub fn catalog(&self) -> &ItemCatalog {
        &self.catalog
    }

    pub fn contains(&self, room_id: &str) -> bool {
        read(&self.rooms).contains_key(room_id)
    }

    pub fn room_count(&self) -> usize {
        read(&self.rooms).len()
    }

    pub fn handle(&self, room_id: &str) -> GameResult<RoomHandle> {
        read(&self.rooms)
            .get(room_id)
            .cloned()
            .ok_or_else(|| GameError::Internal(format!("room '{}' does not exist", room_id)))
    }

    /// Clone of a room's current state.
    pub fn room(&self, room_id: &str) -> GameResult<RoomRecord> {
        let handle = self.handle(room_id)?;
        let guard = lock(&handle);
        Ok(guard.clone())
    }

    /// Run `f` with exclusive access to one room. Nothing is written unless `f` succeeds
    /// in doing so itself, so closures validate first and mutate last.
    pub fn with_room<R>(
        &self,
        room_id: &str,
        f: impl FnOnce(&mut RoomRecord) -> GameResult<R>,
    ) -> GameResult<R> {
        let handle = self.handle(room_id)?;
        let mut guard = lock(&handle);
        f(&mut *guard)
    }

    pub fn exit(&self, room_id: &str, direction: Direction) -> GameResult<Option<String>> {
        let handle = self.handle(room_id)?;
        let guard = lock(&handle);
        Ok(guard.exits.get(&direction).cloned())
    }

    pub fn insert_room(&self, room: RoomRecord) -> GameResult<()> {
        let mut rooms = write(&self.rooms);
        if rooms.contains_key(&room.id) {
            return Err(GameError::Validation(format!(
                "room '{}' already exists",
                room.id
            )));
        }
        rooms.insert(room.id.clone(), Arc::new(Mutex::new(room)));
        Ok(())
    }

    pub fn remove_room(&self, room_id: &str) -> GameResult<RoomRecord> {
        if room_id == self.start_room {
            return Err(GameError::Validation(
                "the start room cannot be deleted".to_string(),
            ));
        }
        let handle = write(&self.rooms)
            .remove(room_id)
            .ok_or_else(|| GameError::Validation(format!("no room '{}'", room_id)))?;
        let room = lock(&handle).clone();
        Ok(room)
    }

    pub fn room_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = read(&self.rooms).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Clone every room, sorted by id. Callers wanting a consistent picture
    /// across rooms hold the commit gate exclusively while calling this.
    pub fn snapshot(&self) -> Vec<RoomRecord> {
        let handles: Vec<RoomHandle> = read(&self.rooms).values().cloned().collect();
        let mut rooms: Vec<RoomRecord> = handles.iter().map(|h| lock(h).clone()).collect();
        rooms.sort_by(|a, b| a.id.cmp(&b.id));
        rooms
    }

    /// Directed exit graph: room id -> destinations.
    pub fn exit_graph(&self) -> BTreeMap<String, Vec<String>> {
        self.snapshot()
            .into_iter()
            .map(|room| {
                let targets = room.exits.values().cloned().collect();
                (room.id, targets)
            })
            .collect()
    }
}

/// Rooms reachable from `start` following exits.
pub fn reachable(graph: &BTreeMap<String, Vec<String>>, start: &str) -> HashSet<String> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    if graph.contains_key(start) {
        seen.insert(start.to_string());
        queue.push_back(start.to_string());
    }
    while let Some(room) = queue.pop_front() {
        if let Some(targets) = graph.get(&room) {
            for target in targets {
                if graph.contains_key(target) && seen.insert(target.clone()) {
                    queue.push_back(target.clone());
                }
            }
        }
    }
    seen
}

/// Rooms that were reachable in `before` but no longer are in `after`
/// (rooms absent from `after` entirely are ignored).
pub fn stranded_by_edit(
    before: &BTreeMap<String, Vec<String>>,
    after: &BTreeMap<String, Vec<String>>,
    start: &str,
) -> Vec<String> {
    let was = reachable(before, start);
    let now = reachable(after, start);
    let mut lost: Vec<String> = was
        .into_iter()
        .filter(|room| after.contains_key(room) && !now.contains(room))
        .collect();
    lost.sort();
    lost
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_world() -> WorldStore {
        let rooms = vec![
            RoomRecord::new("a", "A", "").with_exit(Direction::North, "b"),
            RoomRecord::new("b", "B", "")
                .with_exit(Direction::South, "a")
                .with_exit(Direction::East, "c"),
            RoomRecord::new("c", "C", ""),
        ];
        WorldStore::new(rooms, ItemCatalog::default(), "a").expect("world")
    }

    #[test]
    fn missing_start_room_is_rejected() {
        let err = WorldStore::new(vec![], ItemCatalog::default(), "construct").unwrap_err();
        assert!(matches!(err, PersistenceError::Corrupt(_)));
    }

    #[test]
    fn reachability_follows_directed_exits() {
        let world = sample_world();
        let graph = world.exit_graph();
        let from_a = reachable(&graph, "a");
        assert_eq!(from_a.len(), 3);
        let from_c = reachable(&graph, "c");
        assert_eq!(from_c.len(), 1);
    }

    #[test]
    fn stranding_detects_removed_links() {
        let world = sample_world();
        let before = world.exit_graph();
        let mut after = before.clone();
        after.insert("b".into(), vec!["a".into()]);
        assert_eq!(stranded_by_edit(&before, &after, "a"), vec!["c".to_string()]);
    }

    #[test]
    fn with_room_mutates_in_place() {
        let world = sample_world();
        world
            .with_room("c", |room| {
                room.description = "changed".into();
                Ok(())
            })
            .expect("mutate");
        assert_eq!(world.room("c").expect("room").description, "changed");
        assert!(world.remove_room("a").is_err());
        assert!(world.insert_room(RoomRecord::new("b", "dup", "")).is_err());
    }
}
