//! Live participant state, keyed by case-folded name.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::mud::errors::{CommandError, GameResult};
use crate::mud::sync::{lock, read, write};
use crate::mud::types::PlayerRecord;

pub type PlayerHandle = Arc<Mutex<PlayerRecord>>;

#[derive(Debug, Default)]
pub struct EntityRegistry {
    players: RwLock<HashMap<String, PlayerHandle>>,
    active_since: Mutex<HashMap<String, Instant>>,
}

fn key(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `player` live. An entity that is already live keeps its current
    /// state and the passed record is discarded.
    pub fn insert(&self, player: PlayerRecord) -> PlayerHandle {
        let k = key(&player.name);
        let mut players = write(&self.players);
        let handle = players
            .entry(k.clone())
            .or_insert_with(|| Arc::new(Mutex::new(player)))
            .clone();
        drop(players);
        lock(&self.active_since).entry(k).or_insert_with(Instant::now);
        handle
    }

    pub fn get(&self, name: &str) -> Option<PlayerHandle> {
        read(&self.players).get(&key(name)).cloned()
    }

    pub fn is_live(&self, name: &str) -> bool {
        read(&self.players).contains_key(&key(name))
    }

    pub fn handle(&self, name: &str) -> GameResult<PlayerHandle> {
        self.get(name).ok_or_else(|| CommandError::NotHere.into())
    }

    pub fn with_player<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut PlayerRecord) -> GameResult<R>,
    ) -> GameResult<R> {
        let handle = self.handle(name)?;
        let mut guard = lock(&handle);
        f(&mut *guard)
    }

    pub fn snapshot(&self, name: &str) -> Option<PlayerRecord> {
        self.get(name).map(|handle| lock(&handle).clone())
    }

    pub fn room_of(&self, name: &str) -> Option<String> {
        self.get(name).map(|handle| lock(&handle).current_room.clone())
    }

    /// Remove a live entity, returning its final state.
    pub fn remove(&self, name: &str) -> Option<PlayerRecord> {
        let k = key(name);
        let handle = write(&self.players).remove(&k)?;
        lock(&self.active_since).remove(&k);
        let record = lock(&handle).clone();
        Some(record)
    }

    pub fn names(&self) -> Vec<String> {
        let handles: Vec<PlayerHandle> = read(&self.players).values().cloned().collect();
        let mut names: Vec<String> = handles.iter().map(|h| lock(h).name.clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        read(&self.players).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of live entities standing in `room_id`.
    pub fn in_room(&self, room_id: &str) -> Vec<String> {
        let handles: Vec<PlayerHandle> = read(&self.players).values().cloned().collect();
        let mut names: Vec<String> = handles
            .iter()
            .filter_map(|h| {
                let guard = lock(h);
                (guard.current_room == room_id).then(|| guard.name.clone())
            })
            .collect();
        names.sort();
        names
    }

    /// Clone every live entity, sorted by name.
    pub fn snapshot_all(&self) -> Vec<PlayerRecord> {
        let handles: Vec<PlayerHandle> = read(&self.players).values().cloned().collect();
        let mut players: Vec<PlayerRecord> = handles.iter().map(|h| lock(h).clone()).collect();
        players.sort_by(|a, b| a.name.cmp(&b.name));
        players
    }

    /// Fold time played since the last accrual into the entity's counters.
    pub fn accrue_play_time(&self, name: &str, now: Instant) {
        let k = key(name);
        let elapsed = {
            let mut active = lock(&self.active_since);
            match active.get_mut(&k) {
                Some(since) => {
                    // Only whole seconds are credited; the remainder carries over.
                    let secs = now.saturating_duration_since(*since).as_secs();
                    *since += Duration::from_secs(secs);
                    secs
                }
                None => return,
            }
        };
        if elapsed == 0 {
            return;
        }
        if let Some(handle) = self.get(name) {
            lock(&handle).counters.play_time_secs += elapsed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mud::types::PlayerClass;

    #[test]
    fn insert_keeps_existing_live_state() {
        let registry = EntityRegistry::new();
        let mut neo = PlayerRecord::new("Neo", "construct", PlayerClass::Operator);
        neo.health = 5;
        registry.insert(neo);
        registry.insert(PlayerRecord::new("neo", "elsewhere", PlayerClass::Hacker));
        let live = registry.snapshot("NEO").expect("live");
        assert_eq!(live.health, 5);
        assert_eq!(live.current_room, "construct");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn in_room_lists_occupants() {
        let registry = EntityRegistry::new();
        registry.insert(PlayerRecord::new("Neo", "construct", PlayerClass::Operator));
        registry.insert(PlayerRecord::new("Trinity", "construct", PlayerClass::Hacker));
        registry.insert(PlayerRecord::new("Morpheus", "nebuchadnezzar", PlayerClass::Soldier));
        assert_eq!(registry.in_room("construct"), vec!["Neo", "Trinity"]);
        assert!(registry.remove("trinity").is_some());
        assert_eq!(registry.in_room("construct"), vec!["Neo"]);
    }

    #[test]
    fn play_time_accrues_incrementally() {
        let registry = EntityRegistry::new();
        registry.insert(PlayerRecord::new("Neo", "construct", PlayerClass::Operator));
        let later = Instant::now() + Duration::from_secs(90);
        registry.accrue_play_time("neo", later);
        registry.accrue_play_time("neo", later);
        let secs = registry.snapshot("neo").expect("live").counters.play_time_secs;
        assert!((90..=91).contains(&secs));
    }

    #[test]
    fn sub_second_remainders_carry_over() {
        let registry = EntityRegistry::new();
        registry.insert(PlayerRecord::new("Neo", "construct", PlayerClass::Operator));
        let start = *lock(&registry.active_since).get("neo").expect("since");
        for step in 1..=4 {
            registry.accrue_play_time("neo", start + Duration::from_millis(700 * step));
        }
        // 2.8 seconds in total, credited as 2 with 0.8 still pending.
        assert_eq!(registry.snapshot("neo").expect("live").counters.play_time_secs, 2);
        registry.accrue_play_time("neo", start + Duration::from_millis(3000));
        assert_eq!(registry.snapshot("neo").expect("live").counters.play_time_secs, 3);
    }
}
