//! The shared game state handed to every session.
//!
//! Lock order, always: commit gate, then rooms (sorted by id), then players
//! (sorted by case-folded name). Gameplay writes hold the gate shared,
//! world authoring and full saves hold it exclusively, so a save never sees
//! half of a command. Reads skip the gate entirely.

use std::collections::HashSet;
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::mud::backup::{BackupManager, BackupMetadata, BackupSnapshot};
use crate::mud::clock::GameClock;
use crate::mud::cooldown::CooldownTracker;
use crate::mud::dispatch::Event;
use crate::mud::errors::{CommandError, GameResult, PersistenceError};
use crate::mud::instance::{ChallengeRecord, InstanceManager};
use crate::mud::items::ItemCatalog;
use crate::mud::registry::{EntityRegistry, PlayerHandle};
use crate::mud::seed;
use crate::mud::storage::MudStore;
use crate::mud::sync::{lock, read, write};
use crate::mud::types::{PlayerClass, PlayerRecord, RoomRecord};
use crate::mud::world::WorldStore;

#[derive(Debug, Clone)]
pub struct GameSettings {
    pub start_room: String,
    pub day_length: Duration,
    /// Case-folded names allowed to run authoring commands.
    pub builders: HashSet<String>,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            start_room: seed::START_ROOM_ID.to_string(),
            day_length: Duration::from_secs(48 * 60),
            builders: HashSet::new(),
        }
    }
}

/// Counts produced by a full save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveSummary {
    pub rooms: usize,
    pub players: usize,
}

pub struct Game {
    pub(crate) world: WorldStore,
    pub(crate) registry: EntityRegistry,
    pub(crate) cooldowns: CooldownTracker,
    pub(crate) clock: GameClock,
    pub(crate) instances: InstanceManager,
    store: MudStore,
    gate: RwLock<()>,
    builders: HashSet<String>,
    /// Events raised outside any command, waiting for the session layer.
    notices: Mutex<Vec<Event>>,
}

impl Game {
    /// Load the world from `store`, seeding the canonical world into an empty store.
    ///
    /// Any failure here must stop startup; serving an empty or partial
    /// world silently is never acceptable.
    pub fn open(store: MudStore, settings: GameSettings) -> Result<Self, PersistenceError> {
        let catalog = seed::item_catalog();
        if settings.start_room == seed::START_ROOM_ID {
            store.seed_world_if_needed(&seed::canonical_world(&catalog))?;
        } else if !store.has_world() {
            return Err(PersistenceError::Corrupt(format!(
                "empty store and no built-in world for start room '{}'",
                settings.start_room
            )));
        }
        let rooms = store.load_world()?;
        Self::warn_dangling_exits(&rooms);
        let world = WorldStore::new(rooms, catalog, &settings.start_room)?;
        let ledger = store.load_ledger()?;
        info!(
            "World loaded: {} rooms, {} challenge records",
            world.room_count(),
            ledger.len()
        );
        Ok(Self {
            world,
            registry: EntityRegistry::new(),
            cooldowns: CooldownTracker::new(),
            clock: GameClock::new(settings.day_length),
            instances: InstanceManager::new(ledger),
            store,
            gate: RwLock::new(()),
            builders: settings
                .builders
                .iter()
                .map(|name| name.to_ascii_lowercase())
                .collect(),
            notices: Mutex::default(),
        })
    }

    fn warn_dangling_exits(rooms: &[RoomRecord]) {
        let ids: HashSet<&str> = rooms.iter().map(|r| r.id.as_str()).collect();
        for room in rooms {
            for (direction, target) in &room.exits {
                if !ids.contains(target.as_str()) {
                    warn!("Room '{}' exit {} leads to missing room '{}'", room.id, direction, target);
                }
            }
        }
    }

    pub fn world(&self) -> &WorldStore {
        &self.world
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn cooldowns(&self) -> &CooldownTracker {
        &self.cooldowns
    }

    pub fn clock(&self) -> &GameClock {
        &self.clock
    }

    pub fn instances(&self) -> &InstanceManager {
        &self.instances
    }

    pub fn store(&self) -> &MudStore {
        &self.store
    }

    pub fn catalog(&self) -> &ItemCatalog {
        self.world.catalog()
    }

    pub fn start_room(&self) -> &str {
        self.world.start_room()
    }

    pub fn is_builder(&self, name: &str) -> bool {
        self.builders.contains(&name.to_ascii_lowercase())
    }

    pub(crate) fn gate_shared(&self) -> RwLockReadGuard<'_, ()> {
        read(&self.gate)
    }

    pub(crate) fn gate_exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        write(&self.gate)
    }

    /// The stored record for `name`, or a fresh one at the start room.
    /// A stored entity whose room no longer exists is moved to the start room.
    pub fn load_or_create_player(&self, name: &str, class: PlayerClass) -> GameResult<(PlayerRecord, bool)> {
        match self.store.get_player(name) {
            Ok(mut player) => {
                if !self.world.contains(&player.current_room) {
                    warn!(
                        "{} was in missing room '{}', moving to start",
                        player.name, player.current_room
                    );
                    player.current_room = self.start_room().to_string();
                }
                Ok((player, false))
            }
            Err(PersistenceError::NotFound(_)) => {
                let player = PlayerRecord::new(name, self.start_room(), class);
                Ok((player, true))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Make an entity live.
    pub fn enter(&self, player: PlayerRecord) -> PlayerHandle {
        debug!("{} entered at {}", player.name, player.current_room);
        self.registry.insert(player)
    }

    /// Save and remove a live entity. A running instance ends with whatever
    /// it scored so far, and the other participants are told.
    pub fn leave(&self, name: &str) -> GameResult<Option<PlayerRecord>> {
        self.end_training(name);
        self.instances.withdraw_invitations(name);
        let now = Instant::now();
        self.registry.accrue_play_time(name, now);
        let record = {
            let _gate = self.gate_shared();
            self.registry.remove(name)
        };
        self.cooldowns.prune(name, now);
        if let Some(player) = &record {
            self.store.put_player(player)?;
            info!("{} left and was saved", player.name);
        }
        Ok(record)
    }

    fn end_training(&self, name: &str) {
        let Some(id) = self.instances.instance_of(name) else {
            return;
        };
        let others: Vec<String> = self
            .instances
            .participants(id)
            .into_iter()
            .filter(|other| !other.eq_ignore_ascii_case(name))
            .collect();
        let result = match self.instances.complete(id) {
            Ok(result) => result,
            Err(err) => {
                debug!("instance for {} already gone: {}", name, err);
                return;
            }
        };
        if let Some(record) = &result.new_record {
            self.record_challenge(record);
        }
        let mut notices = lock(&self.notices);
        for other in others {
            notices.push(Event::player(
                &other,
                format!("{} has left the Matrix. {}", name, result.summary),
            ));
        }
    }

    /// Take the events raised by departures since the last call.
    pub fn take_notices(&self) -> Vec<Event> {
        std::mem::take(&mut *lock(&self.notices))
    }

    /// Persist one live entity.
    pub fn save_player(&self, name: &str) -> GameResult<()> {
        self.registry.accrue_play_time(name, Instant::now());
        let snapshot = self.registry.with_player(name, |player| {
            player.touch();
            Ok(player.clone())
        })?;
        self.store.put_player(&snapshot)?;
        Ok(())
    }

    /// Causally consistent snapshot of the whole world and every live entity.
    pub fn snapshot(&self) -> (Vec<RoomRecord>, Vec<PlayerRecord>) {
        let now = Instant::now();
        for name in self.registry.names() {
            self.registry.accrue_play_time(&name, now);
        }
        let _gate = self.gate_exclusive();
        (self.world.snapshot(), self.registry.snapshot_all())
    }

    /// Snapshot under the exclusive gate, then write with no game lock held.
    pub fn save_all(&self) -> GameResult<SaveSummary> {
        let (rooms, players) = self.snapshot();
        self.store.save_world(&rooms)?;
        self.store.put_players(&players)?;
        for record in self.instances.ledger() {
            self.store.put_record(&record)?;
        }
        info!("Saved {} rooms and {} entities", rooms.len(), players.len());
        Ok(SaveSummary {
            rooms: rooms.len(),
            players: players.len(),
        })
    }

    pub fn create_backup(&self, backup_dir: &std::path::Path) -> GameResult<BackupMetadata> {
        let (rooms, live) = self.snapshot();
        let mut players = self.store.load_players()?;
        for player in live {
            match players
                .iter_mut()
                .find(|p| p.name.eq_ignore_ascii_case(&player.name))
            {
                Some(slot) => *slot = player,
                None => players.push(player),
            }
        }
        let snapshot = BackupSnapshot {
            rooms,
            players,
            ledger: self.instances.ledger(),
        };
        let mut manager = BackupManager::new(backup_dir)?;
        Ok(manager.create_backup(&snapshot)?)
    }

    pub(crate) fn record_challenge(&self, record: &ChallengeRecord) {
        if let Err(err) = self.store.put_record(record) {
            warn!("Failed to persist challenge record for {}: {}", record.program_id, err);
        }
    }

    /// Run `f` with the actor and its current room locked (room first).
    ///
    /// The actor's room is read, that room locked, then the actor locked; if
    /// the actor moved in between, both are released and the lookup retried.
    pub(crate) fn with_actor_room<R>(
        &self,
        actor: &str,
        f: impl FnOnce(&mut PlayerRecord, &mut RoomRecord) -> GameResult<R>,
    ) -> GameResult<R> {
        let player_handle = self.registry.handle(actor)?;
        loop {
            let room_id = lock(&player_handle).current_room.clone();
            let room_handle = self.world.handle(&room_id)?;
            let mut room = lock(&room_handle);
            let mut player = lock(&player_handle);
            if player.current_room != room_id {
                continue;
            }
            return f(&mut *player, &mut *room);
        }
    }

    /// Like [`Self::with_actor_room`] but also locks a second live entity
    /// that must be standing in the same room.
    pub(crate) fn with_actor_target_room<R>(
        &self,
        actor: &str,
        target: &str,
        f: impl FnOnce(&mut PlayerRecord, &mut PlayerRecord, &mut RoomRecord) -> GameResult<R>,
    ) -> GameResult<R> {
        if actor.eq_ignore_ascii_case(target) {
            return Err(CommandError::Rejected("You can't do that to yourself.".into()).into());
        }
        let actor_handle = self.registry.handle(actor)?;
        let target_handle = self.registry.handle(target)?;
        let actor_first = actor.to_ascii_lowercase() < target.to_ascii_lowercase();
        loop {
            let room_id = lock(&actor_handle).current_room.clone();
            let room_handle = self.world.handle(&room_id)?;
            let mut room = lock(&room_handle);
            let (mut a, mut t) = if actor_first {
                let a = lock(&actor_handle);
                let t = lock(&target_handle);
                (a, t)
            } else {
                let t = lock(&target_handle);
                let a = lock(&actor_handle);
                (a, t)
            };
            if a.current_room != room_id {
                continue;
            }
            if t.current_room != room_id {
                return Err(CommandError::NotHere.into());
            }
            return f(&mut *a, &mut *t, &mut *room);
        }
    }

    /// Every known entity, live state overriding stored state.
    pub fn all_players(&self) -> GameResult<Vec<PlayerRecord>> {
        let mut players = self.store.load_players()?;
        for live in self.registry.snapshot_all() {
            match players
                .iter_mut()
                .find(|p| p.name.eq_ignore_ascii_case(&live.name))
            {
                Some(slot) => *slot = live,
                None => players.push(live),
            }
        }
        Ok(players)
    }
}
