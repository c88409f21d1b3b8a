//! The shared world: data model, rules, command handling and persistence.
//!
//! [`Game`] is constructed once at startup and shared by every session; it
//! owns the world store, the live entity registry, the cooldown tracker,
//! the day/night clock and the training instances.

pub mod achievement;
pub mod backup;
pub mod builder;
pub mod clock;
pub mod combat;
pub mod commands;
pub mod cooldown;
pub mod dispatch;
pub mod errors;
pub mod faction;
pub mod game;
pub mod instance;
pub mod items;
pub mod registry;
pub mod seed;
pub mod storage;
pub mod sync;
pub mod types;
pub mod world;

pub use backup::{BackupManager, BackupMetadata, BackupSnapshot};
pub use clock::{GameClock, Period};
pub use combat::{Action, Combatant, Outcome};
pub use commands::{Command, CommandKind};
pub use cooldown::{Ability, CooldownTracker};
pub use dispatch::{AttackReport, Event, Response, Scope};
pub use errors::{
    AuthError, CommandError, GameError, GameResult, PersistenceError, ReconnectError, TimeoutKind,
};
pub use faction::{Faction, Standings, Tier};
pub use game::{Game, GameSettings, SaveSummary};
pub use instance::{ChallengeRecord, InstanceManager, InstanceResult};
pub use items::{EquipSlot, Item, ItemCatalog, ItemTemplate, Rarity};
pub use registry::EntityRegistry;
pub use seed::START_ROOM_ID;
pub use storage::{MudStore, MudStoreBuilder};
pub use types::{Direction, NpcRecord, NpcState, PlayerClass, PlayerRecord, RoomRecord};
pub use world::WorldStore;
