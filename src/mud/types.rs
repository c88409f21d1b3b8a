use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::mud::faction::{Faction, Standings};
use crate::mud::items::{EquipSlot, Item};

pub const PLAYER_SCHEMA_VERSION: u8 = 1;
pub const ROOM_SCHEMA_VERSION: u8 = 1;
pub const LEDGER_SCHEMA_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    North,
    South,
    East,
    West,
    Up,
    Down,
    Northeast,
    Northwest,
    Southeast,
    Southwest,
}

impl Direction {
    pub const ALL: [Direction; 10] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
        Direction::Up,
        Direction::Down,
        Direction::Northeast,
        Direction::Northwest,
        Direction::Southeast,
        Direction::Southwest,
    ];

    /// Parse a full name or the usual one/two letter abbreviation (case-insensitive).
    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "n" | "north" => Some(Direction::North),
            "s" | "south" => Some(Direction::South),
            "e" | "east" => Some(Direction::East),
            "w" | "west" => Some(Direction::West),
            "u" | "up" => Some(Direction::Up),
            "d" | "down" => Some(Direction::Down),
            "ne" | "northeast" => Some(Direction::Northeast),
            "nw" | "northwest" => Some(Direction::Northwest),
            "se" | "southeast" => Some(Direction::Southeast),
            "sw" | "southwest" => Some(Direction::Southwest),
            _ => None,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::East => Direction::West,
            Direction::West => Direction::East,
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Northeast => Direction::Southwest,
            Direction::Northwest => Direction::Southeast,
            Direction::Southeast => Direction::Northwest,
            Direction::Southwest => Direction::Northeast,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::North => "north",
            Direction::South => "south",
            Direction::East => "east",
            Direction::West => "west",
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Northeast => "northeast",
            Direction::Northwest => "northwest",
            Direction::Southeast => "southeast",
            Direction::Southwest => "southwest",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RoomFlag {
    /// Player-versus-player combat is allowed.
    Pvp,
    /// Produced by the `generate` command.
    Generated,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NpcState {
    Idle,
    Aggressive,
    Dead,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NpcFlag {
    Vendor,
    Protected,
}

/// What an NPC wants and what it pays for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestDescriptor {
    pub wanted_item: String,
    pub reward_xp: u32,
    pub reward_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NpcRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub health: u32,
    pub max_health: u32,
    pub state: NpcState,
    #[serde(default)]
    pub quest: Option<QuestDescriptor>,
    #[serde(default)]
    pub flags: Vec<NpcFlag>,
    #[serde(default)]
    pub faction: Option<Faction>,
    pub damage: u32,
    pub armor: u32,
    pub xp_reward: u32,
    #[serde(default)]
    pub loot: Vec<Item>,
    /// Template ids sold by vendors.
    #[serde(default)]
    pub stock: Vec<String>,
    #[serde(default)]
    pub greeting: String,
}

impl NpcRecord {
    pub fn new(id: &str, name: &str, description: &str, max_health: u32) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            health: max_health,
            max_health,
            state: NpcState::Idle,
            quest: None,
            flags: Vec::new(),
            faction: None,
            damage: 2,
            armor: 0,
            xp_reward: 10,
            loot: Vec::new(),
            stock: Vec::new(),
            greeting: String::new(),
        }
    }

    pub fn with_flag(mut self, flag: NpcFlag) -> Self {
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
        self
    }

    pub fn with_quest(mut self, quest: QuestDescriptor) -> Self {
        self.quest = Some(quest);
        self
    }

    pub fn with_faction(mut self, faction: Faction) -> Self {
        self.faction = Some(faction);
        self
    }

    pub fn with_combat(mut self, damage: u32, armor: u32, xp_reward: u32) -> Self {
        self.damage = damage;
        self.armor = armor;
        self.xp_reward = xp_reward;
        self
    }

    pub fn with_loot(mut self, item: Item) -> Self {
        self.loot.push(item);
        self
    }

    pub fn with_stock(mut self, template_id: &str) -> Self {
        self.stock.push(template_id.to_string());
        self
    }

    pub fn with_greeting(mut self, greeting: &str) -> Self {
        self.greeting = greeting.to_string();
        self
    }

    pub fn with_state(mut self, state: NpcState) -> Self {
        self.state = state;
        self
    }

    pub fn is_alive(&self) -> bool {
        self.state != NpcState::Dead
    }

    pub fn is_vendor(&self) -> bool {
        self.flags.contains(&NpcFlag::Vendor)
    }

    /// Vendors are implicitly protected.
    pub fn is_protected(&self) -> bool {
        self.flags.contains(&NpcFlag::Protected) || self.is_vendor()
    }

    /// Case-insensitive match on the full name or any word of it.
    pub fn matches(&self, query: &str) -> bool {
        name_matches(&self.name, query) || self.id.eq_ignore_ascii_case(query)
    }
}

pub(crate) fn name_matches(name: &str, query: &str) -> bool {
    let query = query.trim();
    if query.is_empty() {
        return false;
    }
    name.eq_ignore_ascii_case(query)
        || name
            .split_whitespace()
            .any(|word| word.eq_ignore_ascii_case(query))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub exits: BTreeMap<Direction, String>,
    pub symbol: char,
    pub color: String,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub npcs: Vec<NpcRecord>,
    #[serde(default)]
    pub flags: Vec<RoomFlag>,
    pub schema_version: u8,
}

impl RoomRecord {
    pub fn new(id: &str, name: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            exits: BTreeMap::new(),
            symbol: '.',
            color: "white".to_string(),
            items: Vec::new(),
            npcs: Vec::new(),
            flags: Vec::new(),
            schema_version: ROOM_SCHEMA_VERSION,
        }
    }

    pub fn with_exit(mut self, direction: Direction, destination: &str) -> Self {
        self.exits.insert(direction, destination.to_string());
        self
    }

    pub fn with_symbol(mut self, symbol: char, color: &str) -> Self {
        self.symbol = symbol;
        self.color = color.to_string();
        self
    }

    pub fn with_item(mut self, item: Item) -> Self {
        self.items.push(item);
        self
    }

    pub fn with_npc(mut self, npc: NpcRecord) -> Self {
        self.npcs.push(npc);
        self
    }

    pub fn with_flag(mut self, flag: RoomFlag) -> Self {
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
        self
    }

    pub fn allows_pvp(&self) -> bool {
        self.flags.contains(&RoomFlag::Pvp)
    }

    /// Living NPC matching `query`.
    pub fn find_npc_mut(&mut self, query: &str) -> Option<&mut NpcRecord> {
        self.npcs
            .iter_mut()
            .find(|npc| npc.is_alive() && npc.matches(query))
    }

    pub fn find_npc(&self, query: &str) -> Option<&NpcRecord> {
        self.npcs
            .iter()
            .find(|npc| npc.is_alive() && npc.matches(query))
    }

    pub fn vendor(&self) -> Option<&NpcRecord> {
        self.npcs.iter().find(|npc| npc.is_alive() && npc.is_vendor())
    }

    /// Remove the first item matching `query`, transferring ownership to the caller.
    pub fn take_item(&mut self, query: &str) -> Option<Item> {
        let index = self.items.iter().position(|item| item.matches(query))?;
        Some(self.items.remove(index))
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlayerClass {
    #[default]
    Operator,
    Hacker,
    Soldier,
}

impl PlayerClass {
    /// Starting (max health, max mana, strength, armor).
    pub fn base_stats(self) -> (u32, u32, u32, u32) {
        match self {
            PlayerClass::Operator => (100, 50, 10, 2),
            PlayerClass::Hacker => (80, 90, 8, 1),
            PlayerClass::Soldier => (120, 30, 13, 4),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlayerClass::Operator => "operator",
            PlayerClass::Hacker => "hacker",
            PlayerClass::Soldier => "soldier",
        }
    }
}

/// Counters tracked for leaderboards and achievements.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerCounters {
    pub kills: u32,
    pub deaths: u32,
    pub quests_completed: u32,
    pub pvp_wins: u32,
    pub pvp_losses: u32,
    pub play_time_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerRecord {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub current_room: String,
    pub class: PlayerClass,
    pub level: u32,
    pub experience: u32,
    pub health: u32,
    pub max_health: u32,
    pub mana: u32,
    pub max_mana: u32,
    pub strength: u32,
    pub armor: u32,
    #[serde(default)]
    pub inventory: Vec<Item>,
    #[serde(default)]
    pub equipment: BTreeMap<EquipSlot, Item>,
    pub currency: u64,
    #[serde(default)]
    pub standings: Standings,
    #[serde(default)]
    pub achievements: Vec<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub counters: PlayerCounters,
    pub schema_version: u8,
}

impl PlayerRecord {
    pub const STARTING_CURRENCY: u64 = 25;

    pub fn new(name: &str, starting_room: &str, class: PlayerClass) -> Self {
        let now = Utc::now();
        let (max_health, max_mana, strength, armor) = class.base_stats();
        Self {
            name: name.to_string(),
            created_at: now,
            updated_at: now,
            current_room: starting_room.to_string(),
            class,
            level: 1,
            experience: 0,
            health: max_health,
            max_health,
            mana: max_mana,
            max_mana,
            strength,
            armor,
            inventory: Vec::new(),
            equipment: BTreeMap::new(),
            currency: Self::STARTING_CURRENCY,
            standings: Standings::default(),
            achievements: Vec::new(),
            title: None,
            counters: PlayerCounters::default(),
            schema_version: PLAYER_SCHEMA_VERSION,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Experience needed to advance from `level` to the next one.
    pub fn xp_to_next(level: u32) -> u32 {
        100u32.saturating_mul(level.saturating_mul(level))
    }

    /// Grant experience, applying every level-up it pays for. Returns levels gained.
    pub fn gain_experience(&mut self, amount: u32) -> u32 {
        self.experience = self.experience.saturating_add(amount);
        let mut gained = 0;
        while self.experience >= Self::xp_to_next(self.level) {
            self.experience -= Self::xp_to_next(self.level);
            self.level += 1;
            self.max_health += 10;
            self.max_mana += 5;
            self.strength += 2;
            gained += 1;
        }
        if gained > 0 {
            self.health = self.max_health;
            self.mana = self.max_mana;
        }
        gained
    }

    pub fn weapon_damage(&self) -> u32 {
        self.equipment.values().map(|item| item.damage).sum()
    }

    pub fn total_armor(&self) -> u32 {
        self.armor + self.equipment.values().map(|item| item.armor).sum::<u32>()
    }

    pub fn inventory_position(&self, query: &str) -> Option<usize> {
        self.inventory.iter().position(|item| item.matches(query))
    }

    pub fn display_name(&self) -> String {
        match &self.title {
            Some(title) => format!("{} the {}", self.name, title),
            None => self.name.clone(),
        }
    }

    /// Back to the start room with full pools after dying.
    pub fn respawn(&mut self, start_room: &str) {
        self.current_room = start_room.to_string();
        self.health = self.max_health;
        self.mana = self.max_mana;
        self.counters.deaths += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_parsing_accepts_abbreviations() {
        assert_eq!(Direction::parse("N"), Some(Direction::North));
        assert_eq!(Direction::parse("southWest"), Some(Direction::Southwest));
        assert_eq!(Direction::parse("sideways"), None);
        for dir in Direction::ALL {
            assert_eq!(dir.opposite().opposite(), dir);
            assert_eq!(Direction::parse(dir.as_str()), Some(dir));
        }
    }

    #[test]
    fn level_up_consumes_threshold_and_refills() {
        let mut player = PlayerRecord::new("neo", "construct", PlayerClass::Operator);
        player.health = 1;
        let gained = player.gain_experience(100 + 400 + 5);
        assert_eq!(gained, 2);
        assert_eq!(player.level, 3);
        assert_eq!(player.experience, 5);
        assert_eq!(player.health, player.max_health);
        assert_eq!(player.max_health, 120);
    }

    #[test]
    fn npc_name_matching_is_word_based() {
        let npc = NpcRecord::new("agent_smith", "Agent Smith", "", 50);
        assert!(npc.matches("smith"));
        assert!(npc.matches("AGENT SMITH"));
        assert!(!npc.matches("smi"));
    }
}
