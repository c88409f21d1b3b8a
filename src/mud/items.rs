//! Item templates, rarity tiers and the immutable template catalog.
//!
//! Templates are loaded once at startup and never change afterwards; every
//! item held by a room, NPC or player is an independent value copy produced
//! by [`ItemTemplate::instantiate`].

use std::collections::BTreeMap;
use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::mud::types::name_matches;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Legendary,
}

impl Rarity {
    pub const ALL: [Rarity; 4] = [
        Rarity::Common,
        Rarity::Uncommon,
        Rarity::Rare,
        Rarity::Legendary,
    ];

    /// Drop probability in percent; the four tiers sum to 100.
    pub fn drop_chance_percent(self) -> u32 {
        match self {
            Rarity::Common => 75,
            Rarity::Uncommon => 15,
            Rarity::Rare => 9,
            Rarity::Legendary => 1,
        }
    }

    pub fn price_multiplier(self) -> u32 {
        match self {
            Rarity::Common => 1,
            Rarity::Uncommon => 2,
            Rarity::Rare => 5,
            Rarity::Legendary => 10,
        }
    }

    pub fn stat_bonus(self) -> u32 {
        match self {
            Rarity::Common => 0,
            Rarity::Uncommon => 1,
            Rarity::Rare => 2,
            Rarity::Legendary => 4,
        }
    }

    /// Map a roll in `0..100` onto the drop table.
    pub fn from_roll(roll: u32) -> Self {
        let mut threshold = 0;
        for rarity in Self::ALL {
            threshold += rarity.drop_chance_percent();
            if roll < threshold {
                return rarity;
            }
        }
        Rarity::Legendary
    }

    pub fn roll<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::from_roll(rng.gen_range(0..100))
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "common" => Some(Rarity::Common),
            "uncommon" => Some(Rarity::Uncommon),
            "rare" => Some(Rarity::Rare),
            "legendary" => Some(Rarity::Legendary),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Rarity::Common => "common",
            Rarity::Uncommon => "uncommon",
            Rarity::Rare => "rare",
            Rarity::Legendary => "legendary",
        }
    }
}

impl fmt::Display for Rarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EquipSlot {
    Weapon,
    Body,
    Head,
    Eyes,
}

impl EquipSlot {
    pub fn as_str(self) -> &'static str {
        match self {
            EquipSlot::Weapon => "weapon",
            EquipSlot::Body => "body",
            EquipSlot::Head => "head",
            EquipSlot::Eyes => "eyes",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemTemplate {
    pub id: String,
    pub name: String,
    pub description: String,
    pub damage: u32,
    pub armor: u32,
    pub price: u32,
    pub slot: Option<EquipSlot>,
    /// Health restored when used; zero for non-consumables.
    pub heals: u32,
}

impl ItemTemplate {
    pub fn new(id: &str, name: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            damage: 0,
            armor: 0,
            price: 1,
            slot: None,
            heals: 0,
        }
    }

    pub fn weapon(mut self, damage: u32) -> Self {
        self.damage = damage;
        self.slot = Some(EquipSlot::Weapon);
        self
    }

    pub fn wearable(mut self, slot: EquipSlot, armor: u32) -> Self {
        self.armor = armor;
        self.slot = Some(slot);
        self
    }

    pub fn consumable(mut self, heals: u32) -> Self {
        self.heals = heals;
        self
    }

    pub fn priced(mut self, price: u32) -> Self {
        self.price = price;
        self
    }

    /// Produce an independent instance with the tier's bonus and multiplier applied.
    pub fn instantiate(&self, rarity: Rarity) -> Item {
        let bonus = rarity.stat_bonus();
        Item {
            template_id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            damage: if self.damage > 0 { self.damage + bonus } else { 0 },
            armor: if self.armor > 0 { self.armor + bonus } else { 0 },
            price: self.price * rarity.price_multiplier(),
            slot: self.slot,
            heals: self.heals,
            rarity,
        }
    }
}

/// A concrete item owned by exactly one container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub template_id: String,
    pub name: String,
    pub description: String,
    pub damage: u32,
    pub armor: u32,
    pub price: u32,
    pub slot: Option<EquipSlot>,
    pub heals: u32,
    pub rarity: Rarity,
}

impl Item {
    pub fn matches(&self, query: &str) -> bool {
        name_matches(&self.name, query) || self.template_id.eq_ignore_ascii_case(query.trim())
    }

    pub fn label(&self) -> String {
        match self.rarity {
            Rarity::Common => self.name.clone(),
            other => format!("{} [{}]", self.name, other),
        }
    }
}

/// Immutable set of templates, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct ItemCatalog {
    templates: BTreeMap<String, ItemTemplate>,
}

impl ItemCatalog {
    pub fn new(templates: impl IntoIterator<Item = ItemTemplate>) -> Self {
        Self {
            templates: templates.into_iter().map(|t| (t.id.clone(), t)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&ItemTemplate> {
        self.templates.get(id)
    }

    /// Look up by id or display name.
    pub fn find(&self, query: &str) -> Option<&ItemTemplate> {
        self.get(query).or_else(|| {
            self.templates
                .values()
                .find(|t| name_matches(&t.name, query))
        })
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// A random template instantiated at a rolled rarity.
    pub fn random_drop<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Item> {
        if self.templates.is_empty() {
            return None;
        }
        let index = rng.gen_range(0..self.templates.len());
        let template = self.templates.values().nth(index)?;
        Some(template.instantiate(Rarity::roll(rng)))
    }
}
