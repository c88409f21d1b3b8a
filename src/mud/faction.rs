//! Faction reputation.
//!
//! Factions come in opposed pairs: raising standing with one lowers standing
//! with its opposite by the same amount. Scores are clamped to
//! [`MIN_STANDING`, `MAX_STANDING`] after every update.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const MIN_STANDING: i32 = -1000;
pub const MAX_STANDING: i32 = 1000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Faction {
    Resistance,
    Machines,
    Exiles,
    Programs,
}

impl Faction {
    pub const ALL: [Faction; 4] = [
        Faction::Resistance,
        Faction::Machines,
        Faction::Exiles,
        Faction::Programs,
    ];

    pub fn opposite(self) -> Self {
        match self {
            Faction::Resistance => Faction::Machines,
            Faction::Machines => Faction::Resistance,
            Faction::Exiles => Faction::Programs,
            Faction::Programs => Faction::Exiles,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Faction::Resistance => "Resistance",
            Faction::Machines => "Machines",
            Faction::Exiles => "Exiles",
            Faction::Programs => "Programs",
        }
    }
}

impl fmt::Display for Faction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Seven ordered tiers, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Hated,
    Hostile,
    Unfriendly,
    Neutral,
    Friendly,
    Honored,
    Exalted,
}

impl Tier {
    pub fn from_score(score: i32) -> Self {
        match score {
            s if s <= -750 => Tier::Hated,
            s if s <= -400 => Tier::Hostile,
            s if s < -100 => Tier::Unfriendly,
            s if s <= 100 => Tier::Neutral,
            s if s < 400 => Tier::Friendly,
            s if s < 750 => Tier::Honored,
            _ => Tier::Exalted,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Hated => "Hated",
            Tier::Hostile => "Hostile",
            Tier::Unfriendly => "Unfriendly",
            Tier::Neutral => "Neutral",
            Tier::Friendly => "Friendly",
            Tier::Honored => "Honored",
            Tier::Exalted => "Exalted",
        }
    }
}

/// Per-entity reputation scores. Missing factions read as neutral (0).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Standings {
    scores: BTreeMap<Faction, i32>,
}

impl Standings {
    pub fn score(&self, faction: Faction) -> i32 {
        self.scores.get(&faction).copied().unwrap_or(0)
    }

    pub fn tier(&self, faction: Faction) -> Tier {
        Tier::from_score(self.score(faction))
    }

    /// Apply `delta` to `faction` and `-delta` to its opposite, clamping both.
    pub fn adjust(&mut self, faction: Faction, delta: i32) {
        self.shift(faction, delta);
        self.shift(faction.opposite(), delta.saturating_neg());
    }

    fn shift(&mut self, faction: Faction, delta: i32) {
        let next = self
            .score(faction)
            .saturating_add(delta)
            .clamp(MIN_STANDING, MAX_STANDING);
        self.scores.insert(faction, next);
    }

    pub fn summary(&self) -> Vec<String> {
        Faction::ALL
            .iter()
            .map(|&f| format!("{:<11} {:>5}  {}", f.as_str(), self.score(f), self.tier(f).as_str()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gains_mirror_onto_opposite() {
        let mut standings = Standings::default();
        standings.adjust(Faction::Resistance, 150);
        assert_eq!(standings.score(Faction::Resistance), 150);
        assert_eq!(standings.score(Faction::Machines), -150);
        assert_eq!(standings.score(Faction::Exiles), 0);
        assert_eq!(standings.tier(Faction::Resistance), Tier::Friendly);
        assert_eq!(standings.tier(Faction::Machines), Tier::Unfriendly);
    }

    #[test]
    fn scores_clamp_at_bounds() {
        let mut standings = Standings::default();
        standings.adjust(Faction::Exiles, 5000);
        assert_eq!(standings.score(Faction::Exiles), MAX_STANDING);
        assert_eq!(standings.score(Faction::Programs), MIN_STANDING);

        // Further decreases at the minimum stay at the minimum.
        standings.adjust(Faction::Exiles, 10);
        assert_eq!(standings.score(Faction::Programs), MIN_STANDING);
        standings.adjust(Faction::Programs, i32::MIN);
        assert_eq!(standings.score(Faction::Programs), MIN_STANDING);
        assert_eq!(standings.score(Faction::Exiles), MAX_STANDING);
    }

    #[test]
    fn tiers_are_ordered() {
        let scores = [-1000, -500, -200, 0, 200, 500, 1000];
        let tiers: Vec<Tier> = scores.iter().map(|&s| Tier::from_score(s)).collect();
        let mut sorted = tiers.clone();
        sorted.sort();
        assert_eq!(tiers, sorted);
        assert_eq!(tiers.first(), Some(&Tier::Hated));
        assert_eq!(tiers.last(), Some(&Tier::Exalted));
    }
}
