//! Stateless combat resolution.
//!
//! `resolve` only computes what one exchange would do to copies of the two
//! combatants. Applying the result (health, death, loot, rewards) is the
//! caller's job.

use rand::Rng;

use crate::mud::types::{NpcRecord, PlayerRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Combatant {
    pub name: String,
    pub health: u32,
    pub max_health: u32,
    pub strength: u32,
    pub armor: u32,
    pub weapon_damage: u32,
}

impl From<&PlayerRecord> for Combatant {
    fn from(player: &PlayerRecord) -> Self {
        Self {
            name: player.name.clone(),
            health: player.health,
            max_health: player.max_health,
            strength: player.strength,
            armor: player.total_armor(),
            weapon_damage: player.weapon_damage(),
        }
    }
}

impl From<&NpcRecord> for Combatant {
    fn from(npc: &NpcRecord) -> Self {
        Self {
            name: npc.name.clone(),
            health: npc.health,
            max_health: npc.max_health,
            strength: npc.damage * 2,
            armor: npc.armor,
            weapon_damage: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Attack,
    /// Power attack: more accurate and double damage.
    Strike,
    /// An NPC hitting back; `danger_percent` scales the damage.
    Counter { danger_percent: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub hit: bool,
    /// Damage actually removed from the defender (never more than it had).
    pub damage: u32,
    pub defender_health: u32,
    pub defender_died: bool,
}

impl Outcome {
    pub fn miss(defender: &Combatant) -> Self {
        Self {
            hit: false,
            damage: 0,
            defender_health: defender.health,
            defender_died: false,
        }
    }
}

const MIN_DAMAGE_ON_HIT: u32 = 1;

fn hit_chance_percent(action: Action) -> u32 {
    match action {
        Action::Attack => 85,
        Action::Strike => 95,
        Action::Counter { .. } => 70,
    }
}

pub fn resolve<R: Rng + ?Sized>(
    attacker: &Combatant,
    defender: &Combatant,
    action: Action,
    rng: &mut R,
) -> Outcome {
    if defender.health == 0 || rng.gen_range(0..100) >= hit_chance_percent(action) {
        return Outcome::miss(defender);
    }

    let spread = attacker.strength / 2;
    let mut raw = spread + attacker.weapon_damage + rng.gen_range(0..=spread);
    match action {
        Action::Attack => {}
        Action::Strike => raw *= 2,
        Action::Counter { danger_percent } => raw = raw * danger_percent / 100,
    }

    let damage = raw
        .saturating_sub(defender.armor)
        .max(MIN_DAMAGE_ON_HIT)
        .min(defender.health);
    let remaining = defender.health - damage;
    Outcome {
        hit: true,
        damage,
        defender_health: remaining,
        defender_died: remaining == 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn fighter(health: u32, strength: u32, armor: u32) -> Combatant {
        Combatant {
            name: "x".into(),
            health,
            max_health: health,
            strength,
            armor,
            weapon_damage: 0,
        }
    }

    #[test]
    fn damage_never_exceeds_remaining_health() {
        let mut rng = StdRng::seed_from_u64(1);
        let attacker = fighter(100, 40, 0);
        let defender = fighter(3, 1, 0);
        for _ in 0..200 {
            let out = resolve(&attacker, &defender, Action::Strike, &mut rng);
            if out.hit {
                assert_eq!(out.damage, 3);
                assert!(out.defender_died);
                assert_eq!(out.defender_health, 0);
            }
        }
    }

    #[test]
    fn armor_floors_damage_at_one() {
        let mut rng = StdRng::seed_from_u64(2);
        let attacker = fighter(100, 2, 0);
        let defender = fighter(50, 1, 500);
        for _ in 0..200 {
            let out = resolve(&attacker, &defender, Action::Attack, &mut rng);
            assert!(out.damage <= 1);
            assert_eq!(out.hit, out.damage == 1);
            assert_eq!(out.defender_health, 50 - out.damage);
        }
    }

    #[test]
    fn dead_defenders_cannot_be_hit() {
        let mut rng = StdRng::seed_from_u64(3);
        let out = resolve(&fighter(10, 10, 0), &fighter(0, 1, 0), Action::Attack, &mut rng);
        assert_eq!(out, Outcome::miss(&fighter(0, 1, 0)));
    }

    #[test]
    fn resolve_is_deterministic_for_a_seed() {
        let a = fighter(100, 12, 1);
        let d = fighter(100, 12, 1);
        let first: Vec<Outcome> = {
            let mut rng = StdRng::seed_from_u64(9);
            (0..20).map(|_| resolve(&a, &d, Action::Attack, &mut rng)).collect()
        };
        let second: Vec<Outcome> = {
            let mut rng = StdRng::seed_from_u64(9);
            (0..20).map(|_| resolve(&a, &d, Action::Attack, &mut rng)).collect()
        };
        assert_eq!(first, second);
    }
}
