//! Per-entity ability cooldowns.
//!
//! Readiness is computed lazily against the clock; there is no background
//! task. Each entity's timers live behind their own mutex so triggering an
//! ability only contends with the triggering entity.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::mud::sync::{lock, read, write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ability {
    Strike,
    Heal,
    Meditate,
}

impl Ability {
    pub const ALL: [Ability; 3] = [Ability::Strike, Ability::Heal, Ability::Meditate];

    pub fn duration(self) -> Duration {
        match self {
            Ability::Strike => Duration::from_secs(8),
            Ability::Heal => Duration::from_secs(30),
            Ability::Meditate => Duration::from_secs(60),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Ability::Strike => "strike",
            Ability::Heal => "heal",
            Ability::Meditate => "meditate",
        }
    }
}

type Timers = HashMap<Ability, Instant>;

#[derive(Debug, Default)]
pub struct CooldownTracker {
    entities: RwLock<HashMap<String, Arc<Mutex<Timers>>>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn timers(&self, entity: &str) -> Option<Arc<Mutex<Timers>>> {
        read(&self.entities).get(&entity.to_ascii_lowercase()).cloned()
    }

    fn timers_or_insert(&self, entity: &str) -> Arc<Mutex<Timers>> {
        let key = entity.to_ascii_lowercase();
        if let Some(existing) = read(&self.entities).get(&key) {
            return existing.clone();
        }
        write(&self.entities).entry(key).or_default().clone()
    }

    pub fn is_ready(&self, entity: &str, ability: Ability) -> bool {
        self.is_ready_at(entity, ability, Instant::now())
    }

    pub fn is_ready_at(&self, entity: &str, ability: Ability, now: Instant) -> bool {
        self.remaining_at(entity, ability, now).is_zero()
    }

    pub fn remaining(&self, entity: &str, ability: Ability) -> Duration {
        self.remaining_at(entity, ability, Instant::now())
    }

    pub fn remaining_at(&self, entity: &str, ability: Ability, now: Instant) -> Duration {
        let Some(timers) = self.timers(entity) else {
            return Duration::ZERO;
        };
        let guard = lock(&timers);
        guard
            .get(&ability)
            .map(|expiry| expiry.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    /// Start the ability's fixed cooldown.
    pub fn trigger(&self, entity: &str, ability: Ability) {
        self.trigger_at(entity, ability, ability.duration(), Instant::now());
    }

    /// Set expiry to `now + duration`, overwriting any running timer.
    pub fn trigger_at(&self, entity: &str, ability: Ability, duration: Duration, now: Instant) {
        let timers = self.timers_or_insert(entity);
        lock(&timers).insert(ability, now + duration);
    }

    /// Check readiness and start the cooldown in one step so two racing
    /// triggers cannot both pass the check.
    pub fn try_trigger_at(
        &self,
        entity: &str,
        ability: Ability,
        now: Instant,
    ) -> Result<(), Duration> {
        let timers = self.timers_or_insert(entity);
        let mut guard = lock(&timers);
        if let Some(expiry) = guard.get(&ability) {
            let remaining = expiry.saturating_duration_since(now);
            if !remaining.is_zero() {
                return Err(remaining);
            }
        }
        guard.insert(ability, now + ability.duration());
        Ok(())
    }

    pub fn reset(&self, entity: &str, ability: Ability) {
        if let Some(timers) = self.timers(entity) {
            lock(&timers).remove(&ability);
        }
    }

    /// Drop the entity's expired timers, and the entity itself once none
    /// remain. Running timers survive logout so leaving and re-entering
    /// never makes an ability ready early.
    pub fn prune(&self, entity: &str, now: Instant) {
        let key = entity.to_ascii_lowercase();
        let mut entities = write(&self.entities);
        let empty = match entities.get(&key) {
            Some(timers) => {
                let mut guard = lock(timers);
                guard.retain(|_, expiry| *expiry > now);
                guard.is_empty()
            }
            None => return,
        };
        if empty {
            entities.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_blocks_until_expiry() {
        let tracker = CooldownTracker::new();
        let t0 = Instant::now();
        assert!(tracker.is_ready_at("neo", Ability::Heal, t0));

        tracker.trigger_at("neo", Ability::Heal, Duration::from_secs(30), t0);
        assert!(!tracker.is_ready_at("neo", Ability::Heal, t0));
        assert!(!tracker.is_ready_at("neo", Ability::Heal, t0 + Duration::from_secs(29)));
        assert!(tracker.is_ready_at("neo", Ability::Heal, t0 + Duration::from_secs(30)));
        // Other abilities and entities are unaffected.
        assert!(tracker.is_ready_at("neo", Ability::Strike, t0));
        assert!(tracker.is_ready_at("trinity", Ability::Heal, t0));
    }

    #[test]
    fn retrigger_overwrites_rather_than_extends() {
        let tracker = CooldownTracker::new();
        let t0 = Instant::now();
        tracker.trigger_at("neo", Ability::Strike, Duration::from_secs(10), t0);
        let t1 = t0 + Duration::from_secs(4);
        tracker.trigger_at("neo", Ability::Strike, Duration::from_secs(10), t1);
        assert_eq!(
            tracker.remaining_at("neo", Ability::Strike, t1),
            Duration::from_secs(10)
        );
        assert!(tracker.is_ready_at("neo", Ability::Strike, t1 + Duration::from_secs(10)));
        assert!(!tracker.is_ready_at("neo", Ability::Strike, t0 + Duration::from_secs(13)));
    }

    #[test]
    fn try_trigger_rejects_while_running() {
        let tracker = CooldownTracker::new();
        let t0 = Instant::now();
        assert!(tracker.try_trigger_at("neo", Ability::Meditate, t0).is_ok());
        let err = tracker
            .try_trigger_at("neo", Ability::Meditate, t0 + Duration::from_secs(1))
            .unwrap_err();
        assert_eq!(err, Duration::from_secs(59));
        tracker.reset("neo", Ability::Meditate);
        assert!(tracker.is_ready_at("neo", Ability::Meditate, t0));
    }

    #[test]
    fn prune_keeps_running_timers() {
        let tracker = CooldownTracker::new();
        let t0 = Instant::now();
        tracker.trigger_at("neo", Ability::Strike, Duration::from_secs(8), t0);
        tracker.trigger_at("neo", Ability::Meditate, Duration::from_secs(60), t0);

        let t1 = t0 + Duration::from_secs(10);
        tracker.prune("neo", t1);
        assert!(tracker.is_ready_at("neo", Ability::Strike, t1));
        assert_eq!(
            tracker.remaining_at("neo", Ability::Meditate, t1),
            Duration::from_secs(50)
        );

        tracker.prune("neo", t0 + Duration::from_secs(60));
        assert!(read(&tracker.entities).is_empty());
    }

    #[test]
    fn names_are_case_insensitive() {
        let tracker = CooldownTracker::new();
        let t0 = Instant::now();
        tracker.trigger_at("Neo", Ability::Heal, Duration::from_secs(5), t0);
        assert!(!tracker.is_ready_at("NEO", Ability::Heal, t0));
    }
}
