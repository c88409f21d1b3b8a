//! Day/night cycle.
//!
//! The current period is a pure function of wall-clock time elapsed since
//! the clock's epoch, so nothing has to tick it and it cannot drift.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Dawn,
    Morning,
    Midday,
    Afternoon,
    Dusk,
    Evening,
    Midnight,
    DeepNight,
}

pub const MAX_LIGHT: u8 = 10;

impl Period {
    pub const ALL: [Period; 8] = [
        Period::Dawn,
        Period::Morning,
        Period::Midday,
        Period::Afternoon,
        Period::Dusk,
        Period::Evening,
        Period::Midnight,
        Period::DeepNight,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Period::Dawn => "dawn",
            Period::Morning => "morning",
            Period::Midday => "midday",
            Period::Afternoon => "afternoon",
            Period::Dusk => "dusk",
            Period::Evening => "evening",
            Period::Midnight => "midnight",
            Period::DeepNight => "deep night",
        }
    }

    pub fn ambient(self) -> &'static str {
        match self {
            Period::Dawn => "Grey light seeps between the towers; the code rain thins.",
            Period::Morning => "Commuters stream past, their faces blank and scheduled.",
            Period::Midday => "The sun sits high and flat, a texture rendered a little too bright.",
            Period::Afternoon => "Long shadows stretch across the pavement.",
            Period::Dusk => "Streetlights flicker on one by one, out of sync.",
            Period::Evening => "Neon signs hum; the crowds thin out.",
            Period::Midnight => "The city is quiet. Somewhere, a phone is ringing.",
            Period::DeepNight => "Darkness presses close. Agents walk these hours.",
        }
    }

    /// Multiplier applied to hostile NPC damage, in percent.
    pub fn danger_percent(self) -> u32 {
        match self {
            Period::Dawn => 100,
            Period::Morning | Period::Midday | Period::Afternoon => 90,
            Period::Dusk => 110,
            Period::Evening => 120,
            Period::Midnight => 140,
            Period::DeepNight => 150,
        }
    }

    /// Light level in `0..=MAX_LIGHT`.
    pub fn light(self) -> u8 {
        match self {
            Period::Dawn => 4,
            Period::Morning => 8,
            Period::Midday => 10,
            Period::Afternoon => 8,
            Period::Dusk => 4,
            Period::Evening => 2,
            Period::Midnight => 1,
            Period::DeepNight => 0,
        }
    }

    pub fn is_night(self) -> bool {
        self.light() <= 2
    }
}

#[derive(Debug, Clone)]
pub struct GameClock {
    epoch: Instant,
    day_length: Duration,
}

impl GameClock {
    pub fn new(day_length: Duration) -> Self {
        Self::with_epoch(Instant::now(), day_length)
    }

    pub fn with_epoch(epoch: Instant, day_length: Duration) -> Self {
        let day_length = day_length.max(Duration::from_secs(Period::ALL.len() as u64));
        Self { epoch, day_length }
    }

    pub fn current_period(&self) -> Period {
        self.period_at(Instant::now())
    }

    pub fn period_at(&self, now: Instant) -> Period {
        Self::period_for_elapsed(now.saturating_duration_since(self.epoch), self.day_length)
    }

    pub fn period_for_elapsed(elapsed: Duration, day_length: Duration) -> Period {
        let day_ms = day_length.as_millis().max(1);
        let into_day = elapsed.as_millis() % day_ms;
        let slot = (into_day * Period::ALL.len() as u128 / day_ms) as usize;
        Period::ALL[slot.min(Period::ALL.len() - 1)]
    }

    pub fn day_length(&self) -> Duration {
        self.day_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn periods_advance_through_the_day_and_wrap() {
        let day = Duration::from_secs(800);
        let clock = GameClock::with_epoch(Instant::now(), day);
        let epoch = clock.epoch;
        for (i, expected) in Period::ALL.iter().enumerate() {
            let at = epoch + Duration::from_secs(100 * i as u64 + 50);
            assert_eq!(clock.period_at(at), *expected);
        }
        assert_eq!(clock.period_at(epoch + day), Period::Dawn);
        assert_eq!(clock.period_at(epoch + day * 3 + Duration::from_secs(799)), Period::DeepNight);
    }

    #[test]
    fn light_levels_are_bounded() {
        for period in Period::ALL {
            assert!(period.light() <= MAX_LIGHT);
            assert!(period.danger_percent() > 0);
        }
        assert!(Period::Midnight.is_night());
        assert!(!Period::Midday.is_night());
    }
}
