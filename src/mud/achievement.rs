/// Achievement catalog and award logic.
///
/// Achievements are earned from the leaderboard counters on the player
/// record, so they are re-evaluated whenever a counter moves. Each one
/// unlocks a title that can be shown after the player's name.
use crate::mud::types::{PlayerCounters, PlayerRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Kills,
    Deaths,
    QuestsCompleted,
    PvpWins,
    PlayTimeSecs,
}

impl Counter {
    fn read(self, counters: &PlayerCounters) -> u64 {
        match self {
            Counter::Kills => counters.kills as u64,
            Counter::Deaths => counters.deaths as u64,
            Counter::QuestsCompleted => counters.quests_completed as u64,
            Counter::PvpWins => counters.pvp_wins as u64,
            Counter::PlayTimeSecs => counters.play_time_secs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Achievement {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub counter: Counter,
    pub threshold: u64,
    pub title: &'static str,
}

pub const ACHIEVEMENTS: &[Achievement] = &[
    Achievement {
        id: "first_blood",
        name: "First Blood",
        description: "Defeat your first opponent.",
        counter: Counter::Kills,
        threshold: 1,
        title: "Initiate",
    },
    Achievement {
        id: "exterminator",
        name: "Exterminator",
        description: "Defeat 25 opponents.",
        counter: Counter::Kills,
        threshold: 25,
        title: "Exterminator",
    },
    Achievement {
        id: "glitch",
        name: "Deja Vu",
        description: "Die five times.",
        counter: Counter::Deaths,
        threshold: 5,
        title: "Glitch",
    },
    Achievement {
        id: "courier",
        name: "Courier",
        description: "Complete a quest.",
        counter: Counter::QuestsCompleted,
        threshold: 1,
        title: "Courier",
    },
    Achievement {
        id: "chosen",
        name: "The Chosen",
        description: "Complete five quests.",
        counter: Counter::QuestsCompleted,
        threshold: 5,
        title: "One",
    },
    Achievement {
        id: "duelist",
        name: "Duelist",
        description: "Win a player-versus-player fight.",
        counter: Counter::PvpWins,
        threshold: 1,
        title: "Duelist",
    },
    Achievement {
        id: "veteran",
        name: "Veteran",
        description: "Spend an hour jacked in.",
        counter: Counter::PlayTimeSecs,
        threshold: 3600,
        title: "Veteran",
    },
];

pub fn find(id_or_title: &str) -> Option<&'static Achievement> {
    ACHIEVEMENTS.iter().find(|a| {
        a.id.eq_ignore_ascii_case(id_or_title) || a.title.eq_ignore_ascii_case(id_or_title)
    })
}

/// Award every newly satisfied achievement and return them.
pub fn evaluate(player: &mut PlayerRecord) -> Vec<&'static Achievement> {
    let mut awarded = Vec::new();
    for achievement in ACHIEVEMENTS {
        if player.achievements.iter().any(|id| id == achievement.id) {
            continue;
        }
        if achievement.counter.read(&player.counters) >= achievement.threshold {
            player.achievements.push(achievement.id.to_string());
            awarded.push(achievement);
        }
    }
    awarded
}

pub fn announce(awarded: &[&Achievement]) -> Vec<String> {
    awarded
        .iter()
        .map(|a| format!("Achievement unlocked: {} (title '{}' available).", a.name, a.title))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mud::types::PlayerClass;

    #[test]
    fn awards_once() {
        let mut player = PlayerRecord::new("neo", "construct", PlayerClass::Operator);
        assert!(evaluate(&mut player).is_empty());
        player.counters.kills = 1;
        let first = evaluate(&mut player);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, "first_blood");
        assert!(evaluate(&mut player).is_empty());
    }

    #[test]
    fn lookup_by_title() {
        assert_eq!(find("one").map(|a| a.id), Some("chosen"));
        assert!(find("nobody").is_none());
    }
}
