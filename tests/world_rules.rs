//! Shared-world rules exercised through the public game API, including
//! several entities acting at once.

mod common;

use std::sync::Arc;
use std::thread;

use matrixmud::mud::{Ability, Action, EquipSlot, Faction, GameError, NpcState, PlayerClass, Rarity};
use tempfile::TempDir;

#[test]
fn failed_move_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let game = common::open_game(&dir);
    common::spawn(&game, "Neo", "construct");
    let before = game.registry().snapshot("neo").unwrap();

    let response = game.handle("Neo", "west");
    assert_eq!(response.lines, vec!["That is not here.".to_string()]);
    assert!(response.events.is_empty());
    assert_eq!(game.registry().snapshot("neo").unwrap(), before);
    assert_eq!(game.registry().in_room("construct"), vec!["Neo".to_string()]);
}

#[test]
fn concurrent_attackers_never_lose_damage() {
    let dir = TempDir::new().unwrap();
    let game = common::open_game(&dir);
    let attackers = ["Neo", "Trinity", "Morpheus", "Switch"];
    for name in attackers {
        common::spawn(&game, name, "alley");
        game.registry()
            .with_player(name, |p| {
                p.max_health = 100_000;
                p.health = 100_000;
                Ok(())
            })
            .unwrap();
    }
    let start = game
        .world()
        .room("alley")
        .unwrap()
        .find_npc("cop")
        .unwrap()
        .health;

    let dealt: u32 = thread::scope(|scope| {
        let handles: Vec<_> = attackers
            .iter()
            .map(|name| {
                let game = Arc::clone(&game);
                scope.spawn(move || {
                    let mut total = 0;
                    // The cop dies eventually; after that it is no longer a target.
                    for _ in 0..1000 {
                        match game.attack_npc(name, "cop", Action::Attack) {
                            Ok(report) => total += report.damage,
                            Err(GameError::Command(_)) => break,
                            Err(other) => panic!("unexpected error: {other}"),
                        }
                    }
                    total
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });

    let room = game.world().room("alley").unwrap();
    let cop = room.npcs.iter().find(|n| n.id == "cop").unwrap();
    assert_eq!(cop.state, NpcState::Dead);
    assert_eq!(cop.health, 0);
    assert_eq!(dealt, start);
    let kills: u32 = attackers
        .iter()
        .map(|name| game.registry().snapshot(name).unwrap().counters.kills)
        .sum();
    assert_eq!(kills, 1);
}

#[test]
fn only_one_taker_wins_an_item() {
    let dir = TempDir::new().unwrap();
    let game = common::open_game(&dir);
    let takers = ["Neo", "Trinity", "Cypher"];
    for name in takers {
        common::spawn(&game, name, "construct");
    }

    let responses: Vec<Vec<String>> = thread::scope(|scope| {
        let handles: Vec<_> = takers
            .iter()
            .map(|name| {
                let game = Arc::clone(&game);
                scope.spawn(move || game.handle(name, "take red pill").lines)
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winners = responses
        .iter()
        .filter(|lines| lines[0].starts_with("You take"))
        .count();
    assert_eq!(winners, 1);
    let losers = responses
        .iter()
        .filter(|lines| lines[0] == "That is not here.")
        .count();
    assert_eq!(losers, 2);
    let held: usize = takers
        .iter()
        .map(|name| game.registry().snapshot(name).unwrap().inventory.len())
        .sum();
    assert_eq!(held, 1);
    assert!(game.world().room("construct").unwrap().items.is_empty());
}

#[test]
fn saved_state_survives_a_restart() {
    let dir = TempDir::new().unwrap();
    {
        let game = common::open_game(&dir);
        common::spawn(&game, "Neo", "construct");
        game.handle("Neo", "take red pill");
        game.handle("Neo", "north");
        let summary = game.save_all().unwrap();
        assert_eq!(summary.players, 1);
        assert!(summary.rooms >= 8);
    }

    let game = common::open_game(&dir);
    assert!(game.world().room("construct").unwrap().items.is_empty());
    let (neo, created) = game
        .load_or_create_player("neo", PlayerClass::default())
        .unwrap();
    assert!(!created);
    assert_eq!(neo.current_room, "downtown");
    assert_eq!(neo.inventory.len(), 1);
    assert_eq!(neo.inventory[0].template_id, "red_pill");
}

#[test]
fn leaving_saves_the_entity() {
    let dir = TempDir::new().unwrap();
    let game = common::open_game(&dir);
    common::spawn(&game, "Neo", "construct");
    game.handle("Neo", "north");
    let record = game.leave("Neo").unwrap().unwrap();
    assert_eq!(record.current_room, "downtown");
    assert!(!game.registry().is_live("Neo"));
    assert_eq!(game.store().get_player("neo").unwrap().current_room, "downtown");
}

#[test]
fn full_state_round_trips_through_the_store() {
    let dir = TempDir::new().unwrap();
    let (saved_rooms, saved_neo) = {
        let game = common::open_game(&dir);
        common::spawn(&game, "Neo", "alley");
        let katana = game.catalog().get("katana").unwrap().instantiate(Rarity::Rare);
        let chip = game.catalog().get("data_chip").unwrap().instantiate(Rarity::Common);
        game.registry()
            .with_player("neo", |p| {
                p.max_health = 100_000;
                p.health = 100_000;
                p.mana = 7;
                p.equipment.insert(EquipSlot::Weapon, katana);
                p.inventory.push(chip);
                p.standings.adjust(Faction::Machines, -40);
                p.title = Some("The One".into());
                Ok(())
            })
            .unwrap();
        // Kill the cop so a dead NPC and its dropped loot are part of the save.
        for _ in 0..1000 {
            if game.attack_npc("Neo", "cop", Action::Attack).is_err() {
                break;
            }
        }
        game.save_all().unwrap();
        (game.world().snapshot(), game.registry().snapshot("neo").unwrap())
    };
    assert!(saved_neo.equipment.contains_key(&EquipSlot::Weapon));
    assert_eq!(saved_neo.counters.kills, 1);
    assert!(saved_rooms.iter().any(|r| r.npcs.iter().any(|n| n.quest.is_some())));

    let game = common::open_game(&dir);
    let mut reloaded = game.store().load_world().unwrap();
    reloaded.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(reloaded, saved_rooms);
    assert_eq!(game.store().get_player("NEO").unwrap(), saved_neo);
}

#[test]
fn cooldowns_survive_leaving_and_returning() {
    let dir = TempDir::new().unwrap();
    let game = common::open_game(&dir);
    common::spawn(&game, "Neo", "construct");
    let first = game.handle("Neo", "meditate");
    assert!(first.lines[0].starts_with("You free your mind"), "{:?}", first.lines);

    game.leave("Neo").unwrap();
    let (neo, created) = game
        .load_or_create_player("neo", PlayerClass::default())
        .unwrap();
    assert!(!created);
    game.enter(neo);

    assert!(!game.cooldowns().is_ready("neo", Ability::Meditate));
    let again = game.handle("Neo", "meditate");
    assert!(again.lines[0].starts_with("meditate is not ready"), "{:?}", again.lines);
}
