//! World authoring commands.
//!
//! Authoring holds the commit gate exclusively for the whole edit, so the
//! reachability check and the change it guards see the same graph. An edit
//! that would cut off a room that was reachable from the start room is
//! refused with a validation error.

use std::collections::BTreeMap;

use log::info;
use uuid::Uuid;

use crate::mud::commands::{Command, DeleteTarget, EditField};
use crate::mud::dispatch::{Event, Response, Scope};
use crate::mud::errors::{CommandError, GameError, GameResult};
use crate::mud::game::Game;
use crate::mud::items::Rarity;
use crate::mud::seed;
use crate::mud::types::{Direction, RoomRecord};
use crate::mud::world::stranded_by_edit;

const MAX_ROOM_ID_LEN: usize = 32;
const MAX_DESCRIPTION_LEN: usize = 500;
const COLORS: &[&str] = &[
    "white", "gray", "red", "green", "yellow", "blue", "magenta", "cyan",
];

fn validate_room_id(id: &str) -> GameResult<()> {
    let ok = !id.is_empty()
        && id.len() <= MAX_ROOM_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if ok {
        Ok(())
    } else {
        Err(GameError::Validation(format!(
            "room ids use lowercase letters, digits and '_' (max {} characters)",
            MAX_ROOM_ID_LEN
        )))
    }
}

impl Game {
    pub(crate) fn author(&self, actor: &str, command: Command) -> GameResult<Response> {
        if !self.is_builder(actor) {
            return Err(CommandError::NotPermitted.into());
        }
        let _gate = self.gate_exclusive();
        let room_id = self
            .registry
            .room_of(actor)
            .ok_or(CommandError::NotHere)?;
        let response = match command {
            Command::Dig { direction, room_id: target } => self.dig(&room_id, direction, &target)?,
            Command::Generate(direction) => self.generate(&room_id, direction)?,
            Command::Create { template, rarity } => self.create_item(&room_id, &template, rarity)?,
            Command::Delete(target) => self.delete(&room_id, target)?,
            Command::Edit(field, value) => self.edit(&room_id, field, &value)?,
            _ => return Err(GameError::Internal("not an authoring command".into())),
        };
        info!("{} edited the world in '{}'", actor, room_id);
        Ok(response)
    }

    fn ensure_free_exit(&self, room_id: &str, direction: Direction) -> GameResult<()> {
        if self.world.exit(room_id, direction)?.is_some() {
            return Err(GameError::Validation(format!(
                "there is already an exit {}",
                direction
            )));
        }
        Ok(())
    }

    fn dig(&self, from: &str, direction: Direction, target: &str) -> GameResult<Response> {
        validate_room_id(target)?;
        self.ensure_free_exit(from, direction)?;
        let created = if self.world.contains(target) {
            false
        } else {
            let room = RoomRecord::new(target, target, "An unfinished space.")
                .with_exit(direction.opposite(), from);
            self.world.insert_room(room)?;
            true
        };
        self.world.with_room(from, |room| {
            room.exits.insert(direction, target.to_string());
            Ok(())
        })?;
        let line = if created {
            format!("You carve out '{}' to the {}.", target, direction)
        } else {
            format!("You open an exit {} to '{}'.", direction, target)
        };
        Ok(Response::text(line))
    }

    fn generate(&self, from: &str, direction: Direction) -> GameResult<Response> {
        self.ensure_free_exit(from, direction)?;
        let simple = Uuid::new_v4().simple().to_string();
        let id = format!("gen_{}", &simple[..8]);
        let room = seed::generate_room(&id, self.catalog(), &mut rand::thread_rng())
            .with_exit(direction.opposite(), from);
        let name = room.name.clone();
        self.world.insert_room(room)?;
        self.world.with_room(from, |room| {
            room.exits.insert(direction, id.clone());
            Ok(())
        })?;
        Ok(Response::text(format!(
            "The code rearranges itself. A {} ({}) now lies {}.",
            name, id, direction
        ))
        .with_room_event(from, "The walls shimmer as a new passage compiles."))
    }

    fn create_item(&self, room_id: &str, template: &str, rarity: Option<Rarity>) -> GameResult<Response> {
        let template = self
            .catalog()
            .find(template)
            .ok_or_else(|| GameError::Validation(format!("no item template '{}'", template)))?;
        let item = template.instantiate(rarity.unwrap_or(Rarity::Common));
        let label = item.label();
        self.world.with_room(room_id, |room| {
            room.items.push(item);
            Ok(())
        })?;
        Ok(Response::text(format!("A {} materializes.", label)))
    }

    fn delete(&self, room_id: &str, target: DeleteTarget) -> GameResult<Response> {
        match target {
            DeleteTarget::Item(query) => {
                let item = self
                    .world
                    .with_room(room_id, |room| room.take_item(&query).ok_or_else(|| CommandError::NotHere.into()))?;
                Ok(Response::text(format!("The {} is deleted.", item.label())))
            }
            DeleteTarget::Npc(query) => {
                let npc = self.world.with_room(room_id, |room| {
                    let index = room
                        .npcs
                        .iter()
                        .position(|npc| npc.matches(&query))
                        .ok_or(CommandError::NotHere)?;
                    Ok(room.npcs.remove(index))
                })?;
                Ok(Response::text(format!("{} is deleted.", npc.name)))
            }
            DeleteTarget::Exit(direction) => {
                let before = self.world.exit_graph();
                let target = self
                    .world
                    .exit(room_id, direction)?
                    .ok_or(CommandError::NotHere)?;
                let mut after = before.clone();
                if let Some(targets) = after.get_mut(room_id) {
                    if let Some(pos) = targets.iter().position(|t| t == &target) {
                        targets.remove(pos);
                    }
                }
                self.refuse_stranding(&before, &after)?;
                self.world.with_room(room_id, |room| {
                    room.exits.remove(&direction);
                    Ok(())
                })?;
                Ok(Response::text(format!("The exit {} is sealed.", direction)))
            }
            DeleteTarget::Room(id) => {
                if id == self.start_room() {
                    return Err(GameError::Validation("the start room cannot be deleted".into()));
                }
                if !self.world.contains(&id) {
                    return Err(GameError::Validation(format!("no room '{}'", id)));
                }
                if !self.registry.in_room(&id).is_empty() {
                    return Err(GameError::Validation(format!("room '{}' is occupied", id)));
                }
                let before = self.world.exit_graph();
                let mut after = before.clone();
                after.remove(&id);
                for targets in after.values_mut() {
                    targets.retain(|t| t != &id);
                }
                self.refuse_stranding(&before, &after)?;
                for other in self.world.room_ids() {
                    self.world.with_room(&other, |room| {
                        room.exits.retain(|_, t| t != &id);
                        Ok(())
                    })?;
                }
                self.world.remove_room(&id)?;
                Ok(Response::text(format!("Room '{}' is deleted.", id)))
            }
        }
    }

    fn refuse_stranding(
        &self,
        before: &BTreeMap<String, Vec<String>>,
        after: &BTreeMap<String, Vec<String>>,
    ) -> GameResult<()> {
        let stranded = stranded_by_edit(before, after, self.start_room());
        if stranded.is_empty() {
            Ok(())
        } else {
            Err(GameError::Validation(format!(
                "that would cut off {} from the start room",
                stranded.join(", ")
            )))
        }
    }

    fn edit(&self, room_id: &str, field: EditField, value: &str) -> GameResult<Response> {
        match field {
            EditField::Description => {
                if value.len() > MAX_DESCRIPTION_LEN {
                    return Err(GameError::Validation(format!(
                        "descriptions are limited to {} characters",
                        MAX_DESCRIPTION_LEN
                    )));
                }
                self.world.with_room(room_id, |room| {
                    room.description = value.to_string();
                    Ok(())
                })?;
            }
            EditField::Symbol => {
                let mut chars = value.chars();
                let symbol = match (chars.next(), chars.next()) {
                    (Some(c), None) if c.is_ascii_graphic() => c,
                    _ => {
                        return Err(GameError::Validation(
                            "a symbol is one printable character".into(),
                        ))
                    }
                };
                self.world.with_room(room_id, |room| {
                    room.symbol = symbol;
                    Ok(())
                })?;
            }
            EditField::Color => {
                let color = value.to_ascii_lowercase();
                if !COLORS.contains(&color.as_str()) {
                    return Err(GameError::Validation(format!(
                        "color must be one of: {}",
                        COLORS.join(", ")
                    )));
                }
                self.world.with_room(room_id, |room| {
                    room.color = color.clone();
                    Ok(())
                })?;
            }
        }
        Ok(Response::text("Room updated."))
    }
}

impl Response {
    fn with_room_event(mut self, room_id: &str, text: &str) -> Self {
        self.events.push(Event {
            scope: Scope::Room(room_id.to_string()),
            text: text.to_string(),
            exclude: None,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mud::game::GameSettings;
    use crate::mud::storage::MudStoreBuilder;
    use crate::mud::types::{PlayerClass, PlayerRecord};
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn builder_game(dir: &TempDir) -> Game {
        let store = MudStoreBuilder::new(dir.path()).open().expect("store");
        let settings = GameSettings {
            builders: HashSet::from(["architect".to_string()]),
            ..GameSettings::default()
        };
        let game = Game::open(store, settings).expect("game");
        game.enter(PlayerRecord::new("Architect", "construct", PlayerClass::Hacker));
        game
    }

    #[test]
    fn dig_links_both_ways() {
        let dir = TempDir::new().expect("tempdir");
        let game = builder_game(&dir);
        game.handle("Architect", "dig west lab");
        let lab = game.world().room("lab").expect("lab");
        assert_eq!(lab.exits.get(&Direction::East).map(String::as_str), Some("construct"));
        assert_eq!(
            game.world().exit("construct", Direction::West).expect("exit").as_deref(),
            Some("lab")
        );
        let again = game.handle("Architect", "dig west lab2");
        assert!(again.lines[0].starts_with("invalid input"));
        assert!(!game.world().contains("lab2"));
    }

    #[test]
    fn bad_room_ids_are_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let game = builder_game(&dir);
        let response = game.handle("Architect", "dig west Bad-Id");
        assert!(response.lines[0].starts_with("invalid input"));
        assert!(game.world().exit("construct", Direction::West).expect("exit").is_none());
    }

    #[test]
    fn sealing_the_only_exit_is_refused() {
        let dir = TempDir::new().expect("tempdir");
        let game = builder_game(&dir);
        // dojo is only reachable through construct's east exit.
        let response = game.handle("Architect", "delete exit east");
        assert!(response.lines[0].contains("cut off"), "{:?}", response.lines);
        assert!(game.world().exit("construct", Direction::East).expect("exit").is_some());
    }

    #[test]
    fn rooms_can_be_generated_and_deleted() {
        let dir = TempDir::new().expect("tempdir");
        let game = builder_game(&dir);
        game.handle("Architect", "generate west");
        let id = game
            .world()
            .exit("construct", Direction::West)
            .expect("exit")
            .expect("generated");
        assert!(game.world().contains(&id));

        let response = game.handle("Architect", &format!("delete room {}", id));
        assert_eq!(response.lines, vec![format!("Room '{}' is deleted.", id)]);
        assert!(!game.world().contains(&id));
        assert!(game.world().exit("construct", Direction::West).expect("exit").is_none());
    }

    #[test]
    fn edit_and_create() {
        let dir = TempDir::new().expect("tempdir");
        let game = builder_game(&dir);
        game.handle("Architect", "edit symbol *");
        game.handle("Architect", "edit color Cyan");
        game.handle("Architect", "create katana rare");
        let room = game.world().room("construct").expect("room");
        assert_eq!(room.symbol, '*');
        assert_eq!(room.color, "cyan");
        let katana = room.items.iter().find(|i| i.template_id == "katana").expect("katana");
        assert_eq!(katana.rarity, Rarity::Rare);
        assert_eq!(katana.damage, 8);
        let bad = game.handle("Architect", "edit color plaid");
        assert!(bad.lines[0].starts_with("invalid input"));
    }
}
