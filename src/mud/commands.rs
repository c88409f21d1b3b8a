//! Command parsing.
//!
//! Every keyword maps onto one variant of the closed [`Command`] set.
//! Parsing is case-insensitive on the keyword; arguments keep their case.

use crate::mud::errors::CommandError;
use crate::mud::items::Rarity;
use crate::mud::types::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// No shared state is mutated.
    Read,
    Write,
    /// Changes the world graph; needs builder privilege.
    Authoring,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteTarget {
    Item(String),
    Npc(String),
    Exit(Direction),
    Room(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditField {
    Description,
    Symbol,
    Color,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    // Read
    Look(Option<String>),
    Inventory,
    Equipment,
    Score,
    Who,
    Time,
    Cooldowns,
    Reputation,
    Achievements,
    Leaderboard(Option<String>),
    List,
    Help(Option<String>),
    TrainList,

    // Write
    Move(Direction),
    Take(String),
    Drop(String),
    Equip(String),
    Unequip(String),
    Use(String),
    Attack(String),
    Strike(String),
    Heal,
    Meditate,
    Give { item: String, npc: String },
    Talk(String),
    Buy(String),
    Sell(String),
    Title(Option<String>),
    Say(String),
    Shout(String),
    Train(String),
    Spar(String),
    SparAccept(String),
    Fight,
    TrainQuit,
    Save,
    Quit,

    // Authoring
    Dig { direction: Direction, room_id: String },
    Generate(Direction),
    Create { template: String, rarity: Option<Rarity> },
    Delete(DeleteTarget),
    Edit(EditField, String),
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        use Command::*;
        match self {
            Look(_) | Inventory | Equipment | Score | Who | Time | Cooldowns | Reputation
            | Achievements | Leaderboard(_) | List | Help(_) | TrainList => CommandKind::Read,
            Dig { .. } | Generate(_) | Create { .. } | Delete(_) | Edit(..) => {
                CommandKind::Authoring
            }
            _ => CommandKind::Write,
        }
    }

    /// Parse one input line.
    pub fn parse(line: &str) -> Result<Command, CommandError> {
        let line = line.trim();
        let (keyword, rest) = match line.split_once(char::is_whitespace) {
            Some((keyword, rest)) => (keyword, rest.trim()),
            None => (line, ""),
        };
        let keyword = keyword.to_ascii_lowercase();
        let arg = (!rest.is_empty()).then(|| rest.to_string());
        let required = |usage: &'static str| arg.clone().ok_or(CommandError::Usage(usage));

        if let Some(direction) = Direction::parse(&keyword) {
            // "d" is also "drop" in some clients; only the bare form is movement.
            if rest.is_empty() {
                return Ok(Command::Move(direction));
            }
        }

        let command = match keyword.as_str() {
            "" => return Err(CommandError::Unknown),
            "l" | "look" | "examine" | "x" => Command::Look(arg),
            "i" | "inv" | "inventory" => Command::Inventory,
            "eq" | "equipment" => Command::Equipment,
            "score" | "stats" => Command::Score,
            "who" => Command::Who,
            "time" => Command::Time,
            "cooldowns" | "cd" => Command::Cooldowns,
            "reputation" | "rep" | "factions" => Command::Reputation,
            "achievements" | "ach" => Command::Achievements,
            "leaderboard" | "top" => Command::Leaderboard(arg),
            "list" | "shop" => Command::List,
            "help" | "?" => Command::Help(arg),

            "go" | "move" => {
                let token = required("go <direction>")?;
                Command::Move(Direction::parse(&token).ok_or(CommandError::Usage("go <direction>"))?)
            }
            "take" | "get" | "t" => Command::Take(required("take <item>")?),
            "drop" => Command::Drop(required("drop <item>")?),
            "equip" | "wield" | "wear" => Command::Equip(required("equip <item>")?),
            "unequip" | "remove" => Command::Unequip(required("unequip <item|slot>")?),
            "use" | "eat" | "swallow" => Command::Use(required("use <item>")?),
            "attack" | "kill" | "k" | "hit" => Command::Attack(required("attack <target>")?),
            "strike" => Command::Strike(required("strike <target>")?),
            "heal" => Command::Heal,
            "meditate" => Command::Meditate,
            "give" => {
                let text = required("give <item> to <npc>")?;
                let lower = text.to_ascii_lowercase();
                let split = lower
                    .find(" to ")
                    .ok_or(CommandError::Usage("give <item> to <npc>"))?;
                let item = text[..split].trim().to_string();
                let npc = text[split + 4..].trim().to_string();
                if item.is_empty() || npc.is_empty() {
                    return Err(CommandError::Usage("give <item> to <npc>"));
                }
                Command::Give { item, npc }
            }
            "talk" | "greet" => Command::Talk(required("talk <npc>")?),
            "buy" => Command::Buy(required("buy <item>")?),
            "sell" => Command::Sell(required("sell <item>")?),
            "title" => match arg {
                Some(t) if t.eq_ignore_ascii_case("none") => Command::Title(None),
                Some(t) => Command::Title(Some(t)),
                None => return Err(CommandError::Usage("title <title|none>")),
            },
            "say" | "'" => Command::Say(required("say <text>")?),
            "shout" | "yell" => Command::Shout(required("shout <text>")?),
            "train" => match arg.as_deref().map(str::to_ascii_lowercase).as_deref() {
                None | Some("list") => Command::TrainList,
                Some("quit") | Some("abandon") => Command::TrainQuit,
                Some(_) => Command::Train(rest.to_string()),
            },
            "spar" => match split_pair(rest) {
                Some((word, name)) if word.eq_ignore_ascii_case("accept") => {
                    Command::SparAccept(name.to_string())
                }
                _ if rest.eq_ignore_ascii_case("accept") => {
                    return Err(CommandError::Usage("spar accept <player>"))
                }
                _ => Command::Spar(required("spar <player>")?),
            },
            "fight" | "f" => Command::Fight,
            "save" => Command::Save,
            "quit" | "logout" | "exit" => Command::Quit,

            "dig" => {
                let (dir, id) = split_pair(rest).ok_or(CommandError::Usage("dig <direction> <room-id>"))?;
                Command::Dig {
                    direction: Direction::parse(dir).ok_or(CommandError::Usage("dig <direction> <room-id>"))?,
                    room_id: id.to_string(),
                }
            }
            "generate" | "gen" => {
                let token = required("generate <direction>")?;
                Command::Generate(
                    Direction::parse(&token).ok_or(CommandError::Usage("generate <direction>"))?,
                )
            }
            "create" => {
                let text = required("create <template> [rarity]")?;
                let mut parts = text.split_whitespace();
                let template = parts.next().unwrap_or_default().to_string();
                let rarity = match parts.next() {
                    Some(token) => Some(
                        Rarity::parse(token).ok_or(CommandError::Usage("create <template> [rarity]"))?,
                    ),
                    None => None,
                };
                Command::Create { template, rarity }
            }
            "delete" | "destroy" => {
                const USAGE: &str = "delete item|npc|exit|room <target>";
                let (what, target) = split_pair(rest).ok_or(CommandError::Usage(USAGE))?;
                match what.to_ascii_lowercase().as_str() {
                    "item" => Command::Delete(DeleteTarget::Item(target.to_string())),
                    "npc" => Command::Delete(DeleteTarget::Npc(target.to_string())),
                    "exit" => Command::Delete(DeleteTarget::Exit(
                        Direction::parse(target).ok_or(CommandError::Usage(USAGE))?,
                    )),
                    "room" => Command::Delete(DeleteTarget::Room(target.to_string())),
                    _ => return Err(CommandError::Usage(USAGE)),
                }
            }
            "edit" => {
                const USAGE: &str = "edit desc|symbol|color <value>";
                let (field, value) = split_pair(rest).ok_or(CommandError::Usage(USAGE))?;
                let field = match field.to_ascii_lowercase().as_str() {
                    "desc" | "description" => EditField::Description,
                    "symbol" => EditField::Symbol,
                    "color" | "colour" => EditField::Color,
                    _ => return Err(CommandError::Usage(USAGE)),
                };
                Command::Edit(field, value.to_string())
            }
            _ => return Err(CommandError::Unknown),
        };
        Ok(command)
    }
}

fn split_pair(text: &str) -> Option<(&str, &str)> {
    let (first, second) = text.trim().split_once(char::is_whitespace)?;
    let second = second.trim();
    (!second.is_empty()).then_some((first, second))
}

pub const HELP_TEXT: &[&str] = &[
    "Movement: north/n south/s east/e west/w up/u down/d ne nw se sw, go <dir>",
    "Looking: look [target], inventory, equipment, score, who, time, cooldowns",
    "Items: take, drop, equip, unequip, use <item>",
    "Combat: attack <target>, strike <target>, heal, meditate",
    "NPCs: talk <npc>, give <item> to <npc>, list, buy <item>, sell <item>",
    "Social: say <text>, shout <text>, title <title|none>",
    "Progress: reputation, achievements, leaderboard [kills|deaths|quests|pvp|time|<program>]",
    "Training: train list, train <program>, spar <player>, spar accept <player>, fight, train quit",
    "Session: save, quit",
];

pub const BUILDER_HELP_TEXT: &[&str] = &[
    "Building: dig <dir> <room-id>, generate <dir>, create <template> [rarity]",
    "          delete item|npc|exit|room <target>, edit desc|symbol|color <value>",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(Command::parse("LOOK"), Ok(Command::Look(None)));
        assert_eq!(Command::parse("n"), Ok(Command::Move(Direction::North)));
        assert_eq!(Command::parse("Go SouthWest"), Ok(Command::Move(Direction::Southwest)));
        assert_eq!(
            Command::parse("Attack Agent Smith"),
            Ok(Command::Attack("Agent Smith".into()))
        );
    }

    #[test]
    fn unknown_and_usage_errors() {
        assert_eq!(Command::parse("dance"), Err(CommandError::Unknown));
        assert_eq!(Command::parse("   "), Err(CommandError::Unknown));
        assert!(matches!(Command::parse("take"), Err(CommandError::Usage(_))));
        assert!(matches!(Command::parse("give chip"), Err(CommandError::Usage(_))));
    }

    #[test]
    fn give_splits_on_to() {
        assert_eq!(
            Command::parse("give data chip TO Oracle"),
            Ok(Command::Give {
                item: "data chip".into(),
                npc: "Oracle".into()
            })
        );
    }

    #[test]
    fn classification() {
        assert_eq!(Command::parse("inventory").map(|c| c.kind()), Ok(CommandKind::Read));
        assert_eq!(Command::parse("take pill").map(|c| c.kind()), Ok(CommandKind::Write));
        assert_eq!(Command::parse("dig north lab").map(|c| c.kind()), Ok(CommandKind::Authoring));
        assert_eq!(Command::parse("train"), Ok(Command::TrainList));
        assert_eq!(Command::parse("train quit"), Ok(Command::TrainQuit));
        assert_eq!(Command::parse("train dojo"), Ok(Command::Train("dojo".into())));
    }

    #[test]
    fn spar_invites_and_accepts() {
        assert_eq!(Command::parse("spar Trinity"), Ok(Command::Spar("Trinity".into())));
        assert_eq!(
            Command::parse("spar ACCEPT Neo"),
            Ok(Command::SparAccept("Neo".into()))
        );
        assert!(matches!(Command::parse("spar accept"), Err(CommandError::Usage(_))));
    }

    #[test]
    fn authoring_arguments() {
        assert_eq!(
            Command::parse("create katana legendary"),
            Ok(Command::Create {
                template: "katana".into(),
                rarity: Some(Rarity::Legendary)
            })
        );
        assert_eq!(
            Command::parse("delete exit north"),
            Ok(Command::Delete(DeleteTarget::Exit(Direction::North)))
        );
        assert_eq!(
            Command::parse("edit desc A quiet room."),
            Ok(Command::Edit(EditField::Description, "A quiet room.".into()))
        );
    }
}
