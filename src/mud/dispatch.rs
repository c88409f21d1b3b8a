//! Command execution.
//!
//! Every handler validates before it mutates: an `Err` from a handler means
//! nothing shared was changed. Output for the acting session goes into
//! `Response::lines`; anything other sessions should see goes into
//! `Response::events` and is fanned out by the session hub.

use std::time::Instant;

use log::{debug, error};
use rand::Rng;

use crate::mud::achievement::{self, ACHIEVEMENTS};
use crate::mud::combat::{self, Action, Combatant};
use crate::mud::commands::{Command, CommandKind, BUILDER_HELP_TEXT, HELP_TEXT};
use crate::mud::cooldown::Ability;
use crate::mud::errors::{CommandError, GameError, GameResult};
use crate::mud::game::Game;
use crate::mud::instance::{self, PROGRAMS};
use crate::mud::items::{EquipSlot, Rarity};
use crate::mud::types::{Direction, NpcState, PlayerRecord, RoomRecord};

const HEAL_MANA_COST: u32 = 10;
const FACTION_KILL_SHIFT: i32 = 25;
const FACTION_QUEST_SHIFT: i32 = 50;
const BONUS_DROP_PERCENT: u32 = 25;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Every session whose entity stands in the room.
    Room(String),
    /// One entity's session.
    Player(String),
    Everyone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub scope: Scope,
    pub text: String,
    /// Entity that must not receive the event (usually the actor).
    pub exclude: Option<String>,
}

impl Event {
    pub fn room(room_id: &str, text: impl Into<String>, exclude: &str) -> Self {
        Self {
            scope: Scope::Room(room_id.to_string()),
            text: text.into(),
            exclude: Some(exclude.to_string()),
        }
    }

    pub fn player(name: &str, text: impl Into<String>) -> Self {
        Self {
            scope: Scope::Player(name.to_string()),
            text: text.into(),
            exclude: None,
        }
    }

    pub fn everyone(text: impl Into<String>) -> Self {
        Self {
            scope: Scope::Everyone,
            text: text.into(),
            exclude: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub lines: Vec<String>,
    pub events: Vec<Event>,
    /// The session should log the entity out.
    pub quit: bool,
}

impl Response {
    pub fn text(line: impl Into<String>) -> Self {
        Self {
            lines: vec![line.into()],
            ..Self::default()
        }
    }

    pub fn lines(lines: Vec<String>) -> Self {
        Self {
            lines,
            ..Self::default()
        }
    }

    fn with_event(mut self, event: Event) -> Self {
        self.events.push(event);
        self
    }
}

/// What one attack on an NPC did.
#[derive(Debug, Clone, Default)]
pub struct AttackReport {
    pub lines: Vec<String>,
    pub events: Vec<Event>,
    /// Health actually removed from the NPC.
    pub damage: u32,
    pub npc_health: u32,
    pub npc_died: bool,
    pub counter_damage: u32,
    pub attacker_died: bool,
}

impl Game {
    /// Parse and run one line for `actor`. Errors become user-visible text.
    pub fn handle(&self, actor: &str, line: &str) -> Response {
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(err) => return Response::text(err.to_string()),
        };
        if command.kind() == CommandKind::Authoring && !self.is_builder(actor) {
            return Response::text(CommandError::NotPermitted.to_string());
        }
        match self.execute(actor, command) {
            Ok(response) => response,
            Err(err) => self.error_response(actor, err),
        }
    }

    fn error_response(&self, actor: &str, err: GameError) -> Response {
        match &err {
            GameError::Persistence(inner) => {
                error!("Save failed for {}: {}", actor, inner);
                Response::text(format!("Save failed: {}", inner))
            }
            e if e.is_user_facing() => Response::text(e.to_string()),
            e => {
                error!("Command from {} failed: {}", actor, e);
                Response::text("Something went wrong. The operators have been notified.")
            }
        }
    }

    pub fn execute(&self, actor: &str, command: Command) -> GameResult<Response> {
        debug!("{} -> {:?}", actor, command);
        if self.instances.instance_of(actor).is_some() && blocked_in_instance(&command) {
            return Err(CommandError::Rejected(
                "You are inside a training program. Use 'fight' or 'train quit'.".into(),
            )
            .into());
        }
        match command {
            Command::Look(None) => self.look_room(actor),
            Command::Look(Some(target)) => self.look_at(actor, &target),
            Command::Inventory => self.inventory(actor),
            Command::Equipment => self.equipment(actor),
            Command::Score => self.score(actor),
            Command::Who => Ok(self.who()),
            Command::Time => Ok(self.time()),
            Command::Cooldowns => Ok(self.cooldown_list(actor)),
            Command::Reputation => self.reputation(actor),
            Command::Achievements => self.achievements(actor),
            Command::Leaderboard(metric) => self.leaderboard(metric.as_deref()),
            Command::List => self.vendor_list(actor),
            Command::Help(_) => Ok(self.help(actor)),
            Command::TrainList => Ok(self.train_list()),

            Command::Move(direction) => self.move_to(actor, direction),
            Command::Take(item) => self.take(actor, &item),
            Command::Drop(item) => self.drop_item(actor, &item),
            Command::Equip(item) => self.equip(actor, &item),
            Command::Unequip(item) => self.unequip(actor, &item),
            Command::Use(item) => self.use_item(actor, &item),
            Command::Attack(target) => self.attack(actor, &target, Action::Attack),
            Command::Strike(target) => self.attack(actor, &target, Action::Strike),
            Command::Heal => self.heal(actor),
            Command::Meditate => self.meditate(actor),
            Command::Give { item, npc } => self.give(actor, &item, &npc),
            Command::Talk(npc) => self.talk(actor, &npc),
            Command::Buy(item) => self.buy(actor, &item),
            Command::Sell(item) => self.sell(actor, &item),
            Command::Title(title) => self.title(actor, title.as_deref()),
            Command::Say(text) => self.say(actor, &text),
            Command::Shout(text) => self.shout(actor, &text),
            Command::Train(program) => self.train(actor, &program),
            Command::Spar(opponent) => self.spar(actor, &opponent),
            Command::SparAccept(challenger) => self.spar_accept(actor, &challenger),
            Command::Fight => self.fight(actor),
            Command::TrainQuit => self.train_quit(actor),
            Command::Save => {
                self.save_player(actor)?;
                Ok(Response::text("Your progress has been saved."))
            }
            Command::Quit => Ok(Response {
                lines: vec!["You unplug from the Matrix. Goodbye.".into()],
                events: Vec::new(),
                quit: true,
            }),
            Command::Dig { .. }
            | Command::Generate(_)
            | Command::Create { .. }
            | Command::Delete(_)
            | Command::Edit(..) => self.author(actor, command),
        }
    }

    // ----- rendering -----

    fn actor_room_id(&self, actor: &str) -> GameResult<String> {
        self.registry
            .room_of(actor)
            .ok_or_else(|| CommandError::NotHere.into())
    }

    pub fn render_room(&self, room: &RoomRecord, viewer: &str) -> Vec<String> {
        let period = self.clock.current_period();
        let mut lines = vec![
            format!("== {} ==", room.name),
            room.description.clone(),
            period.ambient().to_string(),
        ];
        if room.exits.is_empty() {
            lines.push("Exits: none".into());
        } else {
            let exits: Vec<&str> = room.exits.keys().map(|d| d.as_str()).collect();
            lines.push(format!("Exits: {}", exits.join(", ")));
        }
        if !room.items.is_empty() {
            let items: Vec<String> = room.items.iter().map(|i| i.label()).collect();
            lines.push(format!("You see: {}", items.join(", ")));
        }
        let npcs: Vec<String> = room
            .npcs
            .iter()
            .map(|npc| match npc.state {
                NpcState::Idle => npc.name.clone(),
                NpcState::Aggressive => format!("{} (hostile)", npc.name),
                NpcState::Dead => format!("the remains of {}", npc.name),
            })
            .collect();
        if !npcs.is_empty() {
            lines.push(format!("Here: {}", npcs.join(", ")));
        }
        let others: Vec<String> = self
            .registry
            .in_room(&room.id)
            .into_iter()
            .filter(|name| !name.eq_ignore_ascii_case(viewer))
            .collect();
        if !others.is_empty() {
            lines.push(format!("Also here: {}", others.join(", ")));
        }
        if room.allows_pvp() {
            lines.push("Combat between players is allowed here.".into());
        }
        lines
    }

    fn look_room(&self, actor: &str) -> GameResult<Response> {
        let room = self.world.room(&self.actor_room_id(actor)?)?;
        Ok(Response::lines(self.render_room(&room, actor)))
    }

    fn look_at(&self, actor: &str, target: &str) -> GameResult<Response> {
        let room = self.world.room(&self.actor_room_id(actor)?)?;
        if let Some(npc) = room.npcs.iter().find(|npc| npc.matches(target)) {
            let mut lines = vec![npc.name.clone(), npc.description.clone()];
            if npc.is_alive() {
                lines.push(format!("Health: {}/{}", npc.health, npc.max_health));
            } else {
                lines.push("It is not moving.".into());
            }
            if let Some(faction) = npc.faction {
                lines.push(format!("Aligned with the {}.", faction));
            }
            return Ok(Response::lines(lines));
        }
        let player = self
            .registry
            .snapshot(actor)
            .ok_or(CommandError::NotHere)?;
        if let Some(item) = room
            .items
            .iter()
            .chain(player.inventory.iter())
            .chain(player.equipment.values())
            .find(|item| item.matches(target))
        {
            return Ok(Response::lines(describe_item(item)));
        }
        if let Some(other) = self
            .registry
            .in_room(&room.id)
            .into_iter()
            .find(|name| name.eq_ignore_ascii_case(target))
            .and_then(|name| self.registry.snapshot(&name))
        {
            return Ok(Response::lines(vec![
                other.display_name(),
                format!(
                    "A level {} {}. Health {}/{}.",
                    other.level,
                    other.class.as_str(),
                    other.health,
                    other.max_health
                ),
            ]));
        }
        Err(CommandError::NotHere.into())
    }

    fn inventory(&self, actor: &str) -> GameResult<Response> {
        let player = self.registry.snapshot(actor).ok_or(CommandError::NotHere)?;
        let mut lines = Vec::new();
        if player.inventory.is_empty() {
            lines.push("You are carrying nothing.".into());
        } else {
            lines.push("You are carrying:".into());
            lines.extend(player.inventory.iter().map(|i| format!("  {}", i.label())));
        }
        lines.push(format!("Credits: {}", player.currency));
        Ok(Response::lines(lines))
    }

    fn equipment(&self, actor: &str) -> GameResult<Response> {
        let player = self.registry.snapshot(actor).ok_or(CommandError::NotHere)?;
        let slots = [EquipSlot::Weapon, EquipSlot::Body, EquipSlot::Head, EquipSlot::Eyes];
        let lines = slots
            .iter()
            .map(|slot| {
                let item = player
                    .equipment
                    .get(slot)
                    .map(|i| i.label())
                    .unwrap_or_else(|| "-".into());
                format!("{:<7} {}", slot.as_str(), item)
            })
            .collect();
        Ok(Response::lines(lines))
    }

    fn score(&self, actor: &str) -> GameResult<Response> {
        let p = self.registry.snapshot(actor).ok_or(CommandError::NotHere)?;
        let c = &p.counters;
        Ok(Response::lines(vec![
            format!("{} (level {} {})", p.display_name(), p.level, p.class.as_str()),
            format!(
                "Experience: {}/{}",
                p.experience,
                PlayerRecord::xp_to_next(p.level)
            ),
            format!("Health: {}/{}  Mana: {}/{}", p.health, p.max_health, p.mana, p.max_mana),
            format!(
                "Strength: {}  Armor: {}  Weapon: +{}",
                p.strength,
                p.total_armor(),
                p.weapon_damage()
            ),
            format!("Credits: {}", p.currency),
            format!(
                "Kills: {}  Deaths: {}  Quests: {}  PvP: {}W/{}L",
                c.kills, c.deaths, c.quests_completed, c.pvp_wins, c.pvp_losses
            ),
            format!("Time jacked in: {}", format_duration(c.play_time_secs)),
        ]))
    }

    fn who(&self) -> Response {
        let players = self.registry.snapshot_all();
        let mut lines = vec![format!("{} connected:", players.len())];
        lines.extend(
            players
                .iter()
                .map(|p| format!("  {} (level {})", p.display_name(), p.level)),
        );
        Response::lines(lines)
    }

    fn time(&self) -> Response {
        let period = self.clock.current_period();
        Response::lines(vec![
            format!("It is {}.", period.name()),
            period.ambient().to_string(),
        ])
    }

    fn cooldown_list(&self, actor: &str) -> Response {
        let now = Instant::now();
        Response::lines(
            Ability::ALL
                .iter()
                .map(|&ability| {
                    let remaining = self.cooldowns.remaining_at(actor, ability, now);
                    if remaining.is_zero() {
                        format!("{:<9} ready", ability.as_str())
                    } else {
                        format!("{:<9} {}s", ability.as_str(), remaining.as_secs().max(1))
                    }
                })
                .collect(),
        )
    }

    fn reputation(&self, actor: &str) -> GameResult<Response> {
        let player = self.registry.snapshot(actor).ok_or(CommandError::NotHere)?;
        Ok(Response::lines(player.standings.summary()))
    }

    fn achievements(&self, actor: &str) -> GameResult<Response> {
        let player = self.registry.snapshot(actor).ok_or(CommandError::NotHere)?;
        let lines = ACHIEVEMENTS
            .iter()
            .map(|a| {
                let mark = if player.achievements.iter().any(|id| id == a.id) {
                    "[x]"
                } else {
                    "[ ]"
                };
                format!("{} {} - {} (title: {})", mark, a.name, a.description, a.title)
            })
            .collect();
        Ok(Response::lines(lines))
    }

    fn leaderboard(&self, metric: Option<&str>) -> GameResult<Response> {
        let metric = metric.unwrap_or("kills").to_ascii_lowercase();
        if let Some(program) = instance::program(&metric) {
            let line = match self.instances.best(program.id) {
                Some(best) => format!(
                    "{} record: {} by {}",
                    program.name,
                    instance::format_score(program, best.score),
                    best.holder
                ),
                None => format!("{} has no record yet.", program.name),
            };
            return Ok(Response::text(line));
        }
        let key: fn(&PlayerRecord) -> u64 = match metric.as_str() {
            "kills" => |p: &PlayerRecord| p.counters.kills as u64,
            "deaths" => |p: &PlayerRecord| p.counters.deaths as u64,
            "quests" => |p: &PlayerRecord| p.counters.quests_completed as u64,
            "pvp" => |p: &PlayerRecord| p.counters.pvp_wins as u64,
            "time" => |p: &PlayerRecord| p.counters.play_time_secs,
            _ => {
                return Err(CommandError::Usage(
                    "leaderboard [kills|deaths|quests|pvp|time|<program>]",
                )
                .into())
            }
        };
        let mut players = self.all_players()?;
        players.sort_by(|a, b| key(b).cmp(&key(a)).then_with(|| a.name.cmp(&b.name)));
        let mut lines = vec![format!("Top by {}:", metric)];
        for (rank, p) in players.iter().take(10).enumerate() {
            let value = if metric == "time" {
                format_duration(key(p))
            } else {
                key(p).to_string()
            };
            lines.push(format!("{:>2}. {:<16} {}", rank + 1, p.name, value));
        }
        Ok(Response::lines(lines))
    }

    fn vendor_list(&self, actor: &str) -> GameResult<Response> {
        let room = self.world.room(&self.actor_room_id(actor)?)?;
        let vendor = room.vendor().ok_or(CommandError::NoVendor)?;
        let mut lines = vec![format!("{} sells:", vendor.name)];
        for id in &vendor.stock {
            if let Some(template) = self.catalog().get(id) {
                lines.push(format!(
                    "  {:<12} {:>4} credits",
                    template.name,
                    template.price * Rarity::Common.price_multiplier()
                ));
            }
        }
        Ok(Response::lines(lines))
    }

    fn help(&self, actor: &str) -> Response {
        let mut lines: Vec<String> = HELP_TEXT.iter().map(|s| s.to_string()).collect();
        if self.is_builder(actor) {
            lines.extend(BUILDER_HELP_TEXT.iter().map(|s| s.to_string()));
        }
        Response::lines(lines)
    }

    fn train_list(&self) -> Response {
        let mut lines = vec!["Training programs:".to_string()];
        for program in PROGRAMS {
            let best = self
                .instances
                .best(program.id)
                .map(|r| format!(" (record {} by {})", instance::format_score(program, r.score), r.holder))
                .unwrap_or_default();
            lines.push(format!("  {:<6} {}{}", program.id, program.description, best));
        }
        Response::lines(lines)
    }

    // ----- movement and items -----

    fn move_to(&self, actor: &str, direction: Direction) -> GameResult<Response> {
        let (from, to, name) = {
            let _gate = self.gate_shared();
            self.with_actor_room(actor, |player, room| {
                let destination = room
                    .exits
                    .get(&direction)
                    .filter(|dest| self.world.contains(dest))
                    .cloned()
                    .ok_or(CommandError::NotHere)?;
                player.current_room = destination.clone();
                Ok((room.id.clone(), destination, player.name.clone()))
            })?
        };
        let room = self.world.room(&to)?;
        let mut response = Response::lines(self.render_room(&room, actor));
        response.events.push(Event::room(&from, format!("{} leaves {}.", name, direction), &name));
        response
            .events
            .push(Event::room(&to, format!("{} arrives.", name), &name));
        Ok(response)
    }

    fn take(&self, actor: &str, query: &str) -> GameResult<Response> {
        let _gate = self.gate_shared();
        let (room_id, name, label) = self.with_actor_room(actor, |player, room| {
            // First taker under the room lock wins; later ones find nothing.
            let item = room.take_item(query).ok_or(CommandError::NotHere)?;
            let label = item.label();
            player.inventory.push(item);
            Ok((room.id.clone(), player.name.clone(), label))
        })?;
        Ok(Response::text(format!("You take the {}.", label))
            .with_event(Event::room(&room_id, format!("{} takes the {}.", name, label), &name)))
    }

    fn drop_item(&self, actor: &str, query: &str) -> GameResult<Response> {
        let _gate = self.gate_shared();
        let (room_id, name, label) = self.with_actor_room(actor, |player, room| {
            let index = player.inventory_position(query).ok_or(CommandError::NotHeld)?;
            let item = player.inventory.remove(index);
            let label = item.label();
            room.items.push(item);
            Ok((room.id.clone(), player.name.clone(), label))
        })?;
        Ok(Response::text(format!("You drop the {}.", label))
            .with_event(Event::room(&room_id, format!("{} drops the {}.", name, label), &name)))
    }

    fn equip(&self, actor: &str, query: &str) -> GameResult<Response> {
        let _gate = self.gate_shared();
        self.registry.with_player(actor, |player| {
            let index = player.inventory_position(query).ok_or(CommandError::NotHeld)?;
            let slot = player.inventory[index].slot.ok_or(CommandError::NotUsable)?;
            let item = player.inventory.remove(index);
            let label = item.label();
            let mut lines = Vec::new();
            if let Some(previous) = player.equipment.insert(slot, item) {
                lines.push(format!("You remove the {}.", previous.label()));
                player.inventory.push(previous);
            }
            lines.push(format!("You equip the {} ({}).", label, slot.as_str()));
            Ok(Response::lines(lines))
        })
    }

    fn unequip(&self, actor: &str, query: &str) -> GameResult<Response> {
        let _gate = self.gate_shared();
        self.registry.with_player(actor, |player| {
            let slot = player
                .equipment
                .iter()
                .find(|(slot, item)| slot.as_str().eq_ignore_ascii_case(query) || item.matches(query))
                .map(|(slot, _)| *slot)
                .ok_or(CommandError::NotHeld)?;
            let item = player.equipment.remove(&slot).ok_or(CommandError::NotHeld)?;
            let line = format!("You remove the {}.", item.label());
            player.inventory.push(item);
            Ok(Response::text(line))
        })
    }

    fn use_item(&self, actor: &str, query: &str) -> GameResult<Response> {
        let _gate = self.gate_shared();
        self.registry.with_player(actor, |player| {
            let index = player.inventory_position(query).ok_or(CommandError::NotHeld)?;
            if player.inventory[index].heals == 0 {
                return Err(CommandError::NotUsable.into());
            }
            let item = player.inventory.remove(index);
            let before = player.health;
            player.health = (player.health + item.heals).min(player.max_health);
            Ok(Response::text(format!(
                "You use the {} and recover {} health.",
                item.name,
                player.health - before
            )))
        })
    }

    // ----- combat -----

    fn attack(&self, actor: &str, target: &str, action: Action) -> GameResult<Response> {
        let npc_present = self
            .world
            .room(&self.actor_room_id(actor)?)?
            .find_npc(target)
            .is_some();
        if npc_present {
            let report = self.attack_npc(actor, target, action)?;
            return Ok(Response {
                lines: report.lines,
                events: report.events,
                quit: false,
            });
        }
        let target_live = self
            .registry
            .in_room(&self.actor_room_id(actor)?)
            .into_iter()
            .find(|name| name.eq_ignore_ascii_case(target));
        match target_live {
            Some(name) => self.attack_player(actor, &name, action),
            None => Err(CommandError::NotHere.into()),
        }
    }

    fn ability_for(action: Action) -> Option<Ability> {
        match action {
            Action::Strike => Some(Ability::Strike),
            _ => None,
        }
    }

    fn check_cooldown(&self, actor: &str, ability: Ability, now: Instant) -> GameResult<()> {
        self.cooldowns
            .try_trigger_at(actor, ability, now)
            .map_err(|remaining| {
                CommandError::Cooldown {
                    ability: ability.as_str(),
                    remaining,
                }
                .into()
            })
    }

    /// One attack on an NPC, applied atomically under the room lock.
    pub fn attack_npc(&self, actor: &str, target: &str, action: Action) -> GameResult<AttackReport> {
        let _gate = self.gate_shared();
        let start_room = self.start_room().to_string();
        let danger = self.clock.current_period().danger_percent();
        let now = Instant::now();
        self.with_actor_room(actor, |player, room| {
            let room_id = room.id.clone();
            let npc_index = room
                .npcs
                .iter()
                .position(|npc| npc.is_alive() && npc.matches(target))
                .ok_or(CommandError::NotHere)?;
            if room.npcs[npc_index].is_protected() {
                return Err(CommandError::Protected(room.npcs[npc_index].name.clone()).into());
            }
            if let Some(ability) = Self::ability_for(action) {
                self.check_cooldown(actor, ability, now)?;
            }

            let mut rng = rand::thread_rng();
            let mut report = AttackReport::default();
            let attacker = Combatant::from(&*player);
            let npc = &mut room.npcs[npc_index];
            let out = combat::resolve(&attacker, &Combatant::from(&*npc), action, &mut rng);
            npc.health = out.defender_health;
            if npc.state == NpcState::Idle {
                npc.state = NpcState::Aggressive;
            }
            report.damage = out.damage;
            report.npc_health = npc.health;
            let npc_name = npc.name.clone();
            let verb = if action == Action::Strike { "strike" } else { "hit" };
            if out.hit {
                report.lines.push(format!("You {} {} for {} damage.", verb, npc_name, out.damage));
                report.events.push(Event::room(
                    &room_id,
                    format!("{} attacks {}.", player.name, npc_name),
                    &player.name,
                ));
            } else {
                report.lines.push(format!("You miss {}.", npc_name));
            }

            if out.defender_died {
                report.npc_died = true;
                npc.state = NpcState::Dead;
                let loot: Vec<_> = npc.loot.drain(..).collect();
                let xp = npc.xp_reward;
                let faction = npc.faction;
                let quest = npc.quest.clone();
                report.lines.push(format!("{} collapses and dissolves into code.", npc_name));
                report.events.push(Event::room(
                    &room_id,
                    format!("{} has destroyed {}!", player.name, npc_name),
                    &player.name,
                ));
                for item in &loot {
                    report.lines.push(format!("{} drops the {}.", npc_name, item.label()));
                }
                room.items.extend(loot);
                if rng.gen_range(0..100) < BONUS_DROP_PERCENT {
                    if let Some(bonus) = self.catalog().random_drop(&mut rng) {
                        report.lines.push(format!("Something clatters to the floor: {}.", bonus.label()));
                        room.items.push(bonus);
                    }
                }

                player.counters.kills += 1;
                report.lines.extend(grant_experience(player, xp));
                if let Some(faction) = faction {
                    player.standings.adjust(faction.opposite(), FACTION_KILL_SHIFT);
                    report.lines.push(format!(
                        "The {} will remember this. ({} {:+}, {} {:+})",
                        faction,
                        faction.opposite(),
                        FACTION_KILL_SHIFT,
                        faction,
                        -FACTION_KILL_SHIFT
                    ));
                }
                if let Some(quest) = quest {
                    player.counters.quests_completed += 1;
                    report.lines.push(quest.reward_message);
                    report.lines.extend(grant_experience(player, quest.reward_xp));
                }
                report
                    .lines
                    .extend(achievement::announce(&achievement::evaluate(player)));
                return Ok(report);
            }

            if npc.state == NpcState::Aggressive {
                let back = combat::resolve(
                    &Combatant::from(&*npc),
                    &Combatant::from(&*player),
                    Action::Counter {
                        danger_percent: danger,
                    },
                    &mut rng,
                );
                player.health = back.defender_health;
                report.counter_damage = back.damage;
                if back.hit {
                    report
                        .lines
                        .push(format!("{} hits you for {} damage.", npc_name, back.damage));
                } else {
                    report.lines.push(format!("{} misses you.", npc_name));
                }
                if back.defender_died {
                    report.attacker_died = true;
                    player.respawn(&start_room);
                    report.lines.push(
                        "Everything goes black... You wake up in the Construct.".into(),
                    );
                    report.events.push(Event::room(
                        &room_id,
                        format!("{} has been killed by {}!", player.name, npc_name),
                        &player.name,
                    ));
                    report.events.push(Event::room(
                        &start_room,
                        format!("{} flickers into existence.", player.name),
                        &player.name,
                    ));
                    report
                        .lines
                        .extend(achievement::announce(&achievement::evaluate(player)));
                }
            }
            Ok(report)
        })
    }

    fn attack_player(&self, actor: &str, target: &str, action: Action) -> GameResult<Response> {
        let _gate = self.gate_shared();
        let start_room = self.start_room().to_string();
        let now = Instant::now();
        self.with_actor_target_room(actor, target, |attacker, defender, room| {
            if !room.allows_pvp() {
                return Err(CommandError::Rejected(
                    "You can't fight other players here. Try 'spar' for a practice duel.".into(),
                )
                .into());
            }
            if let Some(ability) = Self::ability_for(action) {
                self.check_cooldown(actor, ability, now)?;
            }
            let mut rng = rand::thread_rng();
            let out = combat::resolve(
                &Combatant::from(&*attacker),
                &Combatant::from(&*defender),
                action,
                &mut rng,
            );
            defender.health = out.defender_health;
            let mut response = Response::default();
            if !out.hit {
                response.lines.push(format!("You miss {}.", defender.name));
                response
                    .events
                    .push(Event::player(&defender.name, format!("{} misses you.", attacker.name)));
                return Ok(response);
            }
            response
                .lines
                .push(format!("You hit {} for {} damage.", defender.name, out.damage));
            response.events.push(Event::player(
                &defender.name,
                format!("{} hits you for {} damage.", attacker.name, out.damage),
            ));
            if out.defender_died {
                attacker.counters.pvp_wins += 1;
                attacker.counters.kills += 1;
                defender.counters.pvp_losses += 1;
                defender.respawn(&start_room);
                response.lines.push(format!("{} falls!", defender.name));
                response.events.push(Event::player(
                    &defender.name,
                    "Everything goes black... You wake up in the Construct.",
                ));
                response.events.push(Event::room(
                    &room.id,
                    format!("{} has defeated {}!", attacker.name, defender.name),
                    &attacker.name,
                ));
                response
                    .lines
                    .extend(achievement::announce(&achievement::evaluate(attacker)));
                let defender_awards = achievement::announce(&achievement::evaluate(defender));
                for line in defender_awards {
                    response.events.push(Event::player(&defender.name, line));
                }
            }
            Ok(response)
        })
    }

    fn heal(&self, actor: &str) -> GameResult<Response> {
        let _gate = self.gate_shared();
        let now = Instant::now();
        self.registry.with_player(actor, |player| {
            if player.mana < HEAL_MANA_COST {
                return Err(CommandError::Insufficient("mana").into());
            }
            self.check_cooldown(actor, Ability::Heal, now)?;
            player.mana -= HEAL_MANA_COST;
            let before = player.health;
            player.health = (player.health + 25 + player.level * 5).min(player.max_health);
            Ok(Response::text(format!(
                "Code knits your wounds together. (+{} health)",
                player.health - before
            )))
        })
    }

    fn meditate(&self, actor: &str) -> GameResult<Response> {
        let _gate = self.gate_shared();
        let now = Instant::now();
        self.registry.with_player(actor, |player| {
            self.check_cooldown(actor, Ability::Meditate, now)?;
            let before = player.mana;
            player.mana = (player.mana + 20 + player.level * 2).min(player.max_mana);
            Ok(Response::text(format!(
                "You free your mind. (+{} mana)",
                player.mana - before
            )))
        })
    }

    // ----- NPCs and trade -----

    fn give(&self, actor: &str, item_query: &str, npc_query: &str) -> GameResult<Response> {
        let _gate = self.gate_shared();
        self.with_actor_room(actor, |player, room| {
            let npc = room.find_npc(npc_query).ok_or(CommandError::NotHere)?;
            let quest = npc.quest.clone().ok_or_else(|| {
                CommandError::Rejected(format!("{} doesn't want anything from you.", npc.name))
            })?;
            let index = player.inventory_position(item_query).ok_or(CommandError::NotHeld)?;
            if player.inventory[index].template_id != quest.wanted_item {
                return Err(CommandError::Rejected(format!("{} doesn't want that.", npc.name)).into());
            }
            let npc_name = npc.name.clone();
            let faction = npc.faction;

            let item = player.inventory.remove(index);
            player.counters.quests_completed += 1;
            let mut lines = vec![
                format!("You give the {} to {}.", item.name, npc_name),
                quest.reward_message,
            ];
            lines.extend(grant_experience(player, quest.reward_xp));
            if let Some(faction) = faction {
                player.standings.adjust(faction, FACTION_QUEST_SHIFT);
                lines.push(format!("Your standing with the {} improves.", faction));
            }
            lines.extend(achievement::announce(&achievement::evaluate(player)));
            Ok(Response::lines(lines).with_event(Event::room(
                &room.id,
                format!("{} hands something to {}.", player.name, npc_name),
                &player.name,
            )))
        })
    }

    fn talk(&self, actor: &str, npc_query: &str) -> GameResult<Response> {
        let room = self.world.room(&self.actor_room_id(actor)?)?;
        let npc = room.find_npc(npc_query).ok_or(CommandError::NotHere)?;
        let mut lines = Vec::new();
        if npc.greeting.is_empty() {
            lines.push(format!("{} ignores you.", npc.name));
        } else {
            lines.push(format!("{} says, \"{}\"", npc.name, npc.greeting));
        }
        if let Some(quest) = &npc.quest {
            let wanted = self
                .catalog()
                .get(&quest.wanted_item)
                .map(|t| t.name.clone())
                .unwrap_or_else(|| quest.wanted_item.clone());
            lines.push(format!("{} is looking for a {}.", npc.name, wanted));
        }
        if npc.is_vendor() {
            lines.push("Type 'list' to see what is for sale.".into());
        }
        Ok(Response::lines(lines))
    }

    fn buy(&self, actor: &str, query: &str) -> GameResult<Response> {
        let _gate = self.gate_shared();
        self.with_actor_room(actor, |player, room| {
            let vendor = room.vendor().ok_or(CommandError::NoVendor)?;
            let template = self
                .catalog()
                .find(query)
                .filter(|t| vendor.stock.iter().any(|id| id == &t.id))
                .ok_or_else(|| CommandError::Rejected(format!("{} doesn't sell that.", vendor.name)))?;
            let price = u64::from(template.price * Rarity::Common.price_multiplier());
            if player.currency < price {
                return Err(CommandError::Insufficient("credits").into());
            }
            player.currency -= price;
            let item = template.instantiate(Rarity::Common);
            let line = format!("You buy the {} for {} credits.", item.name, price);
            player.inventory.push(item);
            Ok(Response::text(line))
        })
    }

    fn sell(&self, actor: &str, query: &str) -> GameResult<Response> {
        let _gate = self.gate_shared();
        self.with_actor_room(actor, |player, room| {
            let vendor = room.vendor().ok_or(CommandError::NoVendor)?;
            let vendor_name = vendor.name.clone();
            let index = player.inventory_position(query).ok_or(CommandError::NotHeld)?;
            let item = player.inventory.remove(index);
            let price = u64::from(item.price / 2);
            player.currency += price;
            Ok(Response::text(format!(
                "{} takes the {} and pays you {} credits.",
                vendor_name,
                item.label(),
                price
            )))
        })
    }

    fn title(&self, actor: &str, title: Option<&str>) -> GameResult<Response> {
        let _gate = self.gate_shared();
        self.registry.with_player(actor, |player| match title {
            None => {
                player.title = None;
                Ok(Response::text("Title cleared."))
            }
            Some(query) => {
                let achievement = achievement::find(query)
                    .filter(|a| player.achievements.iter().any(|id| id == a.id))
                    .ok_or_else(|| CommandError::Rejected("You haven't earned that title.".into()))?;
                player.title = Some(achievement.title.to_string());
                Ok(Response::text(format!("You are now known as {}.", player.display_name())))
            }
        })
    }

    // ----- communication -----

    fn say(&self, actor: &str, text: &str) -> GameResult<Response> {
        let room_id = self.actor_room_id(actor)?;
        let name = self.display_name(actor)?;
        Ok(Response::text(format!("You say, \"{}\"", text))
            .with_event(Event::room(&room_id, format!("{} says, \"{}\"", name, text), actor)))
    }

    fn shout(&self, actor: &str, text: &str) -> GameResult<Response> {
        let name = self.display_name(actor)?;
        let mut event = Event::everyone(format!("{} shouts, \"{}\"", name, text));
        event.exclude = Some(actor.to_string());
        Ok(Response::text(format!("You shout, \"{}\"", text)).with_event(event))
    }

    fn display_name(&self, actor: &str) -> GameResult<String> {
        self.registry
            .with_player(actor, |p| Ok(p.display_name()))
    }

    // ----- training -----

    fn train(&self, actor: &str, program: &str) -> GameResult<Response> {
        let copy = self
            .registry
            .with_player(actor, |p| Ok(Combatant::from(&*p)))?;
        let program = instance::program(program).ok_or_else(|| {
            CommandError::Rejected(format!("No training program called '{}'.", program))
        })?;
        if program.id == "duel" {
            return Err(CommandError::Usage("spar <player>").into());
        }
        self.instances.create_instance(program.id, vec![copy], Instant::now())?;
        Ok(Response::lines(vec![
            format!("The world dissolves into the {}.", program.name),
            program.description.to_string(),
            "Type 'fight' to engage, 'train quit' to leave.".into(),
        ]))
    }

    /// Someone else standing in the actor's room, by case-insensitive name.
    fn other_in_room(&self, actor: &str, wanted: &str) -> GameResult<String> {
        let room_id = self.actor_room_id(actor)?;
        self.registry
            .in_room(&room_id)
            .into_iter()
            .find(|name| name.eq_ignore_ascii_case(wanted) && !name.eq_ignore_ascii_case(actor))
            .ok_or_else(|| CommandError::NotHere.into())
    }

    fn spar(&self, actor: &str, opponent: &str) -> GameResult<Response> {
        let opponent = self.other_in_room(actor, opponent)?;
        if self.instances.instance_of(&opponent).is_some() {
            return Err(CommandError::Rejected(format!(
                "{} is already in a training instance.",
                opponent
            ))
            .into());
        }
        let challenger = self.display_name(actor)?;
        let actor_name = self.registry.with_player(actor, |p| Ok(p.name.clone()))?;
        self.instances.invite(&actor_name, &opponent, Instant::now());
        Ok(Response::text(format!(
            "You challenge {} to a duel. The offer stands for {} seconds.",
            opponent,
            instance::INVITATION_TTL.as_secs()
        ))
        .with_event(Event::player(
            &opponent,
            format!(
                "{} challenges you to a duel. Type 'spar accept {}' to step into the Duel Construct.",
                challenger, actor_name
            ),
        )))
    }

    fn spar_accept(&self, actor: &str, challenger: &str) -> GameResult<Response> {
        let challenger = self.other_in_room(actor, challenger)?;
        let b = self.registry.with_player(actor, |p| Ok(Combatant::from(&*p)))?;
        if !self.instances.take_invitation(&challenger, &b.name, Instant::now()) {
            return Err(CommandError::Rejected(format!(
                "{} has not challenged you, or the offer has lapsed.",
                challenger
            ))
            .into());
        }
        let a = self.registry.with_player(&challenger, |p| Ok(Combatant::from(&*p)))?;
        let (a_name, b_name) = (a.name.clone(), b.name.clone());
        self.instances
            .create_instance("duel", vec![a, b], Instant::now())?;
        Ok(Response::text(format!(
            "You accept {}'s challenge and step into the Duel Construct. Type 'fight' to attack.",
            a_name
        ))
        .with_event(Event::player(
            &a_name,
            format!("{} accepts your challenge. The Duel Construct loads. Type 'fight' to attack.", b_name),
        )))
    }

    fn fight(&self, actor: &str) -> GameResult<Response> {
        let id = self
            .instances
            .instance_of(actor)
            .ok_or_else(|| CommandError::Rejected("You are not in a training program.".into()))?;
        let others: Vec<String> = self
            .instances
            .participants(id)
            .into_iter()
            .filter(|name| !name.eq_ignore_ascii_case(actor))
            .collect();
        let report = self
            .instances
            .tick(id, actor, &mut rand::thread_rng(), Instant::now())?;
        let mut response = Response::lines(report.lines.clone());
        for other in &others {
            for line in &report.lines {
                response.events.push(Event::player(other, line.clone()));
            }
        }
        if let Some(result) = report.finished {
            if let Some(record) = &result.new_record {
                self.record_challenge(record);
            }
            response.lines.push(result.summary.clone());
            for other in &others {
                response.events.push(Event::player(other, result.summary.clone()));
            }
            if result.new_record.is_some() {
                response.events.push(Event::everyone(format!(
                    "{} set a new record in {}!",
                    result.winner.unwrap_or_default(),
                    result.program_id
                )));
            }
        }
        Ok(response)
    }

    fn train_quit(&self, actor: &str) -> GameResult<Response> {
        let id = self
            .instances
            .instance_of(actor)
            .ok_or_else(|| CommandError::Rejected("You are not in a training program.".into()))?;
        let others: Vec<String> = self
            .instances
            .participants(id)
            .into_iter()
            .filter(|name| !name.eq_ignore_ascii_case(actor))
            .collect();
        let result = self.instances.complete(id)?;
        if let Some(record) = &result.new_record {
            self.record_challenge(record);
        }
        let mut response = Response::lines(vec![
            result.summary.clone(),
            "The construct fades. You are back where you started.".into(),
        ]);
        for other in others {
            response
                .events
                .push(Event::player(&other, format!("{} ended the program.", actor)));
        }
        if result.new_record.is_some() {
            response.events.push(Event::everyone(format!(
                "{} set a new record in {}!",
                result.winner.unwrap_or_default(),
                result.program_id
            )));
        }
        Ok(response)
    }
}

fn blocked_in_instance(command: &Command) -> bool {
    match command.kind() {
        CommandKind::Read => false,
        CommandKind::Authoring => true,
        CommandKind::Write => !matches!(
            command,
            Command::Fight | Command::TrainQuit | Command::Save | Command::Quit | Command::Say(_)
        ),
    }
}

/// Apply experience and describe any level-ups.
fn grant_experience(player: &mut PlayerRecord, amount: u32) -> Vec<String> {
    let mut lines = vec![format!("You gain {} experience.", amount)];
    let gained = player.gain_experience(amount);
    if gained > 0 {
        lines.push(format!(
            "You are now level {}! Health and mana restored.",
            player.level
        ));
    }
    lines
}

fn describe_item(item: &crate::mud::items::Item) -> Vec<String> {
    let mut lines = vec![item.label(), item.description.clone()];
    let mut stats = Vec::new();
    if item.damage > 0 {
        stats.push(format!("damage +{}", item.damage));
    }
    if item.armor > 0 {
        stats.push(format!("armor +{}", item.armor));
    }
    if item.heals > 0 {
        stats.push(format!("heals {}", item.heals));
    }
    if let Some(slot) = item.slot {
        stats.push(format!("slot {}", slot.as_str()));
    }
    stats.push(format!("worth {} credits", item.price));
    lines.push(stats.join(", "));
    lines
}

fn format_duration(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {:02}m", h, m)
    } else {
        format!("{}m {:02}s", m, s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mud::faction::Faction;
    use crate::mud::game::GameSettings;
    use crate::mud::storage::MudStoreBuilder;
    use crate::mud::types::PlayerClass;
    use tempfile::TempDir;

    fn game_with(dir: &TempDir, names: &[&str]) -> Game {
        let store = MudStoreBuilder::new(dir.path()).open().expect("store");
        let game = Game::open(store, GameSettings::default()).expect("game");
        for name in names {
            game.enter(PlayerRecord::new(name, "construct", PlayerClass::Operator));
        }
        game
    }

    #[test]
    fn unknown_command_has_no_side_effects() {
        let dir = TempDir::new().expect("tempdir");
        let game = game_with(&dir, &["Neo"]);
        let before = game.registry().snapshot("neo");
        let response = game.handle("Neo", "xyzzy");
        assert_eq!(response.lines, vec![CommandError::Unknown.to_string()]);
        assert!(response.events.is_empty());
        assert_eq!(game.registry().snapshot("neo"), before);
    }

    #[test]
    fn movement_emits_departure_and_arrival() {
        let dir = TempDir::new().expect("tempdir");
        let game = game_with(&dir, &["Neo"]);
        let response = game.handle("Neo", "north");
        assert_eq!(game.registry().room_of("neo").as_deref(), Some("downtown"));
        assert!(response.lines[0].contains("Downtown"));
        assert_eq!(response.events.len(), 2);
        assert_eq!(response.events[0].scope, Scope::Room("construct".into()));
        assert_eq!(response.events[1].scope, Scope::Room("downtown".into()));
    }

    #[test]
    fn take_then_drop_moves_ownership() {
        let dir = TempDir::new().expect("tempdir");
        let game = game_with(&dir, &["Neo"]);
        game.handle("Neo", "take red pill");
        let neo = game.registry().snapshot("neo").expect("live");
        assert_eq!(neo.inventory.len(), 1);
        assert!(game.world().room("construct").expect("room").items.is_empty());

        let response = game.handle("Neo", "take red pill");
        assert_eq!(response.lines, vec!["That is not here.".to_string()]);

        game.handle("Neo", "drop pill");
        assert!(game.registry().snapshot("neo").expect("live").inventory.is_empty());
        assert_eq!(game.world().room("construct").expect("room").items.len(), 1);
    }

    #[test]
    fn vendors_are_protected_and_trade() {
        let dir = TempDir::new().expect("tempdir");
        let game = game_with(&dir, &["Neo"]);
        game.registry()
            .with_player("neo", |p| {
                p.current_room = "subway".into();
                p.currency = 100;
                Ok(())
            })
            .expect("setup");
        let response = game.handle("Neo", "attack trainman");
        assert_eq!(response.lines, vec!["Trainman cannot be attacked.".to_string()]);

        game.handle("Neo", "buy katana");
        let neo = game.registry().snapshot("neo").expect("live");
        assert_eq!(neo.currency, 60);
        assert_eq!(neo.inventory[0].template_id, "katana");

        game.handle("Neo", "sell katana");
        assert_eq!(game.registry().snapshot("neo").expect("live").currency, 80);
        game.registry()
            .with_player("neo", |p| {
                p.currency = 30;
                Ok(())
            })
            .expect("spend");
        let broke = game.handle("Neo", "buy katana");
        assert_eq!(broke.lines, vec!["Not enough credits.".to_string()]);
    }

    #[test]
    fn quest_hand_in_rewards_once() {
        let dir = TempDir::new().expect("tempdir");
        let game = game_with(&dir, &["Neo"]);
        let chip = game
            .catalog()
            .get("data_chip")
            .expect("chip")
            .instantiate(Rarity::Common);
        game.registry()
            .with_player("neo", |p| {
                p.current_room = "oracle_kitchen".into();
                p.inventory.push(chip.clone());
                Ok(())
            })
            .expect("setup");
        game.handle("Neo", "give data chip to oracle");
        let neo = game.registry().snapshot("neo").expect("live");
        assert_eq!(neo.counters.quests_completed, 1);
        assert!(neo.inventory.is_empty());
        assert_eq!(neo.level, 2);
        assert!(neo.achievements.contains(&"courier".to_string()));
        assert_eq!(neo.standings.score(Faction::Programs), FACTION_QUEST_SHIFT);

        let again = game.handle("Neo", "give data chip to oracle");
        assert_eq!(again.lines, vec![CommandError::NotHeld.to_string()]);
    }

    #[test]
    fn strike_goes_on_cooldown() {
        let dir = TempDir::new().expect("tempdir");
        let game = game_with(&dir, &["Neo"]);
        game.registry()
            .with_player("neo", |p| {
                p.current_room = "rooftop".into();
                p.max_health = 10_000;
                p.health = 10_000;
                Ok(())
            })
            .expect("setup");
        game.handle("Neo", "strike smith");
        let response = game.handle("Neo", "strike smith");
        assert!(response.lines[0].starts_with("strike is not ready"));
        assert!(!game.cooldowns().is_ready("neo", Ability::Strike));
    }

    #[test]
    fn authoring_needs_privilege() {
        let dir = TempDir::new().expect("tempdir");
        let game = game_with(&dir, &["Neo"]);
        let response = game.handle("Neo", "dig west lab");
        assert_eq!(response.lines, vec![CommandError::NotPermitted.to_string()]);
        assert!(!game.world().contains("lab"));
    }

    #[test]
    fn training_blocks_world_commands() {
        let dir = TempDir::new().expect("tempdir");
        let game = game_with(&dir, &["Neo"]);
        game.handle("Neo", "train dojo");
        let response = game.handle("Neo", "north");
        assert!(response.lines[0].contains("training program"));
        assert_eq!(game.registry().room_of("neo").as_deref(), Some("construct"));
        game.handle("Neo", "train quit");
        game.handle("Neo", "north");
        assert_eq!(game.registry().room_of("neo").as_deref(), Some("downtown"));
    }
}
