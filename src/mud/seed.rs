//! Canonical world content used on first start, plus procedural room generation.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::mud::faction::Faction;
use crate::mud::items::{EquipSlot, ItemCatalog, ItemTemplate, Rarity};
use crate::mud::types::{
    Direction, NpcFlag, NpcRecord, QuestDescriptor, RoomFlag, RoomRecord,
};

/// Room every new entity starts in and every dead entity respawns in.
pub const START_ROOM_ID: &str = "construct";

pub const CANONICAL_ROOM_IDS: &[&str] = &[
    START_ROOM_ID,
    "dojo",
    "downtown",
    "alley",
    "oracle_kitchen",
    "subway",
    "rooftop",
    "nebuchadnezzar",
    "server_room",
];

pub fn item_catalog() -> ItemCatalog {
    ItemCatalog::new(vec![
        ItemTemplate::new("katana", "katana", "A razor-edged blade, lighter than it looks.")
            .weapon(6)
            .priced(40),
        ItemTemplate::new("pistol", "pistol", "A matte black sidearm.")
            .weapon(4)
            .priced(30),
        ItemTemplate::new("long_coat", "long coat", "Black leather, ankle length.")
            .wearable(EquipSlot::Body, 2)
            .priced(25),
        ItemTemplate::new("sunglasses", "sunglasses", "Small oval lenses. Very dark.")
            .wearable(EquipSlot::Eyes, 1)
            .priced(15),
        ItemTemplate::new("helmet", "helmet", "A scuffed tactical helmet.")
            .wearable(EquipSlot::Head, 2)
            .priced(20),
        ItemTemplate::new("red_pill", "red pill", "Take it and see how deep the rabbit hole goes.")
            .consumable(30)
            .priced(10),
        ItemTemplate::new("blue_pill", "blue pill", "The story ends. You wake up in your bed.")
            .consumable(10)
            .priced(5),
        ItemTemplate::new("cookie", "cookie", "Still warm. You'll feel right as rain.")
            .consumable(15)
            .priced(3),
        ItemTemplate::new("data_chip", "data chip", "An encrypted shard of someone's memory.")
            .priced(50),
    ])
}

/// The rooms written to an empty store.
pub fn canonical_world(catalog: &ItemCatalog) -> Vec<RoomRecord> {
    let item = |id: &str| catalog.get(id).map(|t| t.instantiate(Rarity::Common));

    let mut construct = RoomRecord::new(
        START_ROOM_ID,
        "The Construct",
        "Endless white in every direction. A loading program hums somewhere out of sight.",
    )
    .with_symbol('@', "white")
    .with_exit(Direction::North, "downtown")
    .with_exit(Direction::East, "dojo")
    .with_exit(Direction::Up, "nebuchadnezzar");
    if let Some(pill) = item("red_pill") {
        construct = construct.with_item(pill);
    }

    let dojo = RoomRecord::new(
        "dojo",
        "Dojo",
        "Paper walls and a polished wooden floor. Type 'train list' to see the programs.",
    )
    .with_symbol('D', "yellow")
    .with_exit(Direction::West, START_ROOM_ID);

    let downtown = RoomRecord::new(
        "downtown",
        "Downtown",
        "A crowded street. Everyone walks a little too uniformly.",
    )
    .with_symbol('#', "green")
    .with_exit(Direction::South, START_ROOM_ID)
    .with_exit(Direction::North, "alley")
    .with_exit(Direction::East, "oracle_kitchen")
    .with_exit(Direction::West, "subway");

    let mut cop = NpcRecord::new(
        "cop",
        "cop",
        "A beat cop who keeps touching his earpiece.",
        30,
    )
    .with_faction(Faction::Machines)
    .with_combat(3, 1, 20);
    if let Some(pistol) = item("pistol") {
        cop = cop.with_loot(pistol);
    }
    let alley = RoomRecord::new(
        "alley",
        "Dark Alley",
        "Rain runs down brick walls. A payphone rings somewhere.",
    )
    .with_symbol('%', "gray")
    .with_exit(Direction::South, "downtown")
    .with_exit(Direction::Up, "rooftop")
    .with_npc(cop);

    let oracle = NpcRecord::new(
        "oracle",
        "Oracle",
        "A woman in an apron, smoking over a tray of cookies.",
        50,
    )
    .with_flag(NpcFlag::Protected)
    .with_faction(Faction::Programs)
    .with_greeting("I'd ask you to sit down, but you're not going to anyway. Bring me a data chip.")
    .with_quest(QuestDescriptor {
        wanted_item: "data_chip".into(),
        reward_xp: 150,
        reward_message: "The Oracle smiles. \"You already knew you'd bring it.\"".into(),
    });
    let mut oracle_kitchen = RoomRecord::new(
        "oracle_kitchen",
        "Oracle's Kitchen",
        "A small apartment kitchen that smells of baking.",
    )
    .with_symbol('O', "magenta")
    .with_exit(Direction::West, "downtown")
    .with_npc(oracle);
    if let Some(cookie) = item("cookie") {
        oracle_kitchen = oracle_kitchen.with_item(cookie);
    }

    let trainman = NpcRecord::new(
        "trainman",
        "Trainman",
        "A scruffy figure guarding a cart of contraband.",
        80,
    )
    .with_flag(NpcFlag::Vendor)
    .with_faction(Faction::Exiles)
    .with_greeting("Down here, I'm God. Want to buy something?")
    .with_stock("katana")
    .with_stock("long_coat")
    .with_stock("sunglasses")
    .with_stock("helmet")
    .with_stock("red_pill")
    .with_stock("blue_pill");
    let subway = RoomRecord::new(
        "subway",
        "Mobil Ave Station",
        "An empty platform between worlds. The trains never stop here.",
    )
    .with_symbol('=', "cyan")
    .with_exit(Direction::East, "downtown")
    .with_exit(Direction::Down, "server_room")
    .with_npc(trainman);

    let agent = NpcRecord::new(
        "agent_smith",
        "Agent Smith",
        "A man in a grey suit. He has been expecting you.",
        120,
    )
    .with_faction(Faction::Machines)
    .with_combat(7, 4, 120)
    .with_greeting("Mister Anderson.");
    let rooftop = RoomRecord::new(
        "rooftop",
        "Rooftop",
        "Wind tears across a gravel roof high above the city. A helicopter pad sits empty.",
    )
    .with_symbol('^', "red")
    .with_flag(RoomFlag::Pvp)
    .with_exit(Direction::Down, "alley")
    .with_npc(agent);

    let morpheus = NpcRecord::new(
        "morpheus",
        "Morpheus",
        "He studies you over mirrored glasses.",
        150,
    )
    .with_flag(NpcFlag::Protected)
    .with_faction(Faction::Resistance)
    .with_greeting("Free your mind.");
    let nebuchadnezzar = RoomRecord::new(
        "nebuchadnezzar",
        "Nebuchadnezzar",
        "The hovercraft's main deck. Cables hang from every chair.",
    )
    .with_symbol('N', "blue")
    .with_exit(Direction::Down, START_ROOM_ID)
    .with_npc(morpheus);

    let mut sentinel = NpcRecord::new(
        "sentinel",
        "Sentinel",
        "A squid-like machine drifting between the racks, eye glowing red.",
        60,
    )
    .with_faction(Faction::Machines)
    .with_combat(5, 2, 60);
    if let Some(chip) = item("data_chip") {
        sentinel = sentinel.with_loot(chip);
    }
    let server_room = RoomRecord::new(
        "server_room",
        "Server Room",
        "Rows of humming racks stretch into the dark.",
    )
    .with_symbol('S', "green")
    .with_exit(Direction::Up, "subway")
    .with_npc(sentinel);

    vec![
        construct,
        dojo,
        downtown,
        alley,
        oracle_kitchen,
        subway,
        rooftop,
        nebuchadnezzar,
        server_room,
    ]
}

const GENERATED_PLACES: &[(&str, &str, char, &str)] = &[
    ("Abandoned Office", "Cubicles sit in rows under flickering fluorescent light.", 'o', "white"),
    ("Flooded Tunnel", "Ankle-deep water reflects green code scrolling on the walls.", '~', "cyan"),
    ("Hotel Corridor", "Identical doors run in both directions forever.", 'h', "yellow"),
    ("Nightclub", "Bass thuds through the floor. Nobody looks at you directly.", 'c', "magenta"),
    ("Parking Garage", "Concrete pillars and the smell of oil.", 'p', "gray"),
    ("Empty Lobby", "Marble floors, a metal detector and no guards. Yet.", 'l', "white"),
];

const GENERATED_PROGRAMS: &[(&str, &str)] = &[
    ("stray program", "A flickering figure that doesn't quite belong here."),
    ("exile", "A program that refused deletion, eyeing you warily."),
    ("sentry drone", "A small machine scanning the room with a red beam."),
];

/// Produce a new room with a random theme, optionally populated.
/// The caller wires its exits and assigns the id.
pub fn generate_room<R: Rng + ?Sized>(
    id: &str,
    catalog: &ItemCatalog,
    rng: &mut R,
) -> RoomRecord {
    let (name, description, symbol, color) = GENERATED_PLACES
        .choose(rng)
        .copied()
        .unwrap_or(GENERATED_PLACES[0]);
    let mut room = RoomRecord::new(id, name, description)
        .with_symbol(symbol, color)
        .with_flag(RoomFlag::Generated);

    if rng.gen_bool(0.5) {
        if let Some(item) = catalog.random_drop(rng) {
            room = room.with_item(item);
        }
    }
    if rng.gen_bool(0.4) {
        let (npc_name, npc_desc) = GENERATED_PROGRAMS
            .choose(rng)
            .copied()
            .unwrap_or(GENERATED_PROGRAMS[0]);
        let health = rng.gen_range(20..=45);
        let faction = if npc_name == "exile" {
            Faction::Exiles
        } else {
            Faction::Machines
        };
        let mut npc = NpcRecord::new(&format!("{}_{}", id, npc_name.replace(' ', "_")), npc_name, npc_desc, health)
            .with_faction(faction)
            .with_combat(rng.gen_range(2..=5), rng.gen_range(0..=2), health / 2);
        if let Some(loot) = catalog.random_drop(rng) {
            npc = npc.with_loot(loot);
        }
        room = room.with_npc(npc);
    }
    room
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mud::world::reachable;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::BTreeMap;

    #[test]
    fn canonical_world_is_fully_reachable() {
        let catalog = item_catalog();
        let rooms = canonical_world(&catalog);
        let ids: Vec<&str> = rooms.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, CANONICAL_ROOM_IDS);
        let graph: BTreeMap<String, Vec<String>> = rooms
            .iter()
            .map(|r| (r.id.clone(), r.exits.values().cloned().collect()))
            .collect();
        assert_eq!(reachable(&graph, START_ROOM_ID).len(), rooms.len());
        for room in &rooms {
            for target in room.exits.values() {
                assert!(graph.contains_key(target), "{} -> {}", room.id, target);
            }
        }
    }

    #[test]
    fn start_room_has_no_cop() {
        let rooms = canonical_world(&item_catalog());
        let start = rooms.iter().find(|r| r.id == START_ROOM_ID).expect("start");
        assert!(start.find_npc("cop").is_none());
    }

    #[test]
    fn vendor_stock_exists_in_catalog() {
        let catalog = item_catalog();
        for room in canonical_world(&catalog) {
            for npc in &room.npcs {
                for id in &npc.stock {
                    assert!(catalog.get(id).is_some(), "missing {}", id);
                }
            }
        }
    }

    #[test]
    fn generated_rooms_are_flagged() {
        let catalog = item_catalog();
        let mut rng = StdRng::seed_from_u64(3);
        let room = generate_room("gen_1", &catalog, &mut rng);
        assert_eq!(room.id, "gen_1");
        assert!(room.flags.contains(&RoomFlag::Generated));
        assert!(room.exits.is_empty());
    }
}
