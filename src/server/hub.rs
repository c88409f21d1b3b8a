//! Delivery of output to connected sessions.
//!
//! Each live connection registers an unbounded sender under its entity
//! name. Events produced by the dispatcher are fanned out here; every
//! recipient gets at most one copy of each event.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use log::debug;
use tokio::sync::mpsc::UnboundedSender;

use crate::mud::dispatch::{Event, Scope};
use crate::mud::sync::{read, write};
use crate::mud::Game;

/// Frames queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Line(String),
    /// Suppress the client's local echo (password entry).
    EchoOff,
    EchoOn,
    /// Raw telnet negotiation bytes.
    Telnet(Vec<u8>),
    /// Flush and close the connection.
    Close,
}

#[derive(Debug, Clone)]
struct Subscriber {
    connection: u64,
    tx: UnboundedSender<Outbound>,
}

pub struct Hub {
    game: Arc<Game>,
    sessions: RwLock<HashMap<String, Subscriber>>,
}

fn key(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

impl Hub {
    pub fn new(game: Arc<Game>) -> Self {
        Self {
            game,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, name: &str, connection: u64, tx: UnboundedSender<Outbound>) {
        write(&self.sessions).insert(key(name), Subscriber { connection, tx });
    }

    /// Remove `name` only if it is still bound to `connection`.
    pub fn unregister(&self, name: &str, connection: u64) {
        let mut sessions = write(&self.sessions);
        if sessions
            .get(&key(name))
            .is_some_and(|s| s.connection == connection)
        {
            sessions.remove(&key(name));
        }
    }

    pub fn is_connected(&self, name: &str) -> bool {
        read(&self.sessions).contains_key(&key(name))
    }

    pub fn connected(&self) -> usize {
        read(&self.sessions).len()
    }

    pub fn send(&self, name: &str, frame: Outbound) -> bool {
        let tx = read(&self.sessions).get(&key(name)).map(|s| s.tx.clone());
        match tx {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    pub fn send_line(&self, name: &str, text: impl Into<String>) -> bool {
        self.send(name, Outbound::Line(text.into()))
    }

    /// Deliver dispatcher events. Returns how many frames were queued.
    pub fn publish(&self, events: &[Event]) -> usize {
        events.iter().map(|event| self.publish_one(event)).sum()
    }

    fn publish_one(&self, event: &Event) -> usize {
        let excluded = event.exclude.as_deref().map(key);
        let recipients: Vec<String> = match &event.scope {
            Scope::Room(room_id) => self.game.registry().in_room(room_id),
            Scope::Player(name) => vec![name.clone()],
            Scope::Everyone => read(&self.sessions).keys().cloned().collect(),
        };
        let mut seen = HashSet::new();
        let sessions = read(&self.sessions);
        let mut delivered = 0;
        for name in recipients {
            let k = key(&name);
            if excluded.as_deref() == Some(k.as_str()) || !seen.insert(k.clone()) {
                continue;
            }
            if let Some(subscriber) = sessions.get(&k) {
                if subscriber.tx.send(Outbound::Line(event.text.clone())).is_ok() {
                    delivered += 1;
                }
            }
        }
        debug!("event delivered to {} session(s)", delivered);
        delivered
    }

    /// Announcement to every connected session, bypassing the dispatcher.
    pub fn broadcast(&self, text: &str) -> usize {
        self.publish(&[Event::everyone(text)])
    }

    /// Ask a connection to close. The connection logs its entity out.
    pub fn kick(&self, name: &str) -> bool {
        self.send(name, Outbound::Close)
    }

    /// Close every connection.
    pub fn close_all(&self) {
        for subscriber in read(&self.sessions).values() {
            let _ = subscriber.tx.send(Outbound::Close);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mud::types::{PlayerClass, PlayerRecord};
    use crate::mud::{GameSettings, MudStore};
    use tempfile::TempDir;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn drain(rx: &mut UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn room_events_skip_the_actor_and_other_rooms() {
        let dir = TempDir::new().unwrap();
        let store = MudStore::open(dir.path().join("db")).unwrap();
        let game = Arc::new(Game::open(store, GameSettings::default()).unwrap());
        for (name, room) in [("Neo", "construct"), ("Trinity", "construct"), ("Tank", "dojo")] {
            game.enter(PlayerRecord::new(name, room, PlayerClass::Operator));
        }
        let hub = Hub::new(game);
        let (tx_neo, mut rx_neo) = unbounded_channel();
        let (tx_tri, mut rx_tri) = unbounded_channel();
        let (tx_tank, mut rx_tank) = unbounded_channel();
        hub.register("Neo", 1, tx_neo);
        hub.register("Trinity", 2, tx_tri);
        hub.register("Tank", 3, tx_tank);

        let sent = hub.publish(&[Event::room("construct", "Neo waves.", "neo")]);
        assert_eq!(sent, 1);
        assert!(drain(&mut rx_neo).is_empty());
        assert_eq!(drain(&mut rx_tri), vec![Outbound::Line("Neo waves.".into())]);
        assert!(drain(&mut rx_tank).is_empty());

        assert_eq!(hub.broadcast("System failure."), 3);
        assert_eq!(drain(&mut rx_tank).len(), 1);
    }

    #[test]
    fn stale_connection_cannot_unregister_a_newer_one() {
        let dir = TempDir::new().unwrap();
        let store = MudStore::open(dir.path().join("db")).unwrap();
        let game = Arc::new(Game::open(store, GameSettings::default()).unwrap());
        let hub = Hub::new(game);
        let (old_tx, _old_rx) = unbounded_channel();
        let (new_tx, mut new_rx) = unbounded_channel();
        hub.register("Neo", 1, old_tx);
        hub.register("Neo", 2, new_tx);
        hub.unregister("neo", 1);
        assert!(hub.is_connected("Neo"));
        assert!(hub.kick("Neo"));
        assert_eq!(drain(&mut new_rx), vec![Outbound::Close]);
    }
}
