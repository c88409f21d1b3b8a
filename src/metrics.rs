//! Process-wide counters for the admin `stats` command.
use std::sync::atomic::{AtomicU64, Ordering};

static CONNECTIONS_ACCEPTED: AtomicU64 = AtomicU64::new(0);
static LOGINS: AtomicU64 = AtomicU64::new(0);
static AUTH_FAILURES: AtomicU64 = AtomicU64::new(0);
static COMMANDS_EXECUTED: AtomicU64 = AtomicU64::new(0);
static COMMANDS_THROTTLED: AtomicU64 = AtomicU64::new(0);
static SAVES: AtomicU64 = AtomicU64::new(0);
static SAVE_FAILURES: AtomicU64 = AtomicU64::new(0);
static RECONNECTS: AtomicU64 = AtomicU64::new(0);

pub fn inc_connections_accepted() {
    CONNECTIONS_ACCEPTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_logins() {
    LOGINS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_auth_failures() {
    AUTH_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_commands_executed() {
    COMMANDS_EXECUTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_commands_throttled() {
    COMMANDS_THROTTLED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_saves() {
    SAVES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_save_failures() {
    SAVE_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_reconnects() {
    RECONNECTS.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub connections_accepted: u64,
    pub logins: u64,
    pub auth_failures: u64,
    pub commands_executed: u64,
    pub commands_throttled: u64,
    pub saves: u64,
    pub save_failures: u64,
    pub reconnects: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        connections_accepted: CONNECTIONS_ACCEPTED.load(Ordering::Relaxed),
        logins: LOGINS.load(Ordering::Relaxed),
        auth_failures: AUTH_FAILURES.load(Ordering::Relaxed),
        commands_executed: COMMANDS_EXECUTED.load(Ordering::Relaxed),
        commands_throttled: COMMANDS_THROTTLED.load(Ordering::Relaxed),
        saves: SAVES.load(Ordering::Relaxed),
        save_failures: SAVE_FAILURES.load(Ordering::Relaxed),
        reconnects: RECONNECTS.load(Ordering::Relaxed),
    }
}

impl Snapshot {
    /// One line per counter, as printed by the admin channel.
    pub fn lines(&self) -> Vec<String> {
        vec![
            format!("connections accepted: {}", self.connections_accepted),
            format!("logins: {}", self.logins),
            format!("auth failures: {}", self.auth_failures),
            format!("commands executed: {}", self.commands_executed),
            format!("commands throttled: {}", self.commands_throttled),
            format!("saves: {} ({} failed)", self.saves, self.save_failures),
            format!("reconnects: {}", self.reconnects),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Counters are global and other tests bump them concurrently, so only
    // monotonic growth is asserted.
    #[test]
    fn counters_only_grow() {
        let before = snapshot();
        inc_logins();
        inc_commands_throttled();
        let after = snapshot();
        assert!(after.logins > before.logins);
        assert!(after.commands_throttled > before.commands_throttled);
        assert_eq!(after.lines().len(), 7);
    }
}
