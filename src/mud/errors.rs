use std::time::Duration;

use thiserror::Error;

/// Top-level error for everything a session can run into.
///
/// Gameplay errors never leave shared state mutated; the dispatcher turns
/// them into the user-visible text produced by their `Display` impl.
#[derive(Debug, Error)]
pub enum GameError {
    #[error("{0}")]
    Auth(#[from] AuthError),

    #[error("{0}")]
    Command(#[from] CommandError),

    #[error("You are sending commands too quickly. Slow down.")]
    Throttled,

    #[error("{0}")]
    Timeout(TimeoutKind),

    #[error("{0}")]
    Reconnect(#[from] ReconnectError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Malformed input from a world-authoring command.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Unexpected internal conditions (illegal state transitions etc.).
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("a name is required")]
    MissingName,

    #[error("names may only contain letters, digits, '-' and '_' (max {0} characters)")]
    InvalidName(usize),

    #[error("password too short (minimum {0} characters)")]
    PasswordTooShort(usize),

    #[error("wrong password")]
    WrongPassword,

    #[error("{0} is already connected")]
    AlreadyConnected(String),

    #[error("the server is full, try again later")]
    ServerFull,

    #[error("session is not waiting for credentials")]
    NotAuthenticating,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Unknown command. Type 'help' for a list of commands.")]
    Unknown,

    #[error("That is not here.")]
    NotHere,

    #[error("You are not carrying that.")]
    NotHeld,

    #[error("You can't use that that way.")]
    NotUsable,

    #[error("Not enough {0}.")]
    Insufficient(&'static str),

    #[error("There is no vendor here.")]
    NoVendor,

    #[error("{0} cannot be attacked.")]
    Protected(String),

    #[error("{ability} is not ready ({}s remaining).", .remaining.as_secs().max(1))]
    Cooldown {
        ability: &'static str,
        remaining: Duration,
    },

    #[error("You don't have permission to do that.")]
    NotPermitted,

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("{0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TimeoutKind {
    #[error("login timed out")]
    Login,
    #[error("idle timeout")]
    Idle,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconnectError {
    #[error("unknown reconnection token")]
    UnknownToken,
    #[error("reconnection window expired")]
    Expired,
}

/// Errors that can arise while interacting with the durable store.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("schema mismatch for {entity}: expected {expected}, got {found}")]
    SchemaMismatch {
        entity: &'static str,
        expected: u8,
        found: u8,
    },

    #[error("corrupt store: {0}")]
    Corrupt(String),

    #[error("password hashing failed: {0}")]
    Hash(String),
}

impl GameError {
    /// Whether this error was caused by the player's input rather than the server.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            GameError::Auth(_)
                | GameError::Command(_)
                | GameError::Throttled
                | GameError::Reconnect(_)
                | GameError::Validation(_)
        )
    }
}

pub type GameResult<T> = Result<T, GameError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_messages_are_stable() {
        let err = GameError::from(AuthError::PasswordTooShort(4));
        assert!(err.to_string().contains("password too short"));
        assert!(err.is_user_facing());
    }

    #[test]
    fn cooldown_message_rounds_up_to_a_second() {
        let err = CommandError::Cooldown {
            ability: "heal",
            remaining: Duration::from_millis(200),
        };
        assert_eq!(err.to_string(), "heal is not ready (1s remaining).");
    }

    #[test]
    fn persistence_errors_are_not_user_facing() {
        let err = GameError::from(PersistenceError::NotFound("room: x".into()));
        assert!(!err.is_user_facing());
    }
}
