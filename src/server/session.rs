//! Session lifecycle, authentication and reconnection.
//!
//! A session is in exactly one [`SessionState`]; every transition goes
//! through [`SessionState::on`], which is a lookup in one table. The
//! [`SessionManager`] binds authenticated entities to sessions and parks
//! entities whose connection dropped under a reconnection token.
//!
//! ```text
//! Connecting --Greeted--> Authenticating --Authenticated/Reconnected--> Active
//! Active --Disconnected--> Detached --Reconnected--> Active
//! Detached --Expired--> Terminated
//! Active/Authenticating --LoggedOut/TimedOut--> Terminated
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use argon2::{Algorithm, Argon2, Params, Version};
use log::{debug, info, warn};
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use rand::RngCore;

use crate::config::{Argon2Config, SessionConfig};
use crate::logutil::escape_log;
use crate::mud::errors::{AuthError, GameError, GameResult, PersistenceError, ReconnectError};
use crate::mud::sync::lock;
use crate::mud::types::PlayerClass;
use crate::mud::Game;

pub const MAX_NAME_LEN: usize = 16;
const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Active,
    /// Connection lost; entity parked under a reconnection token.
    Detached,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Greeted,
    Authenticated,
    Reconnected,
    Disconnected,
    TimedOut,
    LoggedOut,
    Expired,
}

impl SessionState {
    /// The transition table. `None` marks an illegal transition.
    fn next(self, event: SessionEvent) -> Option<SessionState> {
        use SessionEvent as E;
        use SessionState as S;
        match (self, event) {
            (S::Connecting, E::Greeted) => Some(S::Authenticating),
            (S::Connecting, E::Disconnected | E::TimedOut) => Some(S::Terminated),
            (S::Authenticating, E::Authenticated | E::Reconnected) => Some(S::Active),
            (S::Authenticating, E::Disconnected | E::TimedOut | E::LoggedOut) => {
                Some(S::Terminated)
            }
            (S::Active, E::Disconnected) => Some(S::Detached),
            (S::Active, E::TimedOut | E::LoggedOut) => Some(S::Terminated),
            (S::Detached, E::Reconnected) => Some(S::Active),
            (S::Detached, E::Expired | E::LoggedOut) => Some(S::Terminated),
            _ => None,
        }
    }

    /// Apply `event`. An illegal transition leaves the state unchanged.
    pub fn on(&mut self, event: SessionEvent) -> GameResult<SessionState> {
        match self.next(event) {
            Some(next) => {
                *self = next;
                Ok(next)
            }
            None => Err(GameError::Internal(format!(
                "illegal session transition {:?} on {:?}",
                event, self
            ))),
        }
    }

    /// How long a session may stay in this state without progress.
    pub fn timeout(self, config: &SessionConfig) -> Option<Duration> {
        match self {
            SessionState::Connecting | SessionState::Authenticating => Some(config.login_timeout()),
            SessionState::Active => Some(config.idle_timeout()),
            SessionState::Detached => Some(config.reconnect_window()),
            SessionState::Terminated => None,
        }
    }
}

/// Opaque reconnection token: 32 random bytes, hex encoded.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ReconnectToken(String);

impl ReconnectToken {
    pub fn mint() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes.iter().map(|b| format!("{:02x}", b)).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReconnectToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Tokens are credentials; keep them out of debug output.
impl fmt::Debug for ReconnectToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReconnectToken(..)")
    }
}

/// A successful authentication or reconnection.
#[derive(Debug, Clone)]
pub struct Login {
    /// Canonical entity name, as stored.
    pub name: String,
    pub token: ReconnectToken,
    /// A new entity was provisioned.
    pub created: bool,
    /// The entity was parked and has been re-bound.
    pub resumed: bool,
}

#[derive(Debug)]
struct Binding {
    name: String,
    state: SessionState,
    token: Option<ReconnectToken>,
    detached_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Bindings {
    by_name: HashMap<String, Binding>,
    tokens: HashMap<ReconnectToken, String>,
}

impl Bindings {
    fn live_sessions(&self) -> usize {
        self.by_name
            .values()
            .filter(|b| matches!(b.state, SessionState::Authenticating | SessionState::Active))
            .count()
    }

    fn rebind(&mut self, key: &str) -> Option<ReconnectToken> {
        let binding = self.by_name.get_mut(key)?;
        if let Some(old) = binding.token.take() {
            self.tokens.remove(&old);
        }
        let token = ReconnectToken::mint();
        binding.token = Some(token.clone());
        binding.detached_at = None;
        self.tokens.insert(token.clone(), key.to_string());
        Some(token)
    }

    fn remove(&mut self, key: &str) -> Option<Binding> {
        let binding = self.by_name.remove(key)?;
        if let Some(token) = &binding.token {
            self.tokens.remove(token);
        }
        Some(binding)
    }
}

pub fn build_argon2(config: Option<&Argon2Config>) -> Argon2<'static> {
    match config {
        Some(a) => {
            let defaults = Params::DEFAULT;
            let mem = a.memory_kib.unwrap_or(defaults.m_cost());
            let time = a.time_cost.unwrap_or(defaults.t_cost());
            let para = a.parallelism.unwrap_or(defaults.p_cost());
            match Params::new(mem, time, para, None) {
                Ok(params) => Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
                Err(e) => {
                    warn!("Invalid Argon2 parameters ({}), using defaults", e);
                    Argon2::default()
                }
            }
        }
        None => Argon2::default(),
    }
}

pub fn hash_secret(argon2: &Argon2<'_>, secret: &str) -> GameResult<String> {
    let salt = SaltString::generate(&mut rand::thread_rng());
    let hash = argon2
        .hash_password(secret.as_bytes(), &salt)
        .map_err(|e| PersistenceError::Hash(e.to_string()))?;
    Ok(hash.to_string())
}

pub fn verify_secret(argon2: &Argon2<'_>, phc: &str, secret: &str) -> GameResult<bool> {
    let parsed = PasswordHash::new(phc)
        .map_err(|e| PersistenceError::Corrupt(format!("stored password hash: {}", e)))?;
    Ok(argon2.verify_password(secret.as_bytes(), &parsed).is_ok())
}

fn key(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

pub fn validate_name(name: &str) -> Result<&str, AuthError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AuthError::MissingName);
    }
    let valid = name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(AuthError::InvalidName(MAX_NAME_LEN));
    }
    Ok(name)
}

pub struct SessionManager {
    game: Arc<Game>,
    config: SessionConfig,
    max_sessions: usize,
    argon2: Argon2<'static>,
    bindings: Mutex<Bindings>,
}

impl SessionManager {
    pub fn new(
        game: Arc<Game>,
        config: SessionConfig,
        max_sessions: usize,
        argon2: Option<&Argon2Config>,
    ) -> Self {
        Self {
            game,
            config,
            max_sessions,
            argon2: build_argon2(argon2),
            bindings: Mutex::new(Bindings::default()),
        }
    }

    pub fn game(&self) -> &Arc<Game> {
        &self.game
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Check credentials and bind the entity to a new session.
    ///
    /// Unknown names provision a new entity at the start room. A parked
    /// entity is re-bound as if its token had been presented. Hashing is
    /// slow; call this off the async executor.
    pub fn authenticate(&self, name: &str, secret: &str) -> GameResult<Login> {
        let name = validate_name(name)?;
        if secret.chars().count() < self.config.min_password_len {
            return Err(AuthError::PasswordTooShort(self.config.min_password_len).into());
        }
        let k = key(name);

        // Reserve the name so a concurrent login for it fails fast.
        let resuming = {
            let mut bindings = lock(&self.bindings);
            match bindings.by_name.get(&k).map(|b| b.state) {
                Some(SessionState::Detached) => true,
                Some(_) => return Err(AuthError::AlreadyConnected(name.to_string()).into()),
                None => {
                    if bindings.live_sessions() >= self.max_sessions {
                        return Err(AuthError::ServerFull.into());
                    }
                    bindings.by_name.insert(
                        k.clone(),
                        Binding {
                            name: name.to_string(),
                            state: SessionState::Authenticating,
                            token: None,
                            detached_at: None,
                        },
                    );
                    false
                }
            }
        };

        let outcome = match self.check_credentials(name, secret) {
            Ok(_) if resuming => {
                return self.resume(&k).ok_or_else(|| ReconnectError::Expired.into());
            }
            Ok(created) => self.bind_new(&k, name, created),
            Err(err) => Err(err),
        };
        if outcome.is_err() && !resuming {
            lock(&self.bindings).remove(&k);
        }
        if let Err(err) = &outcome {
            info!(target: "security", "login failed for {}: {}", escape_log(name), err);
        }
        outcome
    }

    /// Verify `secret`, storing a new credential for an unknown name.
    /// Returns whether the credential was created.
    fn check_credentials(&self, name: &str, secret: &str) -> GameResult<bool> {
        let store = self.game.store();
        match store.get_credential(name)? {
            Some(phc) => {
                if verify_secret(&self.argon2, &phc, secret)? {
                    Ok(false)
                } else {
                    Err(AuthError::WrongPassword.into())
                }
            }
            None => {
                let phc = hash_secret(&self.argon2, secret)?;
                store.put_credential(name, &phc)?;
                Ok(true)
            }
        }
    }

    fn bind_new(&self, k: &str, name: &str, created: bool) -> GameResult<Login> {
        let (player, fresh) = self.game.load_or_create_player(name, PlayerClass::default())?;
        if fresh {
            self.game.store().put_player(&player)?;
        }
        let canonical = player.name.clone();
        self.game.enter(player);

        let mut bindings = lock(&self.bindings);
        let binding = bindings
            .by_name
            .get_mut(k)
            .ok_or_else(|| GameError::Internal(format!("binding for {} vanished", name)))?;
        binding.state.on(SessionEvent::Authenticated)?;
        binding.name = canonical.clone();
        let token = bindings
            .rebind(k)
            .ok_or_else(|| GameError::Internal(format!("binding for {} vanished", name)))?;
        info!(target: "security", "login ok: {}{}", canonical, if created { " (new)" } else { "" });
        Ok(Login {
            name: canonical,
            token,
            created: created || fresh,
            resumed: false,
        })
    }

    fn resume(&self, k: &str) -> Option<Login> {
        let mut bindings = lock(&self.bindings);
        let binding = bindings.by_name.get_mut(k)?;
        if binding.state.on(SessionEvent::Reconnected).is_err() {
            return None;
        }
        let name = binding.name.clone();
        let token = bindings.rebind(k)?;
        info!(target: "security", "session resumed: {}", name);
        Some(Login {
            name,
            token,
            created: false,
            resumed: true,
        })
    }

    /// Re-bind a parked entity by token. The token is consumed and a
    /// fresh one minted. An expired token logs the entity out.
    pub fn reconnect(&self, token: &str) -> GameResult<Login> {
        self.reconnect_at(token, Instant::now())
    }

    pub fn reconnect_at(&self, token: &str, now: Instant) -> GameResult<Login> {
        let token = ReconnectToken(token.trim().to_ascii_lowercase());
        let (k, expired) = {
            let bindings = lock(&self.bindings);
            let k = bindings
                .tokens
                .get(&token)
                .cloned()
                .ok_or(ReconnectError::UnknownToken)?;
            let binding = bindings.by_name.get(&k).ok_or(ReconnectError::UnknownToken)?;
            match (binding.state, binding.detached_at) {
                (SessionState::Detached, Some(at)) => {
                    (k, now.saturating_duration_since(at) > self.config.reconnect_window())
                }
                (SessionState::Active, _) => {
                    return Err(AuthError::AlreadyConnected(binding.name.clone()).into())
                }
                _ => return Err(ReconnectError::UnknownToken.into()),
            }
        };
        if expired {
            self.terminate(&k, SessionEvent::Expired);
            return Err(ReconnectError::Expired.into());
        }
        self.resume(&k).ok_or_else(|| ReconnectError::UnknownToken.into())
    }

    /// Park an entity whose connection dropped without `quit`.
    pub fn detach(&self, name: &str) -> Option<ReconnectToken> {
        self.detach_at(name, Instant::now())
    }

    pub fn detach_at(&self, name: &str, now: Instant) -> Option<ReconnectToken> {
        let mut bindings = lock(&self.bindings);
        let binding = bindings.by_name.get_mut(&key(name))?;
        if let Err(err) = binding.state.on(SessionEvent::Disconnected) {
            debug!("detach ignored: {}", err);
            return None;
        }
        binding.detached_at = Some(now);
        info!("{} detached; reconnect window open", binding.name);
        binding.token.clone()
    }

    /// Explicit logout (quit, idle timeout, kick): save and unbind.
    pub fn logout(&self, name: &str, event: SessionEvent) -> bool {
        self.terminate(&key(name), event)
    }

    fn terminate(&self, k: &str, event: SessionEvent) -> bool {
        let Some(name) = self.begin_terminate(k, event) else {
            return false;
        };
        if let Err(err) = self.game.leave(&name) {
            warn!("Failed to save {} on logout: {}", name, err);
        }
        self.finish_terminate(k);
        true
    }

    /// Mark the binding Terminated and revoke its token. The binding stays
    /// until the entity is saved, so a login for the name is refused in
    /// between instead of reading the stale stored record.
    fn begin_terminate(&self, k: &str, event: SessionEvent) -> Option<String> {
        let mut bindings = lock(&self.bindings);
        let binding = bindings.by_name.get_mut(k)?;
        if binding.state == SessionState::Terminated {
            return None;
        }
        if let Err(err) = binding.state.on(event) {
            warn!("{}", err);
            binding.state = SessionState::Terminated;
        }
        let name = binding.name.clone();
        if let Some(token) = binding.token.take() {
            bindings.tokens.remove(&token);
        }
        Some(name)
    }

    fn finish_terminate(&self, k: &str) {
        let mut bindings = lock(&self.bindings);
        if matches!(bindings.by_name.get(k), Some(b) if b.state == SessionState::Terminated) {
            bindings.remove(k);
        }
    }

    /// Log out every parked entity whose reconnection window has passed.
    pub fn expire_detached(&self) -> Vec<String> {
        self.expire_detached_at(Instant::now())
    }

    pub fn expire_detached_at(&self, now: Instant) -> Vec<String> {
        let window = self.config.reconnect_window();
        let expired: Vec<(String, String)> = lock(&self.bindings)
            .by_name
            .iter()
            .filter(|(_, b)| {
                b.state == SessionState::Detached
                    && b.detached_at
                        .map(|at| now.saturating_duration_since(at) > window)
                        .unwrap_or(false)
            })
            .map(|(k, b)| (k.clone(), b.name.clone()))
            .collect();
        let mut names = Vec::with_capacity(expired.len());
        for (k, name) in expired {
            if self.terminate(&k, SessionEvent::Expired) {
                info!("{} did not reconnect in time; logged out", name);
                names.push(name);
            }
        }
        names
    }

    /// Log out everyone, parked or not. Used at shutdown.
    pub fn logout_all(&self) -> usize {
        let keys: Vec<String> = lock(&self.bindings).by_name.keys().cloned().collect();
        keys.iter()
            .filter(|k| self.terminate(k, SessionEvent::LoggedOut))
            .count()
    }

    pub fn state_of(&self, name: &str) -> Option<SessionState> {
        lock(&self.bindings).by_name.get(&key(name)).map(|b| b.state)
    }

    pub fn live_sessions(&self) -> usize {
        lock(&self.bindings).live_sessions()
    }

    pub fn detached_count(&self) -> usize {
        lock(&self.bindings)
            .by_name
            .values()
            .filter(|b| b.state == SessionState::Detached)
            .count()
    }

    pub fn verify_admin(&self, phc: &str, secret: &str) -> bool {
        verify_secret(&self.argon2, phc, secret).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mud::{GameSettings, MudStore};
    use tempfile::TempDir;

    fn cheap_argon2() -> Argon2Config {
        Argon2Config {
            memory_kib: Some(8),
            time_cost: Some(1),
            parallelism: Some(1),
        }
    }

    fn manager(dir: &TempDir, max_sessions: usize) -> SessionManager {
        let store = MudStore::open(dir.path().join("db")).unwrap();
        let game = Arc::new(Game::open(store, GameSettings::default()).unwrap());
        SessionManager::new(game, SessionConfig::default(), max_sessions, Some(&cheap_argon2()))
    }

    #[test]
    fn transition_table() {
        let mut state = SessionState::Connecting;
        assert_eq!(state.on(SessionEvent::Greeted).unwrap(), SessionState::Authenticating);
        assert_eq!(state.on(SessionEvent::Authenticated).unwrap(), SessionState::Active);
        assert_eq!(state.on(SessionEvent::Disconnected).unwrap(), SessionState::Detached);
        assert!(state.on(SessionEvent::Authenticated).is_err());
        assert_eq!(state, SessionState::Detached);
        assert_eq!(state.on(SessionEvent::Expired).unwrap(), SessionState::Terminated);
        assert_eq!(state.timeout(&SessionConfig::default()), None);
    }

    #[test]
    fn per_state_timeouts() {
        let cfg = SessionConfig::default();
        assert_eq!(SessionState::Authenticating.timeout(&cfg), Some(cfg.login_timeout()));
        assert_eq!(SessionState::Active.timeout(&cfg), Some(cfg.idle_timeout()));
        assert_eq!(SessionState::Detached.timeout(&cfg), Some(cfg.reconnect_window()));
    }

    #[test]
    fn tokens_are_long_and_distinct() {
        let a = ReconnectToken::mint();
        let b = ReconnectToken::mint();
        assert_eq!(a.as_str().len(), TOKEN_BYTES * 2);
        assert_ne!(a, b);
        assert!(!format!("{:?}", a).contains(a.as_str()));
    }

    #[test]
    fn name_validation() {
        assert_eq!(validate_name("  "), Err(AuthError::MissingName));
        assert_eq!(validate_name("bad name"), Err(AuthError::InvalidName(MAX_NAME_LEN)));
        assert_eq!(validate_name(" Neo "), Ok("Neo"));
    }

    #[test]
    fn login_rules() {
        let dir = TempDir::new().unwrap();
        let sessions = manager(&dir, 8);

        let err = sessions.authenticate("Neo", "ab").unwrap_err();
        assert!(err.to_string().contains("password too short"));
        assert!(!sessions.game().registry().is_live("Neo"));

        let login = sessions.authenticate("Neo", "there-is-no-spoon").unwrap();
        assert!(login.created);
        assert_eq!(sessions.state_of("neo"), Some(SessionState::Active));

        let err = sessions.authenticate("neo", "there-is-no-spoon").unwrap_err();
        assert!(matches!(err, GameError::Auth(AuthError::AlreadyConnected(_))));

        assert!(sessions.logout("Neo", SessionEvent::LoggedOut));
        let err = sessions.authenticate("Neo", "wrong-pass").unwrap_err();
        assert!(matches!(err, GameError::Auth(AuthError::WrongPassword)));
        let again = sessions.authenticate("Neo", "there-is-no-spoon").unwrap();
        assert!(!again.created);
    }

    #[test]
    fn server_full() {
        let dir = TempDir::new().unwrap();
        let sessions = manager(&dir, 1);
        sessions.authenticate("Neo", "secret").unwrap();
        let err = sessions.authenticate("Trinity", "secret").unwrap_err();
        assert!(matches!(err, GameError::Auth(AuthError::ServerFull)));
    }

    #[test]
    fn detach_reconnect_and_expiry() {
        let dir = TempDir::new().unwrap();
        let sessions = manager(&dir, 8);
        let login = sessions.authenticate("Neo", "secret").unwrap();
        let t0 = Instant::now();
        let parked = sessions.detach_at("Neo", t0).unwrap();
        assert_eq!(parked, login.token);
        assert!(sessions.game().registry().is_live("Neo"));

        let back = sessions
            .reconnect_at(login.token.as_str(), t0 + Duration::from_secs(5))
            .unwrap();
        assert!(back.resumed);
        assert_ne!(back.token, login.token);
        // The consumed token no longer works.
        assert!(sessions.reconnect(login.token.as_str()).is_err());

        sessions.detach_at("Neo", t0).unwrap();
        let late = t0 + SessionConfig::default().reconnect_window() + Duration::from_secs(1);
        let err = sessions.reconnect_at(back.token.as_str(), late).unwrap_err();
        assert!(matches!(err, GameError::Reconnect(ReconnectError::Expired)));
        assert!(!sessions.game().registry().is_live("Neo"));
        assert_eq!(sessions.state_of("Neo"), None);
    }

    #[test]
    fn name_stays_reserved_until_the_save_finishes() {
        let dir = TempDir::new().unwrap();
        let sessions = manager(&dir, 8);
        let login = sessions.authenticate("Neo", "secret").unwrap();
        sessions.game().handle("Neo", "north");

        let name = sessions.begin_terminate("neo", SessionEvent::LoggedOut).unwrap();
        assert_eq!(name, "Neo");
        assert_eq!(sessions.state_of("Neo"), Some(SessionState::Terminated));
        let err = sessions.authenticate("Neo", "secret").unwrap_err();
        assert!(matches!(err, GameError::Auth(AuthError::AlreadyConnected(_))));
        assert!(sessions.reconnect(login.token.as_str()).is_err());
        // A second logout while the first is in flight is a no-op.
        assert!(!sessions.logout("Neo", SessionEvent::LoggedOut));

        sessions.game().leave(&name).unwrap();
        sessions.finish_terminate("neo");
        assert_eq!(sessions.state_of("Neo"), None);

        let again = sessions.authenticate("Neo", "secret").unwrap();
        assert!(!again.resumed);
        assert_eq!(
            sessions.game().registry().room_of("Neo").as_deref(),
            Some("downtown")
        );
    }

    #[test]
    fn sweeper_expires_parked_entities() {
        let dir = TempDir::new().unwrap();
        let sessions = manager(&dir, 8);
        sessions.authenticate("Neo", "secret").unwrap();
        let t0 = Instant::now();
        sessions.detach_at("Neo", t0);
        assert!(sessions.expire_detached_at(t0 + Duration::from_secs(1)).is_empty());
        let gone = sessions.expire_detached_at(t0 + Duration::from_secs(3600));
        assert_eq!(gone, vec!["Neo".to_string()]);
        assert!(sessions.game().store().player_exists("Neo").unwrap());
    }
}
