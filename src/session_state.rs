//! Session-scoped state: connection phase plus the sticky session/steam ids.

use std::time::Duration;

use crate::header::SessionIds;

/// Coarse connection phase, driven by the transport and handshake handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnPhase {
    Idle,
    Connecting,
    Encrypting,
    Ready,
    ScheduledRetry,
}

/// Mutable state owned exclusively by the session task. Never shared or
/// locked: the task is the only writer and reader.
#[derive(Debug)]
pub struct SessionState {
    pub phase: ConnPhase,
    steam_id: u64,
    session_id: i32,
    pub connection_generation: u64,
    /// The session key from a sent `ChannelEncryptResponse`, held here until
    /// the matching `ChannelEncryptResult` confirms the server accepted it.
    /// Only then is it installed into the transport.
    pending_session_key: Option<[u8; 32]>,
    logged_on: bool,
    heartbeat_interval: Option<Duration>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            phase: ConnPhase::Idle,
            steam_id: 0,
            session_id: 0,
            connection_generation: 0,
            pending_session_key: None,
            logged_on: false,
            heartbeat_interval: None,
        }
    }

    /// Caches a session key sent to the server but not yet confirmed.
    pub fn set_pending_session_key(&mut self, key: [u8; 32]) {
        self.pending_session_key = Some(key);
    }

    /// Takes the cached pending session key, if any, clearing it.
    pub fn take_pending_session_key(&mut self) -> Option<[u8; 32]> {
        self.pending_session_key.take()
    }

    pub fn steam_id(&self) -> u64 {
        self.steam_id
    }

    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    /// Latches `steam_id` the first time a non-zero candidate is seen, and
    /// never again afterward: a later frame carrying a different non-zero
    /// value does not overwrite it, short of a full `SessionState`
    /// replacement on reconnect.
    pub fn latch_steam_id(&mut self, candidate: u64) {
        if self.steam_id == 0 && candidate != 0 {
            self.steam_id = candidate;
        }
    }

    /// Latches `session_id` the same way.
    pub fn latch_session_id(&mut self, candidate: i32) {
        if self.session_id == 0 && candidate != 0 {
            self.session_id = candidate;
        }
    }

    /// Marks the session logged on and records the server's heartbeat
    /// period. The heartbeat loop only runs while this is set.
    pub fn set_logged_on(&mut self, heartbeat_interval: Duration) {
        self.logged_on = true;
        self.heartbeat_interval = Some(heartbeat_interval);
    }

    /// Clears logged-on state, stopping the heartbeat loop.
    pub fn clear_logged_on(&mut self) {
        self.logged_on = false;
        self.heartbeat_interval = None;
    }

    pub fn logged_on(&self) -> bool {
        self.logged_on
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval
    }

    pub fn ids(&self) -> SessionIds {
        SessionIds {
            session_id: self.session_id,
            steam_id: self.steam_id,
        }
    }

    /// Starts a new connection attempt: bumps the generation counter (so
    /// stale timers tagged with an earlier generation are ignored) and
    /// resets the session, including the latched ids, which a fresh
    /// connection relatches from the server's own frames.
    pub fn begin_new_connection(&mut self) {
        self.connection_generation = self.connection_generation.wrapping_add(1);
        self.phase = ConnPhase::Connecting;
        self.steam_id = 0;
        self.session_id = 0;
        self.pending_session_key = None;
        self.logged_on = false;
        self.heartbeat_interval = None;
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
