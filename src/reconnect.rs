//! Reconnect policy: exponential backoff with a ceiling, reset on a
//! successful low-level connect.

use std::time::Duration;

use crate::config::ClientConfig;
use crate::endpoint::Endpoint;

/// Tracks backoff state across reconnect attempts. One instance per
/// `CmClient`; reused across the client's whole lifetime, not per-connection.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    auto_retry: bool,
    initial_backoff: Duration,
    max_backoff: Duration,
    current_backoff: Duration,
    attempts: u32,
    pub last_server: Option<Endpoint>,
}

impl ReconnectPolicy {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            auto_retry: config.auto_retry,
            initial_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
            current_backoff: config.initial_backoff,
            attempts: 0,
            last_server: None,
        }
    }

    pub fn auto_retry(&self) -> bool {
        self.auto_retry
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Resets the backoff sequence to its initial value. Called once a
    /// low-level TCP connect succeeds, regardless of what happens to the
    /// session afterwards.
    pub fn reset(&mut self) {
        self.current_backoff = self.initial_backoff;
        self.attempts = 0;
    }

    /// Returns the delay to wait before the next attempt, then doubles the
    /// backoff (capped at `max_backoff`) for next time.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_backoff;
        self.attempts += 1;
        self.current_backoff = (self.current_backoff * 2).min(self.max_backoff);
        delay
    }

    pub fn remember_server(&mut self, endpoint: Endpoint) {
        self.last_server = Some(endpoint);
    }
}
