//! Job registry: correlates outbound requests with their eventual replies.

use std::collections::HashMap;

use crate::error::{CmError, Result};
use crate::header::NO_JOB;

/// Callback invoked once with the reply body when a correlated frame
/// arrives, with `CmError::Disconnected` if the connection drops first and
/// `reject_pending_on_disconnect` is set, or never at all otherwise (see
/// [`JobRegistry::clear`]).
pub type JobCallback = Box<dyn FnOnce(Result<Vec<u8>>) + Send>;

/// Allocates and resolves job ids. A single instance belongs to one
/// session task; it is never shared across connections.
pub struct JobRegistry {
    next_id: u64,
    pending: HashMap<u64, JobCallback>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            pending: HashMap::new(),
        }
    }

    /// Reserves the next job id and registers its callback. Ids are
    /// strictly monotonically increasing starting at 1 within a connection.
    /// The sentinel `NO_JOB` (`u64::MAX`) is never allocated: the counter
    /// wraps back to 1 first.
    pub fn alloc(&mut self, callback: JobCallback) -> u64 {
        self.next_id = self.next_id.wrapping_add(1);
        if self.next_id == NO_JOB {
            self.next_id = 1;
        }
        let id = self.next_id;
        self.pending.insert(id, callback);
        id
    }

    /// Removes and returns the callback registered for `id`, if any. `NO_JOB`
    /// is never looked up: callers must check the job id against `NO_JOB`
    /// before calling this.
    pub fn take(&mut self, id: u64) -> Option<JobCallback> {
        if id == NO_JOB {
            return None;
        }
        self.pending.remove(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drops every pending callback without invoking it. Used on disconnect
    /// when `reject_pending_on_disconnect` is unset (the default): callers
    /// simply never hear back, rather than being handed a synthetic error.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Drops every pending callback, invoking each with `CmError::Disconnected`.
    /// Used on disconnect when `reject_pending_on_disconnect` is set.
    pub fn reject_all(&mut self) {
        for (_, callback) in self.pending.drain() {
            callback(Err(CmError::Disconnected));
        }
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}
