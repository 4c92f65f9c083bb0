//! Endpoints and the server directory collaborator.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// A single CM node address. Immutable value object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Parameters for a single connect attempt.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub remote: Endpoint,
    pub local_addr: Option<String>,
    pub local_port: Option<u16>,
    pub connect_timeout: Duration,
}

/// Hardcoded fallback CM nodes used before the server has ever sent a
/// `ClientCMList`. A real deployment seeds this from a live directory
/// service; the values here only need to be well-formed `Endpoint`s.
fn default_bootstrap() -> Vec<Endpoint> {
    vec![
        Endpoint::new("162.254.196.67", 27019),
        Endpoint::new("162.254.196.84", 27017),
        Endpoint::new("162.254.197.42", 27018),
    ]
}

/// Holds the process-visible CM endpoint list behind an immutable
/// snapshot swap so a `ClientCMList` update never invalidates an in-flight
/// iteration over a previously taken snapshot.
#[derive(Debug)]
pub struct ServerDirectory {
    endpoints: ArcSwap<Vec<Endpoint>>,
}

impl ServerDirectory {
    pub fn new() -> Self {
        Self {
            endpoints: ArcSwap::from_pointee(default_bootstrap()),
        }
    }

    /// Returns an immutable snapshot of the current endpoint list.
    pub fn snapshot(&self) -> Arc<Vec<Endpoint>> {
        self.endpoints.load_full()
    }

    /// Atomically replaces the endpoint list.
    pub fn update(&self, endpoints: Vec<Endpoint>) {
        self.endpoints.store(Arc::new(endpoints));
    }

    /// Picks a random endpoint from the current snapshot, if any.
    pub fn random(&self) -> Option<Endpoint> {
        let snapshot = self.snapshot();
        snapshot.choose(&mut rand::thread_rng()).cloned()
    }
}

impl Default for ServerDirectory {
    fn default() -> Self {
        Self::new()
    }
}
