//! IP → hostname observations reported by the resolver hook.
//!
//! The query channel never resolves names itself; it only knows what the
//! DNS channel has seen. Entries are overwritten by newer observations for
//! the same address and are never evicted.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use crate::server::protocol::{canonical_ip, Observation};

/// Last hostname observed for each address.
#[derive(Debug, Default)]
pub struct HostCache {
    entries: RwLock<HashMap<String, String>>,
}

fn key(ip: &str) -> String {
    canonical_ip(ip).unwrap_or_else(|| ip.to_owned())
}

impl HostCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `ip` was resolved from `hostname`, replacing any earlier entry.
    pub fn record(&self, ip: &str, hostname: &str) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key(ip), hostname.to_owned());
    }

    /// Apply one observation line. Returns false if it had too few fields.
    pub fn observe(&self, line: &str) -> bool {
        let Some(obs) = Observation::parse(line) else {
            return false;
        };
        if !obs.is_resolver_event() {
            debug!(event = obs.event, "recording observation from non-resolver event");
        }
        self.record(obs.ip, obs.hostname);
        debug!(ip = obs.ip, hostname = obs.hostname, "address observed");
        true
    }

    /// Hostname last observed for `ip`.
    pub fn lookup(&self, ip: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key(ip))
            .cloned()
    }

    /// Number of addresses observed.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been observed yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
