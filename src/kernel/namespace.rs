//! Label-indexed namespace allocator.
//!
//! Storage is partitioned by label equivalence class. Each principal owns an
//! append-only list of labels, and a label's position in that list is its
//! partition index; a separate process-wide list backs the shared external
//! storage space. Indices are never reused, so equal labels always map to
//! the same partition and unequal labels never share one.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::Rng;
use serde::Deserialize;
use tracing::debug;

use crate::types::{Principal, SecrecyLabel};

/// Prefix of every partition directory name.
pub const DIRECTORY_PREFIX: &str = "wdir_";

/// Length of randomized partition tokens.
const TOKEN_LEN: usize = 8;

/// Alphabet of randomized partition tokens.
const TOKEN_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ1234567890";

/// How partitions are named on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionNaming {
    /// Directory suffix is the partition index.
    #[default]
    Sequential,
    /// Directory suffix is a random token, unique across all partitions.
    Random,
}

impl std::str::FromStr for PartitionNaming {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(Self::Sequential),
            "random" => Ok(Self::Random),
            other => Err(format!("unknown partition naming '{other}'")),
        }
    }
}

/// Which list a lookup is made against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NamespaceScope {
    /// The private partitions of one principal.
    Principal(Principal),
    /// The shared external-storage partitions.
    External,
}

/// An allocated partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSlot {
    /// Position of the label in its scope's list.
    pub index: usize,
    /// Random token, when [`PartitionNaming::Random`] is in effect.
    pub token: Option<String>,
}

impl fmt::Display for PartitionSlot {
    /// The directory name, `wdir_<index>` or `wdir_<token>`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.token {
            Some(token) => write!(f, "{DIRECTORY_PREFIX}{token}"),
            None => write!(f, "{DIRECTORY_PREFIX}{}", self.index),
        }
    }
}

#[derive(Debug)]
struct Partition {
    label: SecrecyLabel,
    token: Option<String>,
}

#[derive(Debug, Default)]
struct Partitions {
    principals: HashMap<Principal, Vec<Partition>>,
    external: Vec<Partition>,
    tokens: HashSet<String>,
}

impl Partitions {
    fn issue_token(&mut self) -> String {
        let mut token = random_token();
        while self.tokens.contains(&token) {
            token = random_token();
        }
        self.tokens.insert(token.clone());
        token
    }
}

fn random_token() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..TOKEN_CHARS.len());
            char::from(TOKEN_CHARS[idx])
        })
        .collect()
}

/// Maps `(scope, label)` pairs to stable partitions.
#[derive(Debug, Default)]
pub struct NamespaceAllocator {
    naming: PartitionNaming,
    partitions: Mutex<Partitions>,
}

impl NamespaceAllocator {
    /// Create an allocator with the given naming mode.
    pub fn new(naming: PartitionNaming) -> Self {
        Self {
            naming,
            partitions: Mutex::new(Partitions::default()),
        }
    }

    /// The naming mode in effect.
    pub fn naming(&self) -> PartitionNaming {
        self.naming
    }

    fn lock(&self) -> MutexGuard<'_, Partitions> {
        self.partitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Find the partition whose label equals `label`, appending a new one if
    /// none does. Never fails.
    pub fn allocate(&self, scope: &NamespaceScope, label: &SecrecyLabel) -> PartitionSlot {
        let mut partitions = self.lock();

        let existing = {
            let list = match scope {
                NamespaceScope::Principal(p) => partitions.principals.get(p).map(Vec::as_slice),
                NamespaceScope::External => Some(partitions.external.as_slice()),
            };
            list.and_then(|entries| {
                entries
                    .iter()
                    .position(|entry| crate::label::equals(&entry.label, label))
                    .map(|index| PartitionSlot {
                        index,
                        token: entries.get(index).and_then(|e| e.token.clone()),
                    })
            })
        };
        if let Some(slot) = existing {
            return slot;
        }

        let token = match self.naming {
            PartitionNaming::Sequential => None,
            PartitionNaming::Random => Some(partitions.issue_token()),
        };
        let list = match scope {
            NamespaceScope::Principal(p) => partitions.principals.entry(p.clone()).or_default(),
            NamespaceScope::External => &mut partitions.external,
        };
        let index = list.len();
        list.push(Partition {
            label: label.clone(),
            token: token.clone(),
        });
        debug!(?scope, index, %label, "namespace partition allocated");
        PartitionSlot { index, token }
    }

    /// Private data directory prefix for `principal` at `label`: `/wdir_<slot>`.
    pub fn directory_prefix(&self, principal: &Principal, label: &SecrecyLabel) -> String {
        let slot = self.allocate(&NamespaceScope::Principal(principal.clone()), label);
        format!("/{slot}")
    }

    /// Shared external-storage directory for `label`: `wdir_<slot>`.
    pub fn external_directory(&self, label: &SecrecyLabel) -> String {
        self.allocate(&NamespaceScope::External, label).to_string()
    }

    /// Number of partitions allocated in `scope`.
    pub fn partition_count(&self, scope: &NamespaceScope) -> usize {
        let partitions = self.lock();
        match scope {
            NamespaceScope::Principal(p) => partitions.principals.get(p).map_or(0, Vec::len),
            NamespaceScope::External => partitions.external.len(),
        }
    }
}
