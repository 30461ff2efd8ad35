//! Tag & capability store.
//!
//! Owns tag identity (name ↔ value), per-principal and global capability
//! sets, and tag → domain bindings. Everything lives behind one mutex, so a
//! tag creation or a capability check combined with lookups is atomic with
//! respect to every other caller. Entries only ever grow: there is no
//! deletion, rename or revocation.
//!
//! Tag values are drawn uniformly from the 64-bit space and resampled on
//! collision with any value issued before. With `n` tags the chance that a
//! single draw collides is `n / 2^64`; even a million tags leave it below
//! `1e-13`, so the retry loop is effectively never taken.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::Rng;
use tracing::debug;

use crate::types::{Polarity, Principal, SecrecyLabel, TagName, TagValue};

/// Source of candidate tag values.
pub trait TagValueSource: Send {
    /// Draw the next candidate value.
    fn next_value(&mut self) -> TagValue;
}

/// Uniform random tag values from the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomTagSource;

impl TagValueSource for RandomTagSource {
    fn next_value(&mut self) -> TagValue {
        TagValue(rand::thread_rng().gen::<i64>())
    }
}

/// Parameters of a tag-creation request, minus the owner.
#[derive(Debug, Clone, Default)]
pub struct TagRequest {
    /// Local name; the absolute name is `owner:name`.
    pub name: String,
    /// Every principal may add the tag.
    pub global_positive: bool,
    /// Every principal may remove the tag.
    pub global_negative: bool,
    /// Principals granted the positive capability. They need not be known yet.
    pub positive_grantees: Vec<Principal>,
    /// Principals granted the negative capability.
    pub negative_grantees: Vec<Principal>,
    /// Hostnames this tag's data may be declassified to.
    pub domains: Option<Vec<String>>,
}

impl TagRequest {
    /// A request with no grants beyond the owner's.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Result of [`TagStore::create_tag`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagCreation {
    /// A new tag was registered.
    Created {
        /// Absolute tag name.
        name: TagName,
        /// Freshly issued value.
        value: TagValue,
    },
    /// The owner already had a tag with this name; nothing changed.
    AlreadyExists {
        /// Absolute tag name.
        name: TagName,
        /// Value issued when the tag was first created.
        value: TagValue,
    },
}

impl TagCreation {
    /// The tag's value, new or existing.
    pub fn value(&self) -> TagValue {
        match self {
            Self::Created { value, .. } | Self::AlreadyExists { value, .. } => *value,
        }
    }

    /// Whether this call registered the tag.
    pub fn is_new(&self) -> bool {
        matches!(self, Self::Created { .. })
    }
}

struct Tables {
    source: Box<dyn TagValueSource>,
    issued: HashSet<TagValue>,
    values: HashMap<TagName, TagValue>,
    names: HashMap<TagValue, TagName>,
    positive: HashMap<Principal, HashSet<TagName>>,
    negative: HashMap<Principal, HashSet<TagName>>,
    global_positive: HashSet<TagName>,
    global_negative: HashSet<TagName>,
    domains: HashMap<TagValue, HashSet<String>>,
}

impl Tables {
    fn new(source: Box<dyn TagValueSource>) -> Self {
        Self {
            source,
            issued: HashSet::new(),
            values: HashMap::new(),
            names: HashMap::new(),
            positive: HashMap::new(),
            negative: HashMap::new(),
            global_positive: HashSet::new(),
            global_negative: HashSet::new(),
            domains: HashMap::new(),
        }
    }

    /// Draw values until one has never been issued.
    fn fresh_value(&mut self) -> TagValue {
        let mut candidate = self.source.next_value();
        while self.issued.contains(&candidate) {
            candidate = self.source.next_value();
        }
        candidate
    }

    fn grant(&mut self, principal: &Principal, tag: &TagName, polarity: Polarity) {
        let map = match polarity {
            Polarity::Positive => &mut self.positive,
            Polarity::Negative => &mut self.negative,
        };
        map.entry(principal.clone())
            .or_default()
            .insert(tag.clone());
    }
}

/// Read-only view of the store tables, valid for one critical section.
///
/// Obtained through [`TagStore::read`]; every lookup made through one view
/// sees the same consistent state.
pub struct CapabilityView<'a> {
    tables: &'a Tables,
}

impl CapabilityView<'_> {
    /// Resolve a value back to its absolute name.
    pub fn name_of(&self, value: TagValue) -> Option<&TagName> {
        self.tables.names.get(&value)
    }

    /// Resolve an absolute name to its value.
    pub fn value_of(&self, name: &TagName) -> Option<TagValue> {
        self.tables.values.get(name).copied()
    }

    /// Whether `principal` may add (`Positive`) or remove (`Negative`) `tag`,
    /// either through a global grant or a per-principal one.
    pub fn permits(&self, principal: &Principal, tag: &TagName, polarity: Polarity) -> bool {
        let (global, per_principal) = match polarity {
            Polarity::Positive => (&self.tables.global_positive, &self.tables.positive),
            Polarity::Negative => (&self.tables.global_negative, &self.tables.negative),
        };
        global.contains(tag)
            || per_principal
                .get(principal)
                .is_some_and(|caps| caps.contains(tag))
    }

    /// Values of every tag `principal` holds a per-principal capability for.
    /// Names that were granted before the tag existed are skipped.
    pub fn capability_values(&self, principal: &Principal, polarity: Polarity) -> Vec<TagValue> {
        let map = match polarity {
            Polarity::Positive => &self.tables.positive,
            Polarity::Negative => &self.tables.negative,
        };
        let mut values: Vec<TagValue> = map
            .get(principal)
            .into_iter()
            .flatten()
            .filter_map(|name| self.value_of(name))
            .collect();
        values.sort();
        values
    }
}

/// Process-wide tag, capability and domain tables.
pub struct TagStore {
    tables: Mutex<Tables>,
}

impl Default for TagStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TagStore {
    /// An empty store drawing values from [`RandomTagSource`].
    pub fn new() -> Self {
        Self::with_source(RandomTagSource)
    }

    /// An empty store drawing values from a custom source.
    pub fn with_source(source: impl TagValueSource + 'static) -> Self {
        Self {
            tables: Mutex::new(Tables::new(Box::new(source))),
        }
    }

    // Tables are append-only, so state behind a poisoned guard is still valid.
    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against a consistent view of the tables.
    pub fn read<R>(&self, f: impl FnOnce(&CapabilityView<'_>) -> R) -> R {
        let tables = self.lock();
        f(&CapabilityView { tables: &tables })
    }

    /// Create `owner:name`, or report the existing tag.
    ///
    /// On creation the owner receives both capabilities, the global flags and
    /// grantee lists are applied, and the domain set is recorded if present.
    pub fn create_tag(&self, owner: &Principal, request: &TagRequest) -> TagCreation {
        let name = TagName::new(owner, &request.name);
        let mut tables = self.lock();

        if let Some(&value) = tables.values.get(&name) {
            debug!(tag = %name, "tag already exists, skipping creation");
            return TagCreation::AlreadyExists { name, value };
        }

        let value = tables.fresh_value();
        tables.issued.insert(value);
        tables.values.insert(name.clone(), value);
        tables.names.insert(value, name.clone());

        tables.grant(owner, &name, Polarity::Positive);
        tables.grant(owner, &name, Polarity::Negative);
        if request.global_positive {
            tables.global_positive.insert(name.clone());
        }
        if request.global_negative {
            tables.global_negative.insert(name.clone());
        }
        for grantee in &request.positive_grantees {
            tables.grant(grantee, &name, Polarity::Positive);
        }
        for grantee in &request.negative_grantees {
            tables.grant(grantee, &name, Polarity::Negative);
        }
        if let Some(domains) = &request.domains {
            tables
                .domains
                .insert(value, domains.iter().cloned().collect());
        }

        debug!(%owner, tag = %name, %value, "tag created");
        TagCreation::Created { name, value }
    }

    /// Whether `principal` may add `name` to a label: the tag exists and is
    /// globally positive or positively granted to `principal`.
    pub fn check_add(&self, name: &TagName, principal: &Principal) -> bool {
        self.read(|view| {
            view.value_of(name).is_some() && view.permits(principal, name, Polarity::Positive)
        })
    }

    /// [`check_add`](Self::check_add) and value lookup in one critical
    /// section. `None` means unknown tag; `Some((value, false))` means denied.
    pub fn resolve_for_add(&self, name: &TagName, principal: &Principal) -> Option<(TagValue, bool)> {
        self.read(|view| {
            view.value_of(name)
                .map(|value| (value, view.permits(principal, name, Polarity::Positive)))
        })
    }

    /// Hostnames bound to a tag; empty if none.
    pub fn domains_for(&self, value: TagValue) -> HashSet<String> {
        self.lock().domains.get(&value).cloned().unwrap_or_default()
    }

    /// Whether `host` is among the domains bound to `value`.
    pub fn permits_domain(&self, value: TagValue, host: &str) -> bool {
        self.lock()
            .domains
            .get(&value)
            .is_some_and(|hosts| hosts.contains(host))
    }

    /// Value for an absolute name.
    pub fn value_of(&self, name: &TagName) -> Option<TagValue> {
        self.read(|view| view.value_of(name))
    }

    /// Absolute name for a value.
    pub fn name_of(&self, value: TagValue) -> Option<TagName> {
        self.read(|view| view.name_of(value).cloned())
    }

    /// Resolve a set of absolute names into a label. `None` if any is unknown.
    pub fn label_for_names<'a>(
        &self,
        names: impl IntoIterator<Item = &'a TagName>,
    ) -> Option<SecrecyLabel> {
        self.read(|view| names.into_iter().map(|n| view.value_of(n)).collect())
    }

    /// Number of tags issued so far.
    pub fn tag_count(&self) -> usize {
        self.lock().issued.len()
    }
}
