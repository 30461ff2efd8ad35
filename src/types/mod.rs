//! Core identifiers shared by the store, the authorizer and the query server.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Kernel process identifier (`pid_t`).
pub type Pid = i32;

/// Kernel user identifier (`uid_t`).
pub type Uid = u32;

/// Opaque 64-bit tag identifier, unique for the lifetime of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagValue(pub i64);

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Identity under which tags, capabilities and namespaces are scoped
/// (an application package name).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    /// Wrap a principal name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The principal name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Principal {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Absolute tag name, `owner:local`.
///
/// Capabilities are held by name; the store maps names to [`TagValue`]s.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagName(String);

impl TagName {
    /// Qualify a local tag name with its owner.
    pub fn new(owner: &Principal, local: &str) -> Self {
        Self(format!("{}:{local}", owner.as_str()))
    }

    /// Wrap an already-qualified name as received from a caller.
    pub fn from_absolute(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The absolute name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TagName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TagName {
    fn from(name: &str) -> Self {
        Self::from_absolute(name)
    }
}

/// Confidentiality label: an unordered set of tags.
///
/// Equality is label-algebra equality ([`crate::label::equals`]); there is
/// deliberately no `Ord` or `Hash`, since labels are only partially ordered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecrecyLabel(BTreeSet<TagValue>);

impl SecrecyLabel {
    /// The empty label.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether the label carries `tag`.
    pub fn contains(&self, tag: TagValue) -> bool {
        self.0.contains(&tag)
    }

    /// Add a tag. Returns false if it was already present.
    pub fn insert(&mut self, tag: TagValue) -> bool {
        self.0.insert(tag)
    }

    /// Number of tags.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the label has no tags.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Tags in ascending value order.
    pub fn iter(&self) -> impl Iterator<Item = TagValue> + '_ {
        self.0.iter().copied()
    }

    /// Tags as a vector, the shape the label authority consumes.
    pub fn to_vec(&self) -> Vec<TagValue> {
        self.iter().collect()
    }
}

impl PartialEq for SecrecyLabel {
    fn eq(&self, other: &Self) -> bool {
        crate::label::equals(self, other)
    }
}

impl Eq for SecrecyLabel {}

impl FromIterator<TagValue> for SecrecyLabel {
    fn from_iter<I: IntoIterator<Item = TagValue>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[i64; N]> for SecrecyLabel {
    fn from(values: [i64; N]) -> Self {
        values.into_iter().map(TagValue).collect()
    }
}

impl fmt::Display for SecrecyLabel {
    /// Renders the wire form used by enforcement hooks: `tag1#tag2#...`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for tag in self.iter() {
            if !first {
                f.write_str("#")?;
            }
            write!(f, "{tag}")?;
            first = false;
        }
        Ok(())
    }
}

/// Which half of a capability pair: add (`Positive`) or remove (`Negative`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarity {
    /// May add the tag to a label.
    Positive,
    /// May remove the tag from a label.
    Negative,
}

/// Whether a capability is being granted or withdrawn at the authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CapabilityChange {
    /// Grant the capability.
    Add,
    /// Withdraw the capability.
    Remove,
}
