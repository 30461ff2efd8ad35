//! Label authority: the kernel-resident store of per-process labels.
//!
//! The service never keeps its own copy of a process's authoritative label;
//! it reads and updates it through this boundary. Production deployments
//! bind it to the enforcement module, tests and standalone runs use
//! [`InMemoryLabelAuthority`].

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::types::{CapabilityChange, Pid, Polarity, SecrecyLabel, TagValue, Uid};

/// Label authority errors.
#[derive(Debug, Error)]
pub enum AuthorityError {
    /// The authority has no security context for the process.
    #[error("no security context for pid {0}")]
    UnknownProcess(Pid),
    /// The authority could not be reached or rejected the call.
    #[error("label authority unavailable: {0}")]
    Unavailable(String),
}

/// Calls the service issues against the authoritative label store.
///
/// All calls are synchronous and side-effecting. Callers must not hold any
/// store lock while invoking them.
pub trait LabelAuthority: Send + Sync {
    /// Read the current label of a process.
    fn get_label(&self, pid: Pid) -> Result<SecrecyLabel, AuthorityError>;

    /// Install a fresh security context for a newly started process.
    fn init_security_context(
        &self,
        pid: Pid,
        uid: Uid,
        label: &SecrecyLabel,
        positive: &[TagValue],
        negative: &[TagValue],
    ) -> Result<(), AuthorityError>;

    /// Grant or withdraw a capability for every process.
    fn add_global_capability(
        &self,
        tag: TagValue,
        polarity: Polarity,
        change: CapabilityChange,
    ) -> Result<(), AuthorityError>;

    /// Grant or withdraw a capability for one process.
    fn add_process_capability(
        &self,
        pid: Pid,
        tag: TagValue,
        polarity: Polarity,
        change: CapabilityChange,
    ) -> Result<(), AuthorityError>;

    /// Add a tag to a process's label.
    fn add_tag_to_process_label(&self, pid: Pid, tag: TagValue) -> Result<(), AuthorityError>;
}

/// Per-process state held by [`InMemoryLabelAuthority`].
#[derive(Debug, Clone, Default)]
pub struct ProcessContext {
    /// Owning user.
    pub uid: Uid,
    /// Current secrecy label.
    pub label: SecrecyLabel,
    /// Tags this process may add.
    pub positive: HashSet<TagValue>,
    /// Tags this process may remove.
    pub negative: HashSet<TagValue>,
}

#[derive(Debug, Default)]
struct AuthorityTables {
    processes: HashMap<Pid, ProcessContext>,
    global_positive: HashSet<TagValue>,
    global_negative: HashSet<TagValue>,
}

/// Label authority simulated in process memory.
///
/// Processes without an initialised context read as the empty label, and
/// capability or tag updates create their context on demand, which matches
/// how the kernel module treats unlabeled tasks.
#[derive(Debug, Default)]
pub struct InMemoryLabelAuthority {
    tables: Mutex<AuthorityTables>,
}

impl InMemoryLabelAuthority {
    /// Create an authority with no processes.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, AuthorityTables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot a process context.
    pub fn context(&self, pid: Pid) -> Option<ProcessContext> {
        self.lock().processes.get(&pid).cloned()
    }

    /// Whether a global capability is currently granted.
    pub fn has_global_capability(&self, tag: TagValue, polarity: Polarity) -> bool {
        let tables = self.lock();
        match polarity {
            Polarity::Positive => tables.global_positive.contains(&tag),
            Polarity::Negative => tables.global_negative.contains(&tag),
        }
    }
}

fn apply(set: &mut HashSet<TagValue>, tag: TagValue, change: CapabilityChange) {
    match change {
        CapabilityChange::Add => {
            set.insert(tag);
        }
        CapabilityChange::Remove => {
            set.remove(&tag);
        }
    }
}

impl LabelAuthority for InMemoryLabelAuthority {
    fn get_label(&self, pid: Pid) -> Result<SecrecyLabel, AuthorityError> {
        Ok(self
            .lock()
            .processes
            .get(&pid)
            .map(|ctx| ctx.label.clone())
            .unwrap_or_default())
    }

    fn init_security_context(
        &self,
        pid: Pid,
        uid: Uid,
        label: &SecrecyLabel,
        positive: &[TagValue],
        negative: &[TagValue],
    ) -> Result<(), AuthorityError> {
        let context = ProcessContext {
            uid,
            label: label.clone(),
            positive: positive.iter().copied().collect(),
            negative: negative.iter().copied().collect(),
        };
        self.lock().processes.insert(pid, context);
        Ok(())
    }

    fn add_global_capability(
        &self,
        tag: TagValue,
        polarity: Polarity,
        change: CapabilityChange,
    ) -> Result<(), AuthorityError> {
        let mut tables = self.lock();
        let set = match polarity {
            Polarity::Positive => &mut tables.global_positive,
            Polarity::Negative => &mut tables.global_negative,
        };
        apply(set, tag, change);
        Ok(())
    }

    fn add_process_capability(
        &self,
        pid: Pid,
        tag: TagValue,
        polarity: Polarity,
        change: CapabilityChange,
    ) -> Result<(), AuthorityError> {
        let mut tables = self.lock();
        let ctx = tables.processes.entry(pid).or_default();
        let set = match polarity {
            Polarity::Positive => &mut ctx.positive,
            Polarity::Negative => &mut ctx.negative,
        };
        apply(set, tag, change);
        Ok(())
    }

    fn add_tag_to_process_label(&self, pid: Pid, tag: TagValue) -> Result<(), AuthorityError> {
        self.lock()
            .processes
            .entry(pid)
            .or_default()
            .label
            .insert(tag);
        Ok(())
    }
}
