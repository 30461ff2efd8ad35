//! Management surface of the policy service.
//!
//! [`WeirManager`] ties the tag store, transition authorizer, namespace
//! allocator and process-name registry to a [`LabelAuthority`]. Table work
//! happens inside the store's critical section; authority calls are made
//! only after it has been released.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::kernel::authority::{AuthorityError, LabelAuthority};
use crate::kernel::namespace::{NamespaceAllocator, NamespaceScope, PartitionNaming, PartitionSlot};
use crate::kernel::process::ProcessNameRegistry;
use crate::kernel::store::{TagCreation, TagRequest, TagStore};
use crate::kernel::transition::{TransitionAuthorizer, TransitionOutcome};
use crate::types::{CapabilityChange, Pid, Polarity, Principal, SecrecyLabel, TagName, Uid};

/// Result of [`WeirManager::add_tag_to_label`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddTagOutcome {
    /// The authority added the tag to the process label.
    Added,
    /// The caller holds no positive capability and the tag is not global.
    Denied,
    /// No tag with that name exists.
    UnknownTag,
}

/// The policy service's management operations.
pub struct WeirManager {
    store: Arc<TagStore>,
    namespaces: NamespaceAllocator,
    processes: ProcessNameRegistry,
    authority: Arc<dyn LabelAuthority>,
}

impl WeirManager {
    /// Assemble a manager over a shared store.
    pub fn new(
        store: Arc<TagStore>,
        authority: Arc<dyn LabelAuthority>,
        naming: PartitionNaming,
    ) -> Self {
        Self {
            store,
            namespaces: NamespaceAllocator::new(naming),
            processes: ProcessNameRegistry::new(),
            authority,
        }
    }

    /// The shared tag store (also read by the query server).
    pub fn store(&self) -> &Arc<TagStore> {
        &self.store
    }

    // ── Tags and capabilities ──

    /// Create `owner:request.name`.
    ///
    /// When the tag is new, the owner's process (if known) receives both
    /// capabilities at the authority and any global grants are pushed too.
    /// The store entry persists even if an authority call fails.
    ///
    /// # Errors
    ///
    /// Returns the first authority error encountered.
    pub fn create_tag(
        &self,
        owner: &Principal,
        owner_pid: Option<Pid>,
        request: &TagRequest,
    ) -> Result<TagCreation, AuthorityError> {
        let creation = self.store.create_tag(owner, request);
        let TagCreation::Created { name, value } = &creation else {
            return Ok(creation);
        };
        info!(%owner, tag = %name, "tag created");

        if let Some(pid) = owner_pid {
            for polarity in [Polarity::Positive, Polarity::Negative] {
                self.authority
                    .add_process_capability(pid, *value, polarity, CapabilityChange::Add)?;
            }
        }
        if request.global_positive {
            self.authority
                .add_global_capability(*value, Polarity::Positive, CapabilityChange::Add)?;
        }
        if request.global_negative {
            self.authority
                .add_global_capability(*value, Polarity::Negative, CapabilityChange::Add)?;
        }
        Ok(creation)
    }

    /// Whether `principal` may add tag `name` to a label.
    pub fn check_add(&self, name: &TagName, principal: &Principal) -> bool {
        self.store.check_add(name, principal)
    }

    /// Add tag `name` to the label of process `pid` on behalf of `principal`.
    ///
    /// # Errors
    ///
    /// Returns an error if the authority rejects the update.
    pub fn add_tag_to_label(
        &self,
        name: &TagName,
        principal: &Principal,
        pid: Pid,
    ) -> Result<AddTagOutcome, AuthorityError> {
        match self.store.resolve_for_add(name, principal) {
            None => {
                debug!(%principal, tag = %name, "add to label: unknown tag");
                Ok(AddTagOutcome::UnknownTag)
            }
            Some((_, false)) => {
                info!(%principal, tag = %name, pid, "add to label denied");
                Ok(AddTagOutcome::Denied)
            }
            Some((value, true)) => {
                self.authority.add_tag_to_process_label(pid, value)?;
                debug!(%principal, tag = %name, pid, %value, "tag added to process label");
                Ok(AddTagOutcome::Added)
            }
        }
    }

    /// Boundary form of [`add_tag_to_label`](Self::add_tag_to_label): denial,
    /// unknown tags and authority failures are all silent no-ops.
    pub fn add_tag_to_label_silently(&self, name: &TagName, principal: &Principal, pid: Pid) {
        if let Err(e) = self.add_tag_to_label(name, principal, pid) {
            warn!(error = %e, %principal, tag = %name, pid, "label authority rejected tag add");
        }
    }

    // ── Label transitions ──

    /// Evaluate a label change with an explicit outcome.
    pub fn evaluate_transition(
        &self,
        principal: &Principal,
        caller_label: &SecrecyLabel,
        requested: &BTreeSet<TagName>,
    ) -> TransitionOutcome {
        TransitionAuthorizer::new(&self.store).evaluate(principal, caller_label, requested)
    }

    /// The authorized new label, or `caller_label` unchanged on refusal.
    pub fn authorize(
        &self,
        principal: &Principal,
        caller_label: &SecrecyLabel,
        requested: &BTreeSet<TagName>,
    ) -> SecrecyLabel {
        TransitionAuthorizer::new(&self.store).authorize(principal, caller_label, requested)
    }

    // ── Process contexts ──

    /// Current label of `pid`. Non-positive pids are unlabeled.
    ///
    /// # Errors
    ///
    /// Returns an error if the authority cannot be read.
    pub fn process_label(&self, pid: Pid) -> Result<SecrecyLabel, AuthorityError> {
        if pid <= 0 {
            return Ok(SecrecyLabel::empty());
        }
        self.authority.get_label(pid)
    }

    /// Install the security context of a new process running as `principal`,
    /// carrying the principal's current per-principal capabilities.
    ///
    /// # Errors
    ///
    /// Returns an error if the authority rejects the context.
    pub fn init_process_security_context(
        &self,
        pid: Pid,
        uid: Uid,
        principal: &Principal,
        label: &SecrecyLabel,
    ) -> Result<(), AuthorityError> {
        let (positive, negative) = self.store.read(|view| {
            (
                view.capability_values(principal, Polarity::Positive),
                view.capability_values(principal, Polarity::Negative),
            )
        });
        debug!(
            pid,
            uid,
            %principal,
            %label,
            positive = positive.len(),
            negative = negative.len(),
            "initialising process security context"
        );
        self.authority
            .init_security_context(pid, uid, label, &positive, &negative)
    }

    // ── Namespaces ──

    /// Partition for `label` in `scope`.
    pub fn allocate(&self, scope: &NamespaceScope, label: &SecrecyLabel) -> PartitionSlot {
        self.namespaces.allocate(scope, label)
    }

    /// Private data directory prefix, `/wdir_<slot>`.
    pub fn directory_prefix(&self, principal: &Principal, label: &SecrecyLabel) -> String {
        self.namespaces.directory_prefix(principal, label)
    }

    /// External storage directory, `wdir_<slot>`.
    pub fn external_directory(&self, label: &SecrecyLabel) -> String {
        self.namespaces.external_directory(label)
    }

    /// Issue a labeled process name for `index`.
    pub fn allocate_process_name(&self, index: &str, process_name: &str) -> String {
        self.processes.allocate(index, process_name)
    }

    /// Labeled process names issued for `index`.
    pub fn existing_processes(&self, index: &str) -> Option<Vec<String>> {
        self.processes.existing(index)
    }
}
