//! Label transition authorizer.
//!
//! A discretionary gate over label changes: every tag dropped from the
//! caller's label needs a negative capability and every tag added needs a
//! positive one. The lattice relation between the old and new label is not
//! consulted.

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::{debug, info};

use crate::kernel::store::{CapabilityView, TagStore};
use crate::types::{Polarity, Principal, SecrecyLabel, TagName, TagValue};

/// Why a transition was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionDenial {
    /// A tag in the caller's current label is not known to the store.
    #[error("caller label carries unknown tag {0}")]
    UnknownCallerTag(TagValue),
    /// A dropped tag lacks a negative capability.
    #[error("no negative capability to drop {0}")]
    MissingNegative(TagName),
    /// An added tag lacks a positive capability.
    #[error("no positive capability to add {0}")]
    MissingPositive(TagName),
    /// A requested tag name is not known to the store.
    #[error("requested label names unknown tag {0}")]
    UnknownRequestedTag(TagName),
}

/// Result of evaluating a label change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The change is authorized; the resolved new label.
    Granted(SecrecyLabel),
    /// The change is refused.
    Denied(TransitionDenial),
}

impl TransitionOutcome {
    /// Collapse to the wire convention: the new label when granted, the
    /// caller's unchanged label otherwise.
    pub fn into_label(self, caller_label: &SecrecyLabel) -> SecrecyLabel {
        match self {
            Self::Granted(label) => label,
            Self::Denied(_) => caller_label.clone(),
        }
    }

    /// Whether the change was authorized.
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted(_))
    }
}

/// Evaluate a change from `caller_label` to `requested` for `principal`
/// against one consistent view of the store.
///
/// Checks run in a fixed order: resolve the caller label, check drops,
/// check adds, resolve the requested names. The first failure is reported.
pub fn evaluate(
    view: &CapabilityView<'_>,
    principal: &Principal,
    caller_label: &SecrecyLabel,
    requested: &BTreeSet<TagName>,
) -> TransitionOutcome {
    let mut current = BTreeSet::new();
    for value in caller_label.iter() {
        match view.name_of(value) {
            Some(name) => {
                current.insert(name.clone());
            }
            None => return TransitionOutcome::Denied(TransitionDenial::UnknownCallerTag(value)),
        }
    }

    if let Some(dropped) = current
        .difference(requested)
        .find(|tag| !view.permits(principal, tag, Polarity::Negative))
    {
        return TransitionOutcome::Denied(TransitionDenial::MissingNegative(dropped.clone()));
    }

    if let Some(added) = requested
        .difference(&current)
        .find(|tag| !view.permits(principal, tag, Polarity::Positive))
    {
        return TransitionOutcome::Denied(TransitionDenial::MissingPositive(added.clone()));
    }

    // Capabilities exist only for created tags, so an unknown added name
    // already failed the positive check above; this resolves kept names.
    let mut resolved = SecrecyLabel::empty();
    for name in requested {
        match view.value_of(name) {
            Some(value) => {
                resolved.insert(value);
            }
            None => {
                return TransitionOutcome::Denied(TransitionDenial::UnknownRequestedTag(
                    name.clone(),
                ))
            }
        }
    }
    TransitionOutcome::Granted(resolved)
}

/// Authorizer bound to a shared store.
pub struct TransitionAuthorizer<'s> {
    store: &'s TagStore,
}

impl<'s> TransitionAuthorizer<'s> {
    /// Bind to a store.
    pub fn new(store: &'s TagStore) -> Self {
        Self { store }
    }

    /// Evaluate the change inside a single critical section.
    pub fn evaluate(
        &self,
        principal: &Principal,
        caller_label: &SecrecyLabel,
        requested: &BTreeSet<TagName>,
    ) -> TransitionOutcome {
        let outcome = self
            .store
            .read(|view| evaluate(view, principal, caller_label, requested));
        match &outcome {
            TransitionOutcome::Granted(label) => {
                debug!(%principal, from = %caller_label, to = %label, "label transition granted");
            }
            TransitionOutcome::Denied(reason) => {
                info!(%principal, from = %caller_label, %reason, "label transition denied");
            }
        }
        outcome
    }

    /// Evaluate and collapse: the new label, or `caller_label` unchanged when
    /// the change is refused.
    pub fn authorize(
        &self,
        principal: &Principal,
        caller_label: &SecrecyLabel,
        requested: &BTreeSet<TagName>,
    ) -> SecrecyLabel {
        self.evaluate(principal, caller_label, requested)
            .into_label(caller_label)
    }
}
