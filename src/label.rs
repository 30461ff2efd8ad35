//! Label algebra: the subset partial order over secrecy labels.
//!
//! A label `A` dominates `B` when every tag of `B` is in `A`. Labels that
//! neither contain the other are [`LabelOrdering::Disjoint`]; callers must
//! not assume a total order.

use crate::types::SecrecyLabel;

/// Outcome of comparing label `A` against label `B`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabelOrdering {
    /// Same tag set.
    Equal,
    /// `B` is a proper subset of `A`.
    ADominatesB,
    /// `A` is a proper subset of `B`.
    BDominatesA,
    /// Neither set contains the other.
    Disjoint,
}

impl LabelOrdering {
    /// The ordering seen from the other side (`compare(B, A)`).
    pub fn reverse(self) -> Self {
        match self {
            Self::ADominatesB => Self::BDominatesA,
            Self::BDominatesA => Self::ADominatesB,
            other => other,
        }
    }
}

/// Compare two labels.
///
/// Phase 1 asks whether `B ⊆ A`. Phase 2 then asks whether `A ⊆ B`, which
/// turns a "B ⊆ A" candidate into `Equal` or `ADominatesB`, and a failed
/// candidate into `BDominatesA` or `Disjoint`.
pub fn compare(a: &SecrecyLabel, b: &SecrecyLabel) -> LabelOrdering {
    let b_within_a = b.iter().all(|tag| a.contains(tag));
    let a_within_b = a.iter().all(|tag| b.contains(tag));
    match (b_within_a, a_within_b) {
        (true, true) => LabelOrdering::Equal,
        (true, false) => LabelOrdering::ADominatesB,
        (false, true) => LabelOrdering::BDominatesA,
        (false, false) => LabelOrdering::Disjoint,
    }
}

/// [`compare`] with absent labels treated as empty.
pub fn compare_optional(a: Option<&SecrecyLabel>, b: Option<&SecrecyLabel>) -> LabelOrdering {
    let empty = SecrecyLabel::empty();
    compare(a.unwrap_or(&empty), b.unwrap_or(&empty))
}

/// Label equality: `compare(a, b) == Equal`.
pub fn equals(a: &SecrecyLabel, b: &SecrecyLabel) -> bool {
    compare(a, b) == LabelOrdering::Equal
}
