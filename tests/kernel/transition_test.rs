//! Label transition authorization.

use std::collections::BTreeSet;

use weir::kernel::store::{TagRequest, TagStore};
use weir::kernel::transition::{TransitionAuthorizer, TransitionDenial, TransitionOutcome};
use weir::types::{Principal, SecrecyLabel, TagName, TagValue};

struct World {
    store: TagStore,
    owner: Principal,
}

impl World {
    fn new() -> Self {
        Self {
            store: TagStore::new(),
            owner: Principal::new("owner"),
        }
    }

    fn tag(&self, request: TagRequest) -> (TagName, TagValue) {
        let name = TagName::new(&self.owner, &request.name);
        let value = self.store.create_tag(&self.owner, &request).value();
        (name, value)
    }
}

fn requested(names: &[&TagName]) -> BTreeSet<TagName> {
    names.iter().map(|n| (*n).clone()).collect()
}

#[test]
fn drop_without_negative_denies_despite_authorized_adds() {
    let w = World::new();
    let (_, held_v) = w.tag(TagRequest::named("held"));
    let (open, _) = w.tag(TagRequest {
        global_positive: true,
        ..TagRequest::named("open")
    });
    let caller = Principal::new("app");
    let label: SecrecyLabel = [held_v].into_iter().collect();

    let authorizer = TransitionAuthorizer::new(&w.store);
    let result = authorizer.authorize(&caller, &label, &requested(&[&open]));
    assert_eq!(result, label);
}

#[test]
fn add_without_positive_denies_despite_authorized_drops() {
    let w = World::new();
    let (_, droppable_v) = w.tag(TagRequest {
        global_negative: true,
        ..TagRequest::named("droppable")
    });
    let (secret, _) = w.tag(TagRequest::named("secret"));
    let caller = Principal::new("app");
    let label: SecrecyLabel = [droppable_v].into_iter().collect();

    let outcome = TransitionAuthorizer::new(&w.store).evaluate(&caller, &label, &requested(&[&secret]));
    assert_eq!(
        outcome,
        TransitionOutcome::Denied(TransitionDenial::MissingPositive(secret))
    );
}

#[test]
fn granted_change_returns_exactly_the_requested_values() {
    let w = World::new();
    let (_, a_v) = w.tag(TagRequest {
        global_negative: true,
        ..TagRequest::named("a")
    });
    let (b, b_v) = w.tag(TagRequest {
        global_positive: true,
        ..TagRequest::named("b")
    });
    let (c, c_v) = w.tag(TagRequest::named("c"));
    let label: SecrecyLabel = [a_v, c_v].into_iter().collect();

    // Drop a (global negative), add b (global positive), keep c (no check).
    let result = TransitionAuthorizer::new(&w.store).authorize(
        &Principal::new("app"),
        &label,
        &requested(&[&b, &c]),
    );
    let expected: SecrecyLabel = [b_v, c_v].into_iter().collect();
    assert_eq!(result, expected);
}
