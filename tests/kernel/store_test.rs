//! Tag creation, capability checks and domain bindings.

use std::sync::Arc;

use weir::kernel::store::{TagRequest, TagStore};
use weir::types::{Polarity, Principal, TagName};

#[test]
fn creation_is_idempotent_per_owner_and_name() {
    let store = TagStore::new();
    let owner = Principal::new("pkg");

    let first = store.create_tag(&owner, &TagRequest::named("x"));
    let second = store.create_tag(
        &owner,
        &TagRequest {
            global_positive: true,
            ..TagRequest::named("x")
        },
    );

    assert!(first.is_new());
    assert!(!second.is_new());
    assert_eq!(first.value(), second.value());
    assert_eq!(store.tag_count(), 1);
    // The second request's flags were not applied.
    assert!(!store.check_add(&TagName::from("pkg:x"), &Principal::new("stranger")));
}

#[test]
fn same_local_name_under_different_owners_is_distinct() {
    let store = TagStore::new();
    let a = store
        .create_tag(&Principal::new("a"), &TagRequest::named("x"))
        .value();
    let b = store
        .create_tag(&Principal::new("b"), &TagRequest::named("x"))
        .value();
    assert_ne!(a, b);
    assert_eq!(store.name_of(a), Some(TagName::from("a:x")));
    assert_eq!(store.name_of(b), Some(TagName::from("b:x")));
}

#[test]
fn global_positive_lets_anyone_add() {
    let store = TagStore::new();
    let owner = Principal::new("pkg");
    let name = TagName::new(&owner, "open");
    store.create_tag(
        &owner,
        &TagRequest {
            global_positive: true,
            ..TagRequest::named("open")
        },
    );
    assert!(store.check_add(&name, &Principal::new("anyone")));
    assert!(store.check_add(&name, &owner));
}

#[test]
fn check_add_without_grant_is_false() {
    let store = TagStore::new();
    let owner = Principal::new("pkg");
    store.create_tag(&owner, &TagRequest::named("closed"));
    let name = TagName::new(&owner, "closed");
    assert!(store.check_add(&name, &owner));
    assert!(!store.check_add(&name, &Principal::new("other")));
    assert!(!store.check_add(&TagName::from("pkg:missing"), &owner));
}

#[test]
fn grantees_need_not_exist_yet() {
    let store = TagStore::new();
    let later = Principal::new("installed.later");
    store.create_tag(
        &Principal::new("pkg"),
        &TagRequest {
            negative_grantees: vec![later.clone()],
            ..TagRequest::named("t")
        },
    );
    let name = TagName::from("pkg:t");
    store.read(|view| {
        assert!(view.permits(&later, &name, Polarity::Negative));
        assert!(!view.permits(&later, &name, Polarity::Positive));
    });
}

#[test]
fn domain_bindings_are_recorded_at_creation() {
    let store = TagStore::new();
    let bound = store
        .create_tag(
            &Principal::new("pkg"),
            &TagRequest {
                domains: Some(vec!["example.com".into(), "cdn.example.com".into()]),
                ..TagRequest::named("bound")
            },
        )
        .value();
    let unbound = store
        .create_tag(&Principal::new("pkg"), &TagRequest::named("unbound"))
        .value();

    assert!(store.permits_domain(bound, "example.com"));
    assert!(store.permits_domain(bound, "cdn.example.com"));
    assert!(!store.permits_domain(bound, "evil.example"));
    assert!(!store.permits_domain(unbound, "example.com"));
    assert!(store.domains_for(unbound).is_empty());
}

#[test]
fn concurrent_creation_of_one_name_yields_one_value() {
    let store = Arc::new(TagStore::new());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                store
                    .create_tag(&Principal::new("pkg"), &TagRequest::named("race"))
                    .value()
            })
        })
        .collect();
    let values: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("thread"))
        .collect();
    assert!(values.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(store.tag_count(), 1);
}
