//! Management operations against an in-memory label authority.

use std::collections::BTreeSet;
use std::sync::Arc;

use weir::kernel::authority::{InMemoryLabelAuthority, LabelAuthority};
use weir::kernel::manager::{AddTagOutcome, WeirManager};
use weir::kernel::namespace::PartitionNaming;
use weir::kernel::store::{TagRequest, TagStore};
use weir::types::{Polarity, Principal, SecrecyLabel, TagName};

fn setup() -> (WeirManager, Arc<InMemoryLabelAuthority>) {
    let authority = Arc::new(InMemoryLabelAuthority::new());
    let manager = WeirManager::new(
        Arc::new(TagStore::new()),
        Arc::clone(&authority) as Arc<dyn LabelAuthority>,
        PartitionNaming::Sequential,
    );
    (manager, authority)
}

#[test]
fn owner_process_raises_and_lowers_its_own_tag() {
    let (mgr, authority) = setup();
    let owner = Principal::new("com.example.mail");
    let value = mgr
        .create_tag(&owner, Some(1200), &TagRequest::named("inbox"))
        .expect("create")
        .value();
    let name = TagName::new(&owner, "inbox");

    assert_eq!(
        mgr.add_tag_to_label(&name, &owner, 1200).expect("add"),
        AddTagOutcome::Added
    );
    let label = mgr.process_label(1200).expect("label");
    assert!(label.contains(value));

    let lowered = mgr.authorize(&owner, &label, &BTreeSet::new());
    assert!(lowered.is_empty());

    let ctx = authority.context(1200).expect("context");
    assert!(ctx.positive.contains(&value));
    assert!(ctx.negative.contains(&value));
}

#[test]
fn global_grants_reach_the_authority() {
    let (mgr, authority) = setup();
    let value = mgr
        .create_tag(
            &Principal::new("pkg"),
            None,
            &TagRequest {
                global_positive: true,
                ..TagRequest::named("shared")
            },
        )
        .expect("create")
        .value();
    assert!(authority.has_global_capability(value, Polarity::Positive));
    assert!(!authority.has_global_capability(value, Polarity::Negative));
    assert!(mgr.check_add(&TagName::from("pkg:shared"), &Principal::new("anyone")));
}

#[test]
fn silent_add_leaves_label_untouched_on_denial() {
    let (mgr, _) = setup();
    let owner = Principal::new("pkg");
    mgr.create_tag(&owner, None, &TagRequest::named("private"))
        .expect("create");
    mgr.add_tag_to_label_silently(&TagName::from("pkg:private"), &Principal::new("intruder"), 55);
    assert!(mgr.process_label(55).expect("label").is_empty());
}

#[test]
fn process_names_and_directories() {
    let (mgr, _) = setup();
    let principal = Principal::new("app");
    let label = SecrecyLabel::from([1, 2]);

    assert_eq!(mgr.directory_prefix(&principal, &label), "/wdir_0");
    assert_eq!(mgr.external_directory(&label), "wdir_0");

    assert_eq!(mgr.allocate_process_name("10050:app", "app"), "app_wproc_0");
    assert_eq!(mgr.allocate_process_name("10050:app", "app"), "app_wproc_1");
    assert_eq!(
        mgr.existing_processes("10050:app"),
        Some(vec!["app_wproc_0".to_string(), "app_wproc_1".to_string()])
    );
    assert!(mgr.existing_processes("10051:app").is_none());
}
