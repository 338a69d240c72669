//! Persistence across service restarts: restore policy, corrupted
//! documents, and the persist-then-restore identity.

mod common;

use std::fs;

use common::{overlay_facts, target_facts, TestHarness};

use overlayd::{ApprovalState, CallerIdentity, PackageEvent, StateCodec};

fn added(package: &str) -> PackageEvent {
    PackageEvent::Added {
        package: package.to_string(),
    }
}

#[test]
fn test_state_survives_restart() {
    let harness = TestHarness::new();
    let root = CallerIdentity::root();
    harness.pm.install(0, target_facts("com.tgt"));
    harness.pm.install(0, overlay_facts("com.ov", "com.tgt"));
    harness.pm.set_signature_match("com.ov", "com.tgt", true);
    harness.service.start();
    harness.service.handle_package_event(&added("com.ov"));
    assert!(harness
        .service
        .facade()
        .set_enabled(&root, "com.ov", true, 0)
        .unwrap());

    let harness = harness.restart();
    harness.service.start();

    let overlay = harness
        .service
        .facade()
        .get_overlay_info(&root, "com.ov", 0)
        .unwrap()
        .unwrap();
    // restored, reconciled against unchanged facts, still enabled
    assert_eq!(overlay.state, ApprovalState::ApprovedEnabled);
}

#[test]
fn test_persist_then_restore_is_identity() {
    let harness = TestHarness::new();
    let root = CallerIdentity::root();
    harness.pm.install(0, target_facts("com.tgt"));
    for name in ["com.a", "com.b", "com.c"] {
        harness.pm.install(0, overlay_facts(name, "com.tgt"));
        harness.pm.set_signature_match(name, "com.tgt", true);
    }
    harness.service.start();
    for name in ["com.a", "com.b", "com.c"] {
        harness.service.handle_package_event(&added(name));
    }
    // reorder so the persisted per-list order is not the insertion order
    let moved = harness
        .service
        .facade()
        .get_overlay_info(&root, "com.a", 0)
        .unwrap()
        .unwrap();
    assert!(harness
        .service
        .facade()
        .set_highest_priority(&root, &moved)
        .unwrap());

    let before = harness.service.facade().get_all_overlays(&root, 0).unwrap();
    harness.service.shutdown();

    let state_file = harness.dir.path().join("overlays.json");
    let restored = StateCodec::new(&state_file).load().unwrap();
    assert_eq!(restored[&0], before);

    let order: Vec<&str> = restored[&0]["com.tgt"]
        .iter()
        .map(|entry| entry.package_name.as_str())
        .collect();
    assert_eq!(order, vec!["com.b", "com.c", "com.a"]);
}

#[test]
fn test_restore_drops_removed_users() {
    let harness = TestHarness::new();
    let root = CallerIdentity::root();
    harness.users.add_user(10);
    harness.pm.install(0, target_facts("com.tgt"));
    harness.pm.install(10, target_facts("com.tgt"));
    harness.pm.install(0, overlay_facts("com.ov", "com.tgt"));
    harness.pm.install(10, overlay_facts("com.ov", "com.tgt"));
    harness.service.start();
    harness.service.handle_package_event(&added("com.ov"));
    harness.service.shutdown();

    // user 10 disappears before the next boot
    harness.users.remove_user(10);
    let harness = harness.restart();
    harness.service.start();

    assert!(harness
        .service
        .facade()
        .get_overlay_info(&root, "com.ov", 0)
        .unwrap()
        .is_some());
    let full = CallerIdentity::system();
    assert!(harness
        .service
        .facade()
        .get_overlay_info(&full, "com.ov", 10)
        .unwrap()
        .is_none());
}

#[test]
fn test_corrupted_document_reads_as_empty() {
    let harness = TestHarness::new();
    let root = CallerIdentity::root();
    harness.pm.install(0, target_facts("com.tgt"));
    harness.pm.install(0, overlay_facts("com.ov", "com.tgt"));
    harness.service.start();
    harness.service.handle_package_event(&added("com.ov"));
    harness.service.shutdown();

    let state_file = harness.dir.path().join("overlays.json");
    fs::write(&state_file, "{ truncated").unwrap();

    let harness = harness.restart();
    harness.service.start();

    // restore found nothing usable; reconciliation rebuilt the record
    let overlay = harness
        .service
        .facade()
        .get_overlay_info(&root, "com.ov", 0)
        .unwrap();
    assert!(overlay.is_some());
}

#[test]
fn test_unknown_version_reads_as_empty() {
    let harness = TestHarness::new();
    let state_file = harness.dir.path().join("overlays.json");
    fs::write(&state_file, r#"{ "version": 99, "users": [] }"#).unwrap();

    harness.service.start();
    let root = CallerIdentity::root();
    assert!(harness
        .service
        .facade()
        .get_all_overlays(&root, 0)
        .unwrap()
        .is_empty());
}

#[test]
fn test_boot_persists_reconciled_state() {
    let harness = TestHarness::new();
    harness.pm.install(0, target_facts("com.tgt"));
    harness.pm.install(0, overlay_facts("com.ov", "com.tgt"));
    harness.pm.set_signature_match("com.ov", "com.tgt", true);

    // no events at all: boot reconciliation alone must discover the overlay
    // and persist it
    harness.service.start();
    harness.service.shutdown();

    let state_file = harness.dir.path().join("overlays.json");
    let document = StateCodec::new(&state_file).load().unwrap();
    let list = &document[&0]["com.tgt"];
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].package_name, "com.ov");
    assert_eq!(list[0].state, ApprovalState::ApprovedDisabled);
}
