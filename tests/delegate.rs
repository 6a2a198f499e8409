use chrono::Utc;

use muster::catalog::{CatalogSnapshot, ServicesState};
use muster::delegate::{Delegate, ServicesDelegate};
use service::Service;

fn svc(id: &str, hostname: &str) -> Service {
    Service {
        id: id.into(),
        name: "radical_service".into(),
        image: "101deadbeef".into(),
        created: Utc::now(),
        hostname: hostname.into(),
        updated: Utc::now(),
        ..Default::default()
    }
}

#[test]
fn notify_msg_merges_a_valid_record() {
    let state = ServicesState::new("shakespeare");
    let delegate = ServicesDelegate::new(state.clone());
    let incoming = svc("deadbeef123", "chaucer");

    delegate.notify_msg(&incoming.encode().unwrap());

    assert_eq!(state.get_service("chaucer", "deadbeef123"), Some(incoming));
}

#[test]
fn notify_msg_drops_junk_without_mutating() {
    let state = ServicesState::new("shakespeare");
    let delegate = ServicesDelegate::new(state.clone());

    delegate.notify_msg(b"asdf");
    delegate.notify_msg(b"");

    assert_eq!(state.last_changed().timestamp(), 0);
    assert!(!state.has_server("chaucer"));
}

#[test]
fn get_broadcasts_drains_one_batch_at_a_time() {
    let state = ServicesState::new("shakespeare");
    let delegate = ServicesDelegate::new(state.clone());
    assert!(delegate.get_broadcasts(0, 1400).is_none());

    let payload = svc("deadbeef123", "chaucer").encode().unwrap();
    state.broadcasts().push(Some(vec![payload.clone()]));
    state.broadcasts().push(Some(vec![payload.clone()]));

    assert_eq!(delegate.get_broadcasts(0, 1400), Some(vec![payload]));
    assert_eq!(state.broadcasts().len(), 1);
}

#[test]
fn get_broadcasts_tolerates_nil_batches() {
    let state = ServicesState::new("shakespeare");
    let delegate = ServicesDelegate::new(state.clone());

    state.broadcasts().push(None);
    assert!(delegate.get_broadcasts(0, 1400).is_none());
    assert!(state.broadcasts().is_empty());
}

#[test]
fn get_broadcasts_drops_records_that_cannot_be_framed() {
    let state = ServicesState::new("shakespeare");
    let delegate = ServicesDelegate::new(state.clone());
    let small = svc("deadbeef123", "chaucer").encode().unwrap();

    state.broadcasts().push(Some(vec![vec![0u8; 2000], small.clone()]));

    assert_eq!(delegate.get_broadcasts(0, 1400), Some(vec![small]));
}

#[test]
fn node_meta_respects_the_limit() {
    let state = ServicesState::new("shakespeare");
    let delegate = ServicesDelegate::new(state);

    assert_eq!(delegate.node_meta(64), br#"{"State":"Running"}"#.to_vec());
    assert!(delegate.node_meta(4).is_empty());
}

#[test]
fn local_state_hands_off_to_merge_remote_state() {
    let state1 = ServicesState::new("emily");
    let record = svc("deadbeef123", "emily");
    state1.add_service_entry(record.clone());

    let state2 = ServicesState::new("walt");
    let receiving = ServicesDelegate::new(state2.clone());
    receiving.merge_remote_state(&ServicesDelegate::new(state1).local_state(true), true);

    assert_eq!(state2.get_service("emily", "deadbeef123"), Some(record));
}

#[test]
fn merge_remote_state_drops_junk() {
    let state = ServicesState::new("shakespeare");
    let delegate = ServicesDelegate::new(state.clone());

    delegate.merge_remote_state(b"not json", false);

    assert_eq!(state.last_changed().timestamp(), 0);
}

#[test]
fn local_state_is_a_decodable_snapshot() {
    let state = ServicesState::new("emily");
    state.add_service_entry(svc("deadbeef123", "emily"));
    let delegate = ServicesDelegate::new(state);

    let snapshot = CatalogSnapshot::decode(&delegate.local_state(false)).unwrap();
    assert!(snapshot.servers.contains_key("emily"));
}
