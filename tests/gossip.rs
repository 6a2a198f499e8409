use std::time::Duration;

use chrono::Utc;

use muster::catalog::ServicesState;
use muster::delegate::ServicesDelegate;
use muster::gossip::Membership;
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

#[tokio::test(flavor = "multi_thread")]
async fn two_nodes_converge() {
    let state1 = ServicesState::new("emily");
    state1.add_service_entry(svc("cafed00d123", "emily"));

    let node1 = Membership::bind(
        "emily",
        "127.0.0.1:0".parse().unwrap(),
        ServicesDelegate::new(state1.clone()),
    )
    .await
    .unwrap();
    let addr1 = node1.local_addr().unwrap();

    let state2 = ServicesState::new("walt");
    let node2 = Membership::bind(
        "walt",
        "127.0.0.1:0".parse().unwrap(),
        ServicesDelegate::new(state2.clone()),
    )
    .await
    .unwrap()
    .with_seed(addr1);

    let task1 = tokio::spawn(node1.clone().run());
    let task2 = tokio::spawn(node2.clone().run());

    // the join push-pull hands the newcomer the whole catalog
    for _ in 0..1000 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if state2.get_service("emily", "cafed00d123").is_some() {
            break;
        }
    }
    assert!(state2.get_service("emily", "cafed00d123").is_some());

    // both sides discover each other
    for _ in 0..1000 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if !node1.members().is_empty() && !node2.members().is_empty() {
            break;
        }
    }
    assert_eq!(node1.members()[0].name, "walt");
    assert_eq!(node2.members()[0].name, "emily");

    // a queued batch travels to the peer on a gossip tick
    let fresh = svc("0ddba11456", "emily");
    state1
        .broadcasts()
        .push(Some(vec![fresh.encode().unwrap()]));
    for _ in 0..1000 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if state2.get_service("emily", "0ddba11456").is_some() {
            break;
        }
    }
    assert_eq!(state2.get_service("emily", "0ddba11456"), Some(fresh));

    // a metadata update rides along on the next heartbeat
    node2.set_meta(b"draining".to_vec());
    for _ in 0..1000 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if node1.members()[0].meta == b"draining" {
            break;
        }
    }
    assert_eq!(node1.members()[0].meta, b"draining");

    task1.abort();
    task2.abort();
}
