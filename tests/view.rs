use std::time::Duration;

use chrono::{DateTime, Utc};

use muster::catalog::ServicesState;
use muster::gossip::Member;
use service::Service;

const HOSTNAME: &str = "shakespeare";
const ANOTHER_HOSTNAME: &str = "chaucer";

fn svc(id: &str, name: &str, hostname: &str, updated: DateTime<Utc>) -> Service {
    Service {
        id: id.into(),
        name: name.into(),
        image: "img1".into(),
        created: updated,
        hostname: hostname.into(),
        updated,
        ..Default::default()
    }
}

fn populated_state() -> (ServicesState, DateTime<Utc>) {
    let state = ServicesState::new(HOSTNAME);
    let base_time = Utc::now();
    state.add_service_entry(svc("deadbeef123", "service1", HOSTNAME, base_time));
    state.add_service_entry(svc(
        "deadbeef101",
        "service1",
        ANOTHER_HOSTNAME,
        base_time + Duration::from_secs(5),
    ));
    state.add_service_entry(svc(
        "deadbeef105",
        "service3",
        ANOTHER_HOSTNAME,
        base_time - Duration::from_secs(5),
    ));
    (state, base_time)
}

#[test]
fn by_service_groups_across_hosts() {
    let (state, _) = populated_state();
    let grouped = state.by_service();

    assert_eq!(grouped.len(), 2);
    assert_eq!(grouped["service1"].len(), 2);
    assert_eq!(grouped["service3"].len(), 1);

    let hosts: Vec<&str> = grouped["service1"]
        .iter()
        .map(|svc| svc.hostname.as_str())
        .collect();
    assert!(hosts.contains(&HOSTNAME));
    assert!(hosts.contains(&ANOTHER_HOSTNAME));
}

#[test]
fn each_service_visits_every_record() {
    let (state, _) = populated_state();
    let mut seen = Vec::new();
    state.each_service(|hostname, id, _| seen.push((hostname.to_owned(), id.to_owned())));

    seen.sort();
    assert_eq!(
        seen,
        vec![
            (ANOTHER_HOSTNAME.to_owned(), "deadbeef101".to_owned()),
            (ANOTHER_HOSTNAME.to_owned(), "deadbeef105".to_owned()),
            (HOSTNAME.to_owned(), "deadbeef123".to_owned()),
        ]
    );
}

#[test]
fn each_service_sorted_walks_oldest_first() {
    let (state, _) = populated_state();
    let mut ids = Vec::new();
    state.each_service_sorted(|_, id, _| ids.push(id.to_owned()));

    assert_eq!(ids, vec!["deadbeef105", "deadbeef123", "deadbeef101"]);
}

#[test]
fn each_local_service_filters_to_this_host() {
    let (state, _) = populated_state();
    let mut ids = Vec::new();
    state.each_local_service(|hostname, id, _| {
        assert_eq!(hostname, HOSTNAME);
        ids.push(id.to_owned());
    });

    assert_eq!(ids, vec!["deadbeef123"]);
}

#[test]
fn sorted_servers_orders_by_name() {
    let (state, _) = populated_state();
    let names: Vec<String> = state
        .sorted_servers()
        .into_iter()
        .map(|server| server.name)
        .collect();

    assert_eq!(names, vec![ANOTHER_HOSTNAME, HOSTNAME]);
}

#[test]
fn sorted_services_breaks_stamp_ties_by_id() {
    let state = ServicesState::new(HOSTNAME);
    let base_time = Utc::now();
    state.add_service_entry(svc("bbb", "service1", HOSTNAME, base_time));
    state.add_service_entry(svc("aaa", "service2", HOSTNAME, base_time));
    state.add_service_entry(svc(
        "zzz",
        "service3",
        HOSTNAME,
        base_time - Duration::from_secs(1),
    ));

    let server = state.get_server(HOSTNAME).unwrap();
    let ids: Vec<String> = server
        .sorted_services()
        .into_iter()
        .map(|svc| svc.id)
        .collect();
    assert_eq!(ids, vec!["zzz", "aaa", "bbb"]);
}

#[test]
fn format_renders_without_a_member_list() {
    let (state, _) = populated_state();
    let formatted = state.format(None);

    assert!(formatted.starts_with("Services ------------------------------"));
    assert!(formatted.contains(HOSTNAME));
    assert!(formatted.contains("deadbeef105"));
    assert!(!formatted.contains("Cluster Hosts"));
}

#[test]
fn format_lists_members_when_supplied() {
    let (state, _) = populated_state();
    let members = vec![
        Member {
            name: "walt".into(),
            addr: "10.0.0.2:7946".parse().unwrap(),
            meta: Vec::new(),
        },
        Member {
            name: "emily".into(),
            addr: "10.0.0.1:7946".parse().unwrap(),
            meta: Vec::new(),
        },
    ];
    let formatted = state.format(Some(&members));

    assert!(formatted.contains("Cluster Hosts"));
    let emily = formatted.find("emily").unwrap();
    let walt = formatted.find("walt").unwrap();
    assert!(emily < walt);
}
