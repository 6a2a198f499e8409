use chrono::{Duration, Utc};

use service::{PayloadError, Port, Service, ServiceStatus};

fn sample() -> Service {
    Service {
        id: "deadbeef123".into(),
        name: "radical_service".into(),
        image: "101deadbeef".into(),
        ports: vec![Port::tcp(8000), Port::udp(8001)],
        created: Utc::now(),
        hostname: "chaucer".into(),
        updated: Utc::now(),
        status: ServiceStatus::Alive,
    }
}

#[test]
fn encode_decode_round_trips() {
    let svc = sample();
    let decoded = Service::decode(&svc.encode().unwrap()).unwrap();
    assert_eq!(decoded, svc);
}

#[test]
fn decode_rejects_junk() {
    let err = Service::decode(b"asdf").unwrap_err();
    assert!(matches!(err, PayloadError::Malformed(_)));
}

#[test]
fn status_is_encoded_as_a_bare_integer() {
    assert_eq!(serde_json::to_string(&ServiceStatus::Alive).unwrap(), "0");
    assert_eq!(
        serde_json::to_string(&ServiceStatus::Tombstone).unwrap(),
        "1"
    );
    assert_eq!(
        serde_json::to_string(&ServiceStatus::Unhealthy).unwrap(),
        "2"
    );
    assert!(serde_json::from_str::<ServiceStatus>("7").is_err());
}

#[test]
fn encoded_records_end_with_the_status_field() {
    let mut svc = sample();
    svc.tombstone();
    let encoded = String::from_utf8(svc.encode().unwrap()).unwrap();
    assert!(encoded.starts_with("{\"ID\":\"deadbeef123\""));
    assert!(encoded.ends_with("\"Status\":1}"));
}

#[test]
fn tombstone_marks_and_restamps() {
    let mut svc = sample();
    let before = svc.updated;
    svc.tombstone();
    assert_eq!(svc.status, ServiceStatus::Tombstone);
    assert!(svc.updated > before);
}

#[test]
fn equivalent_ignores_updated_only() {
    let svc = sample();

    let mut restamped = svc.clone();
    restamped.updated = restamped.updated + Duration::seconds(30);
    assert!(svc.equivalent(&restamped));

    let mut flipped = svc.clone();
    flipped.status = ServiceStatus::Unhealthy;
    assert!(!svc.equivalent(&flipped));

    let mut reimaged = svc.clone();
    reimaged.image = "someother".into();
    assert!(!svc.equivalent(&reimaged));
}

#[test]
fn default_record_starts_at_the_epoch() {
    let svc = Service::default();
    assert_eq!(svc.updated.timestamp(), 0);
    assert_eq!(svc.created.timestamp(), 0);
    assert_eq!(svc.status, ServiceStatus::Alive);
}
