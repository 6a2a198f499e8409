//! The seam between the catalog and whatever enumerates local services.

use std::sync::Arc;

use chrono::Utc;
use rand::distributions::{Alphanumeric, DistString};

use service::{Port, Service, ServiceStatus};

/// Supplies snapshots of the services currently running on this host.
///
/// Probes report failures as an empty list; the catalog treats "nothing
/// running" and "probe failed" identically, and the tombstone loop's
/// lifespans keep a flapping probe from wiping records permanently.
pub trait Probe: Send + Sync {
    fn services(&self) -> Vec<Service>;
}

/// Advertises a fixed set of services configured at startup. Snapshots are
/// restamped with the current time so the advertised services never age
/// into the tombstone sweep.
pub struct StaticProbe {
    defs: Vec<Service>,
}

impl StaticProbe {
    pub fn new(defs: Vec<Service>) -> StaticProbe {
        StaticProbe { defs }
    }

    /// Build an advertised service record with a generated ID.
    pub fn advertise(hostname: &str, name: &str, port: u16) -> Service {
        let id = Alphanumeric
            .sample_string(&mut rand::thread_rng(), 12)
            .to_lowercase();
        let now = Utc::now();
        Service {
            id,
            name: name.to_owned(),
            image: format!("{name}:latest"),
            ports: vec![Port::tcp(port)],
            created: now,
            hostname: hostname.to_owned(),
            updated: now,
            status: ServiceStatus::Alive,
        }
    }
}

impl Probe for StaticProbe {
    fn services(&self) -> Vec<Service> {
        let now = Utc::now();
        self.defs
            .iter()
            .cloned()
            .map(|mut svc| {
                svc.updated = now;
                svc
            })
            .collect()
    }
}

/// Adapt a probe into the snapshot closure the catalog loops take.
pub fn snapshot_fn(probe: Arc<dyn Probe>) -> impl Fn() -> Vec<Service> + Clone + Send + Sync {
    move || probe.services()
}
