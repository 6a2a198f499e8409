// Copyright 2026 Developers of the muster project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The replicated cluster catalog: `{host → {service ID → service}}`.
//!
//! [`ServicesState`] is the convergent data structure every node carries.
//! Records merge in from the local container probe and from remote gossip;
//! a record only ever replaces one with a strictly older `updated` stamp, so
//! merges are idempotent and commutative and the catalog converges no matter
//! how the transport reorders or repeats deliveries.
//!
//! Outbound traffic leaves through [`Broadcasts`], a bounded queue the
//! transport drains. The background loops here keep the catalog live:
//! [`broadcast_services`](ServicesState::broadcast_services) republishes
//! local records, [`broadcast_tombstones`](ServicesState::broadcast_tombstones)
//! announces vanished ones and ages out the dead, and
//! [`track_new_services`](ServicesState::track_new_services) feeds probe
//! snapshots into the merge path.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use looper::Looper;
use service::{PayloadError, Service, ServiceStatus};

/// How long an ALIVE local record may go unrefreshed before the sweep
/// tombstones it.
pub const ALIVE_LIFESPAN: Duration = Duration::from_secs(60);

/// How long a TOMBSTONE record is kept around (and regossiped) before it is
/// deleted outright.
pub const TOMBSTONE_LIFESPAN: Duration = Duration::from_secs(3 * 60 * 60);

/// Times each local service is republished per publish-loop pass.
const SERVICE_RETRANSMIT_COUNT: u64 = 2;

const DEFAULT_TOMBSTONE_RETRANSMIT: Duration = Duration::from_secs(1);
const DEFAULT_BROADCAST_CAPACITY: usize = 16;

/// One outbound gossip payload: a batch of encoded records.
pub type Batch = Vec<Vec<u8>>;

/// Delivered to listeners when a merge changes semantic state.
#[derive(Clone, Debug)]
pub struct ChangeEvent {
    pub service: Service,
    pub time: DateTime<Utc>,
}

/// A host and the services it reports.
///
/// `last_updated` moves on every accepted record; `last_changed` only when a
/// record's semantic state actually changed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Server {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Services")]
    pub services: HashMap<String, Service>,
    #[serde(rename = "LastUpdated")]
    pub last_updated: DateTime<Utc>,
    #[serde(rename = "LastChanged")]
    pub last_changed: DateTime<Utc>,
}

impl Server {
    pub fn new(name: &str) -> Server {
        Server {
            name: name.to_owned(),
            services: HashMap::new(),
            last_updated: DateTime::UNIX_EPOCH,
            last_changed: DateTime::UNIX_EPOCH,
        }
    }
}

/// The wire form of a whole-state hand-off: just the servers map.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    #[serde(rename = "Servers")]
    pub servers: HashMap<String, Server>,
}

impl CatalogSnapshot {
    pub fn decode(buf: &[u8]) -> Result<CatalogSnapshot, PayloadError> {
        Ok(serde_json::from_slice(buf)?)
    }

    pub fn encode(&self) -> Result<Vec<u8>, PayloadError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Bounded queue of outbound batches, drained by the transport delegate.
///
/// A `None` entry is a legitimate push meaning "no payload this tick". When
/// the queue is full the oldest batch is dropped: later ticks resend anyway,
/// and producers must never block catalog mutation on queue space.
#[derive(Clone)]
pub struct Broadcasts {
    queue: Arc<Mutex<VecDeque<Option<Batch>>>>,
    capacity: usize,
}

impl Broadcasts {
    pub fn with_capacity(capacity: usize) -> Broadcasts {
        Broadcasts {
            queue: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push(&self, batch: Option<Batch>) {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() == self.capacity {
            debug!("broadcast queue full, dropping oldest batch");
            queue.pop_front();
        }
        queue.push_back(batch);
    }

    /// Non-blocking: outer `None` means the queue is empty, `Some(None)` is
    /// a drained no-payload tick.
    pub fn pop(&self) -> Option<Option<Batch>> {
        self.queue.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }
}

/// Everything guarded by the single catalog lock.
#[derive(Debug)]
pub(crate) struct Catalog {
    pub(crate) servers: HashMap<String, Server>,
    pub(crate) last_changed: DateTime<Utc>,
}

/// The full replicated catalog plus this node's identity and plumbing.
///
/// Cheap to clone; clones share the same underlying state. All mutation
/// happens under one write lock, and listener fan-out and broadcast pushes
/// run after the lock is released.
pub struct ServicesState {
    hostname: String,
    pub(crate) catalog: Arc<RwLock<Catalog>>,
    listeners: Arc<Mutex<Vec<mpsc::Sender<ChangeEvent>>>>,
    broadcasts: Broadcasts,
    tombstone_retransmit: Duration,
}

impl Clone for ServicesState {
    fn clone(&self) -> Self {
        ServicesState {
            hostname: self.hostname.clone(),
            catalog: Arc::clone(&self.catalog),
            listeners: Arc::clone(&self.listeners),
            broadcasts: self.broadcasts.clone(),
            tombstone_retransmit: self.tombstone_retransmit,
        }
    }
}

impl ServicesState {
    pub fn new(hostname: &str) -> ServicesState {
        ServicesState {
            hostname: hostname.to_owned(),
            catalog: Arc::new(RwLock::new(Catalog {
                servers: HashMap::new(),
                last_changed: DateTime::UNIX_EPOCH,
            })),
            listeners: Arc::new(Mutex::new(Vec::new())),
            broadcasts: Broadcasts::with_capacity(DEFAULT_BROADCAST_CAPACITY),
            tombstone_retransmit: DEFAULT_TOMBSTONE_RETRANSMIT,
        }
    }

    /// Tests run with nanosecond spacing; production wants ~seconds.
    pub fn with_tombstone_retransmit(mut self, spacing: Duration) -> Self {
        self.tombstone_retransmit = spacing;
        self
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn broadcasts(&self) -> &Broadcasts {
        &self.broadcasts
    }

    pub fn last_changed(&self) -> DateTime<Utc> {
        self.catalog.read().unwrap().last_changed
    }

    pub fn has_server(&self, hostname: &str) -> bool {
        self.catalog.read().unwrap().servers.contains_key(hostname)
    }

    pub fn get_server(&self, hostname: &str) -> Option<Server> {
        self.catalog.read().unwrap().servers.get(hostname).cloned()
    }

    pub fn get_service(&self, hostname: &str, id: &str) -> Option<Service> {
        self.catalog
            .read()
            .unwrap()
            .servers
            .get(hostname)
            .and_then(|server| server.services.get(id))
            .cloned()
    }

    /// Look a service up under this node's own hostname.
    pub fn get_local_service(&self, id: &str) -> Option<Service> {
        self.get_service(&self.hostname, id)
    }

    /// Register a change-event sink. Delivery is best-effort and
    /// non-blocking; a full sink just misses events.
    pub fn add_listener(&self, sink: mpsc::Sender<ChangeEvent>) {
        self.listeners.lock().unwrap().push(sink);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    fn notify_listeners(&self, event: &ChangeEvent) {
        let sinks = {
            let mut listeners = self.listeners.lock().unwrap();
            listeners.retain(|sink| !sink.is_closed());
            listeners.clone()
        };
        for sink in sinks {
            if sink.try_send(event.clone()).is_err() {
                debug!("listener not keeping up, dropping change event");
            }
        }
    }

    /// Merge one record into the catalog.
    ///
    /// Accepts the record only when it is unknown or strictly newer than the
    /// stored copy. A merge that changes semantic state notifies listeners
    /// and queues the record for retransmission — except a brand-new record
    /// for this very host, which the publish loop announces instead.
    pub fn add_service_entry(&self, svc: Service) {
        let mut event = None;
        let mut rebroadcast = None;
        {
            let mut catalog = self.catalog.write().unwrap();
            let server = catalog
                .servers
                .entry(svc.hostname.clone())
                .or_insert_with(|| Server::new(&svc.hostname));

            let existing = server.services.get(&svc.id);
            if let Some(current) = existing {
                if svc.updated <= current.updated {
                    debug!("discarding stale record for {}", svc.id);
                    return;
                }
            }
            let is_new = existing.is_none();
            let changed = match existing {
                Some(current) => !current.equivalent(&svc),
                None => true,
            };

            server.last_updated = svc.updated;
            server.services.insert(svc.id.clone(), svc.clone());

            if changed {
                let now = Utc::now();
                server.last_changed = now;
                catalog.last_changed = now;
                event = Some(ChangeEvent {
                    service: svc.clone(),
                    time: now,
                });
                if !(is_new && svc.hostname == self.hostname) {
                    match svc.encode() {
                        Ok(encoded) => rebroadcast = Some(vec![encoded]),
                        Err(err) => warn!("failed to encode {} for retransmit: {err}", svc.id),
                    }
                }
            }
        }
        if let Some(event) = event {
            self.notify_listeners(&event);
        }
        if let Some(batch) = rebroadcast {
            self.broadcasts.push(Some(batch));
        }
    }

    /// Merge a whole remote snapshot, record by record.
    pub fn merge(&self, other: CatalogSnapshot) {
        for (_, server) in other.servers {
            for (_, svc) in server.services {
                self.add_service_entry(svc);
            }
        }
    }

    pub fn snapshot(&self) -> CatalogSnapshot {
        CatalogSnapshot {
            servers: self.catalog.read().unwrap().servers.clone(),
        }
    }

    /// Whole-state payload for the transport's join hand-off.
    pub fn encode(&self) -> Result<Vec<u8>, PayloadError> {
        self.snapshot().encode()
    }

    /// True for a record we have never seen, or one whose semantic state
    /// differs from our copy. Incoming tombstones are never "new" — they
    /// still merge, but they announce nothing worth reacting to.
    pub fn is_new_service(&self, svc: &Service) -> bool {
        if svc.is_tombstone() {
            return false;
        }
        let catalog = self.catalog.read().unwrap();
        match catalog
            .servers
            .get(&svc.hostname)
            .and_then(|server| server.services.get(&svc.id))
        {
            Some(existing) => !existing.equivalent(svc),
            None => true,
        }
    }

    /// Tombstone every service a host reports and publish the lot as one
    /// batch. Used when membership declares the host gone.
    pub fn expire_server(&self, hostname: &str) {
        let mut batch = Batch::new();
        {
            let mut catalog = self.catalog.write().unwrap();
            let server = match catalog.servers.get_mut(hostname) {
                Some(server) if !server.services.is_empty() => server,
                _ => {
                    info!("no services to expire for {hostname}");
                    return;
                }
            };
            info!("expiring all services on {hostname}");
            for svc in server.services.values_mut() {
                svc.tombstone();
                match svc.encode() {
                    Ok(encoded) => batch.push(encoded),
                    Err(err) => warn!("failed to encode tombstone for {}: {err}", svc.id),
                }
            }
            let now = Utc::now();
            server.last_changed = now;
            catalog.last_changed = now;
        }
        self.broadcasts.push(Some(batch));
    }

    /// The decay sweep. Local ALIVE records older than [`ALIVE_LIFESPAN`]
    /// become tombstones; tombstones older than [`TOMBSTONE_LIFESPAN`] are
    /// deleted on every host; a server left with no services is deleted too.
    pub fn tombstone_expired_services(&self) {
        let now = Utc::now();
        let mut catalog = self.catalog.write().unwrap();

        let mut changed = false;
        if let Some(server) = catalog.servers.get_mut(&self.hostname) {
            for svc in server.services.values_mut() {
                if svc.is_alive() && svc.updated < now - ALIVE_LIFESPAN {
                    info!("tombstoning expired service {}", svc.id);
                    svc.status = ServiceStatus::Tombstone;
                    // Advance off the stale stamp, not to now, so every
                    // node's sweep lands on the same stamp.
                    svc.updated = svc.updated + Duration::from_secs(1);
                    changed = true;
                }
            }
            if changed {
                server.last_changed = now;
            }
        }
        if changed {
            catalog.last_changed = now;
        }

        let horizon = now - TOMBSTONE_LIFESPAN;
        catalog.servers.retain(|_, server| {
            server
                .services
                .retain(|_, svc| !(svc.is_tombstone() && svc.updated < horizon));
            !server.services.is_empty()
        });
    }

    /// Tombstone local services missing from the probe snapshot. Each one is
    /// encoded twice, the second copy stamped `tombstone_retransmit` later,
    /// so receivers that missed the first keep applying the second under the
    /// monotone-updated rule.
    fn tombstone_missing_services(&self, running: &[Service]) -> Batch {
        let running_ids: HashSet<&str> = running.iter().map(|svc| svc.id.as_str()).collect();
        let mut batch = Batch::new();

        let mut catalog = self.catalog.write().unwrap();
        let server = match catalog.servers.get_mut(&self.hostname) {
            Some(server) => server,
            None => {
                debug!("new host, nothing to tombstone");
                return batch;
            }
        };

        let mut changed = false;
        for svc in server.services.values_mut() {
            if svc.is_alive() && !running_ids.contains(svc.id.as_str()) {
                info!("tombstoning {}", svc.id);
                svc.tombstone();
                changed = true;
                match svc.encode() {
                    Ok(encoded) => batch.push(encoded),
                    Err(err) => warn!("failed to encode tombstone for {}: {err}", svc.id),
                }
                let mut again = svc.clone();
                again.updated = again.updated + self.tombstone_retransmit;
                match again.encode() {
                    Ok(encoded) => batch.push(encoded),
                    Err(err) => warn!("failed to encode tombstone for {}: {err}", svc.id),
                }
            }
        }
        if changed {
            let now = Utc::now();
            server.last_changed = now;
            catalog.last_changed = now;
        }
        batch
    }

    /// Serialize and queue one batch per looper pass, each pass restamping
    /// `updated` another `tombstone_retransmit` later than the last. The
    /// strictly-increasing stamps make repeated packets win the monotone
    /// merge race at receivers instead of being discarded as stale.
    pub async fn send_services(&self, services: Vec<Service>, looper: &mut Looper) {
        let mut additional = Duration::ZERO;
        while looper.next().await {
            let mut batch = Batch::with_capacity(services.len());
            for svc in &services {
                let mut copy = svc.clone();
                copy.updated = copy.updated + additional;
                match copy.encode() {
                    Ok(encoded) => batch.push(encoded),
                    Err(err) => warn!("failed to encode {}: {err}", copy.id),
                }
            }
            self.broadcasts.push(Some(batch));
            additional += self.tombstone_retransmit;
        }
    }

    /// Publish loop: announce the probe's current snapshot every pass,
    /// retransmitting each batch a couple of times. An empty snapshot still
    /// pushes a `None` so the transport sees a heartbeat.
    pub async fn broadcast_services<F>(&self, snapshot_fn: F, looper: &mut Looper)
    where
        F: Fn() -> Vec<Service>,
    {
        while looper.next().await {
            let services = snapshot_fn();
            if services.is_empty() {
                debug!("no local services to announce");
                self.broadcasts.push(None);
                continue;
            }
            let mut retransmits =
                Looper::timed(SERVICE_RETRANSMIT_COUNT, self.tombstone_retransmit);
            self.send_services(services, &mut retransmits).await;
        }
    }

    /// Tombstone loop: announce local services that vanished from the probe
    /// snapshot, then run the decay sweep. Pushes `None` on passes with
    /// nothing to tombstone.
    pub async fn broadcast_tombstones<F>(&self, snapshot_fn: F, looper: &mut Looper)
    where
        F: Fn() -> Vec<Service>,
    {
        while looper.next().await {
            let running = snapshot_fn();
            let tombstones = self.tombstone_missing_services(&running);
            let quiet = tombstones.is_empty();
            if !quiet {
                self.broadcasts.push(Some(tombstones));
            }
            self.tombstone_expired_services();
            if quiet {
                self.broadcasts.push(None);
            }
        }
    }

    /// Tracking loop: merge every record the probe reports. This is how
    /// local containers enter the catalog.
    pub async fn track_new_services<F>(&self, snapshot_fn: F, looper: &mut Looper)
    where
        F: Fn() -> Vec<Service>,
    {
        while looper.next().await {
            for svc in snapshot_fn() {
                self.add_service_entry(svc);
            }
        }
    }
}
