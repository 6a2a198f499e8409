// Copyright 2026 Developers of the muster project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! UDP gossip membership: peer discovery, join push-pull, broadcast fan-out.
//!
//! [`Membership`] owns the socket and a peer table and drives a [`Delegate`]
//! with everything that arrives. The catalog neither knows nor cares that
//! this transport is UDP; it observes only the delegate callbacks.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use bincode::{DefaultOptions, Deserializer, Serializer};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::delegate::Delegate;

const BUFFER_SIZE: usize = 65507;
const GOSSIP_INTERVAL: Duration = Duration::from_secs(1);
const PEER_EXPIRATION: Duration = Duration::from_secs(60);
const MAX_SENDTO_RETRIES: u32 = 4;
const META_LIMIT: usize = 512;

/// One datagram on the gossip protocol.
#[derive(Clone, Debug, Deserialize, Serialize)]
enum Frame {
    /// Presence announcement with node metadata. `join` asks the receiver
    /// for a whole-state hand-off.
    Hello {
        name: String,
        meta: Vec<u8>,
        join: bool,
    },
    /// Whole-state hand-off. `join` asks the receiver to reply with its own
    /// state, completing the exchange.
    PushPull {
        name: String,
        join: bool,
        payload: Vec<u8>,
    },
    /// A batch of record payloads.
    Broadcast { name: String, payloads: Vec<Vec<u8>> },
}

/// A currently-live peer as the membership layer knows it.
#[derive(Clone, Debug)]
pub struct Member {
    pub name: String,
    pub addr: SocketAddr,
    pub meta: Vec<u8>,
}

struct Peer {
    member: Member,
    last_seen: Instant,
}

/// The gossip engine. Cheap to clone; clones share the socket and peers.
pub struct Membership<D> {
    name: String,
    socket: Arc<UdpSocket>,
    delegate: Arc<D>,
    peers: Arc<RwLock<HashMap<SocketAddr, Peer>>>,
    meta_override: Arc<RwLock<Option<Vec<u8>>>>,
    seeds: Vec<SocketAddr>,
    rng: Arc<Mutex<StdRng>>,
}

impl<D> Clone for Membership<D> {
    fn clone(&self) -> Self {
        Membership {
            name: self.name.clone(),
            socket: Arc::clone(&self.socket),
            delegate: Arc::clone(&self.delegate),
            peers: Arc::clone(&self.peers),
            meta_override: Arc::clone(&self.meta_override),
            seeds: self.seeds.clone(),
            rng: Arc::clone(&self.rng),
        }
    }
}

impl<D: Delegate> Membership<D> {
    pub async fn bind(
        name: &str,
        listen_addr: SocketAddr,
        delegate: D,
    ) -> std::io::Result<Membership<D>> {
        let socket = UdpSocket::bind(listen_addr).await?;
        debug!("listening on {}", socket.local_addr()?);
        Ok(Membership {
            name: name.to_owned(),
            socket: Arc::new(socket),
            delegate: Arc::new(delegate),
            peers: Arc::new(RwLock::new(HashMap::new())),
            meta_override: Arc::new(RwLock::new(None)),
            seeds: Vec::new(),
            rng: Arc::new(Mutex::new(StdRng::from_entropy())),
        })
    }

    pub fn with_seed(mut self, addr: SocketAddr) -> Self {
        self.seeds.push(addr);
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Live peers, pruning anything silent past the expiration window.
    pub fn members(&self) -> Vec<Member> {
        let mut peers = self.peers.write().unwrap();
        peers.retain(|_, peer| peer.last_seen.elapsed() < PEER_EXPIRATION);
        peers.values().map(|peer| peer.member.clone()).collect()
    }

    /// Replace the metadata announced with every heartbeat.
    pub fn set_meta(&self, meta: Vec<u8>) {
        *self.meta_override.write().unwrap() = Some(meta);
    }

    fn meta(&self) -> Vec<u8> {
        self.meta_override
            .read()
            .unwrap()
            .clone()
            .unwrap_or_else(|| self.delegate.node_meta(META_LIMIT))
    }

    /// Run the gossip loop forever: contact seeds, then alternate between
    /// receiving datagrams and ticking out queued broadcasts + heartbeats.
    pub async fn run(self) {
        // extra byte so an exactly-full read exposes truncation
        let mut recv_buf = [0u8; BUFFER_SIZE + 1];
        let mut send_buf = Vec::new();
        self.join(&mut send_buf).await;
        let mut last_tick: Option<Instant> = None;
        loop {
            let due = last_tick
                .map(|tick| tick.elapsed() >= GOSSIP_INTERVAL)
                .unwrap_or(true);
            if due {
                self.tick(&mut send_buf).await;
                last_tick = Some(Instant::now());
            }
            match timeout(GOSSIP_INTERVAL, self.socket.recv_from(&mut recv_buf)).await {
                Err(_) => {
                    trace!("no gossip activity");
                }
                Ok(Err(err)) => {
                    warn!("network error in recv_from: {err}");
                }
                Ok(Ok((size, peer))) => {
                    self.handle_datagram(&recv_buf, (size, peer), &mut send_buf)
                        .await;
                }
            }
        }
    }

    async fn join(&self, send_buf: &mut Vec<u8>) {
        for seed in &self.seeds {
            info!("joining cluster via {seed}");
            let hello = Frame::Hello {
                name: self.name.clone(),
                meta: self.meta(),
                join: true,
            };
            self.send_frame(&hello, *seed, send_buf).await;
        }
    }

    async fn tick(&self, send_buf: &mut Vec<u8>) {
        let mut targets: Vec<SocketAddr> = self.members().iter().map(|m| m.addr).collect();
        // With no live peers, keep knocking on the seeds with a join request
        // until somebody answers with state.
        let bootstrapping = targets.is_empty();
        if bootstrapping {
            targets.extend(&self.seeds);
        } else if !self.seeds.is_empty() {
            // Keep one seed in rotation so a healed partition reconverges.
            let pick = self.rng.lock().unwrap().gen_range(0..self.seeds.len());
            let seed = self.seeds[pick];
            if !targets.contains(&seed) {
                targets.push(seed);
            }
        }
        if targets.is_empty() {
            return;
        }
        if let Some(payloads) = self.delegate.get_broadcasts(0, BUFFER_SIZE) {
            debug!(
                "sending {} records to {} targets",
                payloads.len(),
                targets.len()
            );
            let frame = Frame::Broadcast {
                name: self.name.clone(),
                payloads,
            };
            for addr in &targets {
                self.send_frame(&frame, *addr, send_buf).await;
            }
        }
        let hello = Frame::Hello {
            name: self.name.clone(),
            meta: self.meta(),
            join: bootstrapping,
        };
        for addr in &targets {
            self.send_frame(&hello, *addr, send_buf).await;
        }
    }

    async fn handle_datagram(
        &self,
        recv_buf: &[u8],
        (size, peer): (usize, SocketAddr),
        send_buf: &mut Vec<u8>,
    ) {
        if size == recv_buf.len() {
            warn!("buffer too small for datagram, discarded");
            return;
        }
        trace!("received {size} bytes from {peer}");
        let mut deserializer = Deserializer::from_slice(&recv_buf[..size], DefaultOptions::new());
        let frame = match Frame::deserialize(&mut deserializer) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("undecodable datagram from {peer}: {err}");
                return;
            }
        };
        match frame {
            Frame::Hello { name, meta, join } => {
                self.observe(peer, &name, Some(meta));
                if join {
                    debug!("{name} is joining via {peer}");
                    let push = Frame::PushPull {
                        name: self.name.clone(),
                        join: true,
                        payload: self.delegate.local_state(true),
                    };
                    self.send_frame(&push, peer, send_buf).await;
                    let hello = Frame::Hello {
                        name: self.name.clone(),
                        meta: self.meta(),
                        join: false,
                    };
                    self.send_frame(&hello, peer, send_buf).await;
                }
            }
            Frame::PushPull {
                name,
                join,
                payload,
            } => {
                self.observe(peer, &name, None);
                self.delegate.merge_remote_state(&payload, join);
                if join {
                    let reply = Frame::PushPull {
                        name: self.name.clone(),
                        join: false,
                        payload: self.delegate.local_state(true),
                    };
                    self.send_frame(&reply, peer, send_buf).await;
                }
            }
            Frame::Broadcast { name, payloads } => {
                trace!("{} records from {name}", payloads.len());
                self.observe(peer, &name, None);
                for payload in &payloads {
                    self.delegate.notify_msg(payload);
                }
            }
        }
    }

    fn observe(&self, addr: SocketAddr, name: &str, meta: Option<Vec<u8>>) {
        if name == self.name {
            return;
        }
        let mut peers = self.peers.write().unwrap();
        let peer = peers.entry(addr).or_insert_with(|| Peer {
            member: Member {
                name: name.to_owned(),
                addr,
                meta: Vec::new(),
            },
            last_seen: Instant::now(),
        });
        peer.last_seen = Instant::now();
        peer.member.name = name.to_owned();
        if let Some(meta) = meta {
            peer.member.meta = meta;
        }
    }

    async fn send_frame(&self, frame: &Frame, addr: SocketAddr, send_buf: &mut Vec<u8>) {
        send_buf.clear();
        frame
            .serialize(&mut Serializer::new(&mut *send_buf, DefaultOptions::new()))
            .unwrap();
        if send_buf.len() > BUFFER_SIZE {
            warn!("{}-byte frame too large for a datagram, dropped", send_buf.len());
            return;
        }
        trace!("sending {} bytes to {addr}", send_buf.len());
        if let Err(err) = send_to_retry(&self.socket, send_buf, addr).await {
            warn!("failed to send frame to {addr}: {err}");
        }
    }
}

async fn send_to_retry(
    socket: &UdpSocket,
    buf: &[u8],
    target: SocketAddr,
) -> std::io::Result<usize> {
    let mut res = Ok(0);
    for _ in 0..MAX_SENDTO_RETRIES {
        res = socket.send_to(buf, target).await;
        if res.is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    res
}
