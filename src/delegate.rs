// Copyright 2026 Developers of the muster project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The callback surface the gossip transport drives, and its catalog-backed
//! implementation.

use tracing::{debug, warn};

use service::Service;

use crate::catalog::{Batch, CatalogSnapshot, ServicesState};

/// What the transport asks of the application layer.
///
/// Implementations hold no transport state and may be freely recreated.
pub trait Delegate: Send + Sync + 'static {
    /// Short opaque descriptor for this node, at most `limit` bytes.
    fn node_meta(&self, limit: usize) -> Vec<u8>;

    /// One record payload arrived.
    fn notify_msg(&self, msg: &[u8]);

    /// Hand the transport one outbound batch, if any is queued. Records
    /// larger than `limit` cannot be framed and are dropped whole; batches
    /// may be split by the caller, individual records must not be.
    fn get_broadcasts(&self, overhead: usize, limit: usize) -> Option<Batch>;

    /// Whole-state payload for a push-pull hand-off.
    fn local_state(&self, join: bool) -> Vec<u8>;

    /// A remote node's whole-state payload arrived.
    fn merge_remote_state(&self, buf: &[u8], join: bool);
}

/// Bridges the transport callbacks onto a [`ServicesState`].
pub struct ServicesDelegate {
    state: ServicesState,
}

impl ServicesDelegate {
    pub fn new(state: ServicesState) -> ServicesDelegate {
        ServicesDelegate { state }
    }
}

impl Delegate for ServicesDelegate {
    fn node_meta(&self, limit: usize) -> Vec<u8> {
        let meta = br#"{"State":"Running"}"#.to_vec();
        if meta.len() > limit {
            warn!("node metadata does not fit in {limit} bytes");
            return Vec::new();
        }
        meta
    }

    fn notify_msg(&self, msg: &[u8]) {
        if msg.is_empty() {
            debug!("ignoring empty record payload");
            return;
        }
        match Service::decode(msg) {
            Ok(svc) => self.state.add_service_entry(svc),
            Err(err) => warn!("dropping undecodable record: {err}"),
        }
    }

    fn get_broadcasts(&self, _overhead: usize, limit: usize) -> Option<Batch> {
        // A drained `None` batch was a no-payload tick; nothing to send.
        let batch = self.state.broadcasts().pop().flatten()?;
        let mut kept = Batch::with_capacity(batch.len());
        for record in batch {
            if record.len() > limit {
                warn!("dropping {}-byte record over the {limit} byte limit", record.len());
                continue;
            }
            kept.push(record);
        }
        if kept.is_empty() {
            None
        } else {
            Some(kept)
        }
    }

    fn local_state(&self, _join: bool) -> Vec<u8> {
        match self.state.encode() {
            Ok(buf) => buf,
            Err(err) => {
                warn!("failed to encode local state: {err}");
                Vec::new()
            }
        }
    }

    fn merge_remote_state(&self, buf: &[u8], join: bool) {
        match CatalogSnapshot::decode(buf) {
            Ok(snapshot) => {
                debug!("merging remote state (join: {join})");
                self.state.merge(snapshot);
            }
            Err(err) => warn!("dropping undecodable remote state: {err}"),
        }
    }
}
