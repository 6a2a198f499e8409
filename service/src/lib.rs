// Copyright 2026 Developers of the muster project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The [`Service`] record: one containerized service observed on one host.
//!
//! Records travel between nodes as single JSON objects, one per gossip
//! payload. A record is only ever replaced by a strictly newer one (by
//! `updated`), so the codec and the stamps here are the whole consistency
//! story: everything else in the catalog builds on them.

use chrono::{DateTime, Utc};
use serde::de::{Error as DeError, Unexpected};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors from the record and snapshot codecs.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Lifecycle state of a service. Encoded on the wire as a bare integer:
/// `0` alive, `1` tombstone, `2` unhealthy.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ServiceStatus {
    Alive = 0,
    Tombstone = 1,
    Unhealthy = 2,
}

impl Serialize for ServiceStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for ServiceStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(ServiceStatus::Alive),
            1 => Ok(ServiceStatus::Tombstone),
            2 => Ok(ServiceStatus::Unhealthy),
            other => Err(D::Error::invalid_value(
                Unexpected::Unsigned(other as u64),
                &"a service status (0, 1 or 2)",
            )),
        }
    }
}

/// A port a service listens on. Only `tcp` ports are meaningful to
/// downstream consumers such as the proxy writer.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Port {
    #[serde(rename = "Type")]
    pub protocol: String,
    #[serde(rename = "Port")]
    pub port: u16,
}

impl Port {
    pub fn tcp(port: u16) -> Port {
        Port {
            protocol: "tcp".into(),
            port,
        }
    }

    pub fn udp(port: u16) -> Port {
        Port {
            protocol: "udp".into(),
            port,
        }
    }
}

/// One service as seen on one host.
///
/// `updated` orders replacements; `created` is informational. The JSON field
/// names are fixed by the wire contract, with `Status` last so encoded
/// records end in the status integer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Service {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Image")]
    pub image: String,
    #[serde(rename = "Ports", default)]
    pub ports: Vec<Port>,
    #[serde(rename = "Created")]
    pub created: DateTime<Utc>,
    #[serde(rename = "Hostname")]
    pub hostname: String,
    #[serde(rename = "Updated")]
    pub updated: DateTime<Utc>,
    #[serde(rename = "Status")]
    pub status: ServiceStatus,
}

impl Default for Service {
    fn default() -> Service {
        Service {
            id: String::new(),
            name: String::new(),
            image: String::new(),
            ports: Vec::new(),
            created: DateTime::UNIX_EPOCH,
            hostname: String::new(),
            updated: DateTime::UNIX_EPOCH,
            status: ServiceStatus::Alive,
        }
    }
}

impl Service {
    /// Serialize to the single-record JSON payload.
    pub fn encode(&self) -> Result<Vec<u8>, PayloadError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a single-record JSON payload.
    pub fn decode(buf: &[u8]) -> Result<Service, PayloadError> {
        Ok(serde_json::from_slice(buf)?)
    }

    /// Mark the service dead and stamp the transition.
    pub fn tombstone(&mut self) {
        self.status = ServiceStatus::Tombstone;
        self.updated = Utc::now();
    }

    pub fn is_alive(&self) -> bool {
        self.status == ServiceStatus::Alive
    }

    pub fn is_tombstone(&self) -> bool {
        self.status == ServiceStatus::Tombstone
    }

    /// Field-wise equality ignoring `updated`.
    ///
    /// Two records that differ only in `updated` describe the same state;
    /// merging one over the other is not a change worth announcing.
    pub fn equivalent(&self, other: &Service) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.image == other.image
            && self.ports == other.ports
            && self.created == other.created
            && self.hostname == other.hostname
            && self.status == other.status
    }
}
