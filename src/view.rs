// Copyright 2026 Developers of the muster project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Read-only views over the catalog: iteration, grouping, formatting.

use std::collections::HashMap;
use std::fmt::Write;

use service::Service;

use crate::catalog::{Server, ServicesState};
use crate::gossip::Member;

impl Server {
    /// Services ordered oldest-`updated` first, ties broken by ID.
    pub fn sorted_services(&self) -> Vec<Service> {
        let mut services: Vec<Service> = self.services.values().cloned().collect();
        services.sort_by(|a, b| a.updated.cmp(&b.updated).then_with(|| a.id.cmp(&b.id)));
        services
    }
}

impl ServicesState {
    /// Visit every `(hostname, service ID, service)` triple.
    pub fn each_service<F>(&self, mut visit: F)
    where
        F: FnMut(&str, &str, &Service),
    {
        let catalog = self.catalog.read().unwrap();
        for (hostname, server) in &catalog.servers {
            for (id, svc) in &server.services {
                visit(hostname, id, svc);
            }
        }
    }

    /// Like [`each_service`](Self::each_service), oldest `updated` first.
    pub fn each_service_sorted<F>(&self, mut visit: F)
    where
        F: FnMut(&str, &str, &Service),
    {
        let mut services = Vec::new();
        self.each_service(|_, _, svc| services.push(svc.clone()));
        services.sort_by(|a, b| a.updated.cmp(&b.updated).then_with(|| a.id.cmp(&b.id)));
        for svc in &services {
            visit(&svc.hostname, &svc.id, svc);
        }
    }

    /// Only the services this node reports for itself.
    pub fn each_local_service<F>(&self, mut visit: F)
    where
        F: FnMut(&str, &str, &Service),
    {
        let hostname = self.hostname().to_owned();
        self.each_service(|host, id, svc| {
            if host == hostname {
                visit(host, id, svc);
            }
        });
    }

    /// Group services across all hosts by service name. Group contents are
    /// ordered oldest first within a single call.
    pub fn by_service(&self) -> HashMap<String, Vec<Service>> {
        let mut grouped: HashMap<String, Vec<Service>> = HashMap::new();
        self.each_service_sorted(|_, _, svc| {
            grouped
                .entry(svc.name.clone())
                .or_default()
                .push(svc.clone());
        });
        grouped
    }

    /// Servers ordered by name.
    pub fn sorted_servers(&self) -> Vec<Server> {
        let catalog = self.catalog.read().unwrap();
        let mut servers: Vec<Server> = catalog.servers.values().cloned().collect();
        servers.sort_by(|a, b| a.name.cmp(&b.name));
        servers
    }

    /// Human-readable dump of the catalog and, when supplied, the peer list.
    pub fn format(&self, members: Option<&[Member]>) -> String {
        let mut output = String::new();
        output.push_str("Services ------------------------------\n");
        for server in self.sorted_servers() {
            let _ = writeln!(output, "  {}: ({})", server.name, server.last_updated);
            for svc in server.sorted_services() {
                let _ = writeln!(
                    output,
                    "      {} {:<20} {:<30} {:>20} {:<20}",
                    svc.id,
                    svc.name,
                    svc.image,
                    svc.created.to_rfc3339(),
                    svc.updated.to_rfc3339()
                );
            }
            output.push('\n');
        }
        if let Some(members) = members {
            output.push_str("\nCluster Hosts -------------------------\n");
            let mut members: Vec<&Member> = members.iter().collect();
            members.sort_by(|a, b| a.name.cmp(&b.name));
            for member in members {
                let _ = writeln!(output, "    {} {}", member.name, member.addr);
            }
        }
        output.push_str("---------------------------------------");
        output
    }
}
