// Copyright 2026 Developers of the muster project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Renders the catalog into an HAProxy configuration and reloads the proxy.
//!
//! One frontend/backend pair per `(service name, tcp port)` advertised
//! anywhere in the cluster. Non-tcp ports are invisible here.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;

use chrono::Utc;
use tokio::process::Command;
use tracing::{debug, warn};

use service::Service;

use crate::catalog::ServicesState;

pub struct HAProxy {
    pub reload_cmd: String,
    pub verify_cmd: String,
    pub bind_ip: String,
}

impl Default for HAProxy {
    fn default() -> HAProxy {
        HAProxy::new()
    }
}

impl HAProxy {
    pub fn new() -> HAProxy {
        HAProxy {
            reload_cmd: "haproxy -f /etc/haproxy.cfg -p /var/run/haproxy.pid \
                         -sf $(cat /var/run/haproxy.pid)"
                .into(),
            verify_cmd: "haproxy -c -f /etc/haproxy.cfg".into(),
            bind_ip: "0.0.0.0".into(),
        }
    }

    /// `service name → set of tcp ports` advertised anywhere in the cluster.
    fn portmap(services: &HashMap<String, Vec<Service>>) -> BTreeMap<String, BTreeSet<u16>> {
        let mut ports: BTreeMap<String, BTreeSet<u16>> = BTreeMap::new();
        for (name, group) in services {
            let entry = ports.entry(name.clone()).or_default();
            for svc in group {
                for port in &svc.ports {
                    if port.protocol == "tcp" {
                        entry.insert(port.port);
                    }
                }
            }
        }
        ports
    }

    /// Render the current catalog into `output`.
    pub fn write_config<W: io::Write>(
        &self,
        state: &ServicesState,
        mut output: W,
    ) -> io::Result<()> {
        let services = state.by_service();
        let ports = HAProxy::portmap(&services);

        writeln!(output, "# generated {}", Utc::now().to_rfc3339())?;
        writeln!(output, "global")?;
        writeln!(output, "    daemon")?;
        writeln!(output, "    maxconn 1024")?;
        writeln!(output)?;
        writeln!(output, "defaults")?;
        writeln!(output, "    mode tcp")?;
        writeln!(output, "    timeout connect 5000ms")?;
        writeln!(output, "    timeout client 60000ms")?;
        writeln!(output, "    timeout server 60000ms")?;

        for (name, port_set) in &ports {
            for port in port_set {
                writeln!(output)?;
                writeln!(output, "frontend {name}-{port}")?;
                writeln!(output, "    bind {}:{port}", self.bind_ip)?;
                writeln!(output, "    default_backend {name}-{port}")?;
                writeln!(output)?;
                writeln!(output, "backend {name}-{port}")?;
                for svc in &services[name] {
                    if !svc.is_alive() {
                        continue;
                    }
                    let advertises = svc
                        .ports
                        .iter()
                        .any(|p| p.protocol == "tcp" && p.port == *port);
                    if advertises {
                        writeln!(
                            output,
                            "    server {}-{} {}:{port} check",
                            svc.hostname, svc.id, svc.hostname
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    pub async fn reload(&self) -> io::Result<()> {
        debug!("reloading proxy");
        run_shell(&self.reload_cmd).await
    }

    pub async fn verify(&self) -> io::Result<()> {
        run_shell(&self.verify_cmd).await
    }
}

async fn run_shell(cmd: &str) -> io::Result<()> {
    if cmd.is_empty() {
        return Ok(());
    }
    let status = Command::new("/bin/bash").arg("-c").arg(cmd).status().await?;
    if !status.success() {
        warn!("command exited with {status}: {cmd}");
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("command exited with {status}"),
        ));
    }
    Ok(())
}
