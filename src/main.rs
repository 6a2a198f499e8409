use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, info, warn};

use looper::Looper;
use muster::catalog::ServicesState;
use muster::delegate::ServicesDelegate;
use muster::gossip::Membership;
use muster::haproxy::HAProxy;
use muster::probe::{snapshot_fn, Probe, StaticProbe};
use service::Service;

const PUBLISH_INTERVAL: Duration = Duration::from_secs(2);
const TOMBSTONE_INTERVAL: Duration = Duration::from_secs(2);
const TRACKING_INTERVAL: Duration = Duration::from_secs(2);
const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Parser)]
struct Args {
    /// Address to bind the gossip listener on
    listen_addr: SocketAddr,
    /// Address of a node already in the cluster; repeatable
    #[arg(short, long)]
    seed: Vec<SocketAddr>,
    /// Name this node registers in the catalog (defaults to $HOSTNAME)
    #[arg(long)]
    hostname: Option<String>,
    /// Service to advertise from this node, as NAME:PORT; repeatable
    #[arg(short, long)]
    advertise: Vec<String>,
    /// Rewrite this HAProxy config whenever the catalog changes
    #[arg(long)]
    haproxy_config: Option<PathBuf>,
    /// IP the generated HAProxy frontends bind to
    #[arg(long, default_value = "0.0.0.0")]
    bind_ip: String,
    #[arg(short, long, default_value_t = tracing::Level::INFO)]
    log_level: tracing::Level,
}

fn advertised_services(hostname: &str, specs: &[String]) -> Vec<Service> {
    let mut services = Vec::with_capacity(specs.len());
    for spec in specs {
        match spec.rsplit_once(':').map(|(name, port)| (name, port.parse::<u16>())) {
            Some((name, Ok(port))) if !name.is_empty() => {
                services.push(StaticProbe::advertise(hostname, name, port));
            }
            _ => {
                warn!("ignoring malformed --advertise {spec}, want NAME:PORT");
            }
        }
    }
    services
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    let hostname = args.hostname.clone().unwrap_or_else(|| {
        std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
    });

    let state = ServicesState::new(&hostname);
    let probe: Arc<dyn Probe> = Arc::new(StaticProbe::new(advertised_services(
        &hostname,
        &args.advertise,
    )));

    let mut membership =
        Membership::bind(&hostname, args.listen_addr, ServicesDelegate::new(state.clone()))
            .await
            .unwrap();
    for seed in &args.seed {
        membership = membership.with_seed(*seed);
    }
    info!(
        "{hostname} listening on {}",
        membership.local_addr().unwrap()
    );

    if let Some(path) = args.haproxy_config.clone() {
        let proxy = HAProxy {
            bind_ip: args.bind_ip.clone(),
            ..HAProxy::new()
        };
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        state.add_listener(tx);
        let writer_state = state.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                debug!("{} changed, rewriting proxy config", event.service.name);
                let mut rendered = Vec::new();
                if let Err(err) = proxy.write_config(&writer_state, &mut rendered) {
                    warn!("failed to render proxy config: {err}");
                    continue;
                }
                if let Err(err) = std::fs::write(&path, &rendered) {
                    warn!("failed to write {}: {err}", path.display());
                    continue;
                }
                if let Err(err) = proxy.reload().await {
                    warn!("proxy reload failed: {err}");
                }
            }
        });
    }

    {
        let state = state.clone();
        let snapshot = snapshot_fn(Arc::clone(&probe));
        tokio::spawn(async move {
            let mut looper = Looper::forever(PUBLISH_INTERVAL);
            state.broadcast_services(snapshot, &mut looper).await;
        });
    }
    {
        let state = state.clone();
        let snapshot = snapshot_fn(Arc::clone(&probe));
        tokio::spawn(async move {
            let mut looper = Looper::forever(TOMBSTONE_INTERVAL);
            state.broadcast_tombstones(snapshot, &mut looper).await;
        });
    }
    {
        let state = state.clone();
        let snapshot = snapshot_fn(Arc::clone(&probe));
        tokio::spawn(async move {
            let mut looper = Looper::forever(TRACKING_INTERVAL);
            state.track_new_services(snapshot, &mut looper).await;
        });
    }
    {
        let state = state.clone();
        let membership = membership.clone();
        tokio::spawn(async move {
            let mut looper = Looper::forever(ANNOUNCE_INTERVAL);
            while looper.next().await {
                let members = membership.members();
                println!("{}", state.format(Some(&members)));
            }
        });
    }

    membership.run().await;
}
