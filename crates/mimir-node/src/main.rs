use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

use mimir_cluster::{CatalogService, CatalogSnapshot, ClusterNode, MemCatalog, MemReplicaGroups, StaticTopology};
use mimir_metastore::MemMetaStorage;
use mimir_recovery::{DisasterRecoveryManager, RecoveryConfig};
use mimir_server::{serve_admin, serve_cluster, GrpcMessagingService};
use mimir_types::{NodeName, TableId, ZoneId};

#[derive(clap::Parser, Debug)]
#[command(name = "mimir-node", about = "Mimir disaster recovery node")]
struct Cli {
    #[arg(long)]
    node_name: String,
    /// Cluster transport address, also advertised to peers
    #[arg(long, default_value = "0.0.0.0:17101")]
    listen_addr: String,
    #[arg(long, default_value = "0.0.0.0:17100")]
    admin_addr: String,
    /// Peer specs: "name=addr" format, repeatable
    #[arg(long = "peer")]
    peers: Vec<String>,
    #[arg(long)]
    config: Option<std::path::PathBuf>,
}

#[derive(Debug, Deserialize)]
struct ServerConfig {
    request_timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct ObservabilityConfig {
    log_level: String,
    log_format: String,
}

#[derive(Debug, Deserialize)]
struct ZoneConfig {
    id: ZoneId,
    name: String,
    partitions: u32,
    replicas: u32,
}

#[derive(Debug, Deserialize)]
struct TableConfig {
    id: TableId,
    name: String,
    zone_id: ZoneId,
}

#[derive(Debug, Default, Deserialize)]
struct CatalogConfig {
    #[serde(default)]
    zones: Vec<ZoneConfig>,
    #[serde(default)]
    tables: Vec<TableConfig>,
}

#[derive(Debug, Deserialize)]
struct Config {
    #[serde(default)]
    recovery: RecoveryConfig,
    server: ServerConfig,
    observability: ObservabilityConfig,
    #[serde(default)]
    catalog: CatalogConfig,
}

fn parse_peer(spec: &str) -> anyhow::Result<(NodeName, String)> {
    let (name, addr) = spec
        .split_once('=')
        .with_context(|| format!("invalid peer spec {spec:?}, expected name=addr"))?;
    anyhow::ensure!(!name.is_empty() && !addr.is_empty(), "invalid peer spec {spec:?}, expected name=addr");
    Ok((name.to_string(), addr.to_string()))
}

fn initial_catalog(config: &CatalogConfig) -> CatalogSnapshot {
    let snapshot = config.zones.iter().fold(CatalogSnapshot::new(1), |s, z| {
        s.with_zone(z.id, &z.name, z.partitions, z.replicas)
    });
    config.tables.iter().fold(snapshot, |s, t| s.with_table(t.id, &t.name, t.zone_id))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use clap::Parser;
    let cli = Cli::parse();

    let mut figment = Figment::new().merge(Toml::string(include_str!("../../../config/default.toml")));

    if let Some(ref config_path) = cli.config {
        figment = figment.merge(Toml::file_exact(config_path));
    }

    let config: Config = figment
        .merge(Env::prefixed("MIMIR_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    match config.observability.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(&config.observability.log_level)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(&config.observability.log_level)
                .init();
        }
    }

    let listen_addr: SocketAddr = cli
        .listen_addr
        .parse()
        .with_context(|| format!("invalid listen_addr: {}", cli.listen_addr))?;
    let admin_addr: SocketAddr = cli
        .admin_addr
        .parse()
        .with_context(|| format!("invalid admin_addr: {}", cli.admin_addr))?;
    let peers = cli
        .peers
        .iter()
        .map(|p| parse_peer(p))
        .collect::<anyhow::Result<Vec<_>>>()?;

    tracing::info!(
        node = %cli.node_name,
        listen_addr = %listen_addr,
        admin_addr = %admin_addr,
        peers = peers.len(),
        "node starting"
    );

    let topology = StaticTopology::new(
        std::iter::once(ClusterNode::new(cli.node_name.clone(), cli.listen_addr.clone()))
            .chain(peers.iter().map(|(name, addr)| ClusterNode::new(name.clone(), addr.clone()))),
    );
    let catalog = Arc::new(MemCatalog::new());
    catalog
        .publish(initial_catalog(&config.catalog))
        .context("failed to seed catalog")?;

    let messaging = Arc::new(GrpcMessagingService::new(
        cli.node_name.clone(),
        peers,
        Duration::from_millis(config.server.request_timeout_ms),
    ));
    let manager = DisasterRecoveryManager::new(
        cli.node_name.clone(),
        config.recovery,
        Arc::new(MemMetaStorage::new()),
        messaging.clone(),
        catalog.clone(),
        Arc::new(topology),
        Arc::new(MemReplicaGroups::new()),
    );
    manager
        .start()
        .await
        .context("failed to start disaster recovery manager")?;

    let serve = async {
        tokio::try_join!(serve_cluster(listen_addr, messaging), serve_admin(admin_addr, manager.clone()))
    };
    tokio::select! {
        served = serve => {
            served?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(node = %cli.node_name, "shutdown requested");
        }
    }

    manager.stop().await.context("failed to stop disaster recovery manager")?;
    // Fails any probe still waiting for a catalog version.
    catalog.version_tracker().close();
    tracing::info!(node = %cli.node_name, "node stopped");

    Ok(())
}
