use anyhow::Context;
use clap::Parser;
use distributed_kv::config::{Cli, NodeConfig};
use distributed_kv::membership::oracle::OracleRegistry;
use distributed_kv::membership::types::NodeIdentity;
use distributed_kv::node::{MembershipStrategy, Node};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

/// Port spacing between nodes started with `--local-cluster`.
const LOCAL_CLUSTER_PORT_STEP: u16 = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = cli.node_config();

    tracing::info!(
        "Replication factor {} (quorum {}), {} virtual nodes per member",
        config.replication_factor,
        config.quorum(),
        config.virtual_nodes
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let nodes = match cli.local_cluster {
        Some(count) => spawn_local_cluster(&config, count, &shutdown_rx)?,
        None => vec![spawn_node(&config, &shutdown_rx)],
    };

    tracing::info!("Press Ctrl+C to shutdown");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down {} node(s)", nodes.len());
    shutdown_tx.send_replace(true);

    for node in nodes {
        match node.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("Node exited with error: {:#}", e),
            Err(e) => tracing::error!("Node task panicked: {}", e),
        }
    }

    Ok(())
}

fn spawn_node(
    config: &NodeConfig,
    shutdown: &watch::Receiver<bool>,
) -> JoinHandle<anyhow::Result<()>> {
    let candidates: Vec<NodeIdentity> = config.peers.iter().map(|p| NodeIdentity::new(p.as_str())).collect();

    if candidates.is_empty() {
        tracing::info!("No peers configured, starting as a single-node cluster");
    } else {
        tracing::info!("Candidate peers: {:?}", config.peers);
    }

    let node = Node::new(config.clone());
    tokio::spawn(node.run(MembershipStrategy::Probe(candidates), shutdown.clone()))
}

fn spawn_local_cluster(
    config: &NodeConfig,
    count: usize,
    shutdown: &watch::Receiver<bool>,
) -> anyhow::Result<Vec<JoinHandle<anyhow::Result<()>>>> {
    let (host, port) = config
        .bind
        .rsplit_once(':')
        .context("--bind must be host:port")?;
    let base_port: u16 = port.parse().context("--bind port must be a number")?;

    tracing::info!("Initializing {} in-process nodes from port {}", count, base_port);

    let registry = OracleRegistry::new();
    let mut nodes = Vec::with_capacity(count);
    for i in 0..count {
        let port = u16::try_from(i)
            .ok()
            .and_then(|i| i.checked_mul(LOCAL_CLUSTER_PORT_STEP))
            .and_then(|step| base_port.checked_add(step))
            .context("local cluster does not fit in the port range")?;
        let node = Node::new(config.with_bind(format!("{}:{}", host, port)));
        nodes.push(tokio::spawn(
            node.run(MembershipStrategy::Oracle(registry.clone()), shutdown.clone()),
        ));
    }

    Ok(nodes)
}
