//! XAI full node binary.
//!
//! Starts a full node with RocksDB storage, JSON-RPC server, and P2P networking.
//! Processes blocks and transactions, validates the chain, and serves RPC queries.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use xai_core::address::Network;
use xai_core::constants::DEFAULT_P2P_PORT;
use xai_network::NetworkConfig;
use xai_node_lib::{start_rpc_server, Node, NodeConfig};
use tracing::{error, info};

/// XAI full node.
#[derive(Parser, Debug)]
#[command(
    name = "xai-node",
    version,
    about = "XAI full node with RocksDB storage and JSON-RPC server"
)]
struct Args {
    /// Data directory for blockchain storage and config
    #[arg(long, default_value = None)]
    data_dir: Option<PathBuf>,

    /// RPC server bind address
    #[arg(long, default_value = "127.0.0.1")]
    rpc_bind: String,

    /// RPC server port
    #[arg(long, default_value_t = xai_node_lib::config::DEFAULT_RPC_PORT)]
    rpc_port: u16,

    /// P2P listen address
    #[arg(long, default_value = "0.0.0.0")]
    p2p_listen_addr: String,

    /// P2P listen port
    #[arg(long, default_value_t = DEFAULT_P2P_PORT)]
    p2p_listen_port: u16,

    /// Bootstrap peers (comma-separated)
    #[arg(long, value_delimiter = ',')]
    bootstrap_peers: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format ("pretty" or "json")
    #[arg(long, default_value = "pretty")]
    log_format: String,

    /// Disable P2P networking (single-node mode)
    #[arg(long)]
    no_network: bool,

    /// Connect to the public test network (testnet) instead of mainnet.
    #[arg(long)]
    testnet: bool,
}

impl Args {
    /// Convert CLI args into a NodeConfig.
    fn into_config(self) -> NodeConfig {
        let network = if self.testnet {
            Network::Testnet
        } else {
            Network::Mainnet
        };

        let default_data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("xai")
            .join(match network {
                Network::Mainnet => "mainnet",
                Network::Testnet => "testnet",
            });

        let data_dir = self.data_dir.unwrap_or(default_data_dir);

        let mut bootstrap_peers = self.bootstrap_peers;
        let mut enable_mdns = true;

        // Disable network if requested.
        if self.no_network {
            bootstrap_peers.clear();
            enable_mdns = false;
        }

        let default_network = if self.testnet {
            NetworkConfig::testnet()
        } else {
            NetworkConfig::mainnet()
        };
        let network_config = NetworkConfig {
            listen_addr: self.p2p_listen_addr,
            listen_port: self.p2p_listen_port,
            bootstrap_peers,
            enable_mdns,
            node_key_path: Some(data_dir.join("node.key")),
            identity_key_path: Some(data_dir.join("identity.key")),
            ..default_network
        };

        let log_format = self.log_format.parse().unwrap_or_default();

        NodeConfig {
            data_dir,
            rpc_bind: self.rpc_bind,
            rpc_port: self.rpc_port,
            log_level: self.log_level,
            log_format,
            network: network_config,
            ..NodeConfig::default()
        }
    }
}

#[tokio::main]
async fn main() {
    // Parse CLI arguments.
    let args = Args::parse();
    let config = args.into_config();

    // Initialize logging.
    init_logging(&config.log_level, config.log_format);

    info!("XAI full node v{}", env!("CARGO_PKG_VERSION"));
    info!("network: {:?}", config.network.network);
    info!("data_dir: {:?}", config.data_dir);
    info!("rpc_addr: {}", config.rpc_addr());
    info!("p2p_listen: {}", config.network.listen_multiaddr());
    info!("bootstrap_peers: {:?}", config.network.bootstrap_peers);
    info!("enable_mdns: {}", config.network.enable_mdns);

    // Create data directory if it doesn't exist.
    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        error!("failed to create data_dir: {}", e);
        process::exit(1);
    }

    // Start the node.
    let node = match Node::new(config.clone()).await {
        Ok(n) => n,
        Err(e) => {
            error!("failed to start node: {}", e);
            process::exit(1);
        }
    };

    info!("node initialized");

    // Check chain tip at startup.
    if let Ok((height, hash)) = node.chain_tip() {
        info!(
            "chain_tip: height={} hash={}",
            height,
            hex::encode(hash.as_bytes())
        );
    }

    // Start RPC server.
    let rpc_handle = match start_rpc_server(&config.rpc_addr(), node.clone()).await {
        Ok(handle) => {
            info!("RPC server listening on {}", config.rpc_addr());
            handle
        }
        Err(e) => {
            error!("failed to start RPC server: {}", e);
            process::exit(1);
        }
    };

    info!("XAI node running (Ctrl+C to stop)");

    // Set up Ctrl+C handler.
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
        info!("received Ctrl+C, shutting down...");
    };

    // Run the node event loop and wait for shutdown.
    tokio::select! {
        _ = node.run() => {
            info!("node event loop exited");
        }
        _ = shutdown_signal => {
            info!("shutdown signal received");
        }
    }

    // Stop RPC server.
    rpc_handle.stop().ok();
    info!("RPC server stopped");
    info!("XAI node shutdown complete");
}

/// Initialize tracing subscriber with the given log level and output format.
fn init_logging(level_str: &str, format: xai_node_lib::config::LogFormat) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use xai_node_lib::config::LogFormat;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_str));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true).with_level(true))
                .init();
        }
    }
}
