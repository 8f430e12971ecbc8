//! Node configuration for the XAI full node.
//!
//! Provides [`NodeConfig`] with defaults for data directory, RPC binding,
//! logging, and consensus tunables, plus the nested [`xai_network::NetworkConfig`]
//! for the P2P layer. Loaded via the `config` crate (defaults -> TOML file ->
//! environment overrides) with `clap` CLI overrides layered on top by the
//! `xai-node` binary; this struct is what those layers populate.

use std::path::PathBuf;

use xai_core::constants::{DIFFICULTY_WINDOW, MAX_BLOCK_SIZE};
use xai_network::NetworkConfig;

/// Default port for the node's JSON-RPC server.
pub const DEFAULT_RPC_PORT: u16 = 28332;

/// Structured log output, selected by [`NodeConfig::log_format`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, colorized output (the `tracing_subscriber::fmt` default).
    Pretty,
    /// Newline-delimited JSON, one object per event.
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        LogFormat::Pretty
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}', expected 'pretty' or 'json'")),
        }
    }
}

/// Configuration for a full node instance.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// IP address for the JSON-RPC server to bind to.
    pub rpc_bind: String,
    /// Port for the JSON-RPC server.
    pub rpc_port: u16,
    /// P2P network configuration.
    pub network: NetworkConfig,
    /// Log level filter string (e.g. "info", "debug", "xai_node=trace").
    pub log_level: String,
    /// Log output format: pretty (human) or json (machine).
    pub log_format: LogFormat,
    /// Target seconds between blocks, used by the difficulty controller.
    pub target_block_time_seconds: u64,
    /// Number of blocks in the difficulty-adjustment averaging window.
    pub difficulty_adjustment_window: u64,
    /// Maximum serialized block size, in bytes.
    pub max_block_bytes: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("xai");

        Self {
            data_dir,
            rpc_bind: "127.0.0.1".to_string(),
            rpc_port: DEFAULT_RPC_PORT,
            network: NetworkConfig::default(),
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            target_block_time_seconds: xai_core::constants::BLOCK_TIME_SECS,
            difficulty_adjustment_window: DIFFICULTY_WINDOW,
            max_block_bytes: MAX_BLOCK_SIZE,
        }
    }
}

impl NodeConfig {
    /// Configuration preset for testnet.
    pub fn testnet() -> Self {
        Self {
            network: NetworkConfig::testnet(),
            ..Self::default()
        }
    }

    /// Configuration preset for devnet (local multi-node clusters).
    pub fn devnet() -> Self {
        Self {
            network: NetworkConfig::devnet(),
            ..Self::default()
        }
    }

    /// Path to the RocksDB chain data directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("chaindata")
    }

    /// Socket address string for the RPC server.
    pub fn rpc_addr(&self) -> String {
        format!("{}:{}", self.rpc_bind, self.rpc_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rpc_port() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.rpc_port, DEFAULT_RPC_PORT);
    }

    #[test]
    fn default_rpc_bind_is_localhost() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.rpc_bind, "127.0.0.1");
    }

    #[test]
    fn default_log_level_is_info() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn default_log_format_is_pretty() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.log_format, LogFormat::Pretty);
    }

    #[test]
    fn log_format_parses_from_str() {
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn default_data_dir_ends_with_xai() {
        let cfg = NodeConfig::default();
        assert!(
            cfg.data_dir.ends_with("xai"),
            "data_dir should end with 'xai': {:?}",
            cfg.data_dir
        );
    }

    #[test]
    fn default_consensus_tunables_match_core_constants() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.target_block_time_seconds, xai_core::constants::BLOCK_TIME_SECS);
        assert_eq!(cfg.difficulty_adjustment_window, DIFFICULTY_WINDOW);
        assert_eq!(cfg.max_block_bytes, MAX_BLOCK_SIZE);
    }

    #[test]
    fn rpc_addr_format() {
        let cfg = NodeConfig::default();
        let addr = cfg.rpc_addr();
        assert_eq!(addr, format!("127.0.0.1:{DEFAULT_RPC_PORT}"));
    }

    #[test]
    fn rpc_addr_custom() {
        let cfg = NodeConfig {
            rpc_bind: "0.0.0.0".to_string(),
            rpc_port: 9999,
            ..NodeConfig::default()
        };
        assert_eq!(cfg.rpc_addr(), "0.0.0.0:9999");
    }

    #[test]
    fn db_path_appends_chaindata() {
        let cfg = NodeConfig {
            data_dir: PathBuf::from("/tmp/xai-test"),
            ..NodeConfig::default()
        };
        assert_eq!(cfg.db_path(), PathBuf::from("/tmp/xai-test/chaindata"));
    }

    #[test]
    fn testnet_preset_uses_testnet_network() {
        let cfg = NodeConfig::testnet();
        assert_eq!(cfg.network.network, xai_core::address::Network::Testnet);
    }

    #[test]
    fn config_is_clone_and_debug() {
        let cfg = NodeConfig::default();
        let cfg2 = cfg.clone();
        let debug = format!("{cfg2:?}");
        assert!(debug.contains("NodeConfig"));
    }
}
