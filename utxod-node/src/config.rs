//! The node's TOML configuration: one file with a section per subsystem.

use std::path::{Path, PathBuf};

use color_eyre::eyre::{eyre, Result, WrapErr};
use serde::{Deserialize, Serialize};

use utxod_chain::parameters::Network;

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct NodeConfig {
    /// Overrides the per-platform default data directory.
    pub data_dir: Option<PathBuf>,
    /// The `tracing` filter, e.g. `info` or `utxod_network=debug,info`.
    pub tracing_filter: Option<String>,
    pub network: utxod_network::Config,
    pub rpc: utxod_rpc::Config,
}

impl NodeConfig {
    /// Loads the config file if one is named, otherwise starts from
    /// defaults.
    pub fn load(path: Option<&Path>) -> Result<NodeConfig> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .wrap_err_with(|| format!("could not read config file {}", path.display()))?;
                toml::from_str(&text).wrap_err_with(|| format!("could not parse config file {}", path.display()))
            }
            None => Ok(NodeConfig::default()),
        }
    }

    /// The resolved data directory: the configured one, or a per-network
    /// subdirectory under the platform data dir.
    pub fn resolved_data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let base = dirs::data_dir().ok_or_else(|| eyre!("no platform data directory; set data_dir in the config"))?;
        let network_dir = match self.network.network {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        };
        Ok(base.join("utxod").join(network_dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_parses_to_defaults() {
        let config: NodeConfig = toml::from_str("").unwrap();
        assert_eq!(config.network.network, Network::Mainnet);
        assert!(config.rpc.enabled);
    }

    #[test]
    fn sections_override_independently() {
        let config: NodeConfig = toml::from_str(
            r#"
            tracing_filter = "debug"

            [network]
            network = "Testnet"
            listen_addr = "0.0.0.0:18333"

            [rpc]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.network.network, Network::Testnet);
        assert!(!config.rpc.enabled);
        assert_eq!(config.tracing_filter.as_deref(), Some("debug"));
    }
}
