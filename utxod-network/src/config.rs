//! Configuration for the peer engine.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use utxod_chain::parameters::Network;

use crate::constants;

/// Peer engine settings, deserialized from the node's TOML config file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// The address to accept inbound connections on.
    pub listen_addr: SocketAddr,
    /// Which network this node joins.
    pub network: Network,
    /// Peers to dial unconditionally at startup, before consulting the
    /// endpoint pool.
    pub initial_peers: Vec<SocketAddr>,
    /// When set, outbound connections are tunneled through this SOCKS
    /// proxy instead of dialed directly.
    pub proxy: Option<SocketAddr>,
    /// Cap on concurrent outbound connections.
    pub max_outbound: usize,
    /// Cap on concurrent inbound connections.
    pub max_inbound: usize,
    /// The user agent advertised to peers.
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            listen_addr: format!("0.0.0.0:{}", Network::Mainnet.default_port())
                .parse()
                .expect("hard-coded listen address is valid"),
            network: Network::Mainnet,
            initial_peers: Vec::new(),
            proxy: None,
            max_outbound: constants::MAX_OUTBOUND_CONNECTIONS,
            max_inbound: constants::MAX_INBOUND_CONNECTIONS,
            user_agent: constants::USER_AGENT.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_listens_on_the_mainnet_port() {
        let config = Config::default();
        assert_eq!(config.listen_addr.port(), Network::Mainnet.default_port());
        assert_eq!(config.max_outbound, 8);
        assert_eq!(config.max_inbound, 117);
    }
}
