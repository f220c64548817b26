//! RPC server configuration.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Where the HTTP listener binds. The loopback default keeps the RPC
    /// surface off the open internet unless explicitly reconfigured.
    pub listen_addr: SocketAddr,
    pub username: String,
    pub password: String,
    /// Disabled entirely when false.
    pub enabled: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            listen_addr: "127.0.0.1:8332".parse().expect("hard-coded listen address is valid"),
            username: "rpcuser".to_owned(),
            password: String::new(),
            enabled: true,
        }
    }
}
