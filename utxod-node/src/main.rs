//! The utxod entry point: configuration, logging, the data-directory lock,
//! and the wiring between the chain engine, peer engine, and RPC surface.

mod chain_view;
mod config;
mod verifier;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use color_eyre::eyre::{eyre, Result, WrapErr};
use gumdrop::Options;
use tokio::sync::watch;
use tracing::{error, info, warn};

use utxod_chain::block::{Block, Height};
use utxod_chain::parameters::Network;
use utxod_consensus::chain::Chain;
use utxod_consensus::Observer;
use utxod_network::{AddressBook, PeerSet};
use utxod_rpc::methods::RpcContext;

use chain_view::ChainHandle;
use config::NodeConfig;
use verifier::EcdsaVerifier;

/// How long shutdown waits for the peer engine to wind down.
const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(20);

#[derive(Debug, Options)]
struct NodeOptions {
    #[options(help = "print this help message")]
    help: bool,
    #[options(help = "path to the TOML configuration file")]
    config: Option<PathBuf>,
    #[options(help = "data directory (overrides the config file)")]
    data_dir: Option<PathBuf>,
    #[options(help = "join the test network")]
    testnet: bool,
    #[options(help = "listen address for peer connections")]
    listen: Option<std::net::SocketAddr>,
    #[options(help = "peer to dial at startup (repeatable)")]
    connect: Vec<std::net::SocketAddr>,
    #[options(help = "tracing filter, e.g. info or utxod_network=debug")]
    filter: Option<String>,
}

/// Logs chain events as they commit; the same bus a wallet would register
/// on.
struct LogObserver;

impl Observer for LogObserver {
    fn on_block_connected(&self, block: &Block, height: Height) {
        info!(height = height.0, hash = %block.hash(), transactions = block.transactions.len(), "connected block");
    }

    fn on_reorganize(&self, old_tip: utxod_chain::block::Hash, new_tip: utxod_chain::block::Hash, depth: u32) {
        warn!(%old_tip, %new_tip, depth, "chain reorganized");
    }
}

fn main() {
    let exit_code = match run() {
        Ok(()) => 0,
        Err(report) => {
            error!(?report, "fatal error");
            eprintln!("utxod: {:?}", report);
            1
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<()> {
    color_eyre::install()?;
    let options = NodeOptions::parse_args_default_or_exit();

    let mut config = NodeConfig::load(options.config.as_deref())?;
    if let Some(data_dir) = options.data_dir {
        config.data_dir = Some(data_dir);
    }
    if options.testnet {
        config.network.network = Network::Testnet;
        if options.listen.is_none() && config.network.listen_addr.port() == Network::Mainnet.default_port() {
            config.network.listen_addr.set_port(Network::Testnet.default_port());
        }
    }
    if let Some(listen) = options.listen {
        config.network.listen_addr = listen;
    }
    config.network.initial_peers.extend(options.connect);
    if let Some(filter) = options.filter {
        config.tracing_filter = Some(filter);
    }

    let filter = config.tracing_filter.clone().unwrap_or_else(|| "info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let data_dir = config.resolved_data_dir()?;
    std::fs::create_dir_all(&data_dir).wrap_err("could not create the data directory")?;
    let _lock = DirLock::acquire(data_dir.join(".lock"))?;

    let network = config.network.network;
    info!(?network, data_dir = %data_dir.display(), "starting utxod");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .wrap_err("could not start the async runtime")?;

    runtime.block_on(async move {
        let verifier = Arc::new(EcdsaVerifier::new());
        let mut chain = Chain::open(network, &data_dir, verifier.clone())
            .wrap_err("could not open the chain state; the index may be corrupt")?;
        chain.register_observer(Box::new(LogObserver));
        let chain = Arc::new(Mutex::new(chain));
        let chain_handle = ChainHandle::new(chain.clone());

        let address_book =
            AddressBook::open(data_dir.join("addr.dat")).wrap_err("could not open the endpoint pool")?;
        let peer_set = PeerSet::new(config.network.clone(), Arc::new(chain_handle), verifier, address_book);
        let network_handle = peer_set.handle();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        utxod_rpc::spawn(config.rpc.clone(), RpcContext { chain, network: Some(network_handle) }, shutdown_rx.clone());
        let peer_task = tokio::spawn(peer_set.run(shutdown_rx));

        tokio::signal::ctrl_c().await.wrap_err("could not listen for the interrupt signal")?;
        info!("interrupt received, shutting down");
        let _ = shutdown_tx.send(true);
        match tokio::time::timeout(SHUTDOWN_GRACE, peer_task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(error))) => warn!(%error, "peer engine exited with an error"),
            Ok(Err(join_error)) => warn!(%join_error, "peer engine task failed"),
            Err(_) => warn!("peer engine did not stop within the grace period"),
        }
        Ok::<(), color_eyre::eyre::Report>(())
    })?;

    info!("shutdown complete");
    Ok(())
}

/// The `.lock` file guarding the data directory against a second instance.
/// Removed on drop; a stale file from a crashed process must be removed by
/// the operator, which beats silently sharing an index between processes.
struct DirLock {
    path: PathBuf,
}

impl DirLock {
    fn acquire(path: PathBuf) -> Result<DirLock> {
        match std::fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(DirLock { path }),
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => Err(eyre!(
                "data directory is locked by another instance (remove {} if that instance crashed)",
                path.display()
            )),
            Err(error) => Err(error).wrap_err("could not create the data directory lock"),
        }
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(error) = std::fs::remove_file(&self.path) {
            warn!(%error, "could not remove the data directory lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_lock_on_the_same_directory_fails() {
        let dir = tempdir::TempDir::new("utxod-lock").unwrap();
        let path = dir.path().join(".lock");
        let first = DirLock::acquire(path.clone()).unwrap();
        assert!(DirLock::acquire(path.clone()).is_err());
        drop(first);
        // Releasing the first lock frees the slot.
        DirLock::acquire(path).unwrap();
    }
}
