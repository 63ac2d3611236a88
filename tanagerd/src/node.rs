//! Node assembly and lifecycle.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{info, warn};

use tanager_chain::block;
use tanager_state::{
    BlockIndex, BlockStore, Chainstate, SledUtxoStore, StoreError, UtxoStore,
};
use tanager_sync::{Chaser, ChaserConfig, DownloadNetwork, Event, PeerId, RunningChaser};

use crate::config::Config;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),
}

/// Outbound block requests, to be wired to the peer-to-peer stack.
///
/// The wire protocol lives outside this repository; this sink is where
/// it plugs in. Until it is attached, requests are logged and dropped,
/// which leaves the node serving local state without syncing.
struct UnwiredNetwork;

impl DownloadNetwork for UnwiredNetwork {
    fn send_getdata(&self, peer: PeerId, hashes: &[block::Hash]) {
        warn!(%peer, count = hashes.len(), "no network stack attached, dropping getdata");
    }

    fn disconnect_peer(&self, peer: PeerId, reason: &str) {
        warn!(%peer, reason, "no network stack attached, cannot disconnect");
    }
}

pub struct Node {
    chaser: RunningChaser,
}

impl Node {
    /// Open every store and start the sync pipeline.
    pub fn open(config: &Config) -> Result<Node, NodeError> {
        std::fs::create_dir_all(&config.data_dir)?;
        let state_config = tanager_state::Config::new(&config.data_dir);

        let utxos = SledUtxoStore::open(&state_config)?;
        let utxo_count = utxos.utxo_count()?;
        let utxos: Arc<Mutex<Box<dyn UtxoStore>>> = Arc::new(Mutex::new(Box::new(utxos)));

        let index = BlockIndex::open(&state_config, config.network)?;
        let index = Arc::new(Mutex::new(index));

        let block_store = Arc::new(BlockStore::open(&state_config)?);
        let chainstate = Chainstate::new(index, utxos)?;

        info!(
            tip = chainstate.validated_tip().0,
            utxos = utxo_count,
            "chain state loaded"
        );

        let chaser_config = ChaserConfig {
            network: config.network,
            prune_target_mb: config.prune_target_mb,
            assume_valid_height: config.assume_valid(),
            checkpoint_interval: config.checkpoint_interval,
            stall_timeout_ms: config.stall_timeout_ms,
            ..ChaserConfig::default()
        };
        let chaser = Chaser::new(
            chaser_config,
            chainstate,
            block_store,
            Box::new(UnwiredNetwork),
        )?
        .start();
        chaser.handle().send(Event::Start);

        Ok(Node { chaser })
    }

    /// Did the sync pipeline hit an unrecoverable store error?
    pub fn is_fatal(&self) -> bool {
        self.chaser.is_fatal()
    }

    /// Stop the pipeline and flush stores; the reverse of `open`.
    pub fn shutdown(self) {
        self.chaser.stop();
        info!("node stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn opens_and_shuts_down_cleanly() {
        tanager_test::init();
        let dir = TempDir::new("tanagerd-node").unwrap();
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            network: tanager_chain::parameters::Network::Regtest,
            ..Config::default()
        };

        let node = Node::open(&config).unwrap();
        node.shutdown();

        // A second open resumes from the same stores.
        let node = Node::open(&config).unwrap();
        node.shutdown();
    }
}
