//! The Tanager daemon: wires storage, consensus, and sync together and
//! runs until interrupted.
//!
//! Startup order matters: directories, then the UTXO store (which holds
//! the persisted validated tip), then the block index, the block store,
//! chainstate, and finally the chaser — which rescans the block store so
//! an interrupted sync resumes where it stopped. Shutdown is the same
//! order reversed, triggered by a signal-set flag the workers observe
//! within one tick.

mod config;
mod node;

use std::path::PathBuf;

use gumdrop::Options;
use tracing::info;

use config::Config;
pub use node::NodeError;

#[derive(Debug, Options)]
struct Args {
    #[options(help = "print help and exit")]
    help: bool,

    #[options(help = "path to the configuration file")]
    config: Option<PathBuf>,

    #[options(help = "override the data directory")]
    data_dir: Option<PathBuf>,

    #[options(help = "network to follow: mainnet, testnet, or regtest")]
    network: Option<String>,
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse_args_default_or_exit();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(network) = &args.network {
        config.network = match network.as_str() {
            "mainnet" => tanager_chain::parameters::Network::Mainnet,
            "testnet" => tanager_chain::parameters::Network::Testnet,
            "regtest" => tanager_chain::parameters::Network::Regtest,
            other => return Err(color_eyre::eyre::eyre!("unknown network {:?}", other)),
        };
    }

    init_tracing(&config.log_filter);
    info!(
        network = %config.network,
        data_dir = %config.data_dir.display(),
        "tanagerd starting"
    );

    let node = node::Node::open(&config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let fatal = runtime.block_on(async {
        let mut health = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupt received, shutting down");
                    break false;
                }
                _ = health.tick() => {
                    if node.is_fatal() {
                        tracing::error!("fatal store error, shutting down");
                        break true;
                    }
                }
            }
        }
    });

    node.shutdown();
    info!("tanagerd stopped");
    if fatal {
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing(filter: &str) {
    use tracing_subscriber::prelude::*;

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(tracing_error::ErrorLayer::default())
        .init();
}
