//! Daemon configuration: a TOML file overlaid with command-line flags.

use std::path::PathBuf;

use serde::Deserialize;

use tanager_chain::block::Height;
use tanager_chain::parameters::Network;

/// The on-disk configuration file.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Node data directory.
    pub data_dir: PathBuf,
    /// Which chain to follow.
    pub network: Network,
    /// Prune target in megabytes; 0 keeps all blocks.
    pub prune_target_mb: u64,
    /// Trust scripts at or below this height (0 verifies everything).
    pub assume_valid_height: u32,
    /// UTXO store checkpoint interval, in heights.
    pub checkpoint_interval: u32,
    /// DRAIN re-request threshold, in milliseconds.
    pub stall_timeout_ms: u64,
    /// Log filter, e.g. `info` or `tanager_sync=debug`.
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Config {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tanager");
        Config {
            data_dir,
            network: Network::Mainnet,
            prune_target_mb: 0,
            assume_valid_height: 0,
            checkpoint_interval: 10_000,
            stall_timeout_ms: 5_000,
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: &std::path::Path) -> Result<Config, crate::NodeError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn assume_valid(&self) -> Height {
        Height(self.assume_valid_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_file() {
        tanager_test::init();
        let parsed: Config = toml::from_str(
            r#"
                data_dir = "/tmp/tanager-test"
                network = "regtest"
                prune_target_mb = 2048
            "#,
        )
        .unwrap();
        assert_eq!(parsed.network, Network::Regtest);
        assert_eq!(parsed.prune_target_mb, 2048);
        // Unset fields take defaults.
        assert_eq!(parsed.checkpoint_interval, 10_000);
    }

    #[test]
    fn rejects_unknown_fields() {
        tanager_test::init();
        assert!(toml::from_str::<Config>("mining_threads = 8").is_err());
    }
}
