//! Subsidy constants.

use tanager_chain::amount::COIN;
use tanager_chain::block::Height;

/// The largest block subsidy, used before the first halving. 50 BTC.
pub const MAX_BLOCK_SUBSIDY: u64 = (50 * COIN) as u64;

/// Blocks between subsidy halvings.
pub const HALVING_INTERVAL: Height = Height(210_000);

/// After this many halvings the subsidy is exactly zero.
pub const MAX_HALVINGS: u32 = 64;
