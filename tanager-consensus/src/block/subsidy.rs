//! Block subsidy: 50 BTC at genesis, halving every 210 000 blocks.

use std::convert::TryFrom;

use tanager_chain::amount::{self, Amount};
use tanager_chain::block::Height;

use crate::parameters::{HALVING_INTERVAL, MAX_BLOCK_SUBSIDY, MAX_HALVINGS};

/// The subsidy a block at `height` may mint.
///
/// The right shift makes the 64th halving and everything after it
/// exactly zero; issuance stops just short of 21 million coins.
pub fn block_subsidy(height: Height) -> Amount {
    let halvings = height.0 / HALVING_INTERVAL.0;
    if halvings >= MAX_HALVINGS {
        return Amount::zero();
    }
    let subsidy = MAX_BLOCK_SUBSIDY >> halvings;
    Amount::try_from(subsidy).expect("halved subsidies stay in the monetary range")
}

/// The most a coinbase may pay itself: subsidy plus the block's fees.
pub fn max_coinbase_value(height: Height, fees: Amount) -> Result<Amount, amount::Error> {
    block_subsidy(height).checked_add(fees)
}
