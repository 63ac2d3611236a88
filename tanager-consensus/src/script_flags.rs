//! Deriving the script verification flags active at a height.

use tanager_chain::block::Height;
use tanager_chain::parameters::Network;
use tanager_script::VerifyFlags;

/// The script rules consensus enforces for a block at `height`.
///
/// Each soft fork contributes its flags from its activation height on;
/// historical blocks validate under the rules of their own era.
pub fn flags_at_height(network: Network, height: Height) -> VerifyFlags {
    let mut flags = VerifyFlags::empty();

    if height >= network.bip16_height() {
        flags |= VerifyFlags::P2SH;
    }
    if height >= network.bip66_height() {
        flags |= VerifyFlags::DERSIG;
    }
    if height >= network.bip65_height() {
        flags |= VerifyFlags::CHECKLOCKTIMEVERIFY;
    }
    if height >= network.bip68_height() {
        flags |= VerifyFlags::CHECKSEQUENCEVERIFY;
    }
    if height >= network.segwit_height() {
        flags |= VerifyFlags::WITNESS | VerifyFlags::NULLDUMMY;
    }
    if height >= network.taproot_height() {
        flags |= VerifyFlags::TAPROOT;
    }

    flags
}
