//! Transaction merkle trees.

use std::{fmt, io, iter::FromIterator};

use crate::primitives::sha256d;
use crate::serialize::{Decode, Encode, SerializationError};
use crate::transaction::{Txid, WtxId};

/// The root of a block's transaction merkle tree.
///
/// Interior nodes hash the concatenation of their children; a level with
/// an odd node count duplicates its last node. That duplication is why the
/// tree is malleable (CVE-2012-2459) and why blocks with duplicate txids
/// must be rejected structurally rather than relying on the root.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Root(pub [u8; 32]);

/// The BIP-141 witness tree root, built over wtxids with the coinbase
/// entry pinned to all-zeroes.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct WitnessRoot(pub [u8; 32]);

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut both = [0u8; 64];
    both[..32].copy_from_slice(left);
    both[32..].copy_from_slice(right);
    sha256d::hash(&both)
}

fn merkle_root(mut level: Vec<[u8; 32]>) -> [u8; 32] {
    if level.is_empty() {
        return [0u8; 32];
    }
    while level.len() > 1 {
        if level.len() % 2 != 0 {
            let last = *level.last().expect("level is non-empty");
            level.push(last);
        }
        level = level
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], &pair[1]))
            .collect();
    }
    level[0]
}

impl FromIterator<Txid> for Root {
    fn from_iter<I: IntoIterator<Item = Txid>>(txids: I) -> Self {
        Root(merkle_root(txids.into_iter().map(|txid| txid.0).collect()))
    }
}

impl FromIterator<WtxId> for WitnessRoot {
    fn from_iter<I: IntoIterator<Item = WtxId>>(wtxids: I) -> Self {
        WitnessRoot(merkle_root(wtxids.into_iter().map(|id| id.0).collect()))
    }
}

impl fmt::Debug for Root {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        f.debug_tuple("merkle::Root")
            .field(&hex::encode(reversed))
            .finish()
    }
}

impl fmt::Debug for WitnessRoot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        f.debug_tuple("merkle::WitnessRoot")
            .field(&hex::encode(reversed))
            .finish()
    }
}

impl Encode for Root {
    fn encode<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        writer.write_all(&self.0)
    }

    fn encoded_len(&self) -> usize {
        32
    }
}

impl Decode for Root {
    fn decode<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(Root(<[u8; 32]>::decode(reader)?))
    }
}
