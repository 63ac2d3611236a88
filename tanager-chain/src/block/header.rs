use std::io;

use crate::serialize::{Decode, Encode, SerializationError};
use crate::work::CompactDifficulty;
use crate::Cached;

use super::{merkle, Hash};

/// A block header, containing metadata about a block.
///
/// Headers chain backwards: each one names the hash of its parent, all the
/// way to genesis, so no ancestor can change without changing this header's
/// own hash.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Header {
    /// The block version field. Versions 2 and up commit to the block
    /// height in the coinbase (BIP-34).
    pub version: i32,

    /// The hash of the previous block.
    pub previous_block_hash: Hash,

    /// The root of the transaction merkle tree, binding the header to the
    /// block's transactions.
    ///
    /// Because of a flaw inherited from Bitcoin's tree construction
    /// (CVE-2012-2459), the root alone does not always uniquely bind the
    /// transaction list; the structural duplicate-txid check closes that
    /// hole.
    pub merkle_root: merkle::Root,

    /// Unix time at which the miner claims to have started hashing.
    /// Bitcoin's native width: seconds as a u32.
    pub time: u32,

    /// The encoded target threshold this header's hash must not exceed,
    /// in Bitcoin's nBits format.
    pub difficulty_threshold: CompactDifficulty,

    /// Free field miners grind to move the header hash under the target.
    pub nonce: u32,

    /// Memoized header hash; never serialized.
    hash: Cached<Hash>,
}

impl Header {
    /// Serialized header length in bytes.
    pub const LEN: usize = 80;

    pub fn new(
        version: i32,
        previous_block_hash: Hash,
        merkle_root: merkle::Root,
        time: u32,
        difficulty_threshold: CompactDifficulty,
        nonce: u32,
    ) -> Header {
        Header {
            version,
            previous_block_hash,
            merkle_root,
            time,
            difficulty_threshold,
            nonce,
            hash: Cached::empty(),
        }
    }

    /// The header's own hash, from the cache when one was recorded at
    /// deserialization time.
    pub fn hash(&self) -> Hash {
        match self.hash.value() {
            Some(hash) => hash,
            None => Hash::from(self),
        }
    }
}

impl Encode for Header {
    fn encode<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.version.encode(&mut writer)?;
        self.previous_block_hash.encode(&mut writer)?;
        self.merkle_root.encode(&mut writer)?;
        self.time.encode(&mut writer)?;
        self.difficulty_threshold.encode(&mut writer)?;
        self.nonce.encode(&mut writer)
    }

    fn encoded_len(&self) -> usize {
        Header::LEN
    }
}

impl Decode for Header {
    fn decode<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        // Read the raw 80 bytes first so the hash comes out of the same
        // pass as the parse.
        let mut raw = [0u8; Header::LEN];
        reader.read_exact(&mut raw)?;
        let own_hash = Hash(crate::primitives::sha256d::hash(&raw));

        let mut cursor = io::Cursor::new(&raw[..]);
        Ok(Header {
            version: i32::decode(&mut cursor)?,
            previous_block_hash: Hash::decode(&mut cursor)?,
            merkle_root: merkle::Root::decode(&mut cursor)?,
            time: u32::decode(&mut cursor)?,
            difficulty_threshold: CompactDifficulty::decode(&mut cursor)?,
            nonce: u32::decode(&mut cursor)?,
            hash: Cached::from(own_hash),
        })
    }
}
