//! The header DAG.
//!
//! Every header ever accepted lives here, keyed by hash and linked by
//! parent hash; the best chain is the tip with the greatest cumulative
//! work whose ancestry contains no failed block. Entries are persisted
//! to sled so restarts do not re-download headers.

use std::collections::HashMap;
use std::io;

use bitflags::bitflags;
use tracing::{debug, info, warn};

use tanager_chain::block::{self, Header, Height};
use tanager_chain::parameters::{genesis_hash, genesis_header, Network, GENESIS_PREVIOUS_BLOCK_HASH};
use tanager_chain::serialize::{Decode, Encode, SerializationError};
use tanager_chain::work::Work;

use crate::error::StoreError;
use crate::Config;

bitflags! {
    /// Validation progress and storage state of an indexed block.
    pub struct BlockStatus: u8 {
        /// Header passed PoW and contextual checks.
        const VALID_HEADER  = 0b0000_0001;
        /// Merkle tree and structure verified.
        const VALID_TREE    = 0b0000_0010;
        /// Scripts verified (not set on assumevalid heights).
        const VALID_SCRIPTS = 0b0000_0100;
        /// Fully applied to the UTXO set.
        const VALID_CHAIN   = 0b0000_1000;
        /// Raw block bytes are on disk.
        const HAVE_DATA     = 0b0001_0000;
        /// Validation failed; the whole subtree is unusable.
        const FAILED        = 0b0010_0000;
        /// Block data was pruned after validation.
        const PRUNED        = 0b0100_0000;
    }
}

/// One indexed header with its accumulated chain work.
#[derive(Clone, Debug)]
pub struct BlockIndexEntry {
    pub hash: block::Hash,
    pub height: Height,
    pub header: Header,
    pub cum_work: Work,
    pub status: BlockStatus,
}

/// A header the index refused to extend the DAG with.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("header does not meet its target")]
    Pow,
    #[error("header timestamp is not past the median of the last 11 blocks")]
    TimeTooOld,
    #[error("parent header {0} is unknown")]
    Orphan(block::Hash),
    #[error("parent {0} is marked failed")]
    KnownInvalid(block::Hash),
    #[error("genesis hash does not match the configured network")]
    BadGenesis,
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct BlockIndex {
    network: Network,
    entries: HashMap<block::Hash, BlockIndexEntry>,
    /// The best chain by hash, indexed by height.
    best_chain: Vec<block::Hash>,
    /// The only acceptable height-0 hash. `None` only in the in-memory
    /// test constructor, which accepts synthetic genesis blocks.
    expected_genesis: Option<block::Hash>,
    headers: Option<sled::Tree>,
    _db: Option<sled::Db>,
}

impl BlockIndex {
    /// Open the on-disk index, loading every persisted entry. A fresh
    /// index seeds itself with the network's hard-coded genesis header,
    /// so the chain is rooted before the first peer connects and no
    /// fabricated height-0 header can ever be accepted.
    pub fn open(config: &Config, network: Network) -> Result<BlockIndex, StoreError> {
        std::fs::create_dir_all(config.chainstate_dir())?;
        let db = sled::Config::new()
            .path(config.block_index_db_path())
            .open()?;
        let headers = db.open_tree(b"header_by_hash")?;

        let mut index = BlockIndex {
            network,
            entries: HashMap::new(),
            best_chain: Vec::new(),
            expected_genesis: Some(genesis_hash(network)),
            headers: Some(headers.clone()),
            _db: Some(db),
        };

        let mut loaded = 0usize;
        for row in headers.iter() {
            let (_, value) = row?;
            let entry = decode_entry(&value)
                .map_err(|_| StoreError::Corrupt("block index row failed to parse"))?;
            index.entries.insert(entry.hash, entry);
            loaded += 1;
        }
        index.rebuild_best_chain();
        if loaded > 0 {
            info!(
                headers = loaded,
                best_height = index.best_chain.len().saturating_sub(1),
                "loaded block index"
            );
        } else {
            index
                .insert_header(genesis_header(network))
                .expect("the hard-coded genesis header is valid");
            info!(%network, "seeded genesis header");
        }
        Ok(index)
    }

    /// An in-memory index for tests. Unlike [`BlockIndex::open`], this
    /// constructor accepts any PoW-valid header as genesis, so tests can
    /// build synthetic chains from scratch.
    pub fn in_memory(network: Network) -> BlockIndex {
        BlockIndex {
            network,
            entries: HashMap::new(),
            best_chain: Vec::new(),
            expected_genesis: None,
            headers: None,
            _db: None,
        }
    }

    /// Validate a header against its parent and insert it.
    ///
    /// Checks proof of work (target encoding, limit, and hash) and the
    /// median-time-past rule, accumulates work, and re-selects the best
    /// chain when the new entry wins.
    pub fn insert_header(&mut self, header: Header) -> Result<&BlockIndexEntry, IndexError> {
        let hash = header.hash();
        if self.entries.contains_key(&hash) {
            return Ok(&self.entries[&hash]);
        }

        let (height, parent_work) = if header.previous_block_hash == GENESIS_PREVIOUS_BLOCK_HASH {
            // A height-0 header must be *the* genesis block. Anything
            // else is a fabricated root, however much work it carries.
            if let Some(expected) = self.expected_genesis {
                if hash != expected {
                    return Err(IndexError::BadGenesis);
                }
            }
            (Height(0), Work::zero())
        } else {
            let parent = self
                .entries
                .get(&header.previous_block_hash)
                .ok_or(IndexError::Orphan(header.previous_block_hash))?;
            if parent.status.contains(BlockStatus::FAILED) {
                return Err(IndexError::KnownInvalid(parent.hash));
            }
            (parent.height.next(), parent.cum_work)
        };

        // Proof of work: the encoded target must be valid, within the
        // network limit, and above the header's own hash.
        let target = header
            .difficulty_threshold
            .to_expanded()
            .ok_or(IndexError::Pow)?;
        if target > self.network.target_difficulty_limit() {
            return Err(IndexError::Pow);
        }
        if hash > target {
            return Err(IndexError::Pow);
        }

        // Median-time-past: the timestamp must move past the median of
        // the last 11 blocks.
        if height > Height(0) {
            let mtp = self.median_time_past(header.previous_block_hash);
            if header.time <= mtp {
                return Err(IndexError::TimeTooOld);
            }
        }

        let entry = BlockIndexEntry {
            hash,
            height,
            header,
            cum_work: parent_work + target.to_work(),
            status: BlockStatus::VALID_HEADER,
        };
        self.persist(&entry)?;
        self.entries.insert(hash, entry);

        let best_work = self.best_tip().map(|e| e.cum_work).unwrap_or_else(Work::zero);
        if self.entries[&hash].cum_work > best_work || self.best_chain.is_empty() {
            // Appending to the current tip is the overwhelmingly common
            // case; a full back-walk only happens on branch switches.
            let extends_best =
                self.best_chain.last() == Some(&self.entries[&hash].header.previous_block_hash);
            if extends_best {
                self.best_chain.push(hash);
            } else {
                self.adopt_chain(hash);
            }
        }

        Ok(&self.entries[&hash])
    }

    /// The best-chain tip entry, by cumulative work.
    pub fn best_tip(&self) -> Option<&BlockIndexEntry> {
        self.best_chain.last().and_then(|hash| self.entries.get(hash))
    }

    /// Height of the best header chain, or `None` before genesis.
    pub fn best_height(&self) -> Option<Height> {
        self.best_tip().map(|entry| entry.height)
    }

    pub fn lookup_by_hash(&self, hash: &block::Hash) -> Option<&BlockIndexEntry> {
        self.entries.get(hash)
    }

    /// Follow the current best chain to `height`.
    pub fn lookup_by_height(&self, height: Height) -> Option<&BlockIndexEntry> {
        self.best_chain
            .get(height.0 as usize)
            .and_then(|hash| self.entries.get(hash))
    }

    /// Set status flags on an entry, persisting the change.
    pub fn update_status(
        &mut self,
        hash: &block::Hash,
        set: BlockStatus,
    ) -> Result<(), StoreError> {
        let entry = match self.entries.get_mut(hash) {
            Some(entry) => entry,
            None => return Err(StoreError::NotFound),
        };
        entry.status |= set;
        let snapshot = entry.clone();
        self.persist(&snapshot)?;
        Ok(())
    }

    /// Mark a block failed and drop its subtree from best-chain
    /// consideration.
    pub fn mark_failed(&mut self, hash: &block::Hash) -> Result<(), StoreError> {
        self.update_status(hash, BlockStatus::FAILED)?;
        warn!(%hash, "block marked failed");
        self.rebuild_best_chain();
        Ok(())
    }

    /// Flag a height range as pruned: data gone, header retained.
    pub fn mark_pruned(&mut self, from: Height, to: Height) -> Result<(), StoreError> {
        for height in from.0..=to.0 {
            if let Some(hash) = self.best_chain.get(height as usize).copied() {
                if let Some(entry) = self.entries.get_mut(&hash) {
                    entry.status.insert(BlockStatus::PRUNED);
                    entry.status.remove(BlockStatus::HAVE_DATA);
                    let snapshot = entry.clone();
                    self.persist(&snapshot)?;
                }
            }
        }
        debug!(from = from.0, to = to.0, "marked pruned");
        Ok(())
    }

    pub fn is_pruned(&self, hash: &block::Hash) -> bool {
        self.entries
            .get(hash)
            .map(|entry| entry.status.contains(BlockStatus::PRUNED))
            .unwrap_or(false)
    }

    /// The first best-chain height whose data is still on disk.
    pub fn first_unpruned_height(&self) -> Height {
        for (height, hash) in self.best_chain.iter().enumerate() {
            if let Some(entry) = self.entries.get(hash) {
                if !entry.status.contains(BlockStatus::PRUNED) {
                    return Height(height as u32);
                }
            }
        }
        Height(0)
    }

    /// Median of the timestamps of the 11 blocks ending at `tip_hash`.
    pub fn median_time_past(&self, tip_hash: block::Hash) -> u32 {
        let mut times = Vec::with_capacity(11);
        let mut cursor = tip_hash;
        while times.len() < 11 {
            match self.entries.get(&cursor) {
                Some(entry) => {
                    times.push(entry.header.time);
                    if entry.height == Height(0) {
                        break;
                    }
                    cursor = entry.header.previous_block_hash;
                }
                None => break,
            }
        }
        if times.is_empty() {
            return 0;
        }
        times.sort_unstable();
        times[times.len() / 2]
    }

    /// Walk back from `tip` to genesis and install that path as the best
    /// chain.
    fn adopt_chain(&mut self, tip: block::Hash) {
        let mut path = Vec::new();
        let mut cursor = tip;
        loop {
            let entry = match self.entries.get(&cursor) {
                Some(entry) => entry,
                None => break,
            };
            path.push(entry.hash);
            if entry.height == Height(0) {
                break;
            }
            cursor = entry.header.previous_block_hash;
        }
        path.reverse();
        self.best_chain = path;
    }

    /// Re-select the best chain from scratch, skipping failed subtrees.
    fn rebuild_best_chain(&mut self) {
        let mut best: Option<(Work, block::Hash)> = None;
        for entry in self.entries.values() {
            if entry.status.contains(BlockStatus::FAILED) {
                continue;
            }
            if self.has_failed_ancestor(entry) {
                continue;
            }
            let candidate = (entry.cum_work, entry.hash);
            if best.map(|(work, _)| candidate.0 > work).unwrap_or(true) {
                best = Some(candidate);
            }
        }
        match best {
            Some((_, hash)) => self.adopt_chain(hash),
            None => self.best_chain.clear(),
        }
    }

    fn has_failed_ancestor(&self, entry: &BlockIndexEntry) -> bool {
        let mut cursor = entry.header.previous_block_hash;
        while let Some(parent) = self.entries.get(&cursor) {
            if parent.status.contains(BlockStatus::FAILED) {
                return true;
            }
            if parent.height == Height(0) {
                break;
            }
            cursor = parent.header.previous_block_hash;
        }
        false
    }

    fn persist(&self, entry: &BlockIndexEntry) -> Result<(), StoreError> {
        if let Some(headers) = &self.headers {
            headers.insert(&entry.hash.0[..], encode_entry(entry))?;
        }
        Ok(())
    }
}

fn encode_entry(entry: &BlockIndexEntry) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + 80 + 32 + 1);
    entry
        .height
        .0
        .encode(&mut buf)
        .and_then(|_| entry.header.encode(&mut buf))
        .and_then(|_| entry.cum_work.encode(&mut buf))
        .and_then(|_| entry.status.bits().encode(&mut buf))
        .expect("writing to a Vec never fails");
    buf
}

fn decode_entry(bytes: &[u8]) -> Result<BlockIndexEntry, SerializationError> {
    let mut reader = io::Cursor::new(bytes);
    let height = Height(u32::decode(&mut reader)?);
    let header = Header::decode(&mut reader)?;
    let cum_work = Work::decode(&mut reader)?;
    let status = BlockStatus::from_bits(u8::decode(&mut reader)?)
        .ok_or(SerializationError::Parse("unknown status bits"))?;
    Ok(BlockIndexEntry {
        hash: header.hash(),
        height,
        header,
        cum_work,
        status,
    })
}
