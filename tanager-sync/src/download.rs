//! The pull-based block download manager.
//!
//! Work is organized as small batches of consecutive blocks. Peers pull
//! a batch when they have nothing to do; the manager never pushes. A
//! starved peer simply waits, so slow peers are self-throttling, and the
//! only peers ever disconnected are the truly stalled ones (zero bytes
//! per second for a sustained period). Sequential batch handout keeps
//! arrivals in approximate height order, which keeps the validation
//! pipeline fed.

use std::collections::VecDeque;

use bitvec::prelude::*;
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use tanager_chain::block::{self, Height};

use crate::peer::{DownloadNetwork, PeerId};

/// Blocks per work batch. Bitcoin Core requests up to 16 per peer; 8
/// measured best here for head-of-line blocking versus getdata overhead.
pub const BATCH_SIZE: usize = 8;

/// Upper bound on queued batches.
pub const MAX_BATCHES: usize = 4096;

/// Never disconnect below this many reporting peers.
pub const MIN_PEERS_TO_KEEP: usize = 3;

/// The rolling performance window.
pub const PERF_WINDOW_MS: u64 = 10_000;

/// Capacity of the height bitmap (heights 0..capacity are trackable).
const HEIGHT_BITMAP_CAPACITY: usize = 1024 * 1024;

/// How many idle peers receive each outstanding block in DRAIN.
const ACCELERATE_REDUNDANCY: usize = 3;

/// Getdata chunk bound during acceleration (Bitcoin Core's limit).
const ACCELERATE_BLOCKS_PER_GETDATA: usize = 64;

/// Per-peer cap for staggered gap-filling.
const STAGGER_MAX_PER_REQUEST: usize = 128;

/// A batch of blocks assigned to at most one peer at a time.
#[derive(Debug, Clone)]
pub struct WorkBatch {
    hashes: Vec<block::Hash>,
    heights: Vec<Height>,
    received: Vec<bool>,
    remaining: usize,
    /// Milliseconds timestamp of assignment; 0 while queued.
    assigned_time: u64,
}

impl WorkBatch {
    fn new(hashes: Vec<block::Hash>, heights: Vec<Height>) -> WorkBatch {
        let count = hashes.len();
        WorkBatch {
            hashes,
            heights,
            received: vec![false; count],
            remaining: count,
            assigned_time: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn start_height(&self) -> Height {
        self.heights.first().copied().unwrap_or(Height(0))
    }

    pub fn end_height(&self) -> Height {
        self.heights.last().copied().unwrap_or(Height(0))
    }

    pub fn is_received(&self, index: usize) -> bool {
        self.received.get(index).copied().unwrap_or(false)
    }
}

/// Rolling delivery statistics for one peer.
struct PeerPerf {
    batch: Option<WorkBatch>,
    bytes_this_window: u64,
    bytes_per_second: f32,
    window_start: u64,
    last_delivery: u64,
    /// First time this peer was handed work; never reset.
    first_work_time: u64,
    /// Latches true once the peer has proven it can deliver. Peers that
    /// never latched are still warming up and are not stall candidates.
    has_reported: bool,
}

impl PeerPerf {
    fn new(now_ms: u64) -> PeerPerf {
        PeerPerf {
            batch: None,
            bytes_this_window: 0,
            bytes_per_second: 0.0,
            window_start: now_ms,
            last_delivery: now_ms,
            first_work_time: 0,
            has_reported: false,
        }
    }

    fn is_idle(&self) -> bool {
        self.batch
            .as_ref()
            .map(|batch| batch.remaining == 0)
            .unwrap_or(true)
    }

    fn update_window(&mut self, now_ms: u64) {
        let elapsed = now_ms.saturating_sub(self.window_start);
        if elapsed >= PERF_WINDOW_MS {
            self.bytes_per_second = self.bytes_this_window as f32 / (elapsed as f32 / 1000.0);
            if self.bytes_per_second > 0.0 {
                self.has_reported = true;
            }
            self.bytes_this_window = 0;
            self.window_start = now_ms;
        }
    }
}

/// A point-in-time snapshot of the manager, for logs and gauges.
#[derive(Debug, Default, Clone, Copy)]
pub struct DownloadMetrics {
    pub pending_blocks: usize,
    pub inflight_blocks: usize,
    pub queued_batches: usize,
    pub total_peers: usize,
    pub active_peers: usize,
    pub aggregate_rate: f32,
}

pub struct DownloadManager {
    network: Box<dyn DownloadNetwork>,
    queue: VecDeque<WorkBatch>,
    peers: IndexMap<PeerId, PeerPerf>,
    /// Bit per absolute height currently tracked (queued or assigned and
    /// not yet received).
    height_bitmap: BitVec,
    lowest_pending: Option<Height>,
    highest_queued: Height,
}

impl DownloadManager {
    pub fn new(network: Box<dyn DownloadNetwork>) -> DownloadManager {
        DownloadManager {
            network,
            queue: VecDeque::new(),
            peers: IndexMap::new(),
            height_bitmap: bitvec![0; HEIGHT_BITMAP_CAPACITY],
            lowest_pending: None,
            highest_queued: Height(0),
        }
    }

    fn bitmap_set(&mut self, height: Height) {
        let index = height.0 as usize;
        if index >= self.height_bitmap.len() {
            let mut capacity = self.height_bitmap.len().max(HEIGHT_BITMAP_CAPACITY);
            while capacity <= index {
                capacity *= 2;
            }
            self.height_bitmap.resize(capacity, false);
        }
        self.height_bitmap.set(index, true);
    }

    fn bitmap_clear(&mut self, height: Height) {
        let index = height.0 as usize;
        if index < self.height_bitmap.len() {
            self.height_bitmap.set(index, false);
        }
    }

    fn bitmap_clear_batch(&mut self, batch: &WorkBatch) {
        let heights = batch.heights.clone();
        for height in heights {
            self.bitmap_clear(height);
        }
    }

    /// O(1): is this height queued or in flight?
    pub fn has_height(&self, height: Height) -> bool {
        self.height_bitmap
            .get(height.0 as usize)
            .map(|bit| *bit)
            .unwrap_or(false)
    }

    pub fn add_peer(&mut self, peer: PeerId, now_ms: u64) {
        if self.peers.contains_key(&peer) {
            return;
        }
        self.peers.insert(peer, PeerPerf::new(now_ms));
        debug!(%peer, total = self.peers.len(), "peer added");
    }

    /// Remove a peer. Any assigned batch goes back to the *front* of the
    /// queue with its received bits intact, so a reassignment re-fetches
    /// only what is still missing.
    pub fn remove_peer(&mut self, peer: PeerId) {
        let perf = match self.peers.shift_remove(&peer) {
            Some(perf) => perf,
            None => return,
        };
        if let Some(mut batch) = perf.batch {
            if batch.remaining > 0 {
                info!(
                    %peer,
                    start = batch.start_height().0,
                    end = batch.end_height().0,
                    remaining = batch.remaining,
                    "returning batch from removed peer"
                );
                batch.assigned_time = 0;
                self.queue.push_front(batch);
            } else {
                self.bitmap_clear_batch(&batch);
            }
        }
        debug!(%peer, total = self.peers.len(), "peer removed");
    }

    /// Enqueue download work, splitting it into fixed-size batches.
    /// Returns the number of blocks actually queued.
    pub fn add_work(&mut self, hashes: &[block::Hash], heights: &[Height]) -> usize {
        debug_assert_eq!(hashes.len(), heights.len());
        let mut added = 0;
        let mut cursor = 0;

        while cursor < hashes.len() {
            if self.queue.len() >= MAX_BATCHES {
                warn!(batches = self.queue.len(), "batch queue full");
                break;
            }
            let end = (cursor + BATCH_SIZE).min(hashes.len());
            let batch_hashes = hashes[cursor..end].to_vec();
            let batch_heights = heights[cursor..end].to_vec();
            for &height in batch_heights.iter() {
                self.bitmap_set(height);
                if self.lowest_pending.map(|low| height < low).unwrap_or(true) {
                    self.lowest_pending = Some(height);
                }
                if height > self.highest_queued {
                    self.highest_queued = height;
                }
            }
            added += end - cursor;
            self.queue
                .push_back(WorkBatch::new(batch_hashes, batch_heights));
            cursor = end;
        }

        if added > 0 {
            debug!(added, batches = self.queue.len(), "work queued");
        }
        added
    }

    /// A peer pulls work. Returns `true` if a batch was assigned (and a
    /// getdata for all of its hashes has been sent).
    ///
    /// On reassignment the `received` bits are deliberately preserved
    /// and the getdata still covers the whole batch: the storage layer
    /// deduplicates, and only unreceived blocks decrement `remaining`.
    pub fn request_work(&mut self, peer: PeerId, now_ms: u64) -> bool {
        let perf = match self.peers.get_mut(&peer) {
            Some(perf) => perf,
            None => {
                warn!(%peer, "unknown peer requested work");
                return false;
            }
        };

        // A peer with an unfinished batch keeps working on it.
        if let Some(batch) = &perf.batch {
            if batch.remaining > 0 {
                return false;
            }
        }

        // Retire a completed batch.
        if let Some(batch) = perf.batch.take() {
            debug!(
                start = batch.start_height().0,
                end = batch.end_height().0,
                "batch complete"
            );
            self.bitmap_clear_batch(&batch);
        }

        let mut batch = match self.queue.pop_front() {
            Some(batch) => batch,
            None => {
                debug!(%peer, "no work available, peer starved");
                return false;
            }
        };
        batch.assigned_time = now_ms;

        let hashes = batch.hashes.clone();
        let start = batch.start_height().0;
        let end = batch.end_height().0;

        let perf = self
            .peers
            .get_mut(&peer)
            .expect("peer verified present above");
        if perf.first_work_time == 0 {
            perf.first_work_time = now_ms;
        }
        perf.last_delivery = now_ms;
        perf.batch = Some(batch);

        self.network.send_getdata(peer, &hashes);
        info!(%peer, start, end, count = hashes.len(), "batch assigned");
        true
    }

    /// A block arrived from `peer`. Returns `false` for duplicates and
    /// blocks no batch is waiting for.
    ///
    /// The block may satisfy *another* peer's batch: during DRAIN idle
    /// peers fulfil redundant requests without taking ownership, so all
    /// batches are searched.
    pub fn block_received(
        &mut self,
        peer: PeerId,
        hash: &block::Hash,
        block_size: usize,
        now_ms: u64,
    ) -> bool {
        let mut cleared_height = None;

        if let Some(perf) = self.peers.get_mut(&peer) {
            perf.bytes_this_window += block_size as u64;
            perf.last_delivery = now_ms;
            perf.update_window(now_ms);

            // The deliverer's own batch is the common case.
            if let Some(batch) = &mut perf.batch {
                if let Some(index) = batch.hashes.iter().position(|h| h == hash) {
                    if batch.received[index] {
                        return false;
                    }
                    batch.received[index] = true;
                    batch.remaining -= 1;
                    cleared_height = Some(batch.heights[index]);
                }
            }
        }

        if let Some(height) = cleared_height {
            self.bitmap_clear(height);
            return true;
        }

        // Search every other batch (redundant DRAIN deliveries land
        // here).
        for (_, other) in self.peers.iter_mut() {
            if let Some(batch) = &mut other.batch {
                if let Some(index) = batch.hashes.iter().position(|h| h == hash) {
                    if batch.received[index] {
                        return false;
                    }
                    batch.received[index] = true;
                    batch.remaining -= 1;
                    cleared_height = Some(batch.heights[index]);
                    break;
                }
            }
        }
        if cleared_height.is_none() {
            // Queued-but-unassigned batches can also be satisfied early.
            for batch in self.queue.iter_mut() {
                if let Some(index) = batch.hashes.iter().position(|h| h == hash) {
                    if batch.received[index] {
                        return false;
                    }
                    batch.received[index] = true;
                    batch.remaining -= 1;
                    cleared_height = Some(batch.heights[index]);
                    break;
                }
            }
        }

        match cleared_height {
            Some(height) => {
                self.bitmap_clear(height);
                true
            }
            None => {
                debug!(%hash, "block not in any batch");
                false
            }
        }
    }

    pub fn peer_is_idle(&self, peer: PeerId) -> bool {
        self.peers.get(&peer).map(|p| p.is_idle()).unwrap_or(true)
    }

    /// Periodic maintenance: refresh performance windows and disconnect
    /// truly stalled peers. Returns the number dropped.
    ///
    /// A peer is stalled only when it has reported before, currently
    /// delivers zero bytes per second, and has not delivered for twice
    /// the window. Peers between batches and warming-up peers are left
    /// alone, and the pool is never reduced below `MIN_PEERS_TO_KEEP`
    /// reporters.
    pub fn check_performance(&mut self, now_ms: u64) -> usize {
        for (_, perf) in self.peers.iter_mut() {
            if perf.batch.is_some() {
                perf.update_window(now_ms);
            }
        }

        let mut reporters = 0usize;
        let mut stalled: Vec<PeerId> = Vec::new();
        for (peer, perf) in self.peers.iter() {
            let working = perf
                .batch
                .as_ref()
                .map(|batch| batch.remaining > 0)
                .unwrap_or(false);
            if !working || !perf.has_reported {
                continue;
            }
            reporters += 1;
            if perf.bytes_per_second == 0.0
                && now_ms.saturating_sub(perf.last_delivery) >= PERF_WINDOW_MS * 2
            {
                stalled.push(*peer);
            }
        }

        if reporters <= MIN_PEERS_TO_KEEP {
            return 0;
        }

        let mut dropped = 0usize;
        for peer in stalled {
            if reporters - dropped <= MIN_PEERS_TO_KEEP {
                break;
            }
            if let Some(perf) = self.peers.get_mut(&peer) {
                if let Some(mut batch) = perf.batch.take() {
                    info!(
                        %peer,
                        start = batch.start_height().0,
                        end = batch.end_height().0,
                        "peer stalled, returning batch"
                    );
                    batch.assigned_time = 0;
                    self.queue.push_front(batch);
                }
            }
            self.peers.shift_remove(&peer);
            self.network.disconnect_peer(peer, "stalled (0 B/s)");
            dropped += 1;
        }

        if dropped > 0 {
            info!(dropped, "performance check dropped stalled peers");
        }
        dropped
    }

    /// DRAIN acceleration: hand every outstanding block to idle peers
    /// with staggered ~3x redundancy. With `stall_timeout_ms == 0` all
    /// in-flight batches are drained; otherwise only batches whose owner
    /// has been quiet that long. First delivery wins; duplicates are
    /// discarded by [`DownloadManager::block_received`]. Returns the
    /// number of peers asked.
    pub fn drain_accelerate(&mut self, stall_timeout_ms: u64, now_ms: u64) -> usize {
        let idle_peers: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|(_, perf)| perf.is_idle())
            .map(|(peer, _)| *peer)
            .collect();
        if idle_peers.is_empty() {
            return 0;
        }

        let mut outstanding: Vec<block::Hash> = Vec::new();
        for (_, perf) in self.peers.iter() {
            let batch = match &perf.batch {
                Some(batch) if batch.remaining > 0 => batch,
                _ => continue,
            };
            if stall_timeout_ms > 0
                && now_ms.saturating_sub(perf.last_delivery) < stall_timeout_ms
            {
                continue;
            }
            for (index, hash) in batch.hashes.iter().enumerate() {
                if !batch.received[index] {
                    outstanding.push(*hash);
                }
            }
        }
        if outstanding.is_empty() {
            return 0;
        }

        // Spread the outstanding list across idle peers with redundancy,
        // each starting at a staggered offset so no single block waits
        // on one peer.
        let total_requests = outstanding.len() * ACCELERATE_REDUNDANCY;
        let per_peer = (total_requests + idle_peers.len() - 1) / idle_peers.len();
        let per_peer = per_peer.min(outstanding.len());

        let mut requests_sent = 0;
        for (i, peer) in idle_peers.iter().enumerate() {
            let start = (i * outstanding.len() / idle_peers.len()) % outstanding.len();
            let mut assigned = 0;
            let mut pos = start;
            while assigned < per_peer {
                let chunk = (per_peer - assigned)
                    .min(ACCELERATE_BLOCKS_PER_GETDATA)
                    .min(outstanding.len() - pos);
                if chunk == 0 {
                    pos = 0;
                    continue;
                }
                self.network
                    .send_getdata(*peer, &outstanding[pos..pos + chunk]);
                assigned += chunk;
                pos = (pos + chunk) % outstanding.len();
            }
            requests_sent += 1;
        }

        info!(
            blocks = outstanding.len(),
            peers = requests_sent,
            "drain acceleration requested"
        );
        requests_sent
    }

    /// Staggered gap-filling: send the same gap list to up to
    /// `max_peers` peers, each starting at a different rotation offset.
    /// First response wins. Returns the number of peers asked.
    pub fn fill_gaps_staggered(&mut self, gap_hashes: &[block::Hash], max_peers: usize) -> usize {
        if gap_hashes.is_empty() {
            return 0;
        }
        let peers: Vec<PeerId> = self.peers.keys().copied().take(max_peers).collect();
        if peers.is_empty() {
            return 0;
        }

        let per_peer = gap_hashes.len().min(STAGGER_MAX_PER_REQUEST);
        for (i, peer) in peers.iter().enumerate() {
            let start = (i * gap_hashes.len()) / peers.len();
            let rotated: Vec<block::Hash> = (0..per_peer)
                .map(|offset| gap_hashes[(start + offset) % gap_hashes.len()])
                .collect();
            self.network.send_getdata(*peer, &rotated);
        }

        info!(
            gaps = gap_hashes.len(),
            peers = peers.len(),
            "staggered gap-fill requested"
        );
        peers.len()
    }

    /// Drop all queued (unassigned) batches, e.g. on reorganisation.
    /// Assigned batches complete normally.
    pub fn clear_pending(&mut self) {
        let mut cleared = 0;
        while let Some(batch) = self.queue.pop_front() {
            cleared += batch.remaining;
            self.bitmap_clear_batch(&batch);
        }
        if cleared > 0 {
            info!(cleared, "cleared pending download work");
        }
    }

    /// Blocks not yet received, queued plus assigned.
    pub fn pending_blocks(&self) -> usize {
        self.queue_blocks() + self.inflight_blocks()
    }

    /// Blocks in unassigned batches.
    pub fn queue_blocks(&self) -> usize {
        self.queue.iter().map(|batch| batch.remaining).sum()
    }

    /// Blocks assigned to peers but not yet received.
    pub fn inflight_blocks(&self) -> usize {
        self.peers
            .values()
            .filter_map(|perf| perf.batch.as_ref())
            .map(|batch| batch.remaining)
            .sum()
    }

    pub fn queued_batches(&self) -> usize {
        self.queue.len()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn metrics(&self) -> DownloadMetrics {
        DownloadMetrics {
            pending_blocks: self.pending_blocks(),
            inflight_blocks: self.inflight_blocks(),
            queued_batches: self.queue.len(),
            total_peers: self.peers.len(),
            active_peers: self
                .peers
                .values()
                .filter(|perf| !perf.is_idle())
                .count(),
            aggregate_rate: self.peers.values().map(|perf| perf.bytes_per_second).sum(),
        }
    }

    /// Peek at a peer's current batch, for tests and debugging.
    pub fn peer_batch(&self, peer: PeerId) -> Option<&WorkBatch> {
        self.peers.get(&peer).and_then(|perf| perf.batch.as_ref())
    }
}

#[cfg(test)]
mod tests;
