//! The IBD chaser: an event-driven state machine sequencing
//! HEADERS → DOWNLOAD → DRAIN → VALIDATE → FLUSH → PRUNE.
//!
//! Two threads cooperate. The *dispatcher* owns the download manager and
//! the availability tracker, reacts to events, and decides when a
//! consecutive range is worth validating. The *confirm worker* drains
//! validation requests from a channel, runs the chunk validator, and
//! flushes; closing the channel is the shutdown signal. Validation is
//! I/O-heavy, so it must never run under the dispatcher's locks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use tanager_chain::block::{self, Header, Height};
use tanager_chain::parameters::Network;
use tanager_consensus::{ChunkValidator, CHUNK_MAX_BLOCKS};
use tanager_state::{BlockStatus, BlockStore, BlockTracker, Chainstate, StoreError};

use crate::download::DownloadManager;
use crate::peer::{DownloadNetwork, PeerId};

/// Keep this many validated blocks on disk behind the tip so a deep
/// reorganisation never needs blocks we have thrown away.
pub const REORG_MARGIN: u32 = 550;

/// Events driving the chaser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Begin syncing.
    Start,
    /// Resume after suspension.
    Resume,
    /// Something changed (new headers, new peer); re-evaluate.
    Bump,
    /// A block was stored at this height.
    Checked(Height),
    /// A chunk validated up to this height (not yet flushed).
    Valid(Height),
    /// A chunk flushed; the validated tip advanced to this height.
    Organized(Height),
    /// The active chain switched branches at this height.
    Reorganized(Height),
    /// Validation failed; re-enter download for this height.
    Regressed(Height),
    /// The best chain lost work (a previously-best branch was
    /// invalidated) at this height.
    Disorganized(Height),
    /// Shut down.
    Stop,
}

/// The pipeline phase, exposed for logs and status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Headers,
    Download,
    Drain,
    Validate,
    Flush,
    Prune,
    Done,
}

#[derive(Clone, Debug)]
pub struct ChaserConfig {
    pub network: Network,
    /// Prune target in megabytes; 0 keeps every block (archival).
    pub prune_target_mb: u64,
    /// Skip script execution at or below this height.
    pub assume_valid_height: Height,
    /// Cap on blocks per validation chunk.
    pub chunk_max: u32,
    /// DRAIN re-request threshold.
    pub stall_timeout_ms: u64,
    /// Checkpoint the UTXO store every this many heights.
    pub checkpoint_interval: u32,
    /// Dispatcher maintenance tick.
    pub tick: Duration,
}

impl Default for ChaserConfig {
    fn default() -> ChaserConfig {
        ChaserConfig {
            network: Network::Mainnet,
            prune_target_mb: 0,
            assume_valid_height: Height(0),
            chunk_max: CHUNK_MAX_BLOCKS,
            stall_timeout_ms: 5_000,
            checkpoint_interval: 10_000,
            tick: Duration::from_secs(1),
        }
    }
}

/// Work sent from the dispatcher to the confirm worker.
enum WorkerMsg {
    Validate { start: Height, end: Height },
}

/// The externally callable surface: the network glue feeds headers,
/// blocks, and peer lifecycle through this handle.
#[derive(Clone)]
pub struct ChaserHandle {
    events: mpsc::Sender<Event>,
    chainstate: Chainstate,
    block_store: Arc<BlockStore>,
    tracker: Arc<Mutex<BlockTracker>>,
    downloads: Arc<Mutex<DownloadManager>>,
    phase: Arc<Mutex<Phase>>,
    epoch: Instant,
}

impl ChaserHandle {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().expect("phase lock poisoned")
    }

    pub fn chainstate(&self) -> &Chainstate {
        &self.chainstate
    }

    pub fn tracker(&self) -> Arc<Mutex<BlockTracker>> {
        Arc::clone(&self.tracker)
    }

    pub fn downloads(&self) -> Arc<Mutex<DownloadManager>> {
        Arc::clone(&self.downloads)
    }

    pub fn send(&self, event: Event) {
        let _ = self.events.send(event);
    }

    pub fn add_peer(&self, peer: PeerId) {
        let now = self.now_ms();
        self.downloads
            .lock()
            .expect("download lock poisoned")
            .add_peer(peer, now);
        self.send(Event::Bump);
    }

    pub fn remove_peer(&self, peer: PeerId) {
        self.downloads
            .lock()
            .expect("download lock poisoned")
            .remove_peer(peer);
    }

    /// An idle peer asks for work.
    pub fn request_work(&self, peer: PeerId) -> bool {
        let now = self.now_ms();
        self.downloads
            .lock()
            .expect("download lock poisoned")
            .request_work(peer, now)
    }

    /// A block locator for `getheaders`: the best-header hash, recent
    /// ancestors, then exponentially sparser heights back to genesis, so
    /// a peer can find the fork point against any divergence depth.
    pub fn block_locator(&self) -> Vec<block::Hash> {
        let index = self.chainstate.index();
        let index = index.lock().expect("index lock poisoned");

        let tip = match index.best_height() {
            Some(tip) => tip.0 as i64,
            None => return Vec::new(),
        };

        let mut hashes = Vec::new();
        let mut step = 1i64;
        let mut height = tip;
        while height > 0 {
            if let Some(entry) = index.lookup_by_height(Height(height as u32)) {
                hashes.push(entry.hash);
            }
            if hashes.len() >= 10 {
                step *= 2;
            }
            height -= step;
        }
        if let Some(genesis) = index.lookup_by_height(Height(0)) {
            hashes.push(genesis.hash);
        }
        hashes
    }

    /// Feed a batch of headers received from a peer. Returns how many
    /// extended the index.
    pub fn submit_headers(&self, headers: Vec<Header>) -> usize {
        let index = self.chainstate.index();
        let mut index = index.lock().expect("index lock poisoned");
        let mut accepted = 0;
        for header in headers {
            if let Err(err) = tanager_consensus::block::check::time_is_valid_at(&header) {
                debug!(%err, "header rejected");
                continue;
            }
            match index.insert_header(header) {
                Ok(_) => accepted += 1,
                Err(err) => {
                    debug!(%err, "header rejected");
                }
            }
        }
        drop(index);
        if accepted > 0 {
            self.send(Event::Bump);
        }
        accepted
    }

    /// Feed a downloaded block: store it, mark it available, and notify
    /// the dispatcher. Blocks for unknown headers are dropped.
    pub fn submit_block(
        &self,
        peer: PeerId,
        hash: block::Hash,
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        let now = self.now_ms();
        self.downloads
            .lock()
            .expect("download lock poisoned")
            .block_received(peer, &hash, bytes.len(), now);

        let height = {
            let index = self.chainstate.index();
            let index = index.lock().expect("index lock poisoned");
            match index.lookup_by_hash(&hash) {
                Some(entry) => entry.height,
                None => {
                    debug!(%hash, "block without a known header, dropping");
                    return Ok(());
                }
            }
        };

        self.block_store.write(height, bytes)?;
        {
            let index = self.chainstate.index();
            let mut index = index.lock().expect("index lock poisoned");
            let _ = index.update_status(&hash, BlockStatus::HAVE_DATA);
        }
        self.tracker
            .lock()
            .expect("tracker lock poisoned")
            .mark_available(height);
        self.send(Event::Checked(height));
        Ok(())
    }
}

/// The chaser before `start`.
pub struct Chaser {
    config: ChaserConfig,
    chainstate: Chainstate,
    block_store: Arc<BlockStore>,
    tracker: Arc<Mutex<BlockTracker>>,
    downloads: Arc<Mutex<DownloadManager>>,
    phase: Arc<Mutex<Phase>>,
    events_tx: mpsc::Sender<Event>,
    events_rx: mpsc::Receiver<Event>,
    epoch: Instant,
}

/// A started chaser; dropping without [`RunningChaser::stop`] detaches
/// the threads.
pub struct RunningChaser {
    handle: ChaserHandle,
    dispatcher: thread::JoinHandle<()>,
    worker: thread::JoinHandle<()>,
    fatal: Arc<AtomicBool>,
}

impl Chaser {
    /// Build a chaser, rebuilding the availability tracker from a block
    /// store scan (restart recovery: download and validation resume in
    /// place).
    pub fn new(
        config: ChaserConfig,
        chainstate: Chainstate,
        block_store: Arc<BlockStore>,
        network: Box<dyn DownloadNetwork>,
    ) -> Result<Chaser, StoreError> {
        let validated_tip = chainstate.validated_tip();
        let mut tracker = BlockTracker::new(validated_tip);
        for height in block_store.scan()? {
            tracker.mark_available(height);
        }
        info!(
            tip = validated_tip.0,
            stored = tracker.available_count(),
            "chaser recovered block availability"
        );

        let (events_tx, events_rx) = mpsc::channel();
        Ok(Chaser {
            config,
            chainstate,
            block_store,
            tracker: Arc::new(Mutex::new(tracker)),
            downloads: Arc::new(Mutex::new(DownloadManager::new(network))),
            phase: Arc::new(Mutex::new(Phase::Idle)),
            events_tx,
            events_rx,
            epoch: Instant::now(),
        })
    }

    pub fn handle(&self) -> ChaserHandle {
        ChaserHandle {
            events: self.events_tx.clone(),
            chainstate: self.chainstate.clone(),
            block_store: Arc::clone(&self.block_store),
            tracker: Arc::clone(&self.tracker),
            downloads: Arc::clone(&self.downloads),
            phase: Arc::clone(&self.phase),
            epoch: self.epoch,
        }
    }

    /// Spawn the dispatcher and confirm-worker threads.
    pub fn start(self) -> RunningChaser {
        let handle = self.handle();

        let (worker_tx, worker_rx) = mpsc::channel::<WorkerMsg>();
        let validating = Arc::new(AtomicBool::new(false));
        let fatal = Arc::new(AtomicBool::new(false));

        let worker = {
            let config = self.config.clone();
            let chainstate = self.chainstate.clone();
            let block_store = Arc::clone(&self.block_store);
            let tracker = Arc::clone(&self.tracker);
            let events = self.events_tx.clone();
            let validating = Arc::clone(&validating);
            let fatal = Arc::clone(&fatal);
            thread::Builder::new()
                .name("confirm-worker".into())
                .spawn(move || {
                    confirm_worker(
                        config,
                        chainstate,
                        block_store,
                        tracker,
                        worker_rx,
                        events,
                        validating,
                        fatal,
                    )
                })
                .expect("spawning the confirm worker")
        };

        let dispatcher = {
            let mut state = Dispatcher {
                config: self.config,
                chainstate: self.chainstate,
                block_store: self.block_store,
                tracker: self.tracker,
                downloads: self.downloads,
                phase: self.phase,
                events_rx: self.events_rx,
                worker_tx,
                validating,
                epoch: self.epoch,
                retried: std::collections::HashMap::new(),
                pruned_below: Height(0),
            };
            thread::Builder::new()
                .name("chaser-dispatch".into())
                .spawn(move || state.run())
                .expect("spawning the dispatcher")
        };

        RunningChaser {
            handle,
            dispatcher,
            worker,
            fatal,
        }
    }
}

impl RunningChaser {
    pub fn handle(&self) -> ChaserHandle {
        self.handle.clone()
    }

    /// Did the pipeline hit an unrecoverable store error? The embedding
    /// application should exit non-zero when this latches.
    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::Acquire)
    }

    /// Stop both threads and wait for them.
    pub fn stop(self) {
        self.handle.send(Event::Stop);
        let _ = self.dispatcher.join();
        let _ = self.worker.join();
    }
}

struct Dispatcher {
    config: ChaserConfig,
    chainstate: Chainstate,
    block_store: Arc<BlockStore>,
    tracker: Arc<Mutex<BlockTracker>>,
    downloads: Arc<Mutex<DownloadManager>>,
    phase: Arc<Mutex<Phase>>,
    events_rx: mpsc::Receiver<Event>,
    worker_tx: mpsc::Sender<WorkerMsg>,
    validating: Arc<AtomicBool>,
    epoch: Instant,
    /// Heights whose validation failed once already; a second failure
    /// marks the block failed in the index.
    retried: std::collections::HashMap<Height, u32>,
    pruned_below: Height,
}

impl Dispatcher {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn set_phase(&self, phase: Phase) {
        let mut current = self.phase.lock().expect("phase lock poisoned");
        if *current != phase {
            debug!(?phase, "phase transition");
            *current = phase;
        }
    }

    fn run(&mut self) {
        info!("chaser dispatcher running");
        loop {
            match self.events_rx.recv_timeout(self.config.tick) {
                Ok(Event::Stop) => break,
                Ok(event) => self.handle_event(event),
                Err(mpsc::RecvTimeoutError::Timeout) => self.on_tick(),
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        info!("chaser dispatcher exiting");
        // Dropping worker_tx below closes the worker's channel, which is
        // its shutdown signal.
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Start | Event::Resume | Event::Bump => {
                self.set_phase(Phase::Headers);
                self.schedule_download();
                self.maybe_validate();
            }
            Event::Checked(_) => {
                self.maybe_validate();
            }
            Event::Valid(height) => {
                debug!(height = height.0, "chunk validated");
                self.set_phase(Phase::Flush);
            }
            Event::Organized(height) => {
                self.retried.clear();
                self.prune(height);
                self.schedule_download();
                self.maybe_validate();
                self.maybe_done();
            }
            Event::Regressed(height) => {
                self.on_regressed(height);
            }
            Event::Reorganized(height) | Event::Disorganized(height) => {
                self.on_reorganized(height);
            }
            // Stop is consumed by the run loop before dispatch.
            Event::Stop => {}
        }
    }

    fn on_tick(&mut self) {
        let now = self.now_ms();
        {
            let mut downloads = self.downloads.lock().expect("download lock poisoned");
            downloads.check_performance(now);

            let metrics = downloads.metrics();
            metrics::gauge!("sync.download.pending", metrics.pending_blocks as _);
            metrics::gauge!("sync.download.inflight", metrics.inflight_blocks as _);
            metrics::gauge!("sync.download.peers", metrics.total_peers as _);

            // DRAIN: nothing left to hand out, but blocks are still in
            // flight — re-request the stragglers with redundancy.
            if metrics.queued_batches == 0 && metrics.inflight_blocks > 0 {
                self.set_phase(Phase::Drain);
                downloads.drain_accelerate(self.config.stall_timeout_ms, now);
            }
        }
        self.schedule_download();
        self.maybe_validate();
    }

    /// Queue download work for every height in `(validated_tip,
    /// best_header]` that is neither stored nor already tracked.
    fn schedule_download(&mut self) {
        let tip = self.chainstate.validated_tip();
        let best = match self.chainstate.best_header_height() {
            Some(best) if best > tip => best,
            _ => return,
        };

        let mut hashes = Vec::new();
        let mut heights = Vec::new();
        {
            let tracker = self.tracker.lock().expect("tracker lock poisoned");
            let downloads = self.downloads.lock().expect("download lock poisoned");
            let index = self.chainstate.index();
            let index = index.lock().expect("index lock poisoned");

            for raw in (tip.0 + 1)..=best.0 {
                let height = Height(raw);
                if tracker.has_block(height) || downloads.has_height(height) {
                    continue;
                }
                let entry = match index.lookup_by_height(height) {
                    Some(entry) => entry,
                    None => break,
                };
                hashes.push(entry.hash);
                heights.push(height);
                // Bound one scheduling pass; the next Bump continues.
                if hashes.len() >= crate::download::MAX_BATCHES {
                    break;
                }
            }
        }

        if !hashes.is_empty() {
            self.set_phase(Phase::Download);
            let added = self
                .downloads
                .lock()
                .expect("download lock poisoned")
                .add_work(&hashes, &heights);
            debug!(added, "scheduled download work");
        }
    }

    /// Hand the next consecutive range to the confirm worker, if one is
    /// ready and the worker is free.
    fn maybe_validate(&mut self) {
        if self.validating.load(Ordering::Acquire) {
            return;
        }

        let (range, blocking) = {
            let tracker = self.tracker.lock().expect("tracker lock poisoned");
            (
                tracker.find_consecutive_range(),
                tracker.find_blocking_block(),
            )
        };
        let range = match range {
            Some(range) => range,
            None => {
                // Blocks are stored above the tip but the very next one
                // is missing: regress to DOWNLOAD aimed at the blocking
                // block.
                if let Some(height) = blocking {
                    self.on_regressed(height);
                }
                return;
            }
        };

        // Validate when a full chunk is ready, or when downloads have
        // gone quiet (tail of the chain, or a gap being refilled).
        let pending = {
            let downloads = self.downloads.lock().expect("download lock poisoned");
            downloads.pending_blocks()
        };
        if (range.count as u64) < self.config.chunk_max as u64 && pending > 0 {
            return;
        }

        let end = Height(range.end.0.min(range.start.0 + self.config.chunk_max - 1));
        self.validating.store(true, Ordering::Release);
        self.set_phase(Phase::Validate);
        if self
            .worker_tx
            .send(WorkerMsg::Validate {
                start: range.start,
                end,
            })
            .is_err()
        {
            self.validating.store(false, Ordering::Release);
        }
    }

    /// Validation cannot proceed past `height`: either a stored block
    /// failed its chunk there, or the block is simply missing and the
    /// range above the tip is blocked on it. Both regress to DOWNLOAD
    /// targeting that height; only a stored block's failure counts
    /// toward condemning it (retry via re-download once, then mark the
    /// block failed and excise its subtree).
    fn on_regressed(&mut self, height: Height) {
        let stored = {
            let tracker = self.tracker.lock().expect("tracker lock poisoned");
            tracker.has_block(height)
        };

        if stored {
            let attempts = self.retried.entry(height).or_insert(0);
            *attempts += 1;
            let attempts = *attempts;

            warn!(height = height.0, attempts, "validation regressed");

            // Drop the bad block from disk and the tracker so DOWNLOAD
            // fetches it again.
            if let Err(err) = self.block_store.prune(height) {
                error!(%err, height = height.0, "failed to drop bad block");
            }
            {
                let mut tracker = self.tracker.lock().expect("tracker lock poisoned");
                tracker.mark_missing(height);
            }

            if attempts >= 2 {
                let index = self.chainstate.index();
                let mut index = index.lock().expect("index lock poisoned");
                if let Some(hash) = index.lookup_by_height(height).map(|entry| entry.hash) {
                    let _ = index.mark_failed(&hash);
                }
            }
        } else {
            debug!(height = height.0, "validation blocked on a missing block");
        }

        self.set_phase(Phase::Download);
        self.schedule_download();

        // When the blocking block is already queued or in flight, chase
        // it from several peers with staggered redundancy instead of
        // waiting out the stall timers.
        let hash = {
            let index = self.chainstate.index();
            let index = index.lock().expect("index lock poisoned");
            index.lookup_by_height(height).map(|entry| entry.hash)
        };
        if let Some(hash) = hash {
            let mut downloads = self.downloads.lock().expect("download lock poisoned");
            if downloads.has_height(height) {
                downloads.fill_gaps_staggered(&[hash], 4);
            }
        }
    }

    /// IBD reorganisation: no undo data exists, so fall back to the fork
    /// point and re-download everything above it.
    fn on_reorganized(&mut self, fork_point: Height) {
        warn!(fork = fork_point.0, "reorganising to fork point");
        {
            let mut tracker = self.tracker.lock().expect("tracker lock poisoned");
            tracker.reset(fork_point);
        }
        {
            let mut downloads = self.downloads.lock().expect("download lock poisoned");
            downloads.clear_pending();
        }
        self.set_phase(Phase::Download);
        self.schedule_download();
    }

    /// PRUNE: drop block files safely behind the tip. Archival nodes
    /// (target 0) treat this as a flush barrier and keep everything.
    fn prune(&mut self, tip: Height) {
        if self.config.prune_target_mb == 0 {
            return;
        }
        let safe = match tip.checked_sub(REORG_MARGIN) {
            Some(safe) => safe,
            None => return,
        };
        if safe <= self.pruned_below {
            return;
        }

        self.set_phase(Phase::Prune);
        let mut pruned = 0;
        for raw in self.pruned_below.0..=safe.0 {
            let height = Height(raw);
            if let Err(err) = self.block_store.prune(height) {
                error!(%err, height = raw, "prune failed");
                break;
            }
            pruned += 1;
        }
        {
            let index = self.chainstate.index();
            let mut index = index.lock().expect("index lock poisoned");
            let _ = index.mark_pruned(self.pruned_below, safe);
        }
        self.pruned_below = safe;
        if pruned > 0 {
            info!(below = safe.0, pruned, "pruned block files");
        }
    }

    fn maybe_done(&mut self) {
        let tip = self.chainstate.validated_tip();
        let best = self.chainstate.best_header_height();
        if best == Some(tip) {
            info!(tip = tip.0, "synced to best known header");
            self.set_phase(Phase::Done);
        }
    }
}

/// The confirm worker: validates and flushes chunks in height order.
#[allow(clippy::too_many_arguments)]
fn confirm_worker(
    config: ChaserConfig,
    chainstate: Chainstate,
    block_store: Arc<BlockStore>,
    tracker: Arc<Mutex<BlockTracker>>,
    work: mpsc::Receiver<WorkerMsg>,
    events: mpsc::Sender<Event>,
    validating: Arc<AtomicBool>,
    fatal: Arc<AtomicBool>,
) {
    info!("confirm worker running");
    while let Ok(WorkerMsg::Validate { start, end }) = work.recv() {
        let skip_scripts = end <= config.assume_valid_height;
        let validated = ChunkValidator::new(
            chainstate.clone(),
            Arc::clone(&block_store),
            config.network,
            start,
            end,
            skip_scripts,
        )
        .and_then(|mut validator| {
            validator.validate_chunk()?;
            Ok(validator)
        });

        let mut validator = match validated {
            Ok(validator) => validator,
            Err(err) => {
                error!(
                    height = err.height().0,
                    kind = ?err,
                    "chunk validation failed"
                );
                validating.store(false, Ordering::Release);
                let _ = events.send(Event::Regressed(err.height()));
                continue;
            }
        };
        let _ = events.send(Event::Valid(end));

        if let Err(err) = validator.flush() {
            // Store failures are not retryable; take the node down.
            error!(%err, "fatal store error during flush");
            fatal.store(true, Ordering::Release);
            validating.store(false, Ordering::Release);
            let _ = events.send(Event::Stop);
            break;
        }

        {
            let mut tracker = tracker.lock().expect("tracker lock poisoned");
            tracker.mark_validated(end);
        }
        // Bound the store's write-ahead state during long syncs.
        if config.checkpoint_interval != 0 && end.0 % config.checkpoint_interval == 0 {
            let utxos = chainstate.utxos();
            let mut store = utxos.lock().expect("utxo store lock poisoned");
            if let Err(err) = store.checkpoint() {
                error!(%err, "checkpoint failed");
            } else {
                info!(height = end.0, "checkpointed utxo store");
            }
        }
        metrics::gauge!("sync.validated.tip", end.0 as _);
        validating.store(false, Ordering::Release);
        let _ = events.send(Event::Organized(end));
    }
    info!("confirm worker exiting");
}

#[cfg(test)]
mod tests;
