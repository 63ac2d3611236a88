//! Chunk validation: applying a consecutive range of stored blocks to
//! the UTXO set in one atomic batch.
//!
//! During initial block download there is no per-block undo data. If a
//! chunk fails mid-way the whole batch is discarded and the chain
//! restarts from the validated tip, which is simpler and faster than
//! maintaining rollback capability for blocks that are overwhelmingly
//! likely to be valid.
//!
//! The batch tracks UTXOs created and spent across the chunk. A UTXO
//! created and then spent inside the same chunk cancels out and never
//! touches the database — on historical chain data this eliminates the
//! majority of writes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use tanager_chain::amount::Amount;
use tanager_chain::block::{Block, Height};
use tanager_chain::parameters::Network;
use tanager_chain::serialize::Decode;
use tanager_chain::transaction::{Transaction, Txid};
use tanager_chain::transparent::{self, OutPoint};
use tanager_script::checker::TransactionSignatureChecker;
use tanager_script::verify_script;
use tanager_state::{BlockStore, Chainstate, StoreError, Utxo};

use crate::block::{check, subsidy};
use crate::error::TransactionError;
use crate::script_flags::flags_at_height;
use crate::transaction::check as tx_check;

/// The most blocks one chunk may cover, bounding batch memory.
pub const CHUNK_MAX_BLOCKS: u32 = 1000;

/// Progress log cadence, in blocks.
const PROGRESS_LOG_INTERVAL: u32 = 100;

/// Why a chunk was abandoned. Every variant names the offending height.
#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("failed to load block {height}: {msg}")]
    Load { height: Height, msg: String },
    #[error("proof of work failed at {height}: {msg}")]
    Pow { height: Height, msg: String },
    #[error("merkle root mismatch at {height}: {msg}")]
    Merkle { height: Height, msg: String },
    #[error("invalid block structure at {height}: {msg}")]
    Structure { height: Height, msg: String },
    #[error("missing utxo at {height}: {msg}")]
    UtxoMissing { height: Height, msg: String },
    #[error("double spend at {height}: {msg}")]
    UtxoDouble { height: Height, msg: String },
    #[error("value accounting failed at {height}: {msg}")]
    Value { height: Height, msg: String },
    #[error("script rejected at {height}: {msg}")]
    Script { height: Height, msg: String },
    #[error("coinbase invalid at {height}: {msg}")]
    Coinbase { height: Height, msg: String },
    #[error("out of memory at {height}")]
    Memory { height: Height },
    #[error("internal error at {height}: {msg}")]
    Internal { height: Height, msg: String },
}

impl ChunkError {
    /// The height the chunk failed at.
    pub fn height(&self) -> Height {
        match self {
            ChunkError::Load { height, .. }
            | ChunkError::Pow { height, .. }
            | ChunkError::Merkle { height, .. }
            | ChunkError::Structure { height, .. }
            | ChunkError::UtxoMissing { height, .. }
            | ChunkError::UtxoDouble { height, .. }
            | ChunkError::Value { height, .. }
            | ChunkError::Script { height, .. }
            | ChunkError::Coinbase { height, .. }
            | ChunkError::Memory { height }
            | ChunkError::Internal { height, .. } => *height,
        }
    }
}

/// Pending UTXO deltas for one chunk.
#[derive(Default)]
pub struct UtxoBatch {
    created: HashMap<OutPoint, Utxo>,
    spent: Vec<OutPoint>,
    spent_set: HashSet<OutPoint>,
    cancelled: usize,
    txs_processed: usize,
    inputs_processed: usize,
    outputs_processed: usize,
}

impl UtxoBatch {
    pub fn new() -> UtxoBatch {
        UtxoBatch::default()
    }

    /// A UTXO created by this chunk.
    pub fn add_created(&mut self, outpoint: OutPoint, utxo: Utxo) {
        self.outputs_processed += 1;
        // Duplicate txids existed before BIP-34 pinned coinbases to
        // heights; the first creation wins, matching the store's insert
        // semantics at flush time.
        self.created.entry(outpoint).or_insert(utxo);
    }

    /// Record a spend. A UTXO created within this same chunk is simply
    /// forgotten — it will never touch the database.
    pub fn mark_spent(&mut self, outpoint: OutPoint) -> Result<(), ()> {
        self.inputs_processed += 1;
        if self.created.remove(&outpoint).is_some() {
            self.cancelled += 1;
            return Ok(());
        }
        if !self.spent_set.insert(outpoint) {
            // Already consumed by an earlier input in this chunk.
            return Err(());
        }
        self.spent.push(outpoint);
        Ok(())
    }

    /// Look up a UTXO created earlier in this chunk.
    pub fn lookup(&self, outpoint: &OutPoint) -> Option<&Utxo> {
        self.created.get(outpoint)
    }

    /// Was this outpoint already spent within the chunk?
    pub fn is_spent(&self, outpoint: &OutPoint) -> bool {
        self.spent_set.contains(outpoint)
    }

    pub fn created_count(&self) -> usize {
        self.created.len()
    }

    pub fn spent_count(&self) -> usize {
        self.spent.len()
    }

    pub fn cancelled_count(&self) -> usize {
        self.cancelled
    }
}

/// Validates blocks `[start, end]` against the current chain state and
/// accumulates their UTXO deltas for one atomic flush.
pub struct ChunkValidator {
    chainstate: Chainstate,
    block_store: Arc<BlockStore>,
    network: Network,
    start_height: Height,
    end_height: Height,
    current_height: Height,
    skip_scripts: bool,
    batch: UtxoBatch,
}

impl ChunkValidator {
    pub fn new(
        chainstate: Chainstate,
        block_store: Arc<BlockStore>,
        network: Network,
        start_height: Height,
        end_height: Height,
        skip_scripts: bool,
    ) -> Result<ChunkValidator, ChunkError> {
        if start_height > end_height {
            return Err(ChunkError::Internal {
                height: start_height,
                msg: format!("invalid range {}..={}", start_height, end_height),
            });
        }
        info!(
            start = start_height.0,
            end = end_height.0,
            scripts = !skip_scripts,
            "chunk validator created"
        );
        Ok(ChunkValidator {
            chainstate,
            block_store,
            network,
            start_height,
            end_height,
            current_height: start_height,
            skip_scripts,
            batch: UtxoBatch::new(),
        })
    }

    pub fn batch(&self) -> &UtxoBatch {
        &self.batch
    }

    pub fn is_complete(&self) -> bool {
        self.current_height > self.end_height
    }

    pub fn end_height(&self) -> Height {
        self.end_height
    }

    /// Progress: `(current, total, done)`.
    pub fn progress(&self) -> (Height, u32, u32) {
        (
            self.current_height,
            self.end_height.0 - self.start_height.0 + 1,
            self.current_height.0 - self.start_height.0,
        )
    }

    /// Validate the block at the current height and fold its UTXO deltas
    /// into the batch.
    pub fn validate_next(&mut self) -> Result<(), ChunkError> {
        if self.is_complete() {
            return Ok(());
        }
        let height = self.current_height;

        let block = self.load_block(height)?;
        let hash = block.hash();

        check::difficulty_is_valid(&block.header, self.network, height, &hash).map_err(|err| {
            ChunkError::Pow {
                height,
                msg: err.to_string(),
            }
        })?;

        let txids: Vec<Txid> = block.transactions.iter().map(|tx| tx.hash()).collect();
        check::merkle_root_validity(&block, &txids).map_err(|err| ChunkError::Merkle {
            height,
            msg: err.to_string(),
        })?;

        let structure = check::structure_is_valid(&block)
            .and_then(|_| check::coinbase_is_first(&block))
            .and_then(|_| check::coinbase_script_size_is_valid(&block))
            .and_then(|_| check::witness_commitment_is_valid(&block));
        structure.map_err(|err| ChunkError::Structure {
            height,
            msg: err.to_string(),
        })?;

        check::coinbase_height_is_valid(&block, height, self.network).map_err(|err| {
            ChunkError::Coinbase {
                height,
                msg: err.to_string(),
            }
        })?;

        let median_time = {
            let index = self.chainstate.index();
            let index = index.lock().expect("index lock poisoned");
            index.median_time_past(block.header.previous_block_hash)
        };

        let mut total_fees = Amount::zero();
        for (tx_index, tx) in block.transactions.iter().enumerate() {
            let is_coinbase = tx_index == 0;
            let txid = txids[tx_index];

            tx_check::lock_time_is_satisfied(tx, height, median_time).map_err(|err| {
                ChunkError::Structure {
                    height,
                    msg: err.to_string(),
                }
            })?;

            let (input_sum, output_sum, prevouts, prevout_heights) =
                self.apply_tx_utxos(tx, &txid, height, is_coinbase)?;

            if !is_coinbase {
                tx_check::sequence_locks_satisfied(
                    tx,
                    &prevout_heights,
                    height,
                    median_time,
                    |at| {
                        let index = self.chainstate.index();
                        let index = index.lock().expect("index lock poisoned");
                        index
                            .lookup_by_height(at)
                            .map(|entry| index.median_time_past(entry.hash))
                            .unwrap_or(0)
                    },
                )
                .map_err(|err| ChunkError::Structure {
                    height,
                    msg: err.to_string(),
                })?;

                let fee = tx_check::fee(input_sum, output_sum).map_err(|err| {
                    ChunkError::Value {
                        height,
                        msg: format!("tx {}: {}", tx_index, err),
                    }
                })?;
                total_fees = total_fees.checked_add(fee).map_err(|err| ChunkError::Value {
                    height,
                    msg: err.to_string(),
                })?;

                if !self.skip_scripts {
                    self.verify_tx_scripts(tx, height, tx_index, &prevouts)?;
                }
            }

            self.batch.txs_processed += 1;
        }

        // The coinbase may claim at most subsidy plus this block's fees.
        let coinbase = &block.transactions[0];
        let claimed: Result<Amount, _> = coinbase.outputs.iter().map(|o| o.value).sum();
        let claimed = claimed.map_err(|err| ChunkError::Value {
            height,
            msg: err.to_string(),
        })?;
        let allowed =
            subsidy::max_coinbase_value(height, total_fees).map_err(|err| ChunkError::Value {
                height,
                msg: err.to_string(),
            })?;
        if claimed > allowed {
            return Err(ChunkError::Coinbase {
                height,
                msg: format!(
                    "coinbase claims {} but subsidy plus fees is {}",
                    claimed, allowed
                ),
            });
        }

        self.current_height = height.next();

        let (_, total, done) = self.progress();
        if done % PROGRESS_LOG_INTERVAL == 0 || self.is_complete() {
            debug!(done, total, height = height.0, "chunk progress");
        }
        Ok(())
    }

    /// Validate every remaining block in the chunk.
    pub fn validate_chunk(&mut self) -> Result<(), ChunkError> {
        let started = std::time::Instant::now();
        while !self.is_complete() {
            self.validate_next()?;
        }
        info!(
            start = self.start_height.0,
            end = self.end_height.0,
            elapsed_ms = started.elapsed().as_millis() as u64,
            created = self.batch.created_count(),
            spent = self.batch.spent_count(),
            cancelled = self.batch.cancelled_count(),
            "chunk validated"
        );
        Ok(())
    }

    /// Flush the batch to the UTXO store in one transaction:
    /// delete every spend, insert every creation, advance the persisted
    /// validated tip. Any failure rolls the store back untouched.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        info!(
            start = self.start_height.0,
            end = self.end_height.0,
            inserts = self.batch.created_count(),
            deletes = self.batch.spent_count(),
            cancelled = self.batch.cancelled_count(),
            "flushing chunk"
        );

        let utxos = self.chainstate.utxos();
        let mut store = utxos.lock().expect("utxo store lock poisoned");

        store.begin()?;

        for outpoint in self.batch.spent.iter() {
            match store.delete(outpoint) {
                Ok(()) => {}
                // Pre-BIP-30 duplicate coinbases can make a spend target
                // a row an earlier duplicate already replaced.
                Err(StoreError::NotFound) => {}
                Err(err) => {
                    store.rollback()?;
                    return Err(err);
                }
            }
        }

        for (outpoint, utxo) in self.batch.created.iter() {
            match store.insert(*outpoint, utxo.clone()) {
                Ok(()) => {}
                Err(StoreError::Exists) => {}
                Err(err) => {
                    store.rollback()?;
                    return Err(err);
                }
            }
        }

        store.set_validated_tip(self.end_height)?;
        store.commit()?;
        drop(store);

        self.chainstate.set_validated_tip(self.end_height);
        metrics::counter!("consensus.chunk.flushed", 1);
        Ok(())
    }

    fn load_block(&self, height: Height) -> Result<Block, ChunkError> {
        let bytes = self
            .block_store
            .read(height)
            .map_err(|err| ChunkError::Load {
                height,
                msg: err.to_string(),
            })?;
        Block::decode(&bytes[..]).map_err(|err| ChunkError::Load {
            height,
            msg: err.to_string(),
        })
    }

    /// Process one transaction's inputs and outputs against the batch
    /// and store, returning the value sums and the resolved prevouts.
    #[allow(clippy::type_complexity)]
    fn apply_tx_utxos(
        &mut self,
        tx: &Transaction,
        txid: &Txid,
        height: Height,
        is_coinbase: bool,
    ) -> Result<(Amount, Amount, Vec<transparent::Output>, Vec<Height>), ChunkError> {
        let mut input_sum = Amount::zero();
        let mut output_sum = Amount::zero();
        let mut prevouts = Vec::new();
        let mut prevout_heights = Vec::new();

        if !is_coinbase {
            for (input_index, input) in tx.inputs.iter().enumerate() {
                let outpoint = input.outpoint().ok_or_else(|| ChunkError::Structure {
                    height,
                    msg: "coinbase input outside the first transaction".to_string(),
                })?;

                let utxo = self.lookup_utxo_for_spend(&outpoint).map_err(|err| {
                    err.unwrap_or_else(|| ChunkError::UtxoMissing {
                        height,
                        msg: format!("input {} spends unknown {}", input_index, outpoint),
                    })
                })?;

                if !utxo.is_spendable_at(height) {
                    // Matches TransactionError::ImmatureCoinbase, but the
                    // chunk abandons with a UTXO-level error like every
                    // other spend failure.
                    let err = TransactionError::ImmatureCoinbase {
                        created: utxo.height,
                        spent: height,
                    };
                    return Err(ChunkError::UtxoMissing {
                        height,
                        msg: err.to_string(),
                    });
                }

                input_sum =
                    input_sum
                        .checked_add(utxo.output.value)
                        .map_err(|err| ChunkError::Value {
                            height,
                            msg: err.to_string(),
                        })?;

                prevout_heights.push(utxo.height);
                prevouts.push(utxo.output.clone());

                if self.batch.mark_spent(outpoint).is_err() {
                    return Err(ChunkError::UtxoDouble {
                        height,
                        msg: format!("outpoint {} spent twice within the chunk", outpoint),
                    });
                }
            }
        }

        for (output_index, output) in tx.outputs.iter().enumerate() {
            // Provably unspendable outputs never enter the UTXO set and
            // their value is treated as destroyed.
            if output.lock_script.is_op_return() {
                continue;
            }
            output_sum =
                output_sum
                    .checked_add(output.value)
                    .map_err(|err| ChunkError::Value {
                        height,
                        msg: err.to_string(),
                    })?;

            let outpoint = OutPoint {
                txid: *txid,
                index: output_index as u32,
            };
            self.batch
                .add_created(outpoint, Utxo::new(output.clone(), height, is_coinbase));
        }

        Ok((input_sum, output_sum, prevouts, prevout_heights))
    }

    /// Resolve an outpoint for spending: the chunk's own creations win,
    /// then the store. `Err(Some(_))` is a definite double spend;
    /// `Err(None)` means not found.
    fn lookup_utxo_for_spend(&self, outpoint: &OutPoint) -> Result<Utxo, Option<ChunkError>> {
        if let Some(utxo) = self.batch.lookup(outpoint) {
            return Ok(utxo.clone());
        }
        if self.batch.is_spent(outpoint) {
            return Err(Some(ChunkError::UtxoDouble {
                height: self.current_height,
                msg: format!("outpoint {} already spent within the chunk", outpoint),
            }));
        }
        let utxos = self.chainstate.utxos();
        let store = utxos.lock().expect("utxo store lock poisoned");
        match store.lookup(outpoint) {
            Ok(Some(utxo)) => Ok(utxo),
            Ok(None) => Err(None),
            Err(err) => Err(Some(ChunkError::Internal {
                height: self.current_height,
                msg: err.to_string(),
            })),
        }
    }

    fn verify_tx_scripts(
        &self,
        tx: &Transaction,
        height: Height,
        tx_index: usize,
        prevouts: &[transparent::Output],
    ) -> Result<(), ChunkError> {
        let flags = flags_at_height(self.network, height);
        for (input_index, input) in tx.inputs.iter().enumerate() {
            let unlock_script = match input {
                transparent::Input::PrevOut { unlock_script, .. } => unlock_script,
                transparent::Input::Coinbase { .. } => continue,
            };
            let witness = tx
                .witnesses
                .get(input_index)
                .map(|witness| witness.0.as_slice())
                .unwrap_or(&[]);

            let mut checker = TransactionSignatureChecker::new(tx, input_index, prevouts);
            verify_script(
                unlock_script.as_bytes(),
                prevouts[input_index].lock_script.as_bytes(),
                witness,
                flags,
                &mut checker,
            )
            .map_err(|err| ChunkError::Script {
                height,
                msg: format!("tx {} input {}: {}", tx_index, input_index, err),
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
