//! The tip-of-chain view shared across components.

use std::sync::{Arc, Mutex};

use tracing::info;

use tanager_chain::block::Height;
use tanager_chain::work::Work;

use crate::block_index::BlockIndex;
use crate::error::StoreError;
use crate::utxo_store::UtxoStore;

/// Shared handles plus the validated-tip snapshot.
///
/// The UTXO store is single-writer: only the chunk-validation flush path
/// takes its lock for writing. The block index is written by the header
/// chaser and read everywhere.
#[derive(Clone)]
pub struct Chainstate {
    index: Arc<Mutex<BlockIndex>>,
    utxos: Arc<Mutex<Box<dyn UtxoStore>>>,
    tip: Arc<Mutex<TipState>>,
}

#[derive(Copy, Clone, Debug)]
struct TipState {
    validated_tip: Height,
    best_work: Work,
}

impl Chainstate {
    /// Build the chainstate, reading the persisted validated tip from
    /// the UTXO store.
    pub fn new(
        index: Arc<Mutex<BlockIndex>>,
        utxos: Arc<Mutex<Box<dyn UtxoStore>>>,
    ) -> Result<Chainstate, StoreError> {
        let validated_tip = utxos
            .lock()
            .expect("utxo store lock poisoned")
            .validated_tip()?;
        info!(tip = validated_tip.0, "chainstate initialized");
        Ok(Chainstate {
            index,
            utxos,
            tip: Arc::new(Mutex::new(TipState {
                validated_tip,
                best_work: Work::zero(),
            })),
        })
    }

    pub fn index(&self) -> Arc<Mutex<BlockIndex>> {
        Arc::clone(&self.index)
    }

    pub fn utxos(&self) -> Arc<Mutex<Box<dyn UtxoStore>>> {
        Arc::clone(&self.utxos)
    }

    /// The last height fully applied to the UTXO set.
    pub fn validated_tip(&self) -> Height {
        self.tip.lock().expect("tip lock poisoned").validated_tip
    }

    /// Record a new validated tip, refreshing the cached work from the
    /// index. Called only by the flush path after a successful commit.
    pub fn set_validated_tip(&self, tip: Height) {
        let work = {
            let index = self.index.lock().expect("index lock poisoned");
            index
                .lookup_by_height(tip)
                .map(|entry| entry.cum_work)
                .unwrap_or_else(Work::zero)
        };
        let mut state = self.tip.lock().expect("tip lock poisoned");
        state.validated_tip = tip;
        state.best_work = work;
        metrics::gauge!("state.validated.tip", tip.0 as _);
    }

    /// Cumulative work at the validated tip.
    pub fn best_work(&self) -> Work {
        self.tip.lock().expect("tip lock poisoned").best_work
    }

    /// Height of the best known header, the download target.
    pub fn best_header_height(&self) -> Option<Height> {
        self.index
            .lock()
            .expect("index lock poisoned")
            .best_height()
    }
}
