//! The transactional UTXO store.

use std::collections::HashMap;

use sled::Transactional;
use tracing::{debug, info};

use tanager_chain::block::Height;
use tanager_chain::serialize::{Decode, Encode};
use tanager_chain::transparent::OutPoint;

use crate::error::{StoreError, TxnError};
use crate::utxo::{outpoint_key, Utxo};
use crate::Config;

const META_VALIDATED_TIP: &[u8] = b"validated_tip";

/// The persistent `OutPoint → Utxo` map.
///
/// Mutations between `begin` and `commit` are staged and applied as one
/// atomic write; `rollback` discards them. Reads inside a transaction
/// observe the staged state. A crash between `begin` and `commit` leaves
/// the pre-`begin` state on reopen.
///
/// The store also owns the `validated_tip` metadata row. Writing the tip
/// inside the same transaction as the UTXO deltas is what keeps the UTXO
/// set and the tip coherent across crashes.
pub trait UtxoStore: Send {
    fn lookup(&self, outpoint: &OutPoint) -> Result<Option<Utxo>, StoreError>;

    /// Insert a new UTXO. `Exists` if the outpoint is already present.
    fn insert(&mut self, outpoint: OutPoint, utxo: Utxo) -> Result<(), StoreError>;

    /// Delete a spent UTXO. `NotFound` if absent.
    fn delete(&mut self, outpoint: &OutPoint) -> Result<(), StoreError>;

    fn begin(&mut self) -> Result<(), StoreError>;
    fn commit(&mut self) -> Result<(), StoreError>;
    fn rollback(&mut self) -> Result<(), StoreError>;

    fn validated_tip(&self) -> Result<Height, StoreError>;

    /// Record the validated tip. Staged when a transaction is open.
    fn set_validated_tip(&mut self, tip: Height) -> Result<(), StoreError>;

    /// Force buffered writes down to durable storage.
    fn checkpoint(&mut self) -> Result<(), StoreError>;

    /// Number of live UTXOs. Linear scan; used by tests and startup
    /// logging only.
    fn utxo_count(&self) -> Result<u64, StoreError>;
}

/// One staged operation inside an open transaction.
#[derive(Clone, Debug)]
enum StagedOp {
    Insert(OutPoint, Utxo),
    Delete(OutPoint),
    SetTip(Height),
}

#[derive(Default)]
struct OpenTxn {
    ops: Vec<StagedOp>,
    /// Staged view: `Some` = pending value, `None` = pending delete.
    overlay: HashMap<OutPoint, Option<Utxo>>,
    staged_tip: Option<Height>,
}

/// The sled-backed store used by the running node.
pub struct SledUtxoStore {
    utxos: sled::Tree,
    meta: sled::Tree,
    db: sled::Db,
    txn: Option<OpenTxn>,
}

impl SledUtxoStore {
    pub fn open(config: &Config) -> Result<SledUtxoStore, StoreError> {
        std::fs::create_dir_all(config.chainstate_dir())?;
        let db = sled::Config::new()
            .path(config.utxo_db_path())
            .open()?;
        let utxos = db.open_tree(b"utxo_by_outpoint")?;
        let meta = db.open_tree(b"meta")?;

        let store = SledUtxoStore {
            utxos,
            meta,
            db,
            txn: None,
        };
        info!(
            tip = store.validated_tip()?.0,
            "opened utxo store"
        );
        Ok(store)
    }

    fn decode_utxo(bytes: &[u8]) -> Result<Utxo, StoreError> {
        Utxo::decode(bytes).map_err(|_| StoreError::Corrupt("utxo row failed to parse"))
    }
}

impl UtxoStore for SledUtxoStore {
    fn lookup(&self, outpoint: &OutPoint) -> Result<Option<Utxo>, StoreError> {
        if let Some(txn) = &self.txn {
            if let Some(staged) = txn.overlay.get(outpoint) {
                return Ok(staged.clone());
            }
        }
        match self.utxos.get(outpoint_key(outpoint))? {
            Some(bytes) => Ok(Some(Self::decode_utxo(&bytes)?)),
            None => Ok(None),
        }
    }

    fn insert(&mut self, outpoint: OutPoint, utxo: Utxo) -> Result<(), StoreError> {
        if self.lookup(&outpoint)?.is_some() {
            return Err(StoreError::Exists);
        }
        match &mut self.txn {
            Some(txn) => {
                txn.overlay.insert(outpoint, Some(utxo.clone()));
                txn.ops.push(StagedOp::Insert(outpoint, utxo));
            }
            None => {
                self.utxos
                    .insert(outpoint_key(&outpoint), utxo.encode_to_vec())?;
            }
        }
        Ok(())
    }

    fn delete(&mut self, outpoint: &OutPoint) -> Result<(), StoreError> {
        if self.lookup(outpoint)?.is_none() {
            return Err(StoreError::NotFound);
        }
        match &mut self.txn {
            Some(txn) => {
                txn.overlay.insert(*outpoint, None);
                txn.ops.push(StagedOp::Delete(*outpoint));
            }
            None => {
                self.utxos.remove(outpoint_key(outpoint))?;
            }
        }
        Ok(())
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        if self.txn.is_some() {
            return Err(TxnError::BeginFailed.into());
        }
        self.txn = Some(OpenTxn::default());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        let txn = self
            .txn
            .take()
            .ok_or_else(|| TxnError::CommitFailed("no open transaction".to_string()))?;

        let result = (&self.utxos, &self.meta).transaction(|(utxos, meta)| {
            for op in txn.ops.iter() {
                match op {
                    StagedOp::Insert(outpoint, utxo) => {
                        utxos.insert(&outpoint_key(outpoint)[..], utxo.encode_to_vec())?;
                    }
                    StagedOp::Delete(outpoint) => {
                        utxos.remove(&outpoint_key(outpoint)[..])?;
                    }
                    StagedOp::SetTip(tip) => {
                        meta.insert(META_VALIDATED_TIP, &tip.0.to_be_bytes()[..])?;
                    }
                }
            }
            Ok(())
        });

        result.map_err(|err: sled::transaction::TransactionError<()>| {
            StoreError::Txn(TxnError::CommitFailed(format!("{:?}", err)))
        })?;

        metrics::counter!("state.utxo.committed.ops", txn.ops.len() as u64);
        debug!(ops = txn.ops.len(), "utxo transaction committed");
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        match self.txn.take() {
            Some(txn) => {
                debug!(ops = txn.ops.len(), "utxo transaction rolled back");
                Ok(())
            }
            None => Err(TxnError::RollbackFailed.into()),
        }
    }

    fn validated_tip(&self) -> Result<Height, StoreError> {
        if let Some(txn) = &self.txn {
            if let Some(tip) = txn.staged_tip {
                return Ok(tip);
            }
        }
        match self.meta.get(META_VALIDATED_TIP)? {
            Some(bytes) if bytes.len() == 4 => {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(&bytes);
                Ok(Height(u32::from_be_bytes(raw)))
            }
            Some(_) => Err(StoreError::Corrupt("validated_tip row has a bad width")),
            None => Ok(Height(0)),
        }
    }

    fn set_validated_tip(&mut self, tip: Height) -> Result<(), StoreError> {
        match &mut self.txn {
            Some(txn) => {
                txn.staged_tip = Some(tip);
                txn.ops.push(StagedOp::SetTip(tip));
            }
            None => {
                self.meta
                    .insert(META_VALIDATED_TIP, &tip.0.to_be_bytes()[..])?;
            }
        }
        Ok(())
    }

    fn checkpoint(&mut self) -> Result<(), StoreError> {
        let flushed = self.db.flush()?;
        debug!(bytes = flushed, "utxo store checkpoint");
        Ok(())
    }

    fn utxo_count(&self) -> Result<u64, StoreError> {
        Ok(self.utxos.len() as u64)
    }
}

/// An in-memory store with the same transactional contract, for tests
/// and ephemeral regtest runs.
#[derive(Default)]
pub struct MemoryUtxoStore {
    utxos: HashMap<OutPoint, Utxo>,
    tip: Height,
    snapshot: Option<(HashMap<OutPoint, Utxo>, Height)>,
}

impl MemoryUtxoStore {
    pub fn new() -> MemoryUtxoStore {
        MemoryUtxoStore {
            utxos: HashMap::new(),
            tip: Height(0),
            snapshot: None,
        }
    }
}

impl UtxoStore for MemoryUtxoStore {
    fn lookup(&self, outpoint: &OutPoint) -> Result<Option<Utxo>, StoreError> {
        Ok(self.utxos.get(outpoint).cloned())
    }

    fn insert(&mut self, outpoint: OutPoint, utxo: Utxo) -> Result<(), StoreError> {
        if self.utxos.contains_key(&outpoint) {
            return Err(StoreError::Exists);
        }
        self.utxos.insert(outpoint, utxo);
        Ok(())
    }

    fn delete(&mut self, outpoint: &OutPoint) -> Result<(), StoreError> {
        self.utxos
            .remove(outpoint)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        if self.snapshot.is_some() {
            return Err(TxnError::BeginFailed.into());
        }
        self.snapshot = Some((self.utxos.clone(), self.tip));
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.snapshot
            .take()
            .map(|_| ())
            .ok_or_else(|| TxnError::CommitFailed("no open transaction".to_string()).into())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        match self.snapshot.take() {
            Some((utxos, tip)) => {
                self.utxos = utxos;
                self.tip = tip;
                Ok(())
            }
            None => Err(TxnError::RollbackFailed.into()),
        }
    }

    fn validated_tip(&self) -> Result<Height, StoreError> {
        Ok(self.tip)
    }

    fn set_validated_tip(&mut self, tip: Height) -> Result<(), StoreError> {
        self.tip = tip;
        Ok(())
    }

    fn checkpoint(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    fn utxo_count(&self) -> Result<u64, StoreError> {
        Ok(self.utxos.len() as u64)
    }
}
