use std::convert::TryFrom;
use std::sync::{Arc, Mutex};

use tempdir::TempDir;

use tanager_chain::amount::Amount;
use tanager_chain::block::{merkle, Block, Hash, Header, Height};
use tanager_chain::parameters::Network;
use tanager_chain::serialize::Encode;
use tanager_chain::transaction::{LockTime, Transaction, Txid};
use tanager_chain::transparent::{CoinbaseData, Input, OutPoint, Output, Script};
use tanager_chain::work::CompactDifficulty;
use tanager_state::{
    BlockIndex, BlockStore, Chainstate, Config, MemoryUtxoStore, Utxo, UtxoStore,
};

use super::*;

const REGTEST_BITS: CompactDifficulty = CompactDifficulty(0x207f_ffff);

fn coinbase(height: Height, value: i64) -> Transaction {
    Transaction::new(
        1,
        vec![Input::Coinbase {
            data: CoinbaseData::new(CoinbaseData::height_prefix(height)),
            sequence: 0xffff_ffff,
        }],
        vec![Output {
            value: Amount::try_from(value).unwrap(),
            lock_script: Script(vec![0x51]),
        }],
        LockTime::unlocked(),
    )
}

/// Grind the nonce until the header meets the regtest target.
fn mine(mut header: Header) -> Header {
    let target = REGTEST_BITS.to_expanded().expect("valid bits");
    loop {
        let candidate = Header::new(
            header.version,
            header.previous_block_hash,
            header.merkle_root,
            header.time,
            header.difficulty_threshold,
            header.nonce,
        );
        if candidate.hash() <= target {
            return candidate;
        }
        header.nonce += 1;
    }
}

fn build_block(height: Height, prev: Hash, transactions: Vec<Transaction>) -> Block {
    let transactions: Vec<_> = transactions.into_iter().map(Arc::new).collect();
    let merkle_root: merkle::Root = transactions.iter().map(|tx| tx.hash()).collect();
    let header = mine(Header::new(
        2,
        prev,
        merkle_root,
        1_400_000_000 + height.0,
        REGTEST_BITS,
        0,
    ));
    Block {
        header,
        transactions,
    }
}

struct Fixture {
    _dir: TempDir,
    chainstate: Chainstate,
    block_store: Arc<BlockStore>,
}

impl Fixture {
    fn new() -> Fixture {
        let dir = TempDir::new("tanager-chunk").unwrap();
        let config = Config::new(dir.path());
        let block_store = Arc::new(BlockStore::open(&config).unwrap());
        let index = Arc::new(Mutex::new(BlockIndex::in_memory(Network::Regtest)));
        let utxos: Arc<Mutex<Box<dyn UtxoStore>>> =
            Arc::new(Mutex::new(Box::new(MemoryUtxoStore::new())));
        let chainstate = Chainstate::new(index, utxos).unwrap();
        Fixture {
            _dir: dir,
            chainstate,
            block_store,
        }
    }

    fn store_block(&self, height: Height, block: &Block) {
        self.block_store
            .write(height, &block.encode_to_vec())
            .unwrap();
    }

    fn seed_utxo(&self, outpoint: OutPoint, value: i64, height: Height) {
        let utxos = self.chainstate.utxos();
        let mut store = utxos.lock().unwrap();
        store
            .insert(
                outpoint,
                Utxo::new(
                    Output {
                        value: Amount::try_from(value).unwrap(),
                        lock_script: Script(vec![0x51]),
                    },
                    height,
                    false,
                ),
            )
            .unwrap();
    }

    fn validator(&self, start: u32, end: u32, skip_scripts: bool) -> ChunkValidator {
        ChunkValidator::new(
            self.chainstate.clone(),
            Arc::clone(&self.block_store),
            Network::Regtest,
            Height(start),
            Height(end),
            skip_scripts,
        )
        .unwrap()
    }

    fn utxo_at(&self, outpoint: &OutPoint) -> Option<Utxo> {
        let utxos = self.chainstate.utxos();
        let store = utxos.lock().unwrap();
        store.lookup(outpoint).unwrap()
    }
}

#[test]
fn coinbase_only_chain_validates_and_flushes() {
    tanager_test::init();
    let fixture = Fixture::new();

    let mut prev = Hash::zero();
    let mut coinbase_outpoints = Vec::new();
    for h in 1..=3u32 {
        let block = build_block(Height(h), prev, vec![coinbase(Height(h), 5_000_000_000)]);
        prev = block.hash();
        coinbase_outpoints.push(OutPoint {
            txid: block.transactions[0].hash(),
            index: 0,
        });
        fixture.store_block(Height(h), &block);
    }

    let mut validator = fixture.validator(1, 3, false);
    validator.validate_chunk().expect("chunk validates");
    assert_eq!(validator.batch().created_count(), 3);
    assert_eq!(validator.batch().spent_count(), 0);

    validator.flush().expect("flush succeeds");
    assert_eq!(fixture.chainstate.validated_tip(), Height(3));
    for outpoint in coinbase_outpoints.iter() {
        assert!(fixture.utxo_at(outpoint).is_some());
    }
}

#[test]
fn created_then_spent_cancels_out() {
    tanager_test::init();
    let fixture = Fixture::new();

    // The store holds one pre-existing UTXO worth 50 000.
    let seed = OutPoint {
        txid: Txid([0xaa; 32]),
        index: 0,
    };
    fixture.seed_utxo(seed, 50_000, Height(0));

    // Block 1: coinbase, plus a chain of two spends. The intermediate
    // output lives and dies inside the chunk.
    let spend_a = Transaction::new(
        1,
        vec![Input::PrevOut {
            outpoint: seed,
            unlock_script: Script(vec![]),
            sequence: 0xffff_ffff,
        }],
        vec![Output {
            value: Amount::try_from(40_000i64).unwrap(),
            lock_script: Script(vec![0x51]),
        }],
        LockTime::unlocked(),
    );
    let intermediate = OutPoint {
        txid: spend_a.hash(),
        index: 0,
    };
    let spend_b = Transaction::new(
        1,
        vec![Input::PrevOut {
            outpoint: intermediate,
            unlock_script: Script(vec![]),
            sequence: 0xffff_ffff,
        }],
        vec![Output {
            value: Amount::try_from(30_000i64).unwrap(),
            lock_script: Script(vec![0x51]),
        }],
        LockTime::unlocked(),
    );
    let final_outpoint = OutPoint {
        txid: spend_b.hash(),
        index: 0,
    };

    // Fees: 10 000 + 10 000; coinbase may claim subsidy + 20 000.
    let block = build_block(
        Height(1),
        Hash::zero(),
        vec![
            coinbase(Height(1), 5_000_000_000 + 20_000),
            spend_a,
            spend_b,
        ],
    );
    fixture.store_block(Height(1), &block);

    let mut validator = fixture.validator(1, 1, false);
    validator.validate_chunk().expect("chunk validates");

    // The intermediate output cancelled; only the coinbase and the final
    // output remain, and only the seed is deleted.
    assert_eq!(validator.batch().cancelled_count(), 1);
    assert_eq!(validator.batch().created_count(), 2);
    assert_eq!(validator.batch().spent_count(), 1);

    validator.flush().expect("flush succeeds");
    assert!(fixture.utxo_at(&seed).is_none());
    assert!(fixture.utxo_at(&intermediate).is_none());
    assert!(fixture.utxo_at(&final_outpoint).is_some());
}

#[test]
fn missing_utxo_aborts_the_chunk() {
    tanager_test::init();
    let fixture = Fixture::new();

    let ghost_spend = Transaction::new(
        1,
        vec![Input::PrevOut {
            outpoint: OutPoint {
                txid: Txid([0xee; 32]),
                index: 7,
            },
            unlock_script: Script(vec![]),
            sequence: 0xffff_ffff,
        }],
        vec![Output {
            value: Amount::try_from(1_000i64).unwrap(),
            lock_script: Script(vec![0x51]),
        }],
        LockTime::unlocked(),
    );
    let block = build_block(
        Height(1),
        Hash::zero(),
        vec![coinbase(Height(1), 5_000_000_000), ghost_spend],
    );
    fixture.store_block(Height(1), &block);

    let mut validator = fixture.validator(1, 1, true);
    let err = validator.validate_chunk().expect_err("must fail");
    assert!(matches!(err, ChunkError::UtxoMissing { .. }));
    assert_eq!(err.height(), Height(1));

    // Nothing was flushed; the tip is unchanged.
    assert_eq!(fixture.chainstate.validated_tip(), Height(0));
}

#[test]
fn double_spend_within_chunk_is_detected() {
    tanager_test::init();
    let fixture = Fixture::new();

    let seed = OutPoint {
        txid: Txid([0xbb; 32]),
        index: 0,
    };
    fixture.seed_utxo(seed, 50_000, Height(0));

    let spend = |salt: u8| {
        Transaction::new(
            1,
            vec![Input::PrevOut {
                outpoint: seed,
                unlock_script: Script(vec![]),
                sequence: 0xffff_ffff,
            }],
            vec![Output {
                value: Amount::try_from(40_000i64).unwrap(),
                lock_script: Script(vec![0x51, salt]),
            }],
            LockTime::unlocked(),
        )
    };

    let block = build_block(
        Height(1),
        Hash::zero(),
        vec![
            coinbase(Height(1), 5_000_000_000 + 20_000),
            spend(0x01),
            spend(0x02),
        ],
    );
    fixture.store_block(Height(1), &block);

    let mut validator = fixture.validator(1, 1, true);
    let err = validator.validate_chunk().expect_err("must fail");
    assert!(matches!(err, ChunkError::UtxoDouble { .. }));
}

#[test]
fn immature_coinbase_spend_is_rejected() {
    tanager_test::init();
    let fixture = Fixture::new();

    // A coinbase UTXO confirmed at height 1, spent at height 50.
    let utxos = fixture.chainstate.utxos();
    let young = OutPoint {
        txid: Txid([0xcc; 32]),
        index: 0,
    };
    utxos
        .lock()
        .unwrap()
        .insert(
            young,
            Utxo::new(
                Output {
                    value: Amount::try_from(5_000_000_000i64).unwrap(),
                    lock_script: Script(vec![0x51]),
                },
                Height(1),
                true,
            ),
        )
        .unwrap();
    drop(utxos);

    let premature = Transaction::new(
        1,
        vec![Input::PrevOut {
            outpoint: young,
            unlock_script: Script(vec![]),
            sequence: 0xffff_ffff,
        }],
        vec![Output {
            value: Amount::try_from(4_000_000_000i64).unwrap(),
            lock_script: Script(vec![0x51]),
        }],
        LockTime::unlocked(),
    );
    let block = build_block(
        Height(50),
        Hash::zero(),
        vec![coinbase(Height(50), 5_000_000_000), premature],
    );
    fixture.store_block(Height(50), &block);

    let mut validator = fixture.validator(50, 50, true);
    let err = validator.validate_chunk().expect_err("must fail");
    assert!(matches!(err, ChunkError::UtxoMissing { .. }));
    assert!(err.to_string().contains("maturity") || err.to_string().contains("spent"));
}

#[test]
fn overclaiming_coinbase_is_rejected() {
    tanager_test::init();
    let fixture = Fixture::new();

    let block = build_block(
        Height(1),
        Hash::zero(),
        vec![coinbase(Height(1), 5_000_000_001)],
    );
    fixture.store_block(Height(1), &block);

    let mut validator = fixture.validator(1, 1, true);
    let err = validator.validate_chunk().expect_err("must fail");
    assert!(matches!(err, ChunkError::Coinbase { .. }));
}

#[test]
fn batch_cancellation_is_observable_directly() {
    tanager_test::init();

    let mut batch = UtxoBatch::new();
    let x = OutPoint {
        txid: Txid([0x0f; 32]),
        index: 0,
    };
    batch.add_created(
        x,
        Utxo::new(
            Output {
                value: Amount::try_from(50_000i64).unwrap(),
                lock_script: Script(vec![0x51]),
            },
            Height(100),
            false,
        ),
    );
    batch.mark_spent(x).unwrap();

    assert!(batch.lookup(&x).is_none());
    assert_eq!(batch.spent_count(), 0);
    assert_eq!(batch.cancelled_count(), 1);
}
