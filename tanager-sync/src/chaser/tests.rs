use std::convert::TryFrom;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tempdir::TempDir;

use tanager_chain::amount::Amount;
use tanager_chain::block::{merkle, Block, Hash, Header, Height};
use tanager_chain::parameters::Network;
use tanager_chain::serialize::Encode;
use tanager_chain::transaction::{LockTime, Transaction};
use tanager_chain::transparent::{CoinbaseData, Input, Output, Script};
use tanager_chain::work::CompactDifficulty;
use tanager_state::{
    BlockIndex, BlockStatus, BlockStore, Chainstate, Config, MemoryUtxoStore, UtxoStore,
};

use super::*;

const REGTEST_BITS: CompactDifficulty = CompactDifficulty(0x207f_ffff);

#[derive(Clone, Default)]
struct FakeNetwork {
    getdata: Arc<Mutex<Vec<(PeerId, Vec<Hash>)>>>,
}

impl DownloadNetwork for FakeNetwork {
    fn send_getdata(&self, peer: PeerId, hashes: &[Hash]) {
        self.getdata.lock().unwrap().push((peer, hashes.to_vec()));
    }

    fn disconnect_peer(&self, _peer: PeerId, _reason: &str) {}
}

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

fn block_at(height: Height, prev: Hash, subsidy: i64) -> Block {
    let transactions = vec![Arc::new(coinbase(height, subsidy))];
    let merkle_root: merkle::Root = transactions.iter().map(|tx| tx.hash()).collect();
    let header = mine(Header::new(
        2,
        prev,
        merkle_root,
        1_400_000_000 + height.0 * 60,
        REGTEST_BITS,
        0,
    ));
    Block {
        header,
        transactions,
    }
}

/// A regtest chain: index 0 is the genesis block (implicitly validated,
/// never downloaded), indices 1..=length are the download targets.
fn build_chain(length: u32, subsidy: i64) -> Vec<Block> {
    let mut blocks = vec![block_at(Height(0), Hash::zero(), subsidy)];
    for h in 1..=length {
        let prev = blocks[(h - 1) as usize].hash();
        blocks.push(block_at(Height(h), prev, subsidy));
    }
    blocks
}

struct Fixture {
    _dir: TempDir,
    chainstate: Chainstate,
    block_store: Arc<BlockStore>,
    network: FakeNetwork,
}

impl Fixture {
    fn new() -> Fixture {
        let dir = TempDir::new("tanager-chaser").unwrap();
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
            network: FakeNetwork::default(),
        }
    }

    fn chaser(&self) -> Chaser {
        let config = ChaserConfig {
            network: Network::Regtest,
            tick: Duration::from_millis(25),
            ..ChaserConfig::default()
        };
        Chaser::new(
            config,
            self.chainstate.clone(),
            Arc::clone(&self.block_store),
            Box::new(self.network.clone()),
        )
        .unwrap()
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn syncs_a_small_chain_end_to_end() {
    tanager_test::init();
    let fixture = Fixture::new();
    let blocks = build_chain(5, 5_000_000_000);

    let running = fixture.chaser().start();
    let handle = running.handle();

    // Headers first, genesis included.
    let accepted = handle.submit_headers(blocks.iter().map(|b| b.header).collect());
    assert_eq!(accepted, 6);
    assert_eq!(handle.chainstate().best_header_height(), Some(Height(5)));

    // One peer pulls work; a getdata goes out.
    let peer = PeerId(1);
    handle.add_peer(peer);
    assert!(
        wait_until(Duration::from_secs(5), || handle.request_work(peer)),
        "peer was never handed work"
    );
    assert!(!fixture.network.getdata.lock().unwrap().is_empty());

    // Deliver blocks 1..=5; the pipeline stores, validates, and flushes.
    for block in blocks.iter().skip(1) {
        handle
            .submit_block(peer, block.hash(), &block.encode_to_vec())
            .unwrap();
    }

    assert!(
        wait_until(Duration::from_secs(10), || {
            handle.chainstate().validated_tip() == Height(5)
        }),
        "validated tip never reached 5, at {:?}",
        handle.chainstate().validated_tip()
    );

    // The coinbase UTXOs are in the store.
    let utxos = handle.chainstate().utxos();
    let store = utxos.lock().unwrap();
    assert_eq!(store.utxo_count().unwrap(), 5);
    drop(store);

    assert!(wait_until(Duration::from_secs(5), || {
        handle.phase() == Phase::Done
    }));

    running.stop();
}

#[test]
fn gap_blocks_validation_until_filled() {
    tanager_test::init();
    let fixture = Fixture::new();
    let blocks = build_chain(3, 5_000_000_000);

    let running = fixture.chaser().start();
    let handle = running.handle();
    handle.submit_headers(blocks.iter().map(|b| b.header).collect());

    let peer = PeerId(1);
    handle.add_peer(peer);
    assert!(
        wait_until(Duration::from_secs(5), || handle.request_work(peer)),
        "peer was never handed work"
    );

    // Deliver blocks 2 and 3 but not 1: validation is blocked, and the
    // chaser regresses to DOWNLOAD targeting the blocking block with a
    // staggered re-request for exactly that hash.
    for block in blocks.iter().skip(2) {
        handle
            .submit_block(peer, block.hash(), &block.encode_to_vec())
            .unwrap();
    }
    let blocking_hash = blocks[1].hash();
    assert!(
        wait_until(Duration::from_secs(5), || {
            fixture
                .network
                .getdata
                .lock()
                .unwrap()
                .iter()
                .any(|(_, hashes)| hashes.as_slice() == [blocking_hash])
        }),
        "the blocking block was never re-requested on its own"
    );
    assert_eq!(handle.chainstate().validated_tip(), Height(0));

    // Fill the gap; the whole range validates.
    handle
        .submit_block(peer, blocking_hash, &blocks[1].encode_to_vec())
        .unwrap();
    assert!(
        wait_until(Duration::from_secs(10), || {
            handle.chainstate().validated_tip() == Height(3)
        }),
        "validated tip never reached 3, at {:?}",
        handle.chainstate().validated_tip()
    );

    running.stop();
}

#[test]
fn block_locator_is_dense_then_sparse() {
    tanager_test::init();
    let fixture = Fixture::new();
    let blocks = build_chain(40, 5_000_000_000);

    let chaser = fixture.chaser();
    let handle = chaser.handle();
    assert!(handle.block_locator().is_empty(), "no headers yet");

    handle.submit_headers(blocks.iter().map(|b| b.header).collect());
    let locator = handle.block_locator();

    // Starts at the tip, ends at genesis.
    assert_eq!(locator.first(), Some(&blocks[40].hash()));
    assert_eq!(locator.last(), Some(&blocks[0].hash()));
    // The first ten steps are consecutive, then spacing doubles, so the
    // whole list stays logarithmic in chain length.
    assert_eq!(locator[1], blocks[39].hash());
    assert_eq!(locator[9], blocks[31].hash());
    assert!(locator.len() < 20);
}

#[test]
fn restart_recovery_rescans_the_block_store() {
    tanager_test::init();
    let fixture = Fixture::new();
    let blocks = build_chain(3, 5_000_000_000);

    // Blocks already on disk from a previous run.
    for (height, block) in blocks.iter().enumerate().skip(1) {
        fixture
            .block_store
            .write(Height(height as u32), &block.encode_to_vec())
            .unwrap();
    }

    let chaser = fixture.chaser();
    let handle = chaser.handle();
    let tracker = handle.tracker();
    let tracker = tracker.lock().unwrap();
    assert!(tracker.has_block(Height(1)));
    assert!(tracker.has_block(Height(3)));
    assert_eq!(tracker.available_count(), 3);
}

#[test]
fn invalid_block_is_retried_then_marked_failed() {
    tanager_test::init();
    let fixture = Fixture::new();

    // Block 1 overclaims its subsidy: its header is fine, the block is
    // not.
    let genesis = block_at(Height(0), Hash::zero(), 5_000_000_000);
    let bad = block_at(Height(1), genesis.hash(), 5_000_000_001);

    let running = fixture.chaser().start();
    let handle = running.handle();
    assert_eq!(handle.submit_headers(vec![genesis.header, bad.header]), 2);

    let peer = PeerId(1);
    handle.add_peer(peer);

    // Feed the bad block; validation fails and the chaser asks for it
    // again. Feed it once more; the second failure condemns it.
    handle
        .submit_block(peer, bad.hash(), &bad.encode_to_vec())
        .unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || {
            // The block file was dropped after the first failure.
            !fixture.block_store.exists(Height(1))
        }),
        "bad block was not discarded"
    );

    handle
        .submit_block(peer, bad.hash(), &bad.encode_to_vec())
        .unwrap();

    let index = handle.chainstate().index();
    assert!(
        wait_until(Duration::from_secs(5), || {
            let index = index.lock().unwrap();
            index
                .lookup_by_hash(&bad.hash())
                .map(|entry| entry.status.contains(BlockStatus::FAILED))
                .unwrap_or(false)
        }),
        "block was never marked failed"
    );

    // The failed block is excluded; the best chain falls back to
    // genesis and nothing was flushed.
    assert!(
        wait_until(Duration::from_secs(5), || {
            handle.chainstate().best_header_height() == Some(Height(0))
        }),
        "best chain did not fall back to genesis"
    );
    assert_eq!(handle.chainstate().validated_tip(), Height(0));

    running.stop();
}
