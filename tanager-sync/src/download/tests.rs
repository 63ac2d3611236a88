use std::sync::{Arc, Mutex};

use tanager_chain::block::{Hash, Height};

use super::*;

#[derive(Clone, Default)]
struct RecordingNetwork {
    getdata: Arc<Mutex<Vec<(PeerId, Vec<Hash>)>>>,
    disconnects: Arc<Mutex<Vec<(PeerId, String)>>>,
}

impl RecordingNetwork {
    fn getdata_calls(&self) -> Vec<(PeerId, Vec<Hash>)> {
        self.getdata.lock().unwrap().clone()
    }

    fn disconnected(&self) -> Vec<PeerId> {
        self.disconnects
            .lock()
            .unwrap()
            .iter()
            .map(|(peer, _)| *peer)
            .collect()
    }
}

impl DownloadNetwork for RecordingNetwork {
    fn send_getdata(&self, peer: PeerId, hashes: &[Hash]) {
        self.getdata.lock().unwrap().push((peer, hashes.to_vec()));
    }

    fn disconnect_peer(&self, peer: PeerId, reason: &str) {
        self.disconnects
            .lock()
            .unwrap()
            .push((peer, reason.to_string()));
    }
}

fn manager() -> (DownloadManager, RecordingNetwork) {
    let network = RecordingNetwork::default();
    let manager = DownloadManager::new(Box::new(network.clone()));
    (manager, network)
}

fn hash(tag: u8) -> Hash {
    Hash([tag; 32])
}

fn work_items(start: u32, count: u32) -> (Vec<Hash>, Vec<Height>) {
    let hashes = (0..count).map(|i| hash((start + i) as u8)).collect();
    let heights = (0..count).map(|i| Height(start + i)).collect();
    (hashes, heights)
}

#[test]
fn pull_assignment_with_peer_loss() {
    tanager_test::init();
    let (mut manager, network) = manager();

    // 16 work items split into two batches of 8.
    let (hashes, heights) = work_items(1, 16);
    assert_eq!(manager.add_work(&hashes, &heights), 16);
    assert_eq!(manager.queued_batches(), 2);

    let peer_a = PeerId(1);
    let peer_b = PeerId(2);
    let peer_c = PeerId(3);
    manager.add_peer(peer_a, 0);
    manager.add_peer(peer_b, 0);
    manager.add_peer(peer_c, 0);

    // A and B pull the two batches in order.
    assert!(manager.request_work(peer_a, 10));
    assert!(manager.request_work(peer_b, 10));
    assert_eq!(manager.queued_batches(), 0);
    assert_eq!(manager.peer_batch(peer_a).unwrap().start_height(), Height(1));
    assert_eq!(manager.peer_batch(peer_b).unwrap().start_height(), Height(9));

    // A delivers the first block of its batch.
    assert!(manager.block_received(peer_a, &hashes[0], 1000, 20));
    let batch = manager.peer_batch(peer_a).unwrap();
    assert!(batch.is_received(0));
    assert_eq!(batch.remaining(), 7);

    // A disappears: its batch returns to the front of the queue with the
    // received bit preserved.
    manager.remove_peer(peer_a);
    assert_eq!(manager.queued_batches(), 1);

    // C pulls the returned batch; the first block is still marked
    // received and only 7 remain.
    assert!(manager.request_work(peer_c, 30));
    let batch = manager.peer_batch(peer_c).unwrap();
    assert_eq!(batch.start_height(), Height(1));
    assert!(batch.is_received(0));
    assert_eq!(batch.remaining(), 7);

    // The re-request still covers all 8 hashes; storage deduplicates.
    let calls = network.getdata_calls();
    let last = calls.last().unwrap();
    assert_eq!(last.0, peer_c);
    assert_eq!(last.1.len(), 8);
}

#[test]
fn request_work_on_empty_queue_is_false() {
    tanager_test::init();
    let (mut manager, network) = manager();
    let peer = PeerId(7);
    manager.add_peer(peer, 0);

    assert!(!manager.request_work(peer, 0));
    assert!(network.getdata_calls().is_empty());
    assert!(manager.peer_batch(peer).is_none());
}

#[test]
fn duplicate_deliveries_are_rejected() {
    tanager_test::init();
    let (mut manager, _network) = manager();
    let (hashes, heights) = work_items(1, 4);
    manager.add_work(&hashes, &heights);

    let peer = PeerId(1);
    manager.add_peer(peer, 0);
    assert!(manager.request_work(peer, 0));

    assert!(manager.block_received(peer, &hashes[2], 500, 5));
    assert!(!manager.block_received(peer, &hashes[2], 500, 6));
    assert_eq!(manager.peer_batch(peer).unwrap().remaining(), 3);

    // A block nobody asked for.
    assert!(!manager.block_received(peer, &hash(0xfe), 500, 7));
}

#[test]
fn busy_peer_cannot_pull_more_work() {
    tanager_test::init();
    let (mut manager, _network) = manager();
    let (hashes, heights) = work_items(1, 16);
    manager.add_work(&hashes, &heights);

    let peer = PeerId(1);
    manager.add_peer(peer, 0);
    assert!(manager.request_work(peer, 0));
    assert!(!manager.request_work(peer, 1), "still has an open batch");

    // Finish the batch; the next pull succeeds.
    for h in hashes.iter().take(8) {
        manager.block_received(peer, h, 100, 2);
    }
    assert!(manager.request_work(peer, 3));
    assert_eq!(manager.peer_batch(peer).unwrap().start_height(), Height(9));
}

#[test]
fn height_bitmap_tracks_pending_work() {
    tanager_test::init();
    let (mut manager, _network) = manager();
    let (hashes, heights) = work_items(10, 8);
    manager.add_work(&hashes, &heights);

    assert!(manager.has_height(Height(10)));
    assert!(manager.has_height(Height(17)));
    assert!(!manager.has_height(Height(18)));

    let peer = PeerId(1);
    manager.add_peer(peer, 0);
    manager.request_work(peer, 0);

    // Receiving a block clears its height immediately.
    manager.block_received(peer, &hashes[0], 100, 1);
    assert!(!manager.has_height(Height(10)));
    assert!(manager.has_height(Height(11)));
}

#[test]
fn stalled_peers_are_dropped_but_not_below_minimum() {
    tanager_test::init();
    let (mut manager, network) = manager();
    let (hashes, heights) = work_items(1, 48);
    manager.add_work(&hashes, &heights);

    // Six peers, all assigned work and all having reported once.
    let peers: Vec<PeerId> = (1..=6).map(PeerId).collect();
    for &peer in peers.iter() {
        manager.add_peer(peer, 0);
        assert!(manager.request_work(peer, 0));
        // Deliver one block so the window can latch has_reported.
        let batch_start = manager.peer_batch(peer).unwrap().start_height().0;
        let index = (batch_start - 1) as usize;
        manager.block_received(peer, &hashes[index], 100_000, 0);
    }
    // Roll the window past its length so rates compute.
    for &peer in peers.iter() {
        manager.block_received(peer, &hash(0xfd), 0, PERF_WINDOW_MS + 1);
    }

    // Everyone keeps delivering except peers 5 and 6, which go silent.
    let lively: Vec<PeerId> = peers[..4].to_vec();
    let now = PERF_WINDOW_MS * 4;
    for &peer in lively.iter() {
        let batch_start = manager.peer_batch(peer).unwrap().start_height().0;
        let index = (batch_start) as usize; // second block of the batch
        manager.block_received(peer, &hashes[index], 100_000, now - 10);
    }

    let dropped = manager.check_performance(now);
    assert_eq!(dropped, 2);
    assert_eq!(network.disconnected(), vec![PeerId(5), PeerId(6)]);

    // Their batches went back to the queue.
    assert_eq!(manager.queued_batches(), 2);
}

#[test]
fn drain_accelerate_fans_out_to_idle_peers() {
    tanager_test::init();
    let (mut manager, network) = manager();
    let (hashes, heights) = work_items(1, 8);
    manager.add_work(&hashes, &heights);

    let busy = PeerId(1);
    let idle_a = PeerId(2);
    let idle_b = PeerId(3);
    manager.add_peer(busy, 0);
    manager.add_peer(idle_a, 0);
    manager.add_peer(idle_b, 0);
    assert!(manager.request_work(busy, 0));

    // The busy peer delivered half its batch then went quiet.
    for h in hashes.iter().take(4) {
        manager.block_received(busy, h, 100, 1);
    }

    let asked = manager.drain_accelerate(0, 1000);
    assert_eq!(asked, 2);

    // Each idle peer received requests covering the 4 outstanding
    // blocks (with redundancy, staggered offsets).
    let calls: Vec<_> = network
        .getdata_calls()
        .into_iter()
        .filter(|(peer, _)| *peer != busy)
        .collect();
    assert!(!calls.is_empty());
    let outstanding: std::collections::HashSet<Hash> =
        hashes.iter().skip(4).copied().collect();
    for (_, requested) in calls.iter() {
        for hash in requested.iter() {
            assert!(outstanding.contains(hash), "only missing blocks re-requested");
        }
    }
}

#[test]
fn staggered_gap_fill_rotates_offsets() {
    tanager_test::init();
    let (mut manager, network) = manager();

    for i in 1..=4 {
        manager.add_peer(PeerId(i), 0);
    }
    let gaps: Vec<Hash> = (1..=100u8).map(hash).collect();
    let asked = manager.fill_gaps_staggered(&gaps, 4);
    assert_eq!(asked, 4);

    let calls = network.getdata_calls();
    assert_eq!(calls.len(), 4);
    // Every peer got the full gap list, starting at different points.
    let starts: std::collections::HashSet<Hash> =
        calls.iter().map(|(_, hashes)| hashes[0]).collect();
    assert_eq!(starts.len(), 4);
    for (_, hashes) in calls.iter() {
        assert_eq!(hashes.len(), 100);
    }
}

#[test]
fn clear_pending_keeps_assigned_batches() {
    tanager_test::init();
    let (mut manager, _network) = manager();
    let (hashes, heights) = work_items(1, 16);
    manager.add_work(&hashes, &heights);

    let peer = PeerId(1);
    manager.add_peer(peer, 0);
    manager.request_work(peer, 0);

    manager.clear_pending();
    assert_eq!(manager.queued_batches(), 0);
    assert_eq!(manager.inflight_blocks(), 8);
    // Cleared heights are no longer tracked; assigned ones still are.
    assert!(manager.has_height(Height(1)));
    assert!(!manager.has_height(Height(9)));
}
