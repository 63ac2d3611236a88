//! Initial block download: the pull-based download manager and the
//! chaser state machine that drives HEADERS → DOWNLOAD → DRAIN →
//! VALIDATE → FLUSH → PRUNE.
//!
//! Networking proper lives outside this crate; peers appear here only as
//! opaque ids, and outbound messages leave through the
//! [`peer::DownloadNetwork`] trait object the embedding application
//! supplies.

pub mod chaser;
pub mod download;
pub mod peer;

pub use chaser::{Chaser, ChaserConfig, ChaserHandle, Event, Phase, RunningChaser};
pub use download::{DownloadManager, DownloadMetrics, WorkBatch};
pub use peer::{DownloadNetwork, NetError, PeerId};
