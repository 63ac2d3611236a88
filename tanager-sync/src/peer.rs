//! The seam between the sync layer and the real network stack.

use std::fmt;

use thiserror::Error;

use tanager_chain::block;

/// Errors the external transport reports across the sync boundary.
///
/// Any of these terminates only the offending peer; its in-flight batch
/// is re-queued by [`crate::DownloadManager::remove_peer`].
#[derive(Error, Debug)]
pub enum NetError {
    /// The socket had nothing to deliver; try again next poll.
    #[error("operation would block")]
    WouldBlock,
    /// The peer sent something the protocol does not allow.
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// The peer went quiet past its deadline.
    #[error("peer timed out")]
    Timeout,
    /// The transport failed underneath the session.
    #[error("network error: {0}")]
    NetworkError(String),
}

/// An opaque peer identity issued by the network layer.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Outbound operations the download manager needs from the network.
///
/// Implementations perform real socket I/O; the download manager calls
/// these while holding no locks beyond its own.
pub trait DownloadNetwork: Send {
    /// Request the given blocks from a peer (a `getdata` with block
    /// inventory).
    fn send_getdata(&self, peer: PeerId, hashes: &[block::Hash]);

    /// Drop a misbehaving or stalled peer.
    fn disconnect_peer(&self, peer: PeerId, reason: &str);
}
