//! Double SHA-256, Bitcoin's block, transaction, and checksum hash.

use sha2::{Digest, Sha256};
use std::io;

/// Double SHA-256 of a byte slice.
pub fn hash(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(&first));
    out
}

/// An `io::Write` adapter that computes a double SHA-256 of everything
/// written to it, so hashes can be produced directly from `Encode` impls
/// without an intermediate buffer.
#[derive(Default)]
pub struct Writer {
    hasher: Sha256,
}

impl Writer {
    /// Consume the writer, returning the double hash of all bytes written.
    pub fn finish(self) -> [u8; 32] {
        let first = self.hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&Sha256::digest(&first));
        out
    }
}

impl io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hasher.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
