//! Double-SHA256, the hash primitive behind block/transaction identity,
//! the Merkle tree, and the wire frame checksum.

use sha2::{Digest, Sha256};
use std::io::Write;

/// An incremental double-SHA256 writer. Feed it serialized bytes (a block
/// header, a transaction, a frame payload) and call `finish` to get the
/// 32-byte digest.
#[derive(Default)]
pub struct Writer(Sha256);

impl Write for Writer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Writer {
    pub fn finish(self) -> [u8; 32] {
        let first = self.0.finalize();
        let second = Sha256::digest(&first[..]);
        let mut out = [0u8; 32];
        out.copy_from_slice(&second);
        out
    }
}

/// Double-SHA256 of `bytes` in one call.
pub fn hash(bytes: &[u8]) -> [u8; 32] {
    let mut w = Writer::default();
    w.write_all(bytes).expect("writing to a hasher is infallible");
    w.finish()
}

/// The 4-byte message checksum used in the wire frame header:
/// the first 4 bytes of the double-SHA256 of the payload.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Checksum(pub [u8; 4]);

impl From<&[u8]> for Checksum {
    fn from(bytes: &[u8]) -> Self {
        let digest = hash(bytes);
        let mut checksum = [0u8; 4];
        checksum.copy_from_slice(&digest[..4]);
        Checksum(checksum)
    }
}
