/*!
Content fingerprints (SHA-256) of source, target and patch bodies.
*/

use sha2::{Digest, Sha256};
use std::fmt;

/// Width of a fingerprint in bytes.
pub const FINGERPRINT_SIZE: usize = 32;

/// Fixed-width digest identifying a byte buffer.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Fingerprint([u8; FINGERPRINT_SIZE]);

impl Fingerprint {
    /// Wraps raw digest bytes.
    pub fn from_bytes(bytes: [u8; FINGERPRINT_SIZE]) -> Self {
        Fingerprint(bytes)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_SIZE] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.iter() {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}

/// Fingerprint of the whole buffer.
pub fn fingerprint(buf: &[u8]) -> Fingerprint {
    let mut fp = Fingerprinter::new();
    fp.update(buf);
    fp.finish()
}

/// Incremental fingerprint computation over several pieces.
#[derive(Clone, Default)]
pub struct Fingerprinter {
    hasher: Sha256,
}

impl Fingerprinter {
    pub fn new() -> Self {
        Fingerprinter { hasher: Sha256::new() }
    }

    pub fn update(&mut self, buf: &[u8]) {
        self.hasher.update(buf);
    }

    pub fn finish(self) -> Fingerprint {
        Fingerprint(self.hasher.finalize().into())
    }
}
