/*!
Integrity-checked binary delta generator and patcher.

A patch rebuilds a target buffer from a source buffer. It records the
lengths and SHA-256 fingerprints of both buffers, so applying it to the wrong
source, or applying a corrupted patch, fails instead of producing wrong
bytes.

```
use secure_patch::{apply_patch, generate_patch, initialize};

initialize();
let source = b"the quick brown fox jumps over the lazy dog";
let target = b"the quick brown cat jumps over the lazy dog";
let patch = generate_patch(source, target).unwrap();
assert_eq!(apply_patch(source, &patch[..]).unwrap(), &target[..]);
```
*/

pub mod codec;
pub mod diff;
pub mod error;
pub mod fingerprint;
pub mod init;
pub mod patch;
pub mod search;
mod utils;

pub use codec::Header;
pub use diff::{Compression, Differ, ParallelScheme};
pub use error::{Error, ErrorKind, Result};
pub use fingerprint::{fingerprint, Fingerprint};
pub use init::{initialize, is_initialized};
pub use patch::Patcher;

/// Single step rebuilding a piece of the target.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Instruction {
    /// Bytes taken verbatim from the source.
    Copy { offset: u64, len: u64 },

    /// Source bytes with per-byte deltas added (wrapping).
    Diff { offset: u64, deltas: Vec<u8> },

    /// Bytes without correspondence in the source.
    Insert { literal: Vec<u8> },
}

impl Instruction {
    /// Count of target bytes produced.
    pub fn len(&self) -> u64 {
        match self {
            Instruction::Copy { len, .. } => *len,
            Instruction::Diff { deltas, .. } => deltas.len() as u64,
            Instruction::Insert { literal } => literal.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Generates a patch rebuilding `target` from `source` with the default
/// configuration of `Differ`.
pub fn generate_patch(source: &[u8], target: &[u8]) -> Result<Vec<u8>> {
    Differ::new(source, target).generate()
}

/// Rebuilds the target from `source` and a patch, verifying both the source
/// and the result against the patch header.
pub fn apply_patch(source: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
    Patcher::new(patch)?.apply(source)
}
