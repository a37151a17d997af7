#![forbid(unsafe_code)]
use super::codec::{self, Header};
use super::error::{try_reserve, Error, Result, Subject};
use super::fingerprint::fingerprint;
use super::utils::{checked_extent, to_usize};
use super::Instruction;
use std::io::Write;

/// Integrity-checked patcher.
///
/// Apply patch to source:
/// ```
/// use secure_patch::Patcher;
///
/// fn patch(source: &[u8], patch: &[u8]) -> secure_patch::Result<Vec<u8>> {
///     Patcher::new(patch)?.apply(source)
/// }
/// ```
///
/// Inspect the patch before applying it:
/// ```
/// use secure_patch::{generate_patch, Patcher};
///
/// let patch = generate_patch(b"old contents", b"new contents").unwrap();
/// let patcher = Patcher::new(&patch[..]).unwrap();
/// assert_eq!(patcher.hint_target_size(), 12);
/// assert_eq!(patcher.apply(b"old contents").unwrap(), b"new contents");
/// ```
pub struct Patcher {
    header: Header,
    instructions: Vec<Instruction>,
}

impl Patcher {
    /// Parse and authenticate the patch.
    ///
    /// Return error if the patch is malformed, corrupted or of an unsupported
    /// version.
    pub fn new(patch: &[u8]) -> Result<Self> {
        let (header, instructions) = codec::decode(patch)?;
        Ok(Patcher { header, instructions })
    }

    /// The patch header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Hint the final target size, as provided in the patch header.
    pub fn hint_target_size(&self) -> u64 {
        self.header.target_len
    }

    /// The decoded instructions.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions[..]
    }

    /// Apply patch to the source data and return the verified target.
    pub fn apply(&self, source: &[u8]) -> Result<Vec<u8>> {
        self.check_source(source)?;
        let size = self.check_instructions(source)?;

        let mut target = Vec::new();
        try_reserve(&mut target, size)?;
        for ins in self.instructions.iter() {
            replay(ins, source, &mut target);
        }

        if target.len() as u64 != self.header.target_len {
            return Err(Error::mismatch(Subject::TargetLength, self.header.target_len, target.len()));
        }
        let actual = fingerprint(&target[..]);
        if actual != self.header.target_fingerprint {
            return Err(Error::mismatch(
                Subject::TargetFingerprint,
                self.header.target_fingerprint,
                actual,
            ));
        }

        log::debug!("rebuilt and verified {} target bytes", target.len());
        Ok(target)
    }

    /// Apply patch to the source data and write the verified target.
    ///
    /// Nothing is written unless the target passes verification. The target
    /// size would be returned if no error occurs.
    pub fn apply_to<W: Write>(&self, source: &[u8], mut target: W) -> Result<u64> {
        let bytes = self.apply(source)?;
        target.write_all(&bytes[..])?;
        target.flush()?;
        Ok(bytes.len() as u64)
    }

    /// Verifies that the source is the one the patch was generated from.
    fn check_source(&self, source: &[u8]) -> Result<()> {
        if source.len() as u64 != self.header.source_len {
            return Err(Error::mismatch(Subject::SourceLength, self.header.source_len, source.len()));
        }
        let actual = fingerprint(source);
        if actual != self.header.source_fingerprint {
            return Err(Error::mismatch(
                Subject::SourceFingerprint,
                self.header.source_fingerprint,
                actual,
            ));
        }
        Ok(())
    }

    /// Checks every source reference and returns the target size the
    /// instructions produce.
    fn check_instructions(&self, source: &[u8]) -> Result<usize> {
        let mut total = 0u64;
        for (i, ins) in self.instructions.iter().enumerate() {
            let (offset, len) = match ins {
                Instruction::Copy { offset, len } => (Some(*offset), *len),
                Instruction::Diff { offset, deltas } => (Some(*offset), deltas.len() as u64),
                Instruction::Insert { literal } => (None, literal.len() as u64),
            };
            if let Some(offset) = offset {
                if checked_extent(offset, len, source.len()).is_none() {
                    log::debug!("instruction {} is out of source bounds", i);
                    return Err(Error::malformed(format!(
                        "instruction {} reads source {}+{} beyond {} bytes",
                        i,
                        offset,
                        len,
                        source.len()
                    )));
                }
            }
            total = total.saturating_add(len);
        }

        if total != self.header.target_len {
            return Err(Error::mismatch(Subject::TargetLength, self.header.target_len, total));
        }
        to_usize(total)
            .ok_or_else(|| Error::ResourceExhausted(format!("target of {} bytes does not fit in memory", total)))
    }
}

/// Appends the bytes produced by a checked instruction.
fn replay(ins: &Instruction, source: &[u8], target: &mut Vec<u8>) {
    match ins {
        Instruction::Copy { offset, len } => {
            let o = *offset as usize;
            target.extend_from_slice(&source[o..o + *len as usize]);
        }
        Instruction::Diff { offset, deltas } => {
            let o = *offset as usize;
            let src = &source[o..o + deltas.len()];
            target.extend(Iterator::zip(src.iter(), deltas.iter()).map(|(x, d)| x.wrapping_add(*d)));
        }
        Instruction::Insert { literal } => target.extend_from_slice(&literal[..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;
    use crate::error::ErrorKind;
    use crate::utils::{encode_control, Control, CONTROL_SIZE, TAG_COPY, TAG_DIFF, TAG_INSERT};
    use crate::Compression;

    fn make(source: &[u8], target: &[u8], ins: &[Instruction]) -> Vec<u8> {
        encode(source, target, ins, Compression::Fastest).unwrap()
    }

    #[test]
    fn replays_all_kinds() {
        let s = b"0123456789";
        let t = b"23xyz689";
        let ins = vec![
            Instruction::Copy { offset: 2, len: 2 },
            Instruction::Insert { literal: b"xyz".to_vec() },
            Instruction::Diff {
                offset: 6,
                deltas: vec![0, 1, 1],
            },
        ];
        let p = make(&s[..], &t[..], &ins[..]);
        let patcher = Patcher::new(&p[..]).unwrap();
        assert_eq!(patcher.instructions(), &ins[..]);
        assert_eq!(patcher.hint_target_size(), 8);
        assert_eq!(patcher.apply(&s[..]).unwrap(), t.to_vec());

        let mut out = Vec::new();
        assert_eq!(patcher.apply_to(&s[..], &mut out).unwrap(), 8);
        assert_eq!(out, t.to_vec());
    }

    #[test]
    fn wrong_source() {
        let p = make(b"abcdef", b"abc", &[Instruction::Copy { offset: 0, len: 3 }]);
        let patcher = Patcher::new(&p[..]).unwrap();

        let e = patcher.apply(b"abcde").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::IntegrityMismatch);
        assert!(e.to_string().starts_with("source length mismatch"));

        let e = patcher.apply(b"abcdeg").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::IntegrityMismatch);
        assert!(e.to_string().starts_with("source fingerprint mismatch"));
    }

    #[test]
    fn nothing_written_on_failure() {
        let p = make(b"abcdef", b"abc", &[Instruction::Copy { offset: 0, len: 3 }]);
        let patcher = Patcher::new(&p[..]).unwrap();
        let mut out = Vec::new();
        assert!(patcher.apply_to(b"zzzzzz", &mut out).is_err());
        assert!(out.is_empty());
    }

    fn forged(header: Header, instructions: Vec<Instruction>) -> Patcher {
        Patcher { header, instructions }
    }

    #[test]
    fn out_of_bounds_rejected_before_replay() {
        let s = b"abcdef";
        let p = make(&s[..], b"abc", &[Instruction::Copy { offset: 0, len: 3 }]);
        let header = *Patcher::new(&p[..]).unwrap().header();

        let patcher = forged(header, vec![Instruction::Copy { offset: 4, len: 3 }]);
        let e = patcher.apply(&s[..]).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::MalformedPatch);

        let patcher = forged(
            header,
            vec![Instruction::Diff {
                offset: u64::MAX,
                deltas: vec![0, 0, 0],
            }],
        );
        assert_eq!(patcher.apply(&s[..]).unwrap_err().kind(), ErrorKind::MalformedPatch);
    }

    fn sealed(source: &[u8], target: &[u8], controls: &[Control], delta: &[u8], extra: &[u8]) -> Vec<u8> {
        let mut raw = vec![0; controls.len() * CONTROL_SIZE];
        for (ctl, rec) in controls.iter().zip(raw.chunks_exact_mut(CONTROL_SIZE)) {
            encode_control(ctl, rec);
        }
        codec::assemble(source, target, &raw[..], delta, extra, Compression::Fastest).unwrap()
    }

    #[test]
    fn encoded_out_of_bounds_rejected() {
        let s = b"0123456789";
        let t = b"56789abcde";

        let copy = |offset, len| Control {
            tag: TAG_COPY,
            offset,
            len,
        };
        let p = sealed(&s[..], &t[..], &[copy(5, 10)], b"", b"");
        let e = crate::apply_patch(&s[..], &p[..]).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::MalformedPatch);
        assert!(e.to_string().contains("beyond 10 bytes"), "{}", e);

        let p = sealed(&s[..], &t[..], &[copy(u64::MAX, 10)], b"", b"");
        let e = crate::apply_patch(&s[..], &p[..]).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::MalformedPatch);

        let diff = Control {
            tag: TAG_DIFF,
            offset: 8,
            len: 5,
        };
        let insert = Control {
            tag: TAG_INSERT,
            offset: 0,
            len: 5,
        };
        let p = sealed(&s[..], &t[..], &[diff, insert], &[0; 5], b"abcde");
        let e = crate::apply_patch(&s[..], &p[..]).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::MalformedPatch);

        // The same streams within bounds rebuild the target.
        let fine = Control { offset: 5, ..diff };
        let p = sealed(&s[..], &t[..], &[fine, insert], &[0; 5], b"abcde");
        assert_eq!(crate::apply_patch(&s[..], &p[..]).unwrap(), t.to_vec());
    }

    #[test]
    fn target_checks() {
        let s = b"abcdef";
        let p = make(&s[..], b"abc", &[Instruction::Copy { offset: 0, len: 3 }]);
        let header = *Patcher::new(&p[..]).unwrap().header();

        let patcher = forged(header, vec![Instruction::Copy { offset: 0, len: 4 }]);
        let e = patcher.apply(&s[..]).unwrap_err();
        assert!(e.to_string().starts_with("target length mismatch"));

        let patcher = forged(header, vec![Instruction::Copy { offset: 1, len: 3 }]);
        let e = patcher.apply(&s[..]).unwrap_err();
        assert!(e.to_string().starts_with("target fingerprint mismatch"));
    }
}
