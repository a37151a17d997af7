/*!
Patch wire format.

A patch is a fixed-size header followed by three independently bzip2
compressed streams. All integers are little-endian.

```text
offset  size  field
     0     8  magic "SECPATCH"
     8     4  format version
    12     8  source length
    20    32  source fingerprint
    52     8  target length
    60    32  target fingerprint
    92    48  (raw size, packed size) of the control, diff and literal streams
   140    32  checksum of bytes 0..140 followed by the packed streams
   172     .  packed control stream, packed diff stream, packed literal stream
```

The control stream is a sequence of 17-byte records (tag, source offset,
length). Diff deltas and literal bytes are pulled from their streams in
record order.
*/

#![forbid(unsafe_code)]
use super::error::{try_reserve, Error, Result};
use super::fingerprint::{fingerprint, Fingerprint, Fingerprinter, FINGERPRINT_SIZE};
use super::utils::*;
use super::Instruction;
use byteorder::{ByteOrder, WriteBytesExt, LE};
use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use bzip2::Compression;
use std::convert::TryFrom;
use std::io::{Read, Write};

/// Leading bytes of every patch.
pub const MAGIC: &[u8; 8] = b"SECPATCH";

/// The only supported format version.
pub const VERSION: u32 = 1;

/// Offset of the body checksum.
const CHECKSUM_OFFSET: usize = 140;

/// Size of the patch header.
pub const HEADER_SIZE: usize = CHECKSUM_OFFSET + FINGERPRINT_SIZE;

/// Raw and compressed sizes of a stream.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct StreamSize {
    pub raw: u64,
    pub packed: u64,
}

/// Patch header.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Header {
    pub version: u32,
    pub source_len: u64,
    pub source_fingerprint: Fingerprint,
    pub target_len: u64,
    pub target_fingerprint: Fingerprint,
    pub control: StreamSize,
    pub diff: StreamSize,
    pub literal: StreamSize,
}

/// Bytes decompressed per step. A stream grows only as its data is actually
/// decoded, never to the raw size a header claims.
const READ_CHUNK: usize = 1 << 20;

/// Encodes the instructions into a patch of `source` to `target`.
///
/// The instructions must reference only bytes inside `source` and rebuild
/// exactly `target.len()` bytes.
pub fn encode(source: &[u8], target: &[u8], instructions: &[Instruction], level: Compression) -> Result<Vec<u8>> {
    let (delta_len, extra_len) = payload_sizes(instructions);
    let mut raw_ctrls = Vec::new();
    let mut raw_delta = Vec::new();
    let mut raw_extra = Vec::new();
    try_reserve(&mut raw_ctrls, instructions.len().saturating_mul(CONTROL_SIZE))?;
    try_reserve(&mut raw_delta, delta_len)?;
    try_reserve(&mut raw_extra, extra_len)?;

    let mut total = 0u64;
    let mut cbuf = [0; CONTROL_SIZE];
    for ins in instructions {
        let ctl = match ins {
            Instruction::Copy { offset, len } => Control {
                tag: TAG_COPY,
                offset: *offset,
                len: *len,
            },
            Instruction::Diff { offset, deltas } => {
                raw_delta.extend_from_slice(&deltas[..]);
                Control {
                    tag: TAG_DIFF,
                    offset: *offset,
                    len: deltas.len() as u64,
                }
            }
            Instruction::Insert { literal } => {
                raw_extra.extend_from_slice(&literal[..]);
                Control {
                    tag: TAG_INSERT,
                    offset: 0,
                    len: literal.len() as u64,
                }
            }
        };
        if ctl.tag != TAG_INSERT && checked_extent(ctl.offset, ctl.len, source.len()).is_none() {
            return Err(Error::InvalidInput(format!(
                "instruction reads source {}+{} beyond {} bytes",
                ctl.offset,
                ctl.len,
                source.len()
            )));
        }
        total = total.saturating_add(ctl.len);
        encode_control(&ctl, &mut cbuf[..]);
        raw_ctrls.extend_from_slice(&cbuf[..]);
    }
    if total != target.len() as u64 {
        return Err(Error::InvalidInput(format!(
            "instructions produce {} bytes, target has {}",
            total,
            target.len()
        )));
    }

    assemble(source, target, &raw_ctrls[..], &raw_delta[..], &raw_extra[..], level)
}

/// Total lengths of the diff and literal payloads.
fn payload_sizes(instructions: &[Instruction]) -> (usize, usize) {
    instructions.iter().fold((0, 0), |(delta, extra), ins| match ins {
        Instruction::Copy { .. } => (delta, extra),
        Instruction::Diff { deltas, .. } => (delta + deltas.len(), extra),
        Instruction::Insert { literal } => (delta, extra + literal.len()),
    })
}

/// Compresses the raw streams and seals them under a header for `source`
/// and `target`. The streams are taken as they are.
pub(crate) fn assemble(
    source: &[u8],
    target: &[u8],
    raw_ctrls: &[u8],
    raw_delta: &[u8],
    raw_extra: &[u8],
    level: Compression,
) -> Result<Vec<u8>> {
    let bz_ctrls = compress(raw_ctrls, level)?;
    let bz_delta = compress(raw_delta, level)?;
    let bz_extra = compress(raw_extra, level)?;

    let header = Header {
        version: VERSION,
        source_len: source.len() as u64,
        source_fingerprint: fingerprint(source),
        target_len: target.len() as u64,
        target_fingerprint: fingerprint(target),
        control: StreamSize {
            raw: raw_ctrls.len() as u64,
            packed: bz_ctrls.len() as u64,
        },
        diff: StreamSize {
            raw: raw_delta.len() as u64,
            packed: bz_delta.len() as u64,
        },
        literal: StreamSize {
            raw: raw_extra.len() as u64,
            packed: bz_extra.len() as u64,
        },
    };

    let size = HEADER_SIZE + bz_ctrls.len() + bz_delta.len() + bz_extra.len();
    let mut patch = Vec::new();
    try_reserve(&mut patch, size)?;
    write_header(&header, &mut patch)?;
    let checksum = body_checksum(&patch[..CHECKSUM_OFFSET], &[&bz_ctrls[..], &bz_delta[..], &bz_extra[..]]);
    patch.extend_from_slice(checksum.as_bytes());
    patch.extend_from_slice(&bz_ctrls[..]);
    patch.extend_from_slice(&bz_delta[..]);
    patch.extend_from_slice(&bz_extra[..]);

    log::debug!(
        "encoded {} control records: control {}/{}, diff {}/{}, literal {}/{} bytes (raw/packed)",
        raw_ctrls.len() / CONTROL_SIZE,
        header.control.raw,
        header.control.packed,
        header.diff.raw,
        header.diff.packed,
        header.literal.raw,
        header.literal.packed
    );
    Ok(patch)
}

/// Decodes and authenticates a patch.
pub fn decode(patch: &[u8]) -> Result<(Header, Vec<Instruction>)> {
    let header = parse_header(patch)?;

    let body = &patch[HEADER_SIZE..];
    let (bz_ctrls, body) = body.split_at(header.control.packed as usize);
    let (bz_delta, bz_extra) = body.split_at(header.diff.packed as usize);

    let ctrls = decompress(bz_ctrls, header.control.raw, "control")?;
    let delta = decompress(bz_delta, header.diff.raw, "diff")?;
    let extra = decompress(bz_extra, header.literal.raw, "literal")?;

    let instructions = parse_controls(&ctrls[..], &delta[..], &extra[..])?;
    log::debug!(
        "decoded patch of {} source bytes into {} target bytes with {} instructions",
        header.source_len,
        header.target_len,
        instructions.len()
    );
    Ok((header, instructions))
}

/// Parses the header and verifies that the patch is complete and
/// untampered.
pub fn parse_header(patch: &[u8]) -> Result<Header> {
    if patch.len() < MAGIC.len() || &patch[..MAGIC.len()] != MAGIC {
        return Err(Error::malformed("not a patch (bad magic)"));
    }
    if patch.len() < 12 {
        return Err(Error::malformed("truncated header"));
    }
    let version = LE::read_u32(&patch[8..12]);
    if version != VERSION {
        return Err(Error::malformed(format!("unsupported format version {}", version)));
    }
    if patch.len() < HEADER_SIZE {
        return Err(Error::malformed("truncated header"));
    }

    let header = Header {
        version,
        source_len: LE::read_u64(&patch[12..20]),
        source_fingerprint: read_fingerprint(&patch[20..52]),
        target_len: LE::read_u64(&patch[52..60]),
        target_fingerprint: read_fingerprint(&patch[60..92]),
        control: read_stream_size(&patch[92..108]),
        diff: read_stream_size(&patch[108..124]),
        literal: read_stream_size(&patch[124..140]),
    };

    let body = (patch.len() - HEADER_SIZE) as u64;
    let packed = header
        .control
        .packed
        .checked_add(header.diff.packed)
        .and_then(|n| n.checked_add(header.literal.packed));
    match packed {
        Some(n) if n == body => (),
        Some(n) if n > body => {
            return Err(Error::malformed(format!(
                "truncated patch: {} stream bytes declared, {} present",
                n, body
            )))
        }
        _ => return Err(Error::malformed("stream sizes disagree with patch size")),
    }

    let expected = read_fingerprint(&patch[CHECKSUM_OFFSET..HEADER_SIZE]);
    let actual = body_checksum(&patch[..CHECKSUM_OFFSET], &[&patch[HEADER_SIZE..]]);
    if expected != actual {
        log::debug!("patch checksum {} does not match {}", actual, expected);
        return Err(Error::malformed("checksum mismatch, patch is corrupted"));
    }

    Ok(header)
}

fn write_header<W: Write>(header: &Header, mut w: W) -> Result<()> {
    w.write_all(&MAGIC[..])?;
    w.write_u32::<LE>(header.version)?;
    w.write_u64::<LE>(header.source_len)?;
    w.write_all(header.source_fingerprint.as_bytes())?;
    w.write_u64::<LE>(header.target_len)?;
    w.write_all(header.target_fingerprint.as_bytes())?;
    for size in [header.control, header.diff, header.literal].iter() {
        w.write_u64::<LE>(size.raw)?;
        w.write_u64::<LE>(size.packed)?;
    }
    Ok(())
}

fn read_fingerprint(b: &[u8]) -> Fingerprint {
    let mut bytes = [0; FINGERPRINT_SIZE];
    bytes.copy_from_slice(b);
    Fingerprint::from_bytes(bytes)
}

fn read_stream_size(b: &[u8]) -> StreamSize {
    StreamSize {
        raw: LE::read_u64(&b[0..8]),
        packed: LE::read_u64(&b[8..16]),
    }
}

fn body_checksum(head: &[u8], streams: &[&[u8]]) -> Fingerprint {
    let mut fp = Fingerprinter::new();
    fp.update(head);
    for s in streams {
        fp.update(s);
    }
    fp.finish()
}

/// Compresses a stream, leaving empty streams empty.
fn compress(raw: &[u8], level: Compression) -> Result<Vec<u8>> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    let mut bz = BzEncoder::new(Vec::new(), level);
    bz.write_all(raw)?;
    let mut packed = bz.finish()?;
    packed.shrink_to_fit();
    Ok(packed)
}

/// Decompresses a stream, never producing more than `raw` bytes.
fn decompress(packed: &[u8], raw: u64, name: &str) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    if packed.is_empty() {
        if raw != 0 {
            return Err(Error::malformed(format!("{} stream is missing", name)));
        }
        return Ok(out);
    }

    let mut bz = BzDecoder::new(packed).take(raw.saturating_add(1));
    loop {
        try_reserve(&mut out, READ_CHUNK)?;
        let n = bz
            .by_ref()
            .take(READ_CHUNK as u64)
            .read_to_end(&mut out)
            .map_err(|e| Error::malformed(format!("{} stream: {}", name, e)))?;
        if n == 0 {
            break;
        }
    }
    if out.len() as u64 != raw {
        return Err(Error::malformed(format!(
            "{} stream has {} bytes, expected {}",
            name,
            out.len(),
            raw
        )));
    }
    out.shrink_to_fit();
    Ok(out)
}

/// Rebuilds instructions from the control records and payload streams.
fn parse_controls(ctrls: &[u8], delta: &[u8], extra: &[u8]) -> Result<Vec<Instruction>> {
    if ctrls.len() % CONTROL_SIZE != 0 {
        return Err(Error::malformed("control stream has a partial record"));
    }

    let mut instructions = Vec::with_capacity(ctrls.len() / CONTROL_SIZE);
    let mut delta = delta;
    let mut extra = extra;
    for (i, rec) in ctrls.chunks_exact(CONTROL_SIZE).enumerate() {
        let ctl = decode_control(rec);
        let ins = match ctl.tag {
            TAG_COPY => Instruction::Copy {
                offset: ctl.offset,
                len: ctl.len,
            },
            TAG_DIFF => Instruction::Diff {
                offset: ctl.offset,
                deltas: take(&mut delta, ctl.len, i, "diff")?.to_vec(),
            },
            TAG_INSERT => {
                if ctl.offset != 0 {
                    return Err(Error::malformed(format!("instruction {} is an insert with an offset", i)));
                }
                Instruction::Insert {
                    literal: take(&mut extra, ctl.len, i, "literal")?.to_vec(),
                }
            }
            tag => return Err(Error::malformed(format!("instruction {} has unknown tag {}", i, tag))),
        };
        instructions.push(ins);
    }

    if !delta.is_empty() || !extra.is_empty() {
        return Err(Error::malformed("payload streams have trailing bytes"));
    }
    Ok(instructions)
}

/// Splits `len` bytes off the front of a payload stream.
fn take<'a>(stream: &mut &'a [u8], len: u64, i: usize, name: &str) -> Result<&'a [u8]> {
    let n = match to_usize(len) {
        Some(n) if n <= stream.len() => n,
        _ => {
            return Err(Error::malformed(format!(
                "instruction {} needs {} bytes, {} stream has {} left",
                i,
                len,
                name,
                stream.len()
            )))
        }
    };
    let (head, tail) = stream.split_at(n);
    *stream = tail;
    Ok(head)
}

impl Header {
    /// Size of the whole patch described by this header.
    pub fn patch_size(&self) -> u64 {
        (HEADER_SIZE as u64)
            .saturating_add(self.control.packed)
            .saturating_add(self.diff.packed)
            .saturating_add(self.literal.packed)
    }
}

impl TryFrom<&[u8]> for Header {
    type Error = Error;

    fn try_from(patch: &[u8]) -> Result<Self> {
        parse_header(patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn sample() -> (Vec<u8>, Vec<u8>, Vec<Instruction>) {
        let source = b"the quick brown fox jumps over the lazy dog".to_vec();
        let target = b"the quick brown cat jumps over the lazy dog!".to_vec();
        let ins = vec![
            Instruction::Copy { offset: 0, len: 16 },
            Instruction::Diff {
                offset: 16,
                deltas: vec![b'c'.wrapping_sub(b'f'), b'a'.wrapping_sub(b'o'), b't'.wrapping_sub(b'x')],
            },
            Instruction::Copy { offset: 19, len: 24 },
            Instruction::Insert { literal: b"!".to_vec() },
        ];
        (source, target, ins)
    }

    #[test]
    fn encode_then_decode() {
        let (s, t, ins) = sample();
        let patch = encode(&s[..], &t[..], &ins[..], Compression::Default).unwrap();
        assert_eq!(&patch[..8], b"SECPATCH");

        let (header, decoded) = decode(&patch[..]).unwrap();
        assert_eq!(decoded, ins);
        assert_eq!(header.version, VERSION);
        assert_eq!(header.source_len, s.len() as u64);
        assert_eq!(header.target_len, t.len() as u64);
        assert_eq!(header.source_fingerprint, fingerprint(&s[..]));
        assert_eq!(header.target_fingerprint, fingerprint(&t[..]));
        assert_eq!(header.control.raw, 4 * CONTROL_SIZE as u64);
        assert_eq!(header.diff.raw, 3);
        assert_eq!(header.literal.raw, 1);
        assert_eq!(header.patch_size(), patch.len() as u64);
    }

    #[test]
    fn empty_streams_are_not_compressed() {
        let patch = encode(b"", b"", &[], Compression::Default).unwrap();
        assert_eq!(patch.len(), HEADER_SIZE);
        let (header, ins) = decode(&patch[..]).unwrap();
        assert!(ins.is_empty());
        assert_eq!(header.control, StreamSize::default());
    }

    #[test]
    fn rejects_inconsistent_instructions() {
        let (s, t, mut ins) = sample();
        ins.pop();
        let e = encode(&s[..], &t[..], &ins[..], Compression::Default).unwrap_err();
        assert!(matches!(e, Error::InvalidInput(_)));

        let ins = vec![Instruction::Copy { offset: 40, len: 10 }];
        let e = encode(&s[..], &t[..10], &ins[..], Compression::Default).unwrap_err();
        assert!(matches!(e, Error::InvalidInput(_)));
    }

    #[test]
    fn bad_magic_and_version() {
        let (s, t, ins) = sample();
        let patch = encode(&s[..], &t[..], &ins[..], Compression::Default).unwrap();

        let mut p = patch.clone();
        p[0] = b'X';
        assert!(matches!(decode(&p[..]), Err(Error::MalformedPatch(_))));

        let mut p = patch.clone();
        LE::write_u32(&mut p[8..12], 2);
        let e = decode(&p[..]).unwrap_err();
        assert!(e.to_string().contains("unsupported format version 2"));

        assert!(matches!(decode(b"SECPA"), Err(Error::MalformedPatch(_))));
        assert!(matches!(decode(b""), Err(Error::MalformedPatch(_))));
    }

    #[test]
    fn truncated_and_extended() {
        let (s, t, ins) = sample();
        let patch = encode(&s[..], &t[..], &ins[..], Compression::Default).unwrap();
        for n in 0..patch.len() {
            assert!(matches!(decode(&patch[..n]), Err(Error::MalformedPatch(_))), "length {}", n);
        }
        let mut p = patch.clone();
        p.push(0);
        assert!(matches!(decode(&p[..]), Err(Error::MalformedPatch(_))));
    }

    #[test]
    fn checksum_guards_the_body() {
        let (s, t, ins) = sample();
        let patch = encode(&s[..], &t[..], &ins[..], Compression::Default).unwrap();
        for i in 12..patch.len() {
            let mut p = patch.clone();
            p[i] ^= 0x01;
            assert!(matches!(decode(&p[..]), Err(Error::MalformedPatch(_))), "byte {}", i);
        }
    }

    fn reseal(p: &mut Vec<u8>) {
        let sum = body_checksum(&p[..CHECKSUM_OFFSET], &[&p[HEADER_SIZE..]]);
        p[CHECKSUM_OFFSET..HEADER_SIZE].copy_from_slice(sum.as_bytes());
    }

    #[test]
    fn lying_raw_sizes() {
        let (s, t, ins) = sample();
        let patch = encode(&s[..], &t[..], &ins[..], Compression::Default).unwrap();
        let raw = LE::read_u64(&patch[92..100]);
        let lies = [1u64 << 62, 1 << 40, 1 << 33, u64::MAX, raw + 1, raw - 1, 0];
        for &lie in lies.iter() {
            let mut p = patch.clone();
            LE::write_u64(&mut p[92..100], lie);
            reseal(&mut p);
            let e = decode(&p[..]).unwrap_err();
            assert_eq!(e.kind(), ErrorKind::MalformedPatch, "raw {}: {}", lie, e);
        }

        let mut p = patch.clone();
        LE::write_u64(&mut p[124..132], 1 << 40);
        reseal(&mut p);
        assert_eq!(decode(&p[..]).unwrap_err().kind(), ErrorKind::MalformedPatch);
    }

    #[test]
    fn large_stream_decodes() {
        let raw: Vec<u8> = (0..3 * READ_CHUNK + 123).map(|i| (i % 251) as u8).collect();
        let packed = compress(&raw[..], Compression::Fastest).unwrap();
        assert_eq!(decompress(&packed[..], raw.len() as u64, "literal").unwrap(), raw);
        assert!(decompress(&packed[..], raw.len() as u64 - 1, "literal").is_err());
    }

    #[test]
    fn payload_totals() {
        let (_, _, ins) = sample();
        assert_eq!(payload_sizes(&ins[..]), (3, 1));
        assert_eq!(payload_sizes(&[]), (0, 0));
    }

    #[test]
    fn control_parsing() {
        let mut rec = [0; CONTROL_SIZE];
        encode_control(
            &Control {
                tag: 9,
                offset: 0,
                len: 0,
            },
            &mut rec[..],
        );
        assert!(parse_controls(&rec[..], b"", b"").is_err());
        assert!(parse_controls(&rec[..5], b"", b"").is_err());

        encode_control(
            &Control {
                tag: TAG_INSERT,
                offset: 0,
                len: 3,
            },
            &mut rec[..],
        );
        assert!(parse_controls(&rec[..], b"", b"ab").is_err());
        assert!(parse_controls(&rec[..], b"", b"abcd").is_err());
        assert_eq!(
            parse_controls(&rec[..], b"", b"abc").unwrap(),
            vec![Instruction::Insert {
                literal: b"abc".to_vec()
            }]
        );
    }
}
