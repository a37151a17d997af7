use byteorder::{ByteOrder, LE};
use std::convert::TryFrom;

/// Size of a single encoded control record (tag, offset, length).
pub const CONTROL_SIZE: usize = 17;

/// Control tag of `Instruction::Copy`.
pub const TAG_COPY: u8 = 0;

/// Control tag of `Instruction::Diff`.
pub const TAG_DIFF: u8 = 1;

/// Control tag of `Instruction::Insert`.
pub const TAG_INSERT: u8 = 2;

/// Single control record of the control stream.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Control {
    pub tag: u8,
    pub offset: u64,
    pub len: u64,
}

/// Encodes control record.
#[inline]
pub fn encode_control(ctl: &Control, b: &mut [u8]) {
    b[0] = ctl.tag;
    LE::write_u64(&mut b[1..9], ctl.offset);
    LE::write_u64(&mut b[9..17], ctl.len);
}

/// Decodes control record.
#[inline]
pub fn decode_control(b: &[u8]) -> Control {
    Control {
        tag: b[0],
        offset: LE::read_u64(&b[1..9]),
        len: LE::read_u64(&b[9..17]),
    }
}

/// Converts an untrusted length to usize.
#[inline]
pub fn to_usize(x: u64) -> Option<usize> {
    usize::try_from(x).ok()
}

/// Checks that `offset..offset+len` lies within a buffer of `size` bytes and
/// returns the range bounds.
#[inline]
pub fn checked_extent(offset: u64, len: u64, size: usize) -> Option<(usize, usize)> {
    let end = offset.checked_add(len)?;
    if end > size as u64 {
        return None;
    }
    Some((to_usize(offset)?, to_usize(end)?))
}
