//! Bit-granular cursors over a GC info blob.
//!
//! Bits are numbered LSB-first inside each byte, and a fixed-width field's first bit in the
//! stream is its least significant bit.
//!
//! Variable-length integers use a progressive code: the value is cut into chunks, chunk `i`
//! holds `base + i` data bits, and every chunk is followed by one continuation bit (1 = another
//! chunk follows). Chunks are emitted from the most significant one down, so the decoder simply
//! shifts the accumulated value left by each chunk's width. Signed values are zig-zag folded
//! first (sign in the low bit). `base` is a per-field constant chosen so that common values fit
//! in the first chunk.

use crate::gcinfo::error::{DecodeError, Result};
use crate::util::constants::*;

/// A read cursor over an immutable byte slice.
#[derive(Clone, Debug)]
pub struct BitStreamReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitStreamReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::at(data, 0)
    }

    /// Create a reader positioned at the given bit offset.
    pub fn at(data: &'a [u8], pos: usize) -> Self {
        BitStreamReader { data, pos }
    }

    /// The whole byte slice, independent of the cursor.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Current bit offset from the start of the blob.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn set_position(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn bits_remaining(&self) -> usize {
        (self.data.len() << LOG_BITS_IN_BYTE).saturating_sub(self.pos)
    }

    /// Advance the cursor without reading, failing if that would leave the blob.
    pub fn skip(&mut self, bits: usize) -> Result<()> {
        if bits > self.bits_remaining() {
            return Err(DecodeError::Truncated);
        }
        self.pos += bits;
        Ok(())
    }

    /// Round the cursor up to the next byte boundary.
    pub fn align_to_byte(&mut self) {
        self.pos = (self.pos + BITS_IN_BYTE - 1) & !(BITS_IN_BYTE - 1);
    }

    /// Read `n` bits (`n` at most a machine word).
    pub fn read_bits(&mut self, n: u32) -> Result<usize> {
        debug_assert!(n <= MAX_BITS_PER_READ, "cannot read {} bits at once", n);
        let n = n as usize;
        if n > self.bits_remaining() {
            return Err(DecodeError::Truncated);
        }
        let mut value = 0usize;
        let mut done = 0;
        while done < n {
            let byte = self.data[self.pos >> LOG_BITS_IN_BYTE] as usize;
            let shift = self.pos & (BITS_IN_BYTE - 1);
            let take = (BITS_IN_BYTE - shift).min(n - done);
            value |= ((byte >> shift) & ((1 << take) - 1)) << done;
            done += take;
            self.pos += take;
        }
        Ok(value)
    }

    pub fn read_bit(&mut self) -> Result<bool> {
        Ok(self.read_bits(1)? != 0)
    }

    pub fn decode_var_unsigned(&mut self, base: u32) -> Result<u64> {
        debug_assert!(base > 0);
        let mut result: u64 = 0;
        let mut width = base;
        loop {
            if width > MAX_BITS_PER_READ {
                return Err(DecodeError::VarIntOverflow);
            }
            let chunk = self.read_bits(width)? as u64;
            if width < BITS_IN_VAR_INT {
                if result >> (BITS_IN_VAR_INT - width) != 0 {
                    return Err(DecodeError::VarIntOverflow);
                }
                result = (result << width) | chunk;
            } else {
                if result != 0 {
                    return Err(DecodeError::VarIntOverflow);
                }
                result = chunk;
            }
            if !self.read_bit()? {
                return Ok(result);
            }
            width += 1;
        }
    }

    pub fn decode_var_signed(&mut self, base: u32) -> Result<i64> {
        let folded = self.decode_var_unsigned(base)?;
        Ok(((folded >> 1) as i64) ^ -((folded & 1) as i64))
    }

    /// Decode an unsigned variable-length integer that must fit in 32 bits.
    pub fn decode_var_u32(&mut self, base: u32) -> Result<u32> {
        u32::try_from(self.decode_var_unsigned(base)?).map_err(|_| DecodeError::VarIntOverflow)
    }

    /// Decode a signed variable-length integer that must fit in 32 bits.
    pub fn decode_var_i32(&mut self, base: u32) -> Result<i32> {
        i32::try_from(self.decode_var_signed(base)?).map_err(|_| DecodeError::VarIntOverflow)
    }
}

/// The write side of [`BitStreamReader`], used by the encoder.
#[derive(Clone, Debug, Default)]
pub struct BitStreamWriter {
    bytes: Vec<u8>,
    len: usize,
}

impl BitStreamWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bits written so far.
    pub fn position(&self) -> usize {
        self.len
    }

    pub fn write_bits(&mut self, value: usize, n: u32) {
        debug_assert!(n <= MAX_BITS_PER_READ, "cannot write {} bits at once", n);
        debug_assert!(
            n as usize == BITS_IN_WORD || value >> n == 0,
            "{:#x} does not fit in {} bits",
            value,
            n
        );
        let n = n as usize;
        let mut done = 0;
        while done < n {
            let shift = self.len & (BITS_IN_BYTE - 1);
            if shift == 0 {
                self.bytes.push(0);
            }
            let take = (BITS_IN_BYTE - shift).min(n - done);
            let chunk = (value >> done) & ((1 << take) - 1);
            let idx = self.len >> LOG_BITS_IN_BYTE;
            self.bytes[idx] |= (chunk << shift) as u8;
            done += take;
            self.len += take;
        }
    }

    pub fn write_bit(&mut self, bit: bool) {
        self.write_bits(bit as usize, 1);
    }

    /// Pad with zero bits up to the next byte boundary.
    pub fn align_to_byte(&mut self) {
        let pad = (BITS_IN_BYTE - (self.len & (BITS_IN_BYTE - 1))) & (BITS_IN_BYTE - 1);
        self.write_bits(0, pad as u32);
    }

    /// Append every bit written to `other`.
    pub fn append(&mut self, other: &BitStreamWriter) {
        let mut reader = BitStreamReader::new(&other.bytes);
        let mut remaining = other.len;
        while remaining > 0 {
            let n = remaining.min(BITS_IN_BYTE);
            // Cannot fail: `other` holds at least `other.len` bits.
            let bits = reader.read_bits(n as u32).unwrap_or(0);
            self.write_bits(bits, n as u32);
            remaining -= n;
        }
    }

    /// Encode `value` with the progressive code, returning the number of bits written.
    pub fn encode_var_unsigned(&mut self, value: u64, base: u32) -> usize {
        debug_assert!(base > 0);
        let start = self.len;
        let (chunks, total) = var_chunks(value, base);
        let mut remaining = total;
        for i in 0..chunks {
            let width = base + i;
            remaining -= width;
            let chunk = if remaining >= BITS_IN_VAR_INT {
                0
            } else {
                (value >> remaining) & low_mask(width)
            };
            self.write_bits(chunk as usize, width);
            self.write_bit(i + 1 < chunks);
        }
        self.len - start
    }

    /// The number of bits [`BitStreamWriter::encode_var_unsigned`] writes for `value`.
    pub fn var_unsigned_size(value: u64, base: u32) -> usize {
        let (chunks, total) = var_chunks(value, base);
        (total + chunks) as usize
    }

    pub fn encode_var_signed(&mut self, value: i64, base: u32) -> usize {
        let folded = ((value << 1) ^ (value >> (BITS_IN_VAR_INT - 1))) as u64;
        self.encode_var_unsigned(folded, base)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// The number of chunks needed for `value`, and their total data width.
fn var_chunks(value: u64, base: u32) -> (u32, u32) {
    let significant = bits_needed(value);
    let mut chunks = 1;
    let mut total = base;
    while total < significant {
        total += base + chunks;
        chunks += 1;
    }
    (chunks, total)
}

fn low_mask(width: u32) -> u64 {
    if width >= BITS_IN_VAR_INT {
        u64::MAX
    } else {
        (1 << width) - 1
    }
}

/// Number of bits needed to represent `value` (0 for 0).
pub const fn bits_needed(value: u64) -> u32 {
    BITS_IN_VAR_INT - value.leading_zeros()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_width_fields_cross_byte_boundaries() {
        let mut w = BitStreamWriter::new();
        w.write_bits(0b101, 3);
        w.write_bits(0x3ff, 10);
        w.write_bit(true);
        w.write_bits(0xdead_beef, 32);
        assert_eq!(w.position(), 46);
        let bytes = w.into_bytes();
        let mut r = BitStreamReader::new(&bytes);
        assert_eq!(r.read_bits(3).unwrap(), 0b101);
        assert_eq!(r.read_bits(10).unwrap(), 0x3ff);
        assert!(r.read_bit().unwrap());
        assert_eq!(r.read_bits(32).unwrap(), 0xdead_beef);
        assert_eq!(r.position(), 46);
    }

    #[test]
    fn lsb_first_layout() {
        let mut w = BitStreamWriter::new();
        w.write_bit(true);
        w.write_bits(0, 6);
        w.write_bit(true);
        assert_eq!(w.into_bytes(), vec![0x81]);
    }

    #[test]
    fn small_values_take_one_chunk() {
        let mut w = BitStreamWriter::new();
        assert_eq!(w.encode_var_unsigned(5, 3), 4);
        assert_eq!(w.encode_var_unsigned(7, 3), 4);
        // 8 needs 4 bits: chunks of 3 and 4 bits.
        assert_eq!(w.encode_var_unsigned(8, 3), 9);
        assert_eq!(BitStreamWriter::var_unsigned_size(8, 3), 9);
        assert_eq!(BitStreamWriter::var_unsigned_size(0, 6), 7);
        let bytes = w.into_bytes();
        let mut r = BitStreamReader::new(&bytes);
        assert_eq!(r.decode_var_unsigned(3).unwrap(), 5);
        assert_eq!(r.decode_var_unsigned(3).unwrap(), 7);
        assert_eq!(r.decode_var_unsigned(3).unwrap(), 8);
    }

    #[test]
    fn extreme_var_values() {
        let values = [0u64, 1, 63, 64, 1 << 31, u32::MAX as u64, u64::MAX - 1, u64::MAX];
        for base in [1, 2, 4, 6, 8] {
            let mut w = BitStreamWriter::new();
            for v in values {
                w.encode_var_unsigned(v, base);
            }
            let bytes = w.into_bytes();
            let mut r = BitStreamReader::new(&bytes);
            for v in values {
                assert_eq!(r.decode_var_unsigned(base).unwrap(), v, "base {}", base);
            }
        }
    }

    #[test]
    fn signed_values_fold_the_sign() {
        let mut w = BitStreamWriter::new();
        for v in [0i64, -1, 1, -8, 8, i64::MIN, i64::MAX] {
            w.encode_var_signed(v, 4);
        }
        let bytes = w.into_bytes();
        let mut r = BitStreamReader::new(&bytes);
        for v in [0i64, -1, 1, -8, 8, i64::MIN, i64::MAX] {
            assert_eq!(r.decode_var_signed(4).unwrap(), v);
        }
    }

    #[test]
    fn reading_past_the_end_is_truncated() {
        let bytes = [0xffu8];
        let mut r = BitStreamReader::new(&bytes);
        assert_eq!(r.read_bits(7).unwrap(), 0x7f);
        assert_eq!(r.read_bits(2), Err(DecodeError::Truncated));
        // An unterminated variable-length integer also runs off the end.
        let mut r = BitStreamReader::new(&bytes);
        assert_eq!(r.decode_var_unsigned(2), Err(DecodeError::Truncated));
    }

    #[test]
    fn too_wide_var_int_overflows() {
        let mut w = BitStreamWriter::new();
        w.encode_var_unsigned(u64::MAX, 8);
        let bytes = w.into_bytes();
        let mut r = BitStreamReader::new(&bytes);
        assert_eq!(r.decode_var_u32(8), Err(DecodeError::VarIntOverflow));

        // Keep setting continuation bits until the accumulated value cannot fit.
        let mut w = BitStreamWriter::new();
        for i in 0..12 {
            w.write_bits((1 << (8 + i)) - 1, 8 + i);
            w.write_bit(true);
        }
        let bytes = w.into_bytes();
        let mut r = BitStreamReader::new(&bytes);
        assert_eq!(r.decode_var_unsigned(8), Err(DecodeError::VarIntOverflow));
    }

    #[test]
    fn align_and_append() {
        let mut a = BitStreamWriter::new();
        a.write_bits(0b11, 2);
        a.align_to_byte();
        assert_eq!(a.position(), 8);
        let mut b = BitStreamWriter::new();
        b.write_bits(0x1ff, 9);
        a.append(&b);
        assert_eq!(a.position(), 17);
        let bytes = a.into_bytes();
        let mut r = BitStreamReader::at(&bytes, 8);
        assert_eq!(r.read_bits(9).unwrap(), 0x1ff);
    }

    #[test]
    fn bits_needed_matches_widths() {
        assert_eq!(bits_needed(0), 0);
        assert_eq!(bits_needed(1), 1);
        assert_eq!(bits_needed(64), 7);
        assert_eq!(bits_needed(u64::MAX), 64);
    }
}
