//! Live-state bit vectors and the safe-point live-state section.
//!
//! A bit vector over the tracked slots is written with a one-bit selector: `0` is followed by
//! the raw bits, `1` by alternating (skip, run) pairs, where a skip counts clear bits and a run
//! counts set bits (stored minus one, since a run is never empty). The encoder picks whichever
//! is shorter.
//!
//! The safe-point section stores one such vector per safe point. Either the vectors are a raw
//! `safe points x tracked slots` matrix, or each safe point has a fixed-width pointer into a
//! byte-aligned pool of vectors, so that safe points with identical live sets share a row.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::gcinfo::constants::*;
use crate::gcinfo::error::{DecodeError, Result};
use crate::util::bit_stream::{bits_needed, BitStreamReader, BitStreamWriter};
use crate::util::bitmap::LiveBitmap;
use crate::util::constants::{BITS_IN_BYTE, LOG_BITS_IN_BYTE, MAX_BITS_PER_READ};

/// Read `out.len()` raw bits into `out`.
fn read_raw_bits(reader: &mut BitStreamReader, out: &mut LiveBitmap) -> Result<()> {
    let len = out.len();
    let mut index = 0;
    while index < len {
        let n = (len - index).min(MAX_BITS_PER_READ as usize);
        let mut word = reader.read_bits(n as u32)?;
        while word != 0 {
            let bit = word.trailing_zeros() as usize;
            out.set(index + bit, true);
            word &= word - 1;
        }
        index += n;
    }
    Ok(())
}

/// Decode a raw-or-RLE bit vector of `out.len()` bits into `out`, which must be clear.
pub fn decode_bit_vector(reader: &mut BitStreamReader, out: &mut LiveBitmap) -> Result<()> {
    if !reader.read_bit()? {
        return read_raw_bits(reader, out);
    }
    let len = out.len();
    let mut pos = 0usize;
    while pos < len {
        let skip = reader.decode_var_unsigned(LIVESTATE_RLE_SKIP_ENCBASE)?;
        pos = advance(pos, skip, len)?;
        if pos == len {
            break;
        }
        let run = reader.decode_var_unsigned(LIVESTATE_RLE_RUN_ENCBASE)?;
        let end = advance(pos, run.saturating_add(1), len)?;
        for index in pos..end {
            out.set(index, true);
        }
        pos = end;
    }
    Ok(())
}

fn advance(pos: usize, by: u64, len: usize) -> Result<usize> {
    let new = usize::try_from(by)
        .ok()
        .and_then(|by| pos.checked_add(by))
        .filter(|&new| new <= len);
    new.ok_or(DecodeError::InvalidSlotIndex(len.min(u32::MAX as usize) as u32))
}

fn encode_rle(bits: &[bool], writer: &mut BitStreamWriter) {
    let mut pos = 0;
    while pos < bits.len() {
        let skip = bits[pos..].iter().take_while(|b| !**b).count();
        writer.encode_var_unsigned(skip as u64, LIVESTATE_RLE_SKIP_ENCBASE);
        pos += skip;
        if pos == bits.len() {
            break;
        }
        let run = bits[pos..].iter().take_while(|b| **b).count();
        writer.encode_var_unsigned((run - 1) as u64, LIVESTATE_RLE_RUN_ENCBASE);
        pos += run;
    }
}

/// Encode a bit vector, choosing the shorter of the raw and RLE forms.
pub fn encode_bit_vector(bits: &[bool], writer: &mut BitStreamWriter) {
    let mut rle = BitStreamWriter::new();
    encode_rle(bits, &mut rle);
    if rle.position() < bits.len() {
        writer.write_bit(true);
        writer.append(&rle);
    } else {
        writer.write_bit(false);
        for &bit in bits {
            writer.write_bit(bit);
        }
    }
}

/// Where one shared live-state row lives: the byte offset of the pool in the blob, and the bit
/// offset of the row inside the pool.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RowPointer {
    pub table_start: usize,
    pub row_offset: usize,
}

impl RowPointer {
    /// The absolute bit position of the row in the blob.
    pub fn bit_position(&self) -> usize {
        (self.table_start << LOG_BITS_IN_BYTE) + self.row_offset
    }
}

/// How the encoder lays out the safe-point live-state rows.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum LiveRowLayout {
    /// Pick the smaller layout.
    #[default]
    Auto,
    /// One raw row per safe point.
    Raw,
    /// Per-safe-point pointers into a pool of deduplicated rows.
    Shared,
}

#[derive(Copy, Clone, Debug)]
enum RowSection {
    /// No safe points, or no tracked slots.
    Empty,
    Raw {
        matrix_pos: usize,
    },
    Shared {
        pointers_pos: usize,
        pointer_width: u32,
        pool_start: usize,
        pool_size: usize,
    },
}

/// The decoded layout of the safe-point live-state section.
#[derive(Debug)]
pub struct SafePointLiveState<'a> {
    data: &'a [u8],
    num_safe_points: u32,
    num_tracked: u32,
    section: RowSection,
    cache: Option<RefCell<HashMap<usize, LiveBitmap>>>,
}

impl<'a> SafePointLiveState<'a> {
    /// Read the section layout at the reader's position and skip to its end. Rows of the
    /// shared pool are memoized in the decoder when `cache_rows` is set.
    pub fn decode(
        reader: &mut BitStreamReader<'a>,
        num_safe_points: u32,
        num_tracked: u32,
        cache_rows: bool,
    ) -> Result<Self> {
        let section = if num_safe_points == 0 || num_tracked == 0 {
            RowSection::Empty
        } else if reader.read_bit()? {
            let pointer_width = reader.decode_var_u32(POINTER_SIZE_ENCBASE)?;
            if pointer_width > MAX_BITS_PER_READ {
                return Err(DecodeError::MalformedHeader("live row pointers too wide"));
            }
            let pointers_pos = reader.position();
            reader.skip(num_safe_points as usize * pointer_width as usize)?;
            let pool_size = reader.decode_var_unsigned(LIVE_POOL_SIZE_ENCBASE)?;
            let pool_size = usize::try_from(pool_size).map_err(|_| DecodeError::VarIntOverflow)?;
            reader.align_to_byte();
            let pool_start = reader.position() >> LOG_BITS_IN_BYTE;
            reader.skip(pool_size)?;
            RowSection::Shared {
                pointers_pos,
                pointer_width,
                pool_start,
                pool_size,
            }
        } else {
            let matrix_pos = reader.position();
            let matrix_bits = (num_safe_points as usize)
                .checked_mul(num_tracked as usize)
                .ok_or(DecodeError::VarIntOverflow)?;
            reader.skip(matrix_bits)?;
            RowSection::Raw { matrix_pos }
        };
        Ok(SafePointLiveState {
            data: reader.data(),
            num_safe_points,
            num_tracked,
            section,
            cache: cache_rows.then(|| RefCell::new(HashMap::new())),
        })
    }

    /// Whether rows are shared through the pool.
    pub fn is_shared(&self) -> bool {
        matches!(self.section, RowSection::Shared { .. })
    }

    /// The pool location of a safe point's row, for the shared layout.
    pub fn row_pointer(&self, safe_point: u32) -> Result<Option<RowPointer>> {
        if safe_point >= self.num_safe_points {
            return Err(DecodeError::InvalidSlotIndex(safe_point));
        }
        match self.section {
            RowSection::Shared {
                pointers_pos,
                pointer_width,
                pool_start,
                pool_size,
            } => {
                let pos = pointers_pos + safe_point as usize * pointer_width as usize;
                let row_offset = BitStreamReader::at(self.data, pos).read_bits(pointer_width)?;
                if row_offset >= pool_size {
                    return Err(DecodeError::MalformedHeader(
                        "live row pointer outside the pool",
                    ));
                }
                Ok(Some(RowPointer {
                    table_start: pool_start,
                    row_offset,
                }))
            }
            _ => Ok(None),
        }
    }

    /// Set in `out` the tracked slots live at safe point `safe_point`. `out` must be clear and
    /// have one bit per tracked slot.
    pub fn read_row(&self, safe_point: u32, out: &mut LiveBitmap) -> Result<()> {
        debug_assert_eq!(out.len(), self.num_tracked as usize);
        if safe_point >= self.num_safe_points {
            return Err(DecodeError::InvalidSlotIndex(safe_point));
        }
        match self.section {
            RowSection::Empty => Ok(()),
            RowSection::Raw { matrix_pos } => {
                let pos = matrix_pos + safe_point as usize * self.num_tracked as usize;
                read_raw_bits(&mut BitStreamReader::at(self.data, pos), out)
            }
            RowSection::Shared {
                pool_start,
                pool_size,
                ..
            } => {
                // Cannot be None for the shared layout.
                let Some(pointer) = self.row_pointer(safe_point)? else {
                    return Ok(());
                };
                if let Some(cache) = &self.cache {
                    if let Some(row) = cache.borrow().get(&pointer.row_offset) {
                        out.clone_from(row);
                        return Ok(());
                    }
                }
                let pool_end = (pool_start << LOG_BITS_IN_BYTE) + pool_size;
                let pool = self
                    .data
                    .get(..pool_end.div_ceil(BITS_IN_BYTE))
                    .ok_or(DecodeError::Truncated)?;
                let crossed = DecodeError::MalformedHeader("live row crosses the end of the pool");
                let mut reader = BitStreamReader::at(pool, pointer.bit_position());
                match decode_bit_vector(&mut reader, out) {
                    Err(DecodeError::Truncated) => return Err(crossed),
                    result => result?,
                }
                if reader.position() > pool_end {
                    return Err(crossed);
                }
                if let Some(cache) = &self.cache {
                    cache.borrow_mut().insert(pointer.row_offset, out.clone());
                }
                Ok(())
            }
        }
    }

    /// Number of distinct rows decoded and memoized so far.
    pub fn cached_rows(&self) -> usize {
        self.cache.as_ref().map_or(0, |cache| cache.borrow().len())
    }
}

/// Write the safe-point live-state section. `rows` has one row per safe point, each with one
/// entry per tracked slot. Nothing is written without safe points or tracked slots.
pub fn encode_safe_point_live_state(
    rows: &[Vec<bool>],
    num_tracked: usize,
    layout: LiveRowLayout,
    writer: &mut BitStreamWriter,
) {
    if rows.is_empty() || num_tracked == 0 {
        return;
    }
    debug_assert!(rows.iter().all(|row| row.len() == num_tracked));

    let mut pool = BitStreamWriter::new();
    let mut offsets: HashMap<&[bool], usize> = HashMap::new();
    let mut pointers = Vec::with_capacity(rows.len());
    for row in rows {
        let offset = *offsets.entry(row.as_slice()).or_insert_with(|| {
            let offset = pool.position();
            encode_bit_vector(row, &mut pool);
            offset
        });
        pointers.push(offset);
    }
    let pointer_width = pointers
        .iter()
        .map(|&p| bits_needed(p as u64))
        .max()
        .unwrap_or(0);

    let shared = match layout {
        LiveRowLayout::Raw => false,
        LiveRowLayout::Shared => true,
        LiveRowLayout::Auto => {
            let raw_size = rows.len() * num_tracked;
            // assume the worst case padding before the pool
            let shared_size =
                BitStreamWriter::var_unsigned_size(pointer_width as u64, POINTER_SIZE_ENCBASE)
                    + rows.len() * pointer_width as usize
                    + BitStreamWriter::var_unsigned_size(
                        pool.position() as u64,
                        LIVE_POOL_SIZE_ENCBASE,
                    )
                    + (BITS_IN_BYTE - 1)
                    + pool.position();
            shared_size < raw_size
        }
    };

    writer.write_bit(shared);
    if shared {
        writer.encode_var_unsigned(pointer_width as u64, POINTER_SIZE_ENCBASE);
        for pointer in pointers {
            writer.write_bits(pointer, pointer_width);
        }
        writer.encode_var_unsigned(pool.position() as u64, LIVE_POOL_SIZE_ENCBASE);
        writer.align_to_byte();
        writer.append(&pool);
    } else {
        for row in rows {
            for &bit in row {
                writer.write_bit(bit);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits(s: &str) -> Vec<bool> {
        s.chars().map(|c| c == '1').collect()
    }

    fn decode(bytes: &[u8], len: usize) -> Vec<bool> {
        let mut out = LiveBitmap::try_with_len(len).unwrap();
        decode_bit_vector(&mut BitStreamReader::new(bytes), &mut out).unwrap();
        (0..len).map(|i| out.get(i)).collect()
    }

    #[test]
    fn sparse_vectors_use_rle() {
        let mut input = vec![false; 200];
        input[3] = true;
        input[150] = true;
        input[151] = true;
        let mut writer = BitStreamWriter::new();
        encode_bit_vector(&input, &mut writer);
        assert!(writer.position() < 40);
        let bytes = writer.into_bytes();
        assert!(BitStreamReader::new(&bytes).read_bit().unwrap());
        assert_eq!(decode(&bytes, 200), input);
    }

    #[test]
    fn dense_vectors_stay_raw() {
        let input = bits("1010110101101");
        let mut writer = BitStreamWriter::new();
        encode_bit_vector(&input, &mut writer);
        assert_eq!(writer.position(), 1 + input.len());
        assert_eq!(decode(&writer.into_bytes(), input.len()), input);
    }

    #[test]
    fn rle_edges() {
        for s in ["", "0", "1", "1111", "0000000000000001", "1000000000000000", "0110"] {
            let input = bits(s);
            let mut writer = BitStreamWriter::new();
            writer.write_bit(true);
            encode_rle(&input, &mut writer);
            assert_eq!(decode(&writer.into_bytes(), input.len()), input, "{:?}", s);
        }
    }

    #[test]
    fn rle_run_past_the_end() {
        let mut writer = BitStreamWriter::new();
        writer.write_bit(true);
        writer.encode_var_unsigned(2, LIVESTATE_RLE_SKIP_ENCBASE);
        writer.encode_var_unsigned(9, LIVESTATE_RLE_RUN_ENCBASE);
        let bytes = writer.into_bytes();
        let mut out = LiveBitmap::try_with_len(8).unwrap();
        assert!(matches!(
            decode_bit_vector(&mut BitStreamReader::new(&bytes), &mut out),
            Err(DecodeError::InvalidSlotIndex(_))
        ));
    }

    fn rows() -> Vec<Vec<bool>> {
        vec![
            bits("1000000000"),
            bits("0100000000"),
            bits("1000000000"),
            bits("1000000000"),
            bits("0000000011"),
        ]
    }

    fn read_rows(layout: LiveRowLayout, cache: bool) -> (Vec<Vec<bool>>, bool, usize) {
        let rows = rows();
        let mut writer = BitStreamWriter::new();
        writer.write_bits(0b101, 3);
        encode_safe_point_live_state(&rows, 10, layout, &mut writer);
        let bytes = writer.into_bytes();
        let mut reader = BitStreamReader::at(&bytes, 3);
        let state = SafePointLiveState::decode(&mut reader, rows.len() as u32, 10, cache).unwrap();
        let mut decoded = vec![];
        for i in 0..rows.len() as u32 {
            let mut out = LiveBitmap::try_with_len(10).unwrap();
            state.read_row(i, &mut out).unwrap();
            decoded.push((0..10).map(|j| out.get(j)).collect());
        }
        (decoded, state.is_shared(), state.cached_rows())
    }

    #[test]
    fn raw_rows() {
        let (decoded, shared, _) = read_rows(LiveRowLayout::Raw, true);
        assert!(!shared);
        assert_eq!(decoded, rows());
    }

    #[test]
    fn shared_rows_are_deduplicated_and_cached() {
        let (decoded, shared, cached) = read_rows(LiveRowLayout::Shared, true);
        assert!(shared);
        assert_eq!(decoded, rows());
        assert_eq!(cached, 3);
        let (decoded, _, cached) = read_rows(LiveRowLayout::Shared, false);
        assert_eq!(decoded, rows());
        assert_eq!(cached, 0);
    }

    #[test]
    fn row_pointers_are_explicit() {
        let rows = rows();
        let mut writer = BitStreamWriter::new();
        encode_safe_point_live_state(&rows, 10, LiveRowLayout::Shared, &mut writer);
        let bytes = writer.into_bytes();
        let state =
            SafePointLiveState::decode(&mut BitStreamReader::new(&bytes), 5, 10, true).unwrap();
        let first = state.row_pointer(0).unwrap().unwrap();
        assert_eq!(first.row_offset, 0);
        assert_eq!(state.row_pointer(2).unwrap(), Some(first));
        assert_eq!(state.row_pointer(3).unwrap(), Some(first));
        assert_ne!(state.row_pointer(1).unwrap(), Some(first));
        assert_eq!(state.row_pointer(5), Err(DecodeError::InvalidSlotIndex(5)));
    }

    #[test]
    fn rows_stay_inside_the_pool() {
        let mut writer = BitStreamWriter::new();
        writer.write_bit(true);
        writer.encode_var_unsigned(2, POINTER_SIZE_ENCBASE);
        writer.write_bits(0, 2);
        writer.write_bits(3, 2);
        // A three-bit pool cannot hold a row of ten slots.
        writer.encode_var_unsigned(3, LIVE_POOL_SIZE_ENCBASE);
        writer.align_to_byte();
        writer.write_bits(0, 3);
        // whatever section follows the pool
        writer.write_bits(0xffff, 16);
        let bytes = writer.into_bytes();
        let state =
            SafePointLiveState::decode(&mut BitStreamReader::new(&bytes), 2, 10, false).unwrap();

        let mut out = LiveBitmap::try_with_len(10).unwrap();
        assert_eq!(
            state.read_row(0, &mut out),
            Err(DecodeError::MalformedHeader("live row crosses the end of the pool"))
        );
        assert_eq!(
            state.row_pointer(1),
            Err(DecodeError::MalformedHeader("live row pointer outside the pool"))
        );
    }
}
