//! Safe points and interruptible ranges: where a method may be stopped for GC.
//!
//! Partially interruptible methods list their safe points as absolute normalized code offsets
//! in a fixed-width table, so a query is a binary search. Fully interruptible methods list
//! `[start, stop)` ranges, stored as gaps and lengths relative to the previous range. The ranges
//! are few and must be decoded in sequence anyway, so they are read once when the index is
//! built. Concatenating the ranges end to end gives the *pseudo-offset* timeline on which the
//! transition data of the fully interruptible encoding is laid out.

use std::marker::PhantomData;
use std::ops::ControlFlow;

use crate::gcinfo::constants::*;
use crate::gcinfo::error::{DecodeError, Result};
use crate::gcinfo::header::MethodHeader;
use crate::util::bit_stream::{bits_needed, BitStreamReader, BitStreamWriter};
use crate::vm::Architecture;

/// A `[start, stop)` range of code offsets, in bytes, at which the method is interruptible.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InterruptibleRange {
    pub start: u32,
    pub stop: u32,
}

impl InterruptibleRange {
    pub fn contains(&self, offset: u32) -> bool {
        self.start <= offset && offset < self.stop
    }
}

/// Normalized range.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct NormRange {
    start: u32,
    stop: u32,
}

impl NormRange {
    fn len(&self) -> u32 {
        self.stop - self.start
    }
}

#[derive(Clone, Debug)]
pub struct SafePointIndex<'a, A: Architecture> {
    data: &'a [u8],
    table_pos: usize,
    num_safe_points: u32,
    offset_width: u32,
    ranges: Vec<NormRange>,
    num_pseudo_offsets: u32,
    _arch: PhantomData<A>,
}

impl<'a, A: Architecture> SafePointIndex<'a, A> {
    /// Read the safe point table and the interruptible ranges that follow the header.
    pub fn decode(reader: &mut BitStreamReader<'a>, header: &MethodHeader) -> Result<Self> {
        let offset_width = safe_point_offset_width::<A>(header.code_length);
        let table_pos = reader.position();
        let table_bits = (header.num_safe_points as usize)
            .checked_mul(offset_width as usize)
            .ok_or(DecodeError::VarIntOverflow)?;
        reader.skip(table_bits)?;

        let norm_code_length = A::normalize_code_offset(header.code_length);
        let mut ranges = Vec::new();
        let mut last_stop = 0u32;
        let mut num_pseudo_offsets = 0u32;
        for _ in 0..header.num_interruptible_ranges {
            let gap = reader.decode_var_u32(INTERRUPTIBLE_RANGE_DELTA1_ENCBASE)?;
            let len = reader.decode_var_u32(INTERRUPTIBLE_RANGE_DELTA2_ENCBASE)?;
            let start = last_stop
                .checked_add(gap)
                .ok_or(DecodeError::VarIntOverflow)?;
            let stop = start
                .checked_add(len)
                .and_then(|s| s.checked_add(1))
                .ok_or(DecodeError::VarIntOverflow)?;
            if stop > norm_code_length {
                return Err(DecodeError::MalformedHeader(
                    "interruptible range past the end of the method",
                ));
            }
            num_pseudo_offsets += stop - start;
            ranges.push(NormRange { start, stop });
            last_stop = stop;
        }

        Ok(SafePointIndex {
            data: reader.data(),
            table_pos,
            num_safe_points: header.num_safe_points,
            offset_width,
            ranges,
            num_pseudo_offsets,
            _arch: PhantomData,
        })
    }

    pub fn num_safe_points(&self) -> u32 {
        self.num_safe_points
    }

    /// The code offset of safe point `index`.
    pub fn safe_point_offset(&self, index: u32) -> Result<u32> {
        if index >= self.num_safe_points {
            return Err(DecodeError::InvalidSlotIndex(index));
        }
        Ok(A::denormalize_code_offset(self.norm_safe_point(index)?))
    }

    fn norm_safe_point(&self, index: u32) -> Result<u32> {
        let pos = self.table_pos + index as usize * self.offset_width as usize;
        Ok(BitStreamReader::at(self.data, pos).read_bits(self.offset_width)? as u32)
    }

    /// The index of the safe point at exactly `offset`, if there is one.
    pub fn find_safe_point(&self, offset: u32) -> Result<Option<u32>> {
        if offset % A::code_alignment() != 0 {
            return Ok(None);
        }
        let target = A::normalize_code_offset(offset);
        let (mut lo, mut hi) = (0, self.num_safe_points);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let norm = self.norm_safe_point(mid)?;
            if norm == target {
                return Ok(Some(mid));
            } else if norm < target {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(None)
    }

    pub fn is_safe_point(&self, offset: u32) -> Result<bool> {
        Ok(self.find_safe_point(offset)?.is_some())
    }

    pub fn num_interruptible_ranges(&self) -> u32 {
        self.ranges.len() as u32
    }

    pub fn is_interruptible(&self, offset: u32) -> bool {
        self.interruptible_ranges().any(|range| range.contains(offset))
    }

    /// Visit every interruptible range in ascending order until the visitor breaks.
    pub fn enumerate_interruptible_ranges<F>(&self, mut visitor: F) -> ControlFlow<()>
    where
        F: FnMut(InterruptibleRange) -> ControlFlow<()>,
    {
        for range in self.interruptible_ranges() {
            visitor(range)?;
        }
        ControlFlow::Continue(())
    }

    pub fn interruptible_ranges(&self) -> impl Iterator<Item = InterruptibleRange> + '_ {
        self.ranges.iter().map(|range| InterruptibleRange {
            start: A::denormalize_code_offset(range.start),
            stop: A::denormalize_code_offset(range.stop),
        })
    }

    /// The total length of all ranges, in normalized code units.
    pub fn num_pseudo_offsets(&self) -> u32 {
        self.num_pseudo_offsets
    }

    /// The position of `offset` on the timeline formed by concatenating all interruptible
    /// ranges, or `None` if no range contains it.
    pub fn pseudo_offset(&self, offset: u32) -> Option<u32> {
        let norm = A::normalize_code_offset(offset);
        let mut preceding = 0;
        for range in &self.ranges {
            if A::denormalize_code_offset(range.start) <= offset
                && offset < A::denormalize_code_offset(range.stop)
            {
                return Some(preceding + norm - range.start);
            }
            if offset < A::denormalize_code_offset(range.start) {
                break;
            }
            preceding += range.len();
        }
        None
    }
}

pub(crate) fn safe_point_offset_width<A: Architecture>(code_length: u32) -> u32 {
    bits_needed(A::normalize_code_offset(code_length) as u64)
}

/// Write the safe point table and the interruptible ranges. `safe_points` must be strictly
/// increasing and `ranges` sorted, disjoint and non-empty.
pub(crate) fn encode_safe_points<A: Architecture>(
    code_length: u32,
    safe_points: &[u32],
    ranges: &[InterruptibleRange],
    writer: &mut BitStreamWriter,
) {
    let width = safe_point_offset_width::<A>(code_length);
    for pair in safe_points.windows(2) {
        assert!(pair[0] < pair[1], "safe points must be strictly increasing");
    }
    for &offset in safe_points {
        assert!(offset < code_length, "safe point {:#x} past the end of the method", offset);
        writer.write_bits(A::normalize_code_offset(offset) as usize, width);
    }

    let mut last_stop = 0;
    for range in ranges {
        let start = A::normalize_code_offset(range.start);
        let stop = A::normalize_code_offset(range.stop);
        assert!(
            last_stop <= start && start < stop,
            "interruptible ranges must be sorted, disjoint and non-empty"
        );
        writer.encode_var_unsigned((start - last_stop) as u64, INTERRUPTIBLE_RANGE_DELTA1_ENCBASE);
        writer.encode_var_unsigned((stop - start - 1) as u64, INTERRUPTIBLE_RANGE_DELTA2_ENCBASE);
        last_stop = stop;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::{Arm64, X64};

    fn build<A: Architecture>(
        code_length: u32,
        safe_points: &[u32],
        ranges: &[InterruptibleRange],
    ) -> (Vec<u8>, MethodHeader) {
        let header = MethodHeader {
            code_length,
            num_safe_points: safe_points.len() as u32,
            num_interruptible_ranges: ranges.len() as u32,
            ..Default::default()
        };
        let mut writer = BitStreamWriter::new();
        encode_safe_points::<A>(code_length, safe_points, ranges, &mut writer);
        (writer.into_bytes(), header)
    }

    fn range(start: u32, stop: u32) -> InterruptibleRange {
        InterruptibleRange { start, stop }
    }

    #[test]
    fn binary_search_finds_exact_offsets() {
        let offsets = [3, 12, 40, 41, 90, 200];
        let (bytes, header) = build::<X64>(256, &offsets, &[]);
        let index = SafePointIndex::<X64>::decode(&mut BitStreamReader::new(&bytes), &header)
            .unwrap();
        for (i, &offset) in offsets.iter().enumerate() {
            assert_eq!(index.find_safe_point(offset).unwrap(), Some(i as u32));
            assert_eq!(index.safe_point_offset(i as u32).unwrap(), offset);
        }
        for offset in [0, 4, 13, 39, 42, 201, 255] {
            assert!(!index.is_safe_point(offset).unwrap());
        }
        assert!(!index.is_interruptible(12));
    }

    #[test]
    fn unaligned_offset_is_never_a_safe_point() {
        let (bytes, header) = build::<Arm64>(64, &[8, 16], &[]);
        let index =
            SafePointIndex::<Arm64>::decode(&mut BitStreamReader::new(&bytes), &header).unwrap();
        assert_eq!(index.find_safe_point(16).unwrap(), Some(1));
        assert_eq!(index.find_safe_point(17).unwrap(), None);
    }

    #[test]
    fn ranges_and_pseudo_offsets() {
        let ranges = [range(4, 10), range(10, 12), range(30, 40)];
        let (bytes, header) = build::<X64>(64, &[], &ranges);
        let index = SafePointIndex::<X64>::decode(&mut BitStreamReader::new(&bytes), &header)
            .unwrap();
        assert_eq!(index.interruptible_ranges().collect::<Vec<_>>(), ranges);
        assert_eq!(index.num_pseudo_offsets(), 18);
        assert_eq!(index.pseudo_offset(3), None);
        assert_eq!(index.pseudo_offset(4), Some(0));
        assert_eq!(index.pseudo_offset(11), Some(7));
        assert_eq!(index.pseudo_offset(12), None);
        assert_eq!(index.pseudo_offset(30), Some(8));
        assert_eq!(index.pseudo_offset(39), Some(17));
        assert_eq!(index.pseudo_offset(40), None);
        assert!(index.is_interruptible(35));
        assert!(!index.is_interruptible(20));
    }

    #[test]
    fn enumeration_stops_early() {
        let ranges = [range(0, 2), range(4, 6), range(8, 10)];
        let (bytes, header) = build::<X64>(16, &[], &ranges);
        let index = SafePointIndex::<X64>::decode(&mut BitStreamReader::new(&bytes), &header)
            .unwrap();
        let mut seen = vec![];
        let flow = index.enumerate_interruptible_ranges(|r| {
            seen.push(r);
            if r.start == 4 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert_eq!(flow, ControlFlow::Break(()));
        assert_eq!(seen, vec![range(0, 2), range(4, 6)]);
    }

    #[test]
    fn range_past_the_end_is_malformed() {
        let mut writer = BitStreamWriter::new();
        writer.encode_var_unsigned(0, INTERRUPTIBLE_RANGE_DELTA1_ENCBASE);
        writer.encode_var_unsigned(20, INTERRUPTIBLE_RANGE_DELTA2_ENCBASE);
        let bytes = writer.into_bytes();
        let header = MethodHeader {
            code_length: 16,
            num_interruptible_ranges: 1,
            ..Default::default()
        };
        assert!(matches!(
            SafePointIndex::<X64>::decode(&mut BitStreamReader::new(&bytes), &header),
            Err(DecodeError::MalformedHeader(_))
        ));
    }

    #[test]
    fn truncated_safe_point_table() {
        let header = MethodHeader {
            code_length: 0xffff,
            num_safe_points: 10,
            ..Default::default()
        };
        let bytes = [0u8; 4];
        assert_eq!(
            SafePointIndex::<X64>::decode(&mut BitStreamReader::new(&bytes), &header).err(),
            Some(DecodeError::Truncated)
        );
    }
}
