//! Tracked-slot liveness at a code offset.
//!
//! Two encodings coexist. At a safe point the live set is a row of the safe-point section
//! ([`SafePointLiveState`]). Inside an interruptible range it is rebuilt from transition data:
//! the pseudo-offset timeline (all ranges concatenated) is cut into chunks of
//! [`NUM_NORM_CODE_OFFSETS_PER_CHUNK`] offsets, and each chunk records which slots could be live
//! in it, each such slot's state at the end of the chunk, and the in-chunk offsets where its
//! state flips. A slot is live at offset `o` iff its final state, flipped once per transition
//! after `o`, is set.

use crate::gcinfo::constants::*;
use crate::gcinfo::error::{DecodeError, Result};
use crate::gcinfo::live_state::{decode_bit_vector, encode_bit_vector, SafePointLiveState};
use crate::gcinfo::safe_points::SafePointIndex;
use crate::gcinfo::EnumerationFlags;
use crate::util::bit_stream::{bits_needed, BitStreamReader, BitStreamWriter};
use crate::util::bitmap::LiveBitmap;
use crate::util::constants::MAX_BITS_PER_READ;
use crate::util::log;
use crate::vm::Architecture;

#[derive(Copy, Clone, Debug)]
struct ChunkTable {
    pointer_width: u32,
    pointers_pos: usize,
    data_pos: usize,
}

/// The chunked transition data of a fully interruptible method.
#[derive(Clone, Debug)]
pub struct TransitionTable<'a> {
    data: &'a [u8],
    num_tracked: u32,
    num_pseudo_offsets: u32,
    chunks: Option<ChunkTable>,
}

fn num_chunks(num_pseudo_offsets: u32) -> u32 {
    num_pseudo_offsets.div_ceil(NUM_NORM_CODE_OFFSETS_PER_CHUNK)
}

impl<'a> TransitionTable<'a> {
    /// Read the chunk pointer table at the reader's position. The chunk data is not scanned:
    /// it is the last section of a blob, so nothing needs to be read past it.
    pub fn decode(
        reader: &mut BitStreamReader<'a>,
        num_pseudo_offsets: u32,
        num_tracked: u32,
    ) -> Result<Self> {
        let chunks = if num_pseudo_offsets == 0 || num_tracked == 0 {
            None
        } else {
            let pointer_width = reader.decode_var_u32(POINTER_SIZE_ENCBASE)?;
            if pointer_width > MAX_BITS_PER_READ {
                return Err(DecodeError::MalformedHeader("chunk pointers too wide"));
            }
            let pointers_pos = reader.position();
            reader.skip(num_chunks(num_pseudo_offsets) as usize * pointer_width as usize)?;
            Some(ChunkTable {
                pointer_width,
                pointers_pos,
                data_pos: reader.position(),
            })
        };
        Ok(TransitionTable {
            data: reader.data(),
            num_tracked,
            num_pseudo_offsets,
            chunks,
        })
    }

    /// Set in `out` the tracked slots live at `pseudo_offset`. `out` must be clear.
    pub fn live_at(&self, pseudo_offset: u32, out: &mut LiveBitmap) -> Result<()> {
        if pseudo_offset >= self.num_pseudo_offsets {
            return Err(DecodeError::MalformedHeader(
                "pseudo-offset past the interruptible ranges",
            ));
        }
        let Some(table) = self.chunks else {
            return Ok(());
        };
        let chunk = pseudo_offset >> LOG_NUM_NORM_CODE_OFFSETS_PER_CHUNK;
        let in_chunk = pseudo_offset & (NUM_NORM_CODE_OFFSETS_PER_CHUNK - 1);

        let pointer_pos = table.pointers_pos + chunk as usize * table.pointer_width as usize;
        let pointer = BitStreamReader::at(self.data, pointer_pos).read_bits(table.pointer_width)?;
        if pointer == 0 {
            // no slot is live anywhere in this chunk
            return Ok(());
        }
        let mut reader = BitStreamReader::at(self.data, table.data_pos + pointer - 1);

        let mut candidates = LiveBitmap::try_with_len(self.num_tracked as usize)?;
        decode_bit_vector(&mut reader, &mut candidates)?;
        for slot in candidates.iter_ones() {
            out.set(slot, reader.read_bit()?);
        }
        for slot in candidates.iter_ones() {
            let mut flips_after = 0u32;
            let mut transition: Option<u32> = None;
            loop {
                let delta = reader.decode_var_u32(NORM_CODE_OFFSET_DELTA_ENCBASE)?;
                if delta == 0 {
                    break;
                }
                let next = match transition {
                    None => delta - 1,
                    Some(prev) => prev.checked_add(delta).ok_or(DecodeError::VarIntOverflow)?,
                };
                if next > in_chunk {
                    flips_after += 1;
                }
                transition = Some(next);
            }
            if flips_after % 2 == 1 {
                out.toggle(slot);
            }
        }
        Ok(())
    }
}

/// Write the transition data for a timeline of `states.len()` pseudo-offsets. `states[p]` is
/// the set of tracked slots live at pseudo-offset `p`, one entry per tracked slot.
pub(crate) fn encode_transitions(
    states: &[Vec<bool>],
    num_tracked: usize,
    writer: &mut BitStreamWriter,
) {
    if states.is_empty() || num_tracked == 0 {
        return;
    }
    let chunk_len = NUM_NORM_CODE_OFFSETS_PER_CHUNK as usize;
    let mut data = BitStreamWriter::new();
    let mut pointers = vec![];
    for chunk in states.chunks(chunk_len) {
        let candidates: Vec<bool> = (0..num_tracked)
            .map(|slot| chunk.iter().any(|state| state[slot]))
            .collect();
        if !candidates.iter().any(|&c| c) {
            pointers.push(0);
            continue;
        }
        pointers.push(data.position() + 1);
        encode_bit_vector(&candidates, &mut data);
        let last = &chunk[chunk.len() - 1];
        for slot in (0..num_tracked).filter(|&slot| candidates[slot]) {
            data.write_bit(last[slot]);
        }
        for slot in (0..num_tracked).filter(|&slot| candidates[slot]) {
            let mut prev: Option<usize> = None;
            for t in 1..chunk.len() {
                if chunk[t][slot] != chunk[t - 1][slot] {
                    let delta = match prev {
                        None => t + 1,
                        Some(p) => t - p,
                    };
                    data.encode_var_unsigned(delta as u64, NORM_CODE_OFFSET_DELTA_ENCBASE);
                    prev = Some(t);
                }
            }
            data.encode_var_unsigned(0, NORM_CODE_OFFSET_DELTA_ENCBASE);
        }
    }

    let pointer_width = pointers
        .iter()
        .map(|&p| bits_needed(p as u64))
        .max()
        .unwrap_or(0);
    writer.encode_var_unsigned(pointer_width as u64, POINTER_SIZE_ENCBASE);
    for pointer in pointers {
        writer.write_bits(pointer, pointer_width);
    }
    writer.append(&data);
}

/// Computes which tracked slots are live at a code offset, choosing between the safe-point
/// rows and the interruptible transition data.
#[derive(Debug)]
pub struct LivenessEnumerator<'a> {
    safe_point_rows: SafePointLiveState<'a>,
    transitions: TransitionTable<'a>,
    num_tracked: u32,
}

impl<'a> LivenessEnumerator<'a> {
    /// Read both liveness sections, which follow the slot table.
    pub fn decode<A: Architecture>(
        reader: &mut BitStreamReader<'a>,
        index: &SafePointIndex<'a, A>,
        num_tracked: u32,
        cache_rows: bool,
    ) -> Result<Self> {
        let safe_point_rows =
            SafePointLiveState::decode(reader, index.num_safe_points(), num_tracked, cache_rows)?;
        let transitions = TransitionTable::decode(reader, index.num_pseudo_offsets(), num_tracked)?;
        Ok(LivenessEnumerator {
            safe_point_rows,
            transitions,
            num_tracked,
        })
    }

    pub fn safe_point_rows(&self) -> &SafePointLiveState<'a> {
        &self.safe_point_rows
    }

    /// The tracked slots live at `offset`.
    ///
    /// A safe point at `offset` wins over an interruptible range, except for an aborted
    /// (faulted) frame outside a filter: the fault did not happen at the call, so the call's
    /// live set does not apply. Outside both, no tracked slot is live; the untracked slots are
    /// still reported by the caller.
    pub fn tracked_live_set<A: Architecture>(
        &self,
        offset: u32,
        flags: &EnumerationFlags,
        index: &SafePointIndex<'a, A>,
    ) -> Result<LiveBitmap> {
        let mut live = LiveBitmap::try_with_len(self.num_tracked as usize)?;
        let use_safe_points = !flags.execution_aborted || flags.filter_funclet;
        if use_safe_points && index.num_safe_points() > 0 {
            if let Some(safe_point) = index.find_safe_point(offset)? {
                log::trace!("offset {:#x} is safe point {}", offset, safe_point);
                self.safe_point_rows.read_row(safe_point, &mut live)?;
                return Ok(live);
            }
        }
        if let Some(pseudo_offset) = index.pseudo_offset(offset) {
            log::trace!("offset {:#x} is pseudo-offset {}", offset, pseudo_offset);
            self.transitions.live_at(pseudo_offset, &mut live)?;
            return Ok(live);
        }
        if flags.execution_aborted {
            log::debug!(
                "aborted frame at non-interruptible offset {:#x}, no tracked roots",
                offset
            );
        } else {
            log::debug!(
                "offset {:#x} is neither a safe point nor interruptible, no tracked roots",
                offset
            );
        }
        Ok(live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeline(len: usize, slots: &[&[(usize, usize)]]) -> Vec<Vec<bool>> {
        (0..len)
            .map(|p| {
                slots
                    .iter()
                    .map(|lifetimes| lifetimes.iter().any(|&(s, e)| s <= p && p < e))
                    .collect()
            })
            .collect()
    }

    fn check(states: &[Vec<bool>], num_tracked: usize) {
        let mut writer = BitStreamWriter::new();
        writer.write_bits(0b11, 2);
        encode_transitions(states, num_tracked, &mut writer);
        let bytes = writer.into_bytes();
        let table =
            TransitionTable::decode(&mut BitStreamReader::at(&bytes, 2), states.len() as u32, num_tracked as u32)
                .unwrap();
        for (p, expected) in states.iter().enumerate() {
            let mut out = LiveBitmap::try_with_len(num_tracked).unwrap();
            table.live_at(p as u32, &mut out).unwrap();
            let actual: Vec<bool> = (0..num_tracked).map(|i| out.get(i)).collect();
            assert_eq!(&actual, expected, "pseudo-offset {}", p);
        }
    }

    #[test]
    fn single_chunk() {
        let states = timeline(30, &[&[(0, 10), (20, 30)], &[(5, 30)], &[]]);
        check(&states, 3);
    }

    #[test]
    fn lifetimes_across_chunks() {
        let states = timeline(
            300,
            &[
                &[(0, 1)],
                &[(63, 65)],
                &[(10, 290)],
                &[(64, 128), (200, 201), (202, 203)],
                &[(299, 300)],
            ],
        );
        check(&states, 5);
    }

    #[test]
    fn empty_chunks_have_null_pointers() {
        let states = timeline(200, &[&[(150, 160)]]);
        let mut writer = BitStreamWriter::new();
        encode_transitions(&states, 1, &mut writer);
        let bytes = writer.into_bytes();
        let table = TransitionTable::decode(&mut BitStreamReader::new(&bytes), 200, 1).unwrap();
        let chunks = table.chunks.unwrap();
        let pointer = |i: usize| {
            BitStreamReader::at(&bytes, chunks.pointers_pos + i * chunks.pointer_width as usize)
                .read_bits(chunks.pointer_width)
                .unwrap()
        };
        assert_eq!(pointer(0), 0);
        assert_eq!(pointer(1), 0);
        assert_eq!(pointer(2), 1);
        check(&states, 1);
    }

    #[test]
    fn pseudo_offset_past_the_timeline() {
        let states = timeline(10, &[&[(0, 10)]]);
        let mut writer = BitStreamWriter::new();
        encode_transitions(&states, 1, &mut writer);
        let bytes = writer.into_bytes();
        let table = TransitionTable::decode(&mut BitStreamReader::new(&bytes), 10, 1).unwrap();
        let mut out = LiveBitmap::try_with_len(1).unwrap();
        assert!(table.live_at(10, &mut out).is_err());
    }
}
