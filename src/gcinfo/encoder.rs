//! The producer side of the format.
//!
//! A compiler describes a method to a [`GcInfoEncoder`]: header facts, the slots that may hold
//! references, the code offsets where each tracked slot becomes live or dead, and where the
//! method may be stopped (call sites and/or interruptible ranges). [`GcInfoEncoder::build`]
//! sorts the slots into their final order and derives both liveness encodings from the same
//! lifetimes, so safe-point queries and interruptible queries always agree.
//!
//! Misuse (a misaligned offset, a range past the end of the method, an unknown slot) is a bug
//! in the compiler and panics.

use std::collections::HashMap;
use std::marker::PhantomData;

use crate::gcinfo::header::{
    GenericsContextKind, HeaderDecoder, MethodHeader, ReturnKind, StackSlotRef, ValidRange,
};
use crate::gcinfo::live_state::{encode_safe_point_live_state, LiveRowLayout};
use crate::gcinfo::liveness::encode_transitions;
use crate::gcinfo::safe_points::{encode_safe_points, InterruptibleRange};
use crate::gcinfo::slot_table::{encode_slot_table, SlotDescriptor, SlotKind};
use crate::gcinfo::{GcInfoBlob, SlotFlags};
use crate::util::bit_stream::BitStreamWriter;
use crate::util::log;
use crate::vm::{Architecture, RegisterId, StackBase};

/// A tracked slot, as handed out by the encoder. Ids are in definition order; the final slot
/// index in the blob is only fixed by [`GcInfoEncoder::build`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(u32);

impl SlotId {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// Sorting key that puts registers first, then stack slots grouped by base, each group in
/// ascending order, so that the slot table is mostly deltas.
fn slot_order<A: Architecture>(slot: &SlotDescriptor) -> (u8, u8, i64, usize) {
    match slot.kind {
        SlotKind::Register(reg) => (0, 0, reg.as_u32() as i64, slot.flags.to_bits()),
        SlotKind::Stack { offset, base } => {
            (1, base.to_bits(), offset as i64, slot.flags.to_bits())
        }
    }
}

pub struct GcInfoEncoder<A: Architecture> {
    header: MethodHeader,
    prolog_size: u32,
    gs_cookie_valid_range: Option<ValidRange>,
    tracked: Vec<SlotDescriptor>,
    slot_ids: HashMap<SlotDescriptor, SlotId>,
    untracked: Vec<SlotDescriptor>,
    // (code offset, slot, becomes live), in call order
    transitions: Vec<(u32, SlotId, bool)>,
    safe_points: Vec<u32>,
    ranges: Vec<InterruptibleRange>,
    live_row_layout: LiveRowLayout,
    _arch: PhantomData<A>,
}

impl<A: Architecture> GcInfoEncoder<A> {
    pub fn new(code_length: u32) -> Self {
        assert!(
            code_length % A::code_alignment() == 0,
            "code length {:#x} is not aligned",
            code_length
        );
        GcInfoEncoder {
            header: MethodHeader {
                code_length,
                ..Default::default()
            },
            prolog_size: 0,
            gs_cookie_valid_range: None,
            tracked: vec![],
            slot_ids: HashMap::new(),
            untracked: vec![],
            transitions: vec![],
            safe_points: vec![],
            ranges: vec![],
            live_row_layout: LiveRowLayout::Auto,
            _arch: PhantomData,
        }
    }

    pub fn set_var_arg(&mut self, is_var_arg: bool) {
        self.header.is_var_arg = is_var_arg;
    }

    pub fn set_return_kind(&mut self, kind: ReturnKind) {
        self.header.return_kind = kind;
    }

    /// The prolog size bounds the valid range of the security object and generics context
    /// slots when the method has no GS cookie.
    pub fn set_prolog_size(&mut self, size: u32) {
        assert!(size < self.header.code_length, "prolog covers the whole method");
        self.prolog_size = size;
    }

    pub fn set_security_object_stack_slot(&mut self, caller_sp_offset: i32) {
        self.header.security_object_stack_slot = Some(caller_sp_offset);
    }

    /// The GS cookie slot, and the code range between prolog and epilog in which it is valid.
    pub fn set_gs_cookie_stack_slot(&mut self, caller_sp_offset: i32, valid_start: u32, valid_end: u32) {
        assert!(
            valid_start < valid_end && valid_end <= self.header.code_length,
            "invalid GS cookie range [{:#x}, {:#x})",
            valid_start,
            valid_end
        );
        self.header.gs_cookie_stack_slot = Some(caller_sp_offset);
        self.gs_cookie_valid_range = Some(ValidRange {
            start: valid_start,
            end: valid_end,
        });
    }

    pub fn set_psp_sym_stack_slot(&mut self, caller_sp_offset: i32) {
        self.header.psp_sym_stack_slot = Some(caller_sp_offset);
    }

    pub fn set_generics_context_stack_slot(&mut self, caller_sp_offset: i32, kind: GenericsContextKind) {
        assert_ne!(kind, GenericsContextKind::None);
        self.header.generics_context_kind = kind;
        self.header.generics_context_stack_slot = Some(caller_sp_offset);
    }

    pub fn set_stack_base_register(&mut self, reg: RegisterId) {
        assert!(reg.as_u32() < A::NUM_REGISTERS, "no register {} on {}", reg, A::NAME);
        self.header.stack_base_register = Some(reg);
    }

    pub fn set_size_of_edit_and_continue_area(&mut self, size: u32) {
        self.header.size_of_edit_and_continue_area = Some(size);
    }

    pub fn set_reverse_pinvoke_frame_slot(&mut self, offset: i32, base: StackBase) {
        self.header.reverse_pinvoke_frame_slot = Some(StackSlotRef { offset, base });
    }

    /// Stack slots at `[0, size)` from the frame's stack pointer are outgoing-argument or
    /// scratch space.
    pub fn set_size_of_stack_scratch_area(&mut self, size: u32) {
        self.header.size_of_stack_scratch_area = Some(size);
    }

    pub fn set_live_row_layout(&mut self, layout: LiveRowLayout) {
        self.live_row_layout = layout;
    }

    fn slot_id(&mut self, slot: SlotDescriptor) -> SlotId {
        if let Some(&id) = self.slot_ids.get(&slot) {
            return id;
        }
        let id = SlotId(self.tracked.len() as u32);
        self.tracked.push(slot);
        self.slot_ids.insert(slot, id);
        id
    }

    /// The tracked slot for `reg` with `flags`, created on first use.
    pub fn get_register_slot_id(&mut self, reg: RegisterId, flags: SlotFlags) -> SlotId {
        assert!(reg.as_u32() < A::NUM_REGISTERS, "no register {} on {}", reg, A::NAME);
        self.slot_id(SlotDescriptor::register(reg, flags))
    }

    /// The tracked stack slot at `offset` from `base` with `flags`, created on first use.
    pub fn get_stack_slot_id(&mut self, offset: i32, base: StackBase, flags: SlotFlags) -> SlotId {
        assert!(offset % A::stack_slot_alignment() == 0, "stack slot {} is not aligned", offset);
        self.slot_id(SlotDescriptor::stack(offset, base, flags))
    }

    /// A stack slot that is live for the whole method.
    pub fn add_untracked_stack_slot(&mut self, offset: i32, base: StackBase, flags: SlotFlags) {
        assert!(offset % A::stack_slot_alignment() == 0, "stack slot {} is not aligned", offset);
        let slot = SlotDescriptor::stack(offset, base, flags);
        if !self.untracked.contains(&slot) {
            self.untracked.push(slot);
        }
    }

    /// From `offset` on, `slot` is live (or dead). Slots start out dead at offset 0. When
    /// several states are set at the same offset, the last one wins.
    pub fn set_slot_state(&mut self, offset: u32, slot: SlotId, live: bool) {
        assert!((slot.0 as usize) < self.tracked.len(), "unknown slot {:?}", slot);
        assert!(offset <= self.header.code_length, "offset {:#x} past the method", offset);
        self.transitions.push((offset, slot, live));
    }

    /// Record the call sites where a partially interruptible method stops for GC.
    pub fn define_call_sites(&mut self, offsets: &[u32]) {
        for &offset in offsets {
            self.add_safe_point(offset);
        }
    }

    pub fn add_safe_point(&mut self, offset: u32) {
        assert!(offset < self.header.code_length, "safe point {:#x} past the method", offset);
        assert!(offset % A::code_alignment() == 0, "safe point {:#x} is not aligned", offset);
        self.safe_points.push(offset);
    }

    /// Mark `[start, stop)` as fully interruptible. Overlapping and adjacent ranges merge.
    pub fn define_interruptible_range(&mut self, start: u32, stop: u32) {
        assert!(
            start < stop && stop <= self.header.code_length,
            "invalid interruptible range [{:#x}, {:#x})",
            start,
            stop
        );
        assert!(
            start % A::code_alignment() == 0 && stop % A::code_alignment() == 0,
            "interruptible range is not aligned"
        );
        self.ranges.push(InterruptibleRange { start, stop });
    }

    fn merged_ranges(&self) -> Vec<InterruptibleRange> {
        let mut sorted = self.ranges.clone();
        sorted.sort();
        let mut merged: Vec<InterruptibleRange> = vec![];
        for range in sorted {
            match merged.last_mut() {
                Some(last) if range.start <= last.stop => last.stop = last.stop.max(range.stop),
                _ => merged.push(range),
            }
        }
        merged
    }

    /// Produce the blob.
    pub fn build(mut self) -> GcInfoBlob {
        // Final slot order, and where each id ends up.
        let mut order: Vec<u32> = (0..self.tracked.len() as u32).collect();
        order.sort_by_key(|&id| slot_order::<A>(&self.tracked[id as usize]));
        let mut final_index = vec![0usize; self.tracked.len()];
        for (index, &id) in order.iter().enumerate() {
            final_index[id as usize] = index;
        }
        let sorted: Vec<SlotDescriptor> = order.iter().map(|&id| self.tracked[id as usize]).collect();
        let num_registers = sorted.iter().take_while(|slot| slot.is_register()).count();
        self.untracked.sort_by_key(slot_order::<A>);

        // Per-slot transitions sorted by offset. The sort is stable, so the last call for an
        // offset comes last.
        let mut lifetimes: Vec<Vec<(u32, bool)>> = vec![vec![]; sorted.len()];
        for &(offset, id, live) in &self.transitions {
            lifetimes[final_index[id.0 as usize]].push((offset, live));
        }
        for lifetime in &mut lifetimes {
            lifetime.sort_by_key(|&(offset, _)| offset);
        }
        let live_at = |offset: u32| -> Vec<bool> {
            lifetimes
                .iter()
                .map(|lifetime| {
                    let n = lifetime.partition_point(|&(o, _)| o <= offset);
                    n > 0 && lifetime[n - 1].1
                })
                .collect()
        };

        let mut safe_points = self.safe_points.clone();
        safe_points.sort_unstable();
        safe_points.dedup();
        let ranges = self.merged_ranges();

        let header = &mut self.header;
        header.num_safe_points = safe_points.len() as u32;
        header.num_interruptible_ranges = ranges.len() as u32;
        header.valid_range = if let Some(range) = self.gs_cookie_valid_range {
            Some(range)
        } else if header.security_object_stack_slot.is_some()
            || header.generics_context_kind != GenericsContextKind::None
        {
            Some(ValidRange {
                start: self.prolog_size,
                end: self.prolog_size + 1,
            })
        } else {
            None
        };

        let mut writer = BitStreamWriter::new();
        HeaderDecoder::encode::<A>(&self.header, &mut writer);
        encode_safe_points::<A>(self.header.code_length, &safe_points, &ranges, &mut writer);
        encode_slot_table::<A>(
            &sorted[..num_registers],
            &sorted[num_registers..],
            &self.untracked,
            &mut writer,
        );

        let rows: Vec<Vec<bool>> = safe_points.iter().map(|&offset| live_at(offset)).collect();
        encode_safe_point_live_state(&rows, sorted.len(), self.live_row_layout, &mut writer);

        let mut timeline = vec![];
        for range in &ranges {
            let start = A::normalize_code_offset(range.start);
            let stop = A::normalize_code_offset(range.stop);
            for norm in start..stop {
                timeline.push(live_at(A::denormalize_code_offset(norm)));
            }
        }
        encode_transitions(&timeline, sorted.len(), &mut writer);

        log::debug!(
            "Encoded GC info for {} bytes of {} code: {} bits, {} tracked and {} untracked slots",
            self.header.code_length,
            A::NAME,
            writer.position(),
            sorted.len(),
            self.untracked.len()
        );
        GcInfoBlob::current(writer.into_bytes())
    }

    /// The slot index `id` will have in the built blob.
    pub fn final_slot_index(&self, id: SlotId) -> u32 {
        let key = slot_order::<A>(&self.tracked[id.0 as usize]);
        self.tracked
            .iter()
            .filter(|slot| slot_order::<A>(slot) < key)
            .count() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcinfo::{EnumerationFlags, GcInfoDecoder};
    use crate::util::options::Options;
    use crate::vm::X64;

    #[test]
    fn slots_are_sorted_registers_first() {
        let mut encoder = GcInfoEncoder::<X64>::new(0x20);
        let s = encoder.get_stack_slot_id(16, StackBase::FrameSp, SlotFlags::NONE);
        let r12 = encoder.get_register_slot_id(RegisterId(12), SlotFlags::NONE);
        let rbx = encoder.get_register_slot_id(RegisterId(3), SlotFlags::NONE);
        assert_eq!(encoder.get_register_slot_id(RegisterId(3), SlotFlags::NONE), rbx);
        assert_eq!(encoder.final_slot_index(rbx), 0);
        assert_eq!(encoder.final_slot_index(r12), 1);
        assert_eq!(encoder.final_slot_index(s), 2);

        let blob = encoder.build();
        let decoder = GcInfoDecoder::<X64>::with_options(&blob, &Options::builtin()).unwrap();
        let slots: Vec<_> = decoder.slot_table().iter().collect::<Result<_, _>>().unwrap();
        assert_eq!(
            slots,
            vec![
                SlotDescriptor::register(RegisterId(3), SlotFlags::NONE),
                SlotDescriptor::register(RegisterId(12), SlotFlags::NONE),
                SlotDescriptor::stack(16, StackBase::FrameSp, SlotFlags::NONE),
            ]
        );
    }

    #[test]
    fn ranges_merge() {
        let mut encoder = GcInfoEncoder::<X64>::new(0x40);
        encoder.define_interruptible_range(0x20, 0x30);
        encoder.define_interruptible_range(0x4, 0x10);
        encoder.define_interruptible_range(0x10, 0x18);
        encoder.define_interruptible_range(0x28, 0x38);
        assert_eq!(
            encoder.merged_ranges(),
            vec![
                InterruptibleRange { start: 0x4, stop: 0x18 },
                InterruptibleRange { start: 0x20, stop: 0x38 },
            ]
        );
    }

    #[test]
    fn both_strategies_agree() {
        let mut encoder = GcInfoEncoder::<X64>::new(0x80);
        let rbx = encoder.get_register_slot_id(RegisterId(3), SlotFlags::NONE);
        let local = encoder.get_stack_slot_id(-16, StackBase::FrameRegister, SlotFlags::INTERIOR);
        encoder.set_stack_base_register(X64::FRAME_POINTER);
        encoder.set_slot_state(0x10, rbx, true);
        encoder.set_slot_state(0x30, rbx, false);
        encoder.set_slot_state(0x20, local, true);
        encoder.define_call_sites(&[0x08, 0x18, 0x28, 0x38]);
        encoder.define_interruptible_range(0x00, 0x40);
        let blob = encoder.build();

        let decoder = GcInfoDecoder::<X64>::with_options(&blob, &Options::builtin()).unwrap();
        let flags = EnumerationFlags::caller();
        let aborted = EnumerationFlags {
            execution_aborted: true,
            ..flags
        };
        for offset in [0x08, 0x18, 0x28, 0x38] {
            assert!(decoder.is_safe_point(offset).unwrap());
            // An aborted frame skips the safe point table and uses the transitions.
            assert_eq!(
                decoder.tracked_live_slots(offset, &flags).unwrap(),
                decoder.tracked_live_slots(offset, &aborted).unwrap(),
                "offset {:#x}",
                offset
            );
        }
    }
}
