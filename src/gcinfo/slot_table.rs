//! The slot table: every register and stack location that can hold a reference in a method.
//!
//! Slots are numbered in one sequence: tracked registers, then tracked stack slots, then
//! untracked stack slots. Live bitmaps are indexed by this number, restricted to the tracked
//! prefix. Within each of the three groups a descriptor is either a *restart*, carrying its full
//! value, base and flags, or a *delta* from the previous descriptor of the group (value minus
//! the previous value minus one), which inherits the previous base and flags. Sorting slots so
//! that neighbours share flags makes most descriptors deltas.
//!
//! Decoding is lazy. A bounded prefix of descriptors is materialized when the table is opened
//! and higher indices are found by scanning forward from the end of that prefix. Because deltas
//! chain, random access past the prefix costs a scan; [`SlotLookup`] keeps its scan position so
//! that ascending queries (the common pattern when walking a live bitmap) cost one pass overall.

use std::marker::PhantomData;

use crate::gcinfo::constants::*;
use crate::gcinfo::error::{DecodeError, Result};
use crate::gcinfo::header::{denormalize_stack_offset, normalize_stack_offset};
use crate::gcinfo::SlotFlags;
use crate::util::bit_stream::{BitStreamReader, BitStreamWriter};
use crate::vm::{Architecture, RegisterId, StackBase};

/// Where a slot lives.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SlotKind {
    Register(RegisterId),
    Stack { offset: i32, base: StackBase },
}

/// A decoded slot table entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SlotDescriptor {
    pub kind: SlotKind,
    pub flags: SlotFlags,
}

impl SlotDescriptor {
    pub fn register(reg: RegisterId, flags: SlotFlags) -> Self {
        SlotDescriptor {
            kind: SlotKind::Register(reg),
            flags,
        }
    }

    pub fn stack(offset: i32, base: StackBase, flags: SlotFlags) -> Self {
        SlotDescriptor {
            kind: SlotKind::Stack { offset, base },
            flags,
        }
    }

    pub fn is_register(&self) -> bool {
        matches!(self.kind, SlotKind::Register(_))
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
struct SlotCounts {
    registers: u32,
    stack_slots: u32,
    untracked: u32,
}

impl SlotCounts {
    fn tracked(&self) -> u32 {
        self.registers + self.stack_slots
    }

    fn total(&self) -> u32 {
        self.tracked() + self.untracked
    }

    /// Whether `index` is the first slot of its group, where delta chains restart.
    fn starts_group(&self, index: u32) -> bool {
        index == 0 || index == self.registers || index == self.tracked()
    }
}

/// The decode state between two descriptors.
#[derive(Clone, Debug)]
struct SlotCursor {
    pos: usize,
    index: u32,
    // (normalized value, base, flags) of the previous descriptor in the group
    prev: Option<(i64, StackBase, SlotFlags)>,
}

impl SlotCursor {
    fn decode_next<A: Architecture>(
        &mut self,
        data: &[u8],
        counts: &SlotCounts,
        end: usize,
    ) -> Result<SlotDescriptor> {
        debug_assert!(self.index < counts.total());
        if counts.starts_group(self.index) {
            self.prev = None;
        }
        let is_register = self.index < counts.registers;
        let mut reader = BitStreamReader::at(data, self.pos);
        let restart = reader.read_bit()?;
        let (value, base, flags) = if restart {
            if is_register {
                let reg = reader.decode_var_unsigned(REGISTER_ENCBASE)? as i64;
                let flags = SlotFlags::from_bits(reader.read_bits(SLOT_FLAGS_BITS)?);
                (reg, StackBase::CallerSp, flags)
            } else {
                let offset = reader.decode_var_signed(STACK_SLOT_ENCBASE)?;
                let base = StackBase::from_bits(reader.read_bits(STACK_BASE_BITS)? as u8)?;
                let flags = SlotFlags::from_bits(reader.read_bits(SLOT_FLAGS_BITS)?);
                (offset, base, flags)
            }
        } else {
            let (prev, base, flags) = self
                .prev
                .ok_or(DecodeError::MalformedHeader("slot delta without a predecessor"))?;
            let delta_base = if is_register {
                REGISTER_DELTA_ENCBASE
            } else {
                STACK_SLOT_DELTA_ENCBASE
            };
            let delta = i64::try_from(reader.decode_var_unsigned(delta_base)?)
                .map_err(|_| DecodeError::VarIntOverflow)?;
            let value = prev
                .checked_add(delta)
                .and_then(|v| v.checked_add(1))
                .ok_or(DecodeError::VarIntOverflow)?;
            (value, base, flags)
        };
        if reader.position() > end {
            return Err(DecodeError::Truncated);
        }

        let descriptor = if is_register {
            if value >= A::NUM_REGISTERS as i64 {
                return Err(DecodeError::MalformedHeader("register number out of range"));
            }
            SlotDescriptor::register(RegisterId(value as u32), flags)
        } else {
            let norm = i32::try_from(value).map_err(|_| DecodeError::VarIntOverflow)?;
            SlotDescriptor::stack(denormalize_stack_offset::<A>(norm)?, base, flags)
        };
        self.prev = Some((value, base, flags));
        self.pos = reader.position();
        self.index += 1;
        Ok(descriptor)
    }
}

/// The decoded slot table of one method.
#[derive(Clone, Debug)]
pub struct SlotTable<'a, A: Architecture> {
    data: &'a [u8],
    counts: SlotCounts,
    prefix: Vec<SlotDescriptor>,
    resume: SlotCursor,
    end: usize,
    _arch: PhantomData<A>,
}

impl<'a, A: Architecture> SlotTable<'a, A> {
    /// Open the slot table at the reader's position, materializing up to `eager_limit`
    /// descriptors. Leaves the reader at the end of the table.
    pub fn decode(reader: &mut BitStreamReader<'a>, eager_limit: usize) -> Result<Self> {
        let size = reader.decode_var_unsigned(SLOT_TABLE_SIZE_ENCBASE)?;
        let size = usize::try_from(size).map_err(|_| DecodeError::VarIntOverflow)?;
        let end = reader
            .position()
            .checked_add(size)
            .ok_or(DecodeError::VarIntOverflow)?;
        if size > reader.bits_remaining() {
            return Err(DecodeError::Truncated);
        }

        let mut read_count = |base: u32| -> Result<u32> {
            if reader.read_bit()? {
                reader.decode_var_u32(base)
            } else {
                Ok(0)
            }
        };
        let counts = SlotCounts {
            registers: read_count(NUM_REGISTERS_ENCBASE)?,
            stack_slots: read_count(NUM_STACK_SLOTS_ENCBASE)?,
            untracked: read_count(NUM_UNTRACKED_SLOTS_ENCBASE)?,
        };
        counts
            .registers
            .checked_add(counts.stack_slots)
            .and_then(|n| n.checked_add(counts.untracked))
            .ok_or(DecodeError::VarIntOverflow)?;

        let data = reader.data();
        let mut resume = SlotCursor {
            pos: reader.position(),
            index: 0,
            prev: None,
        };
        let eager = (counts.total() as usize).min(eager_limit);
        let mut prefix = Vec::new();
        prefix.try_reserve_exact(eager)?;
        for _ in 0..eager {
            prefix.push(resume.decode_next::<A>(data, &counts, end)?);
        }

        reader.set_position(end);
        Ok(SlotTable {
            data,
            counts,
            prefix,
            resume,
            end,
            _arch: PhantomData,
        })
    }

    pub fn num_registers(&self) -> u32 {
        self.counts.registers
    }

    pub fn num_stack_slots(&self) -> u32 {
        self.counts.stack_slots
    }

    pub fn num_untracked(&self) -> u32 {
        self.counts.untracked
    }

    /// Registers and stack slots with a computed lifetime. Live bitmaps have this many bits.
    pub fn num_tracked(&self) -> u32 {
        self.counts.tracked()
    }

    pub fn num_slots(&self) -> u32 {
        self.counts.total()
    }

    pub fn is_untracked(&self, index: u32) -> bool {
        index >= self.num_tracked()
    }

    /// The number of descriptors that were decoded eagerly.
    pub fn eager_len(&self) -> usize {
        self.prefix.len()
    }

    /// Look up one slot. Past the eager prefix this scans from the prefix's end; use
    /// [`SlotTable::lookup`] for many ascending queries.
    pub fn get(&self, index: u32) -> Result<SlotDescriptor> {
        self.lookup().get(index)
    }

    /// A lookup helper that remembers how far it has scanned.
    pub fn lookup(&self) -> SlotLookup<'_, 'a, A> {
        SlotLookup {
            table: self,
            cursor: self.resume.clone(),
        }
    }

    /// All slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = Result<SlotDescriptor>> + '_ {
        self.range(0, self.num_slots())
    }

    /// The untracked slots, in index order, paired with their slot index.
    pub fn untracked(&self) -> impl Iterator<Item = Result<(u32, SlotDescriptor)>> + '_ {
        let mut lookup = self.lookup();
        (self.num_tracked()..self.num_slots()).map(move |i| lookup.get(i).map(|slot| (i, slot)))
    }

    fn range(&self, start: u32, end: u32) -> impl Iterator<Item = Result<SlotDescriptor>> + '_ {
        let mut lookup = self.lookup();
        (start..end).map(move |i| lookup.get(i))
    }
}

/// Forward-scanning random access into a [`SlotTable`].
pub struct SlotLookup<'t, 'a, A: Architecture> {
    table: &'t SlotTable<'a, A>,
    cursor: SlotCursor,
}

impl<A: Architecture> SlotLookup<'_, '_, A> {
    pub fn get(&mut self, index: u32) -> Result<SlotDescriptor> {
        let table = self.table;
        if let Some(slot) = table.prefix.get(index as usize) {
            return Ok(*slot);
        }
        if index >= table.num_slots() {
            return Err(DecodeError::InvalidSlotIndex(index));
        }
        if self.cursor.index > index {
            self.cursor = table.resume.clone();
        }
        loop {
            let slot = self
                .cursor
                .decode_next::<A>(table.data, &table.counts, table.end)?;
            if self.cursor.index > index {
                return Ok(slot);
            }
        }
    }
}

/// Write a slot table in the layout [`SlotTable::decode`] reads.
pub(crate) fn encode_slot_table<A: Architecture>(
    registers: &[SlotDescriptor],
    stack_slots: &[SlotDescriptor],
    untracked: &[SlotDescriptor],
    writer: &mut BitStreamWriter,
) {
    let mut body = BitStreamWriter::new();
    for (group, base) in [
        (registers, NUM_REGISTERS_ENCBASE),
        (stack_slots, NUM_STACK_SLOTS_ENCBASE),
        (untracked, NUM_UNTRACKED_SLOTS_ENCBASE),
    ] {
        body.write_bit(!group.is_empty());
        if !group.is_empty() {
            body.encode_var_unsigned(group.len() as u64, base);
        }
    }
    encode_group::<A>(registers, true, &mut body);
    encode_group::<A>(stack_slots, false, &mut body);
    encode_group::<A>(untracked, false, &mut body);

    writer.encode_var_unsigned(body.position() as u64, SLOT_TABLE_SIZE_ENCBASE);
    writer.append(&body);
}

fn encode_group<A: Architecture>(
    slots: &[SlotDescriptor],
    registers: bool,
    writer: &mut BitStreamWriter,
) {
    let mut prev: Option<(i64, StackBase, SlotFlags)> = None;
    for slot in slots {
        let (value, base) = match slot.kind {
            SlotKind::Register(reg) => {
                assert!(registers, "register {} in a stack slot group", reg);
                assert!(reg.as_u32() < A::NUM_REGISTERS, "no register {} on {}", reg, A::NAME);
                (reg.as_u32() as i64, StackBase::CallerSp)
            }
            SlotKind::Stack { offset, base } => {
                assert!(!registers, "stack slot in the register group");
                (normalize_stack_offset::<A>(offset) as i64, base)
            }
        };
        match prev {
            Some((prev_value, prev_base, prev_flags))
                if prev_base == base && prev_flags == slot.flags && value > prev_value =>
            {
                writer.write_bit(false);
                let delta_base = if registers {
                    REGISTER_DELTA_ENCBASE
                } else {
                    STACK_SLOT_DELTA_ENCBASE
                };
                writer.encode_var_unsigned((value - prev_value - 1) as u64, delta_base);
            }
            _ => {
                writer.write_bit(true);
                if registers {
                    writer.encode_var_unsigned(value as u64, REGISTER_ENCBASE);
                } else {
                    writer.encode_var_signed(value, STACK_SLOT_ENCBASE);
                    writer.write_bits(base.to_bits() as usize, STACK_BASE_BITS);
                }
                writer.write_bits(slot.flags.to_bits(), SLOT_FLAGS_BITS);
            }
        }
        prev = Some((value, base, slot.flags));
    }
}
