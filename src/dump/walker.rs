//! Replays a method's liveness as a sequence of state changes.
//!
//! The walker queries the decoder at every code offset through the same entry point a stack
//! walk uses, with a [`ProbeFrame`] whose registers and stack bases live at distinct, far apart
//! sentinel addresses. A reported root address therefore identifies its slot by range
//! membership alone, and the walker diffs consecutive live sets to produce transitions.

use std::collections::{BTreeSet, HashMap};
use std::marker::PhantomData;
use std::ops::ControlFlow;

use enum_map::EnumMap;
use thiserror::Error;

use crate::gcinfo::constants::UNTRACKED_SENTINEL_OFFSET;
use crate::gcinfo::error::DecodeError;
use crate::gcinfo::slot_table::{SlotDescriptor, SlotKind};
use crate::gcinfo::{EnumerationFlags, GcInfoDecoder, SlotFlags};
use crate::util::constants::BYTES_IN_WORD;
use crate::util::log;
use crate::util::Address;
use crate::vm::{Architecture, FrameAccessor, RegisterId, StackBase};

/// Why a walk stopped.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum WalkError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// The decoder reported an address that belongs to no slot of the probe frame.
    #[error("reported invalid pointer {0}")]
    InvalidPointer(Address),
}

/// One decoded liveness transition.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LiveSlotEvent {
    /// The code offset of the change, or [`UNTRACKED_SENTINEL_OFFSET`] for untracked slots.
    pub code_offset: u32,
    pub slot_index: u32,
    pub becomes_live: bool,
}

/// Receives the changes found by [`StateChangeWalker::walk`]. Every callback may stop the walk.
pub trait StateChangeVisitor {
    fn on_interruptible_change(&mut self, _offset: u32, _interruptible: bool) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    fn on_safe_point(&mut self, _offset: u32) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    fn on_register_change(
        &mut self,
        offset: u32,
        reg: RegisterId,
        flags: SlotFlags,
        becomes_live: bool,
    ) -> ControlFlow<()>;

    fn on_stack_slot_change(
        &mut self,
        offset: u32,
        flags: SlotFlags,
        base: StackBase,
        rel_offset: i32,
        becomes_live: bool,
    ) -> ControlFlow<()>;
}

const REGISTER_FILE_START: usize = 0x1000;
const STACK_WINDOW: usize = usize::MAX / 4;
const HALF_STACK_WINDOW: usize = STACK_WINDOW / 2;

/// A synthetic frame that maps every register and stack location to a unique address.
#[derive(Clone, Debug)]
pub struct ProbeFrame<A: Architecture> {
    bases: EnumMap<StackBase, Address>,
    _arch: PhantomData<A>,
}

impl<A: Architecture> Default for ProbeFrame<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Architecture> ProbeFrame<A> {
    pub fn new() -> Self {
        let bases = EnumMap::from_fn(|base: StackBase| {
            // SAFETY: sentinel addresses, never dereferenced
            unsafe { Address::from_usize((base.to_bits() as usize + 1) * STACK_WINDOW) }
        });
        ProbeFrame {
            bases,
            _arch: PhantomData,
        }
    }

    /// The slot location an address handed out by this frame stands for.
    pub fn identify(&self, address: Address) -> Option<SlotKind> {
        let raw = address.as_usize();
        let register_file_end = REGISTER_FILE_START + A::NUM_REGISTERS as usize * BYTES_IN_WORD;
        if (REGISTER_FILE_START..register_file_end).contains(&raw) {
            let delta = raw - REGISTER_FILE_START;
            return (delta % BYTES_IN_WORD == 0)
                .then(|| SlotKind::Register(RegisterId((delta / BYTES_IN_WORD) as u32)));
        }
        self.bases.iter().find_map(|(base, &center)| {
            let offset = address.get_offset(center);
            if offset.unsigned_abs() < HALF_STACK_WINDOW {
                let offset = i32::try_from(offset).ok()?;
                Some(SlotKind::Stack { offset, base })
            } else {
                None
            }
        })
    }
}

impl<A: Architecture> FrameAccessor for ProbeFrame<A> {
    fn resolve(&self, base: StackBase) -> Address {
        self.bases[base]
    }

    fn register_address(&self, reg: RegisterId) -> Address {
        // SAFETY: sentinel addresses, never dereferenced
        unsafe { Address::from_usize(REGISTER_FILE_START + reg.as_u32() as usize * BYTES_IN_WORD) }
    }

    fn is_active_frame(&self) -> bool {
        true
    }
}

enum Step {
    Interruptible(u32, bool),
    SafePoint(u32),
    Change(LiveSlotEvent, SlotDescriptor),
}

/// Walks a decoded method offset by offset and reports liveness transitions.
pub struct StateChangeWalker<'d, 'a, A: Architecture> {
    decoder: &'d GcInfoDecoder<'a, A>,
    frame: ProbeFrame<A>,
    slots: Vec<SlotDescriptor>,
    // keyed by (location, flags, untracked)
    indices: HashMap<(SlotKind, SlotFlags, bool), u32>,
}

impl<'d, 'a, A: Architecture> StateChangeWalker<'d, 'a, A> {
    pub fn new(decoder: &'d GcInfoDecoder<'a, A>) -> Result<Self, WalkError> {
        let slots: Vec<SlotDescriptor> = decoder.slot_table().iter().collect::<Result<_, _>>()?;
        let table = decoder.slot_table();
        let indices = slots
            .iter()
            .enumerate()
            .map(|(i, slot)| {
                let i = i as u32;
                ((slot.kind, slot.flags, table.is_untracked(i)), i)
            })
            .collect();
        Ok(StateChangeWalker {
            decoder,
            frame: ProbeFrame::new(),
            slots,
            indices,
        })
    }

    pub fn slot(&self, index: u32) -> Option<&SlotDescriptor> {
        self.slots.get(index as usize)
    }

    /// Drive `visitor` over the whole method. Returns `Break` if the visitor stopped the walk.
    pub fn walk<V: StateChangeVisitor>(&self, visitor: &mut V) -> Result<ControlFlow<()>, WalkError> {
        self.steps(|step| match step {
            Step::Interruptible(offset, interruptible) => {
                visitor.on_interruptible_change(offset, interruptible)
            }
            Step::SafePoint(offset) => visitor.on_safe_point(offset),
            Step::Change(event, slot) => match slot.kind {
                SlotKind::Register(reg) => {
                    visitor.on_register_change(event.code_offset, reg, slot.flags, event.becomes_live)
                }
                SlotKind::Stack { offset, base } => visitor.on_stack_slot_change(
                    event.code_offset,
                    slot.flags,
                    base,
                    offset,
                    event.becomes_live,
                ),
            },
        })
    }

    /// Every transition of the method, in walk order.
    pub fn events(&self) -> Result<Vec<LiveSlotEvent>, WalkError> {
        let mut events = vec![];
        self.steps(|step| {
            if let Step::Change(event, _) = step {
                events.push(event);
            }
            ControlFlow::Continue(())
        })?;
        Ok(events)
    }

    /// The slot indices of the roots reported by one enumeration.
    fn collect(
        &self,
        untracked: bool,
        enumerate: impl FnOnce(&mut dyn FnMut(Address, SlotFlags)) -> Result<(), DecodeError>,
    ) -> Result<BTreeSet<u32>, WalkError> {
        let mut roots = vec![];
        enumerate(&mut |address, flags| roots.push((address, flags)))?;
        roots
            .into_iter()
            .map(|(address, flags)| {
                self.frame
                    .identify(address)
                    .and_then(|kind| self.indices.get(&(kind, flags, untracked)).copied())
                    .ok_or(WalkError::InvalidPointer(address))
            })
            .collect()
    }

    fn change(&self, code_offset: u32, slot_index: u32, becomes_live: bool) -> Step {
        let event = LiveSlotEvent {
            code_offset,
            slot_index,
            becomes_live,
        };
        Step::Change(event, self.slots[slot_index as usize])
    }

    fn steps(
        &self,
        mut sink: impl FnMut(Step) -> ControlFlow<()>,
    ) -> Result<ControlFlow<()>, WalkError> {
        let decoder = self.decoder;
        macro_rules! emit {
            ($step:expr) => {
                if sink($step).is_break() {
                    return Ok(ControlFlow::Break(()));
                }
            };
        }

        // Untracked slots are live throughout, reported once up front.
        let untracked =
            self.collect(true, |visitor| decoder.enumerate_untracked_roots(&self.frame, visitor))?;
        for &index in &untracked {
            emit!(self.change(UNTRACKED_SENTINEL_OFFSET, index, true));
        }

        let flags = EnumerationFlags {
            no_report_untracked: true,
            ..EnumerationFlags::active()
        };
        let code_length = decoder.code_length();
        let mut live = BTreeSet::new();
        let mut was_interruptible = false;
        let mut offset = 0u32;
        loop {
            let at_end = offset >= code_length;
            let interruptible = !at_end && decoder.is_interruptible(offset);
            if interruptible != was_interruptible {
                emit!(Step::Interruptible(offset, interruptible));
                was_interruptible = interruptible;
            }
            let safe_point = !at_end && decoder.is_safe_point(offset)?;
            if safe_point {
                emit!(Step::SafePoint(offset));
            }

            let now = if interruptible || safe_point {
                self.collect(false, |visitor| {
                    decoder.enumerate_live_roots(offset, &self.frame, &flags, visitor)
                })?
            } else {
                BTreeSet::new()
            };
            for &index in live.difference(&now) {
                emit!(self.change(offset, index, false));
            }
            for &index in now.difference(&live) {
                emit!(self.change(offset, index, true));
            }
            live = now;

            if at_end {
                break;
            }
            offset += A::code_alignment();
        }
        log::trace!("Walked {:#x} bytes of {} code", code_length, A::NAME);
        Ok(ControlFlow::Continue(()))
    }
}
