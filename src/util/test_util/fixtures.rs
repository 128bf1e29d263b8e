//! Sample methods for tests and benchmarks, built once and shared.

// Not every test or benchmark uses every fixture.
#![allow(dead_code)]

use atomic_refcell::AtomicRefCell;
use std::sync::Once;

use crate::gcinfo::{GcInfoBlob, GcInfoEncoder, SlotFlags, SlotId};
use crate::vm::arch::Architecture;
use crate::vm::{RegisterId, StackBase, X64};

pub trait FixtureContent {
    fn create() -> Self;
}

/// Lazily created, shared test content.
pub struct Fixture<T: FixtureContent> {
    content: AtomicRefCell<Option<Box<T>>>,
    once: Once,
}

unsafe impl<T: FixtureContent> Sync for Fixture<T> {}

impl<T: FixtureContent> Fixture<T> {
    pub fn new() -> Self {
        Self {
            content: AtomicRefCell::new(None),
            once: Once::new(),
        }
    }

    pub fn with_fixture<R, F: FnOnce(&T) -> R>(&self, func: F) -> R {
        self.once.call_once(|| {
            let content = Box::new(T::create());
            let mut borrow = self.content.borrow_mut();
            *borrow = Some(content);
        });
        let borrow = self.content.borrow();
        // `call_once` above has filled the content.
        func(borrow.as_deref().unwrap())
    }
}

impl<T: FixtureContent> Default for Fixture<T> {
    fn default() -> Self {
        Self::new()
    }
}

const SAMPLE_CODE_LENGTH: u32 = 0x400;

// Callee-saved registers, so they are reportable in every frame.
const SAMPLE_REGISTERS: [u32; 5] = [3, 12, 13, 14, 15];
const SAMPLE_CALLER_SP_SLOTS: i32 = 24;
const SAMPLE_FRAME_SLOTS: i32 = 8;

/// An x64 method with enough tracked slots to go past the eagerly decoded prefix of the slot
/// table, two untracked slots, and overlapping lifetimes.
fn sample_encoder() -> (GcInfoEncoder<X64>, Vec<SlotId>) {
    let mut encoder = GcInfoEncoder::<X64>::new(SAMPLE_CODE_LENGTH);
    encoder.set_stack_base_register(X64::FRAME_POINTER);
    let mut slots = vec![];
    for reg in SAMPLE_REGISTERS {
        slots.push(encoder.get_register_slot_id(RegisterId(reg), SlotFlags::NONE));
    }
    for i in 1..=SAMPLE_CALLER_SP_SLOTS {
        let flags = if i % 5 == 0 {
            SlotFlags::INTERIOR
        } else {
            SlotFlags::NONE
        };
        slots.push(encoder.get_stack_slot_id(-8 * i, StackBase::CallerSp, flags));
    }
    for i in 1..=SAMPLE_FRAME_SLOTS {
        let flags = if i % 3 == 0 {
            SlotFlags::PINNED
        } else {
            SlotFlags::NONE
        };
        slots.push(encoder.get_stack_slot_id(-8 * i, StackBase::FrameRegister, flags));
    }
    encoder.add_untracked_stack_slot(0x40, StackBase::FrameSp, SlotFlags::NONE);
    encoder.add_untracked_stack_slot(0x48, StackBase::FrameSp, SlotFlags::PINNED);

    let half = SAMPLE_CODE_LENGTH / 2;
    for (i, &slot) in slots.iter().enumerate() {
        let i = i as u32;
        let start = (i * 53) % half;
        let end = (start + 16 + (i * 29) % half).min(SAMPLE_CODE_LENGTH);
        encoder.set_slot_state(start, slot, true);
        encoder.set_slot_state(end, slot, false);
        if i % 2 == 0 && end + 40 < SAMPLE_CODE_LENGTH {
            encoder.set_slot_state(end + 8, slot, true);
            encoder.set_slot_state(end + 40, slot, false);
        }
    }
    (encoder, slots)
}

pub struct SampleMethod {
    pub blob: GcInfoBlob,
    pub code_length: u32,
    pub num_tracked: u32,
    /// Offsets at which the method may be queried.
    pub query_offsets: Vec<u32>,
}

/// A partially interruptible method with a call site every 0x20 bytes.
pub struct CallSiteMethod(pub SampleMethod);

impl FixtureContent for CallSiteMethod {
    fn create() -> Self {
        let (mut encoder, slots) = sample_encoder();
        let call_sites: Vec<u32> = (0x10..SAMPLE_CODE_LENGTH).step_by(0x20).collect();
        encoder.define_call_sites(&call_sites);
        CallSiteMethod(SampleMethod {
            blob: encoder.build(),
            code_length: SAMPLE_CODE_LENGTH,
            num_tracked: slots.len() as u32,
            query_offsets: call_sites,
        })
    }
}

/// A fully interruptible method with two interruptible ranges.
pub struct InterruptibleMethod(pub SampleMethod);

impl FixtureContent for InterruptibleMethod {
    fn create() -> Self {
        let (mut encoder, slots) = sample_encoder();
        let half = SAMPLE_CODE_LENGTH / 2;
        let ranges = [(0x8, half), (half + 0x10, SAMPLE_CODE_LENGTH - 8)];
        for (start, stop) in ranges {
            encoder.define_interruptible_range(start, stop);
        }
        let query_offsets = ranges
            .iter()
            .flat_map(|&(start, stop)| (start..stop).step_by(7))
            .collect();
        InterruptibleMethod(SampleMethod {
            blob: encoder.build(),
            code_length: SAMPLE_CODE_LENGTH,
            num_tracked: slots.len() as u32,
            query_offsets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static CREATED: AtomicUsize = AtomicUsize::new(0);

    struct Counted(usize);

    impl FixtureContent for Counted {
        fn create() -> Self {
            Counted(CREATED.fetch_add(1, Ordering::SeqCst))
        }
    }

    #[test]
    fn content_is_created_once() {
        let fixture = Fixture::<Counted>::new();
        assert_eq!(fixture.with_fixture(|c| c.0), 0);
        assert_eq!(fixture.with_fixture(|c| c.0), 0);
        assert_eq!(CREATED.load(Ordering::SeqCst), 1);
    }
}
