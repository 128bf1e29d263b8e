//! Helpers for unit tests, integration tests and benchmarks.

use enum_map::{enum_map, EnumMap};

use crate::gcinfo::SlotFlags;
use crate::util::constants::BYTES_IN_WORD;
use crate::util::Address;
use crate::vm::{FrameAccessor, RegisterId, RootVisitor, StackBase};

pub mod fixtures;

// Stack bases are far apart so that slots relative to different bases never collide.
const CALLER_SP: Address = unsafe { Address::from_usize(0x7fff_0000) };
const FRAME_SP: Address = unsafe { Address::from_usize(0x7ffe_0000) };
const FRAME_REGISTER: Address = unsafe { Address::from_usize(0x7ffe_8000) };
const REGISTER_CONTEXT: Address = unsafe { Address::from_usize(0x1000_0000) };

/// A frame with fixed, recognizable base addresses. Register `n` is saved at
/// `REGISTER_CONTEXT + n * BYTES_IN_WORD`.
#[derive(Clone, Debug)]
pub struct MockFrame {
    active: bool,
    bases: EnumMap<StackBase, Address>,
}

impl MockFrame {
    pub fn new(active: bool) -> Self {
        MockFrame {
            active,
            bases: enum_map! {
                StackBase::CallerSp => CALLER_SP,
                StackBase::FrameSp => FRAME_SP,
                StackBase::FrameRegister => FRAME_REGISTER,
            },
        }
    }

    /// The address of a stack slot in this frame.
    pub fn stack_slot(&self, offset: i32, base: StackBase) -> Address {
        self.bases[base].offset(offset as isize)
    }
}

impl FrameAccessor for MockFrame {
    fn resolve(&self, base: StackBase) -> Address {
        self.bases[base]
    }

    fn register_address(&self, reg: RegisterId) -> Address {
        REGISTER_CONTEXT + reg.as_u32() as usize * BYTES_IN_WORD
    }

    fn is_active_frame(&self) -> bool {
        self.active
    }
}

/// A root visitor that records what it is given.
#[derive(Clone, Debug, Default)]
pub struct RootRecorder {
    pub roots: Vec<(Address, SlotFlags)>,
}

impl RootRecorder {
    /// The recorded roots, sorted, for order-independent comparisons.
    pub fn sorted(&self) -> Vec<(Address, SlotFlags)> {
        let mut roots = self.roots.clone();
        roots.sort_by_key(|(address, _)| *address);
        roots
    }
}

impl RootVisitor for RootRecorder {
    fn visit_root(&mut self, address: Address, flags: SlotFlags) {
        self.roots.push((address, flags));
    }
}
