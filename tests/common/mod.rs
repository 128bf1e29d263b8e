// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use gcinfo::util::Address;
use gcinfo::vm::{FrameAccessor, RegisterId, StackBase};
use gcinfo::SlotFlags;

pub const STACK_WORDS: usize = 64;

/// A frame backed by real memory: a saved register context and a stack area. The caller's
/// stack pointer is the top of the stack area, the frame's stack pointer its bottom, and the
/// frame register sits halfway.
pub struct TestFrame {
    pub registers: Box<[usize; 32]>,
    pub stack: Box<[usize; STACK_WORDS]>,
    pub active: bool,
}

impl TestFrame {
    pub fn new(active: bool) -> Self {
        TestFrame {
            registers: Box::new([0; 32]),
            stack: Box::new([0; STACK_WORDS]),
            active,
        }
    }

    fn stack_start(&self) -> Address {
        Address::from_ref(&self.stack[0])
    }

    pub fn slot(&self, base: StackBase, offset: i32) -> Address {
        self.resolve(base).offset(offset as isize)
    }
}

impl FrameAccessor for TestFrame {
    fn resolve(&self, base: StackBase) -> Address {
        let word = std::mem::size_of::<usize>();
        match base {
            StackBase::FrameSp => self.stack_start(),
            StackBase::FrameRegister => self.stack_start() + STACK_WORDS / 2 * word,
            StackBase::CallerSp => self.stack_start() + STACK_WORDS * word,
        }
    }

    fn register_address(&self, reg: RegisterId) -> Address {
        Address::from_ref(&self.registers[reg.as_u32() as usize])
    }

    fn is_active_frame(&self) -> bool {
        self.active
    }
}

/// Collect the roots reported by `f`, sorted by address.
pub fn collect_roots(
    f: impl FnOnce(&mut dyn FnMut(Address, SlotFlags)),
) -> Vec<(Address, SlotFlags)> {
    let mut roots = vec![];
    f(&mut |address, flags| roots.push((address, flags)));
    roots.sort_by_key(|(address, _)| *address);
    roots
}
