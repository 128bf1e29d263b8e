use std::marker::PhantomData;

use crate::gcinfo::error::{DecodeError, Result};
use crate::gcinfo::header::MethodHeader;
use crate::gcinfo::slot_table::{SlotDescriptor, SlotKind};
use crate::gcinfo::EnumerationFlags;
use crate::util::log;
use crate::util::Address;
use crate::vm::{Architecture, FrameAccessor, RootVisitor, StackBase};

/// Turns live slot descriptors into addresses in a concrete frame and hands them to the root
/// visitor, enforcing the reporting policy of the frame.
pub struct RootReporter<'h, A: Architecture> {
    header: &'h MethodHeader,
    _arch: PhantomData<A>,
}

impl<'h, A: Architecture> RootReporter<'h, A> {
    pub fn new(header: &'h MethodHeader) -> Self {
        RootReporter {
            header,
            _arch: PhantomData,
        }
    }

    /// Whether the slot is only meaningful while its frame is executing.
    pub fn is_scratch(&self, slot: &SlotDescriptor) -> bool {
        match slot.kind {
            SlotKind::Register(reg) => A::is_scratch_register(reg),
            SlotKind::Stack {
                offset,
                base: StackBase::FrameSp,
            } => self.header.is_scratch_stack_offset(offset),
            SlotKind::Stack { .. } => false,
        }
    }

    /// The address of `slot` in `frame`, or `None` if the flags say it is not reported.
    pub fn resolve<F: FrameAccessor>(
        &self,
        slot: &SlotDescriptor,
        frame: &F,
        flags: &EnumerationFlags,
    ) -> Result<Option<Address>> {
        if self.is_scratch(slot) {
            if !flags.report_scratch {
                return Ok(None);
            }
            if !flags.active_frame {
                return Err(DecodeError::ReportedFramePointerOrScratch);
            }
        }
        match slot.kind {
            SlotKind::Register(reg) => {
                if reg == A::STACK_POINTER || Some(reg) == self.header.stack_base_register {
                    return Err(DecodeError::ReportedFramePointerOrScratch);
                }
                if flags.report_fp_based_slots_only {
                    return Ok(None);
                }
                Ok(Some(frame.register_address(reg)))
            }
            SlotKind::Stack { offset, base } => {
                if flags.report_fp_based_slots_only && base != StackBase::FrameRegister {
                    return Ok(None);
                }
                if base == StackBase::FrameRegister {
                    match self.header.stack_base_register {
                        Some(reg) if A::is_frame_base(reg) => {}
                        _ => return Err(DecodeError::InvalidBaseRegisterCombination),
                    }
                }
                Ok(Some(frame.resolve(base).offset(offset as isize)))
            }
        }
    }

    /// Report one live slot.
    pub fn report<F: FrameAccessor, V: RootVisitor + ?Sized>(
        &self,
        slot: &SlotDescriptor,
        frame: &F,
        flags: &EnumerationFlags,
        visitor: &mut V,
    ) -> Result<()> {
        if let Some(address) = self.resolve(slot, frame, flags)? {
            log::trace!("root {:?} at {}", slot, address);
            visitor.visit_root(address, slot.flags);
        }
        Ok(())
    }
}
