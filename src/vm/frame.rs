use enum_map::Enum;
use strum_macros::{Display, EnumIter};

use crate::gcinfo::error::{DecodeError, Result};
use crate::util::Address;
use crate::vm::RegisterId;

/// The anchor a stack slot offset is relative to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Enum, Display, EnumIter)]
pub enum StackBase {
    /// The stack pointer of the caller, i.e. the value SP had just before the call into this
    /// method.
    #[strum(serialize = "caller.sp")]
    CallerSp,
    /// The stack pointer of this frame.
    #[strum(serialize = "sp")]
    FrameSp,
    /// The method's stack base register (its frame pointer).
    #[strum(serialize = "frame")]
    FrameRegister,
}

impl StackBase {
    /// Decode the 2-bit base kind stored in the blob.
    pub(crate) fn from_bits(bits: u8) -> Result<StackBase> {
        match bits {
            0 => Ok(StackBase::CallerSp),
            1 => Ok(StackBase::FrameSp),
            2 => Ok(StackBase::FrameRegister),
            _ => Err(DecodeError::InvalidStackBase(bits)),
        }
    }

    pub(crate) fn to_bits(self) -> u8 {
        match self {
            StackBase::CallerSp => 0,
            StackBase::FrameSp => 1,
            StackBase::FrameRegister => 2,
        }
    }
}

/// Access to the state of one (possibly unwound) call frame.
///
/// This is implemented by the stack walker. The decoder borrows it for the duration of a single
/// query and only computes addresses from it; unwinding is entirely the implementor's business.
pub trait FrameAccessor {
    /// The address a [`StackBase`] denotes in this frame. For
    /// [`StackBase::FrameRegister`] this is the value of the method's stack base register.
    fn resolve(&self, base: StackBase) -> Address;

    /// The address where the value of `reg` is saved for this frame. For the active frame this is
    /// the register context captured at suspension; for callers it is wherever the unwinder
    /// found the register's home.
    fn register_address(&self, reg: RegisterId) -> Address;

    /// Whether this frame is the one that was executing when the thread was suspended.
    fn is_active_frame(&self) -> bool;
}
