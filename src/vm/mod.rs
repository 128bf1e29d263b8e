//! The interfaces the embedding runtime provides to the decoder: the target's register table,
//! access to a stack frame, and the callback that receives roots.

pub mod arch;
pub mod frame;
pub mod scanning;

pub use self::arch::{Arch, Architecture, Arm64, RegisterId, X64};
pub use self::frame::{FrameAccessor, StackBase};
pub use self::scanning::RootVisitor;
