//! Diagnostics: replaying a method's liveness offset by offset, and printing it as text.

pub mod text;
pub mod walker;

pub use self::text::{dump, dump_gc_info, dump_with_arch};
pub use self::walker::{LiveSlotEvent, ProbeFrame, StateChangeVisitor, StateChangeWalker, WalkError};
