//! Errors raised while decoding a GC info blob or reporting its roots.
//!
//! Every variant is unrecoverable for the query that raised it. A stack walker must treat a
//! failed root enumeration as fatal for the GC: substituting a guess for a live set risks
//! freeing reachable objects.

use thiserror::Error;

/// Result type of every decoder operation.
pub type Result<T> = std::result::Result<T, DecodeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The bit reader ran past the end of the blob.
    #[error("GC info blob is truncated")]
    Truncated,
    /// The header carries a self-contradictory flag combination.
    #[error("malformed GC info header: {0}")]
    MalformedHeader(&'static str),
    /// The blob was produced for a format version this decoder does not understand.
    #[error("unsupported GC info format version {0}")]
    UnsupportedVersion(u32),
    /// A slot index (from a live bitmap or a query) is outside the slot table.
    #[error("invalid slot index {0}")]
    InvalidSlotIndex(u32),
    /// A stack slot names a base kind outside the defined set.
    #[error("invalid stack base kind {0}")]
    InvalidStackBase(u8),
    /// A reported slot resolves relative to a base register that is forbidden in this context,
    /// e.g. a frame-register-relative slot in a method without a usable frame register.
    #[error("slot is relative to an invalid base register")]
    InvalidBaseRegisterCombination,
    /// A live slot names the frame pointer or stack pointer, or a scratch location was
    /// requested for a frame that is not the active one. This is a policy violation rather than
    /// a format error.
    #[error("reported the frame pointer or a scratch location")]
    ReportedFramePointerOrScratch,
    /// A scratch buffer for the live set could not be allocated.
    #[error("out of memory")]
    OutOfMemory,
    /// A variable-length integer does not fit in 64 bits (or in the field it decodes into).
    #[error("variable-length integer overflows its field")]
    VarIntOverflow,
}

impl From<std::collections::TryReserveError> for DecodeError {
    fn from(_: std::collections::TryReserveError) -> Self {
        DecodeError::OutOfMemory
    }
}
