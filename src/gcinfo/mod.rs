//! The GC info format: decoding, live-root enumeration, and the matching encoder.
//!
//! A [`GcInfoBlob`] is produced once per compiled method by [`GcInfoEncoder`] and then queried
//! any number of times, from any number of threads, through a [`GcInfoDecoder`]. Decoders are
//! cheap, short-lived views over a blob; construct one per query (or per stack walk of a frame).

use std::sync::Arc;

use crate::util::bit_stream::BitStreamReader;

pub mod constants;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod header;
pub mod live_state;
pub mod liveness;
pub mod reporter;
pub mod safe_points;
pub mod slot_table;

pub use self::decoder::GcInfoDecoder;
pub use self::encoder::{GcInfoEncoder, SlotId};
pub use self::error::{DecodeError, Result};
pub use self::header::{
    GenericsContextKind, HeaderDecoder, MethodHeader, ReturnKind, StackSlotRef, ValidRange,
};
pub use self::safe_points::{InterruptibleRange, SafePointIndex};
pub use self::slot_table::{SlotDescriptor, SlotKind, SlotTable};

use self::constants::{GCINFO_VERSION, MIN_SUPPORTED_GCINFO_VERSION};

/// The encoded GC info of one method, with the format version it was written in.
///
/// The bytes are immutable once built and shared by reference counting, so handing a blob to
/// another thread or keeping it in a code record never copies it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GcInfoBlob {
    data: Arc<[u8]>,
    version: u32,
}

impl GcInfoBlob {
    pub fn new(data: impl Into<Arc<[u8]>>, version: u32) -> Self {
        GcInfoBlob {
            data: data.into(),
            version,
        }
    }

    /// A blob in the current format version.
    pub fn current(data: impl Into<Arc<[u8]>>) -> Self {
        Self::new(data, GCINFO_VERSION)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// A reader at the start of the blob, after checking that the version is supported.
    pub(crate) fn reader(&self) -> Result<BitStreamReader<'_>> {
        if !(MIN_SUPPORTED_GCINFO_VERSION..=GCINFO_VERSION).contains(&self.version) {
            return Err(DecodeError::UnsupportedVersion(self.version));
        }
        Ok(BitStreamReader::new(&self.data))
    }
}

/// Per-slot attributes passed to the root visitor along with the slot's address.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotFlags {
    /// The slot may point into the middle of an object.
    pub interior: bool,
    /// The object the slot refers to must not be moved.
    pub pinned: bool,
}

impl SlotFlags {
    pub const NONE: SlotFlags = SlotFlags {
        interior: false,
        pinned: false,
    };
    pub const INTERIOR: SlotFlags = SlotFlags {
        interior: true,
        pinned: false,
    };
    pub const PINNED: SlotFlags = SlotFlags {
        interior: false,
        pinned: true,
    };

    pub(crate) fn from_bits(bits: usize) -> Self {
        SlotFlags {
            interior: bits & 1 != 0,
            pinned: bits & 2 != 0,
        }
    }

    pub(crate) fn to_bits(self) -> usize {
        self.interior as usize | (self.pinned as usize) << 1
    }
}

/// How a stack walker wants the roots of one frame enumerated.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct EnumerationFlags {
    /// The frame is the innermost one of the walk (the thread was suspended in it).
    pub active_frame: bool,
    /// The frame's execution was interrupted by a hardware fault rather than stopping at a safe
    /// point. Tracked liveness outside interruptible code is then unknown and nothing tracked is
    /// reported.
    pub execution_aborted: bool,
    /// Report scratch registers and scratch stack slots. Only legal for the active frame.
    pub report_scratch: bool,
    /// A funclet of this frame already reported the frame's untracked slots.
    pub parent_of_funclet: bool,
    /// Do not report untracked slots at all.
    pub no_report_untracked: bool,
    /// Only report stack slots based on the frame register.
    pub report_fp_based_slots_only: bool,
    /// The frame belongs to an exception filter funclet.
    pub filter_funclet: bool,
}

impl EnumerationFlags {
    /// Flags for the innermost frame: scratch locations are reported.
    pub fn active() -> Self {
        EnumerationFlags {
            active_frame: true,
            report_scratch: true,
            ..Default::default()
        }
    }

    /// Flags for a caller frame.
    pub fn caller() -> Self {
        Self::default()
    }

    pub(crate) fn reports_untracked(&self) -> bool {
        !self.parent_of_funclet && !self.no_report_untracked
    }
}
