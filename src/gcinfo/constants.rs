//! Layout constants of the GC info format.
//!
//! The `*_ENCBASE` values are the width of the first chunk of the corresponding
//! variable-length field (see [`crate::util::bit_stream`]). They only affect the size of a blob,
//! never its meaning, but the encoder and decoder must agree on them.

/// The format version this crate reads and writes.
pub const GCINFO_VERSION: u32 = 1;
/// The oldest format version this crate can still read.
pub const MIN_SUPPORTED_GCINFO_VERSION: u32 = 1;

pub const SECURITY_OBJECT_STACK_SLOT_ENCBASE: u32 = 6;
pub const GS_COOKIE_STACK_SLOT_ENCBASE: u32 = 6;
pub const PSP_SYM_STACK_SLOT_ENCBASE: u32 = 6;
pub const GENERICS_INST_CONTEXT_STACK_SLOT_ENCBASE: u32 = 6;
pub const CODE_LENGTH_ENCBASE: u32 = 8;
pub const NORM_PROLOG_SIZE_ENCBASE: u32 = 5;
pub const NORM_EPILOG_SIZE_ENCBASE: u32 = 3;
pub const STACK_BASE_REGISTER_ENCBASE: u32 = 3;
pub const SIZE_OF_EDIT_AND_CONTINUE_PRESERVED_AREA_ENCBASE: u32 = 4;
pub const REVERSE_PINVOKE_FRAME_ENCBASE: u32 = 6;
pub const SIZE_OF_STACK_AREA_ENCBASE: u32 = 3;
pub const NUM_SAFE_POINTS_ENCBASE: u32 = 2;
pub const NUM_INTERRUPTIBLE_RANGES_ENCBASE: u32 = 1;
pub const INTERRUPTIBLE_RANGE_DELTA1_ENCBASE: u32 = 6;
pub const INTERRUPTIBLE_RANGE_DELTA2_ENCBASE: u32 = 6;

pub const SLOT_TABLE_SIZE_ENCBASE: u32 = 6;
pub const NUM_REGISTERS_ENCBASE: u32 = 2;
pub const NUM_STACK_SLOTS_ENCBASE: u32 = 2;
pub const NUM_UNTRACKED_SLOTS_ENCBASE: u32 = 1;
pub const REGISTER_ENCBASE: u32 = 3;
pub const REGISTER_DELTA_ENCBASE: u32 = 2;
pub const STACK_SLOT_ENCBASE: u32 = 6;
pub const STACK_SLOT_DELTA_ENCBASE: u32 = 4;

pub const POINTER_SIZE_ENCBASE: u32 = 3;
pub const LIVE_POOL_SIZE_ENCBASE: u32 = 6;
pub const LIVESTATE_RLE_SKIP_ENCBASE: u32 = 4;
pub const LIVESTATE_RLE_RUN_ENCBASE: u32 = 2;
pub const NORM_CODE_OFFSET_DELTA_ENCBASE: u32 = 3;

/// log2 of the number of normalized pseudo-offsets covered by one chunk of transition data.
pub const LOG_NUM_NORM_CODE_OFFSETS_PER_CHUNK: u32 = 6;
/// The number of normalized pseudo-offsets covered by one chunk of transition data.
pub const NUM_NORM_CODE_OFFSETS_PER_CHUNK: u32 = 1 << LOG_NUM_NORM_CODE_OFFSETS_PER_CHUNK;

/// Width of the return kind field in the header.
pub const RETURN_KIND_BITS: u32 = 3;
/// Width of the stack base kind field of a stack slot.
pub const STACK_BASE_BITS: u32 = 2;
/// Width of the interior/pinned flags of a slot.
pub const SLOT_FLAGS_BITS: u32 = 2;

/// The code offset at which untracked slots are reported by diagnostics. It is `-2` viewed as an
/// unsigned 32-bit value, which no real code offset can reach.
pub const UNTRACKED_SENTINEL_OFFSET: u32 = u32::MAX - 1;

const_assert!(NUM_NORM_CODE_OFFSETS_PER_CHUNK.is_power_of_two());
const_assert!(MIN_SUPPORTED_GCINFO_VERSION <= GCINFO_VERSION);
