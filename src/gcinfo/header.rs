//! The fixed per-method preamble of a GC info blob.
//!
//! The header is a run of presence bits followed by the optional fields they gate, always in
//! the same order: var-arg flag, special-slot presence bits, special-slot offsets, code length,
//! prolog/epilog bounds, stack base register, edit-and-continue area size, reverse P/Invoke
//! frame slot, outgoing/scratch area size, and finally the safe point and interruptible range
//! counts. An absent field decodes to `None`, never to zero, so that a legitimately zero offset
//! stays distinguishable.

use strum_macros::{Display, FromRepr};

use crate::gcinfo::constants::*;
use crate::gcinfo::error::{DecodeError, Result};
use crate::gcinfo::GcInfoBlob;
use crate::util::bit_stream::{BitStreamReader, BitStreamWriter};
use crate::vm::{Architecture, RegisterId, StackBase};

/// Where a shared-generics method keeps its instantiation context.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display)]
pub enum GenericsContextKind {
    None,
    /// The context is reachable from the `this` pointer.
    ThisPointer,
    /// The context is a method descriptor passed as a hidden argument.
    MethodDescriptor,
    /// The context is a method table passed as a hidden argument.
    MethodTable,
}

/// What the method returns in its return register(s), as far as the GC is concerned.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display, FromRepr)]
#[repr(u8)]
pub enum ReturnKind {
    Scalar = 0,
    Object = 1,
    ByRef = 2,
    ObjectObject = 3,
    ObjectByRef = 4,
    ByRefObject = 5,
    ByRefByRef = 6,
}

/// A stack location given as an offset from a [`StackBase`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct StackSlotRef {
    pub offset: i32,
    pub base: StackBase,
}

/// The code range, between prolog and epilog, in which the special slots hold meaningful
/// values. `start < end` always holds for a decoded range.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ValidRange {
    pub start: u32,
    pub end: u32,
}

impl ValidRange {
    pub fn contains(&self, offset: u32) -> bool {
        self.start <= offset && offset < self.end
    }
}

/// The decoded header of one method's GC info. Code offsets and sizes are in bytes; stack
/// offsets of the special slots are relative to the caller's stack pointer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodHeader {
    pub is_var_arg: bool,
    pub security_object_stack_slot: Option<i32>,
    pub gs_cookie_stack_slot: Option<i32>,
    pub psp_sym_stack_slot: Option<i32>,
    pub generics_context_kind: GenericsContextKind,
    pub generics_context_stack_slot: Option<i32>,
    pub stack_base_register: Option<RegisterId>,
    pub return_kind: ReturnKind,
    pub code_length: u32,
    pub valid_range: Option<ValidRange>,
    pub size_of_edit_and_continue_area: Option<u32>,
    pub reverse_pinvoke_frame_slot: Option<StackSlotRef>,
    /// SP-relative stack slots below this size are outgoing-argument/scratch space.
    pub size_of_stack_scratch_area: Option<u32>,
    pub num_safe_points: u32,
    pub num_interruptible_ranges: u32,
}

impl Default for MethodHeader {
    fn default() -> Self {
        MethodHeader {
            is_var_arg: false,
            security_object_stack_slot: None,
            gs_cookie_stack_slot: None,
            psp_sym_stack_slot: None,
            generics_context_kind: GenericsContextKind::None,
            generics_context_stack_slot: None,
            stack_base_register: None,
            return_kind: ReturnKind::Scalar,
            code_length: 0,
            valid_range: None,
            size_of_edit_and_continue_area: None,
            reverse_pinvoke_frame_slot: None,
            size_of_stack_scratch_area: None,
            num_safe_points: 0,
            num_interruptible_ranges: 0,
        }
    }
}

impl MethodHeader {
    pub fn has_security_object_slot(&self) -> bool {
        self.security_object_stack_slot.is_some()
    }

    pub fn has_gs_cookie_slot(&self) -> bool {
        self.gs_cookie_stack_slot.is_some()
    }

    pub fn has_psp_sym_slot(&self) -> bool {
        self.psp_sym_stack_slot.is_some()
    }

    pub fn is_fully_interruptible(&self) -> bool {
        self.num_interruptible_ranges > 0
    }

    /// The size of the prolog, known whenever a valid range is encoded.
    pub fn prolog_size(&self) -> Option<u32> {
        self.valid_range.map(|range| range.start)
    }

    /// Whether an SP-relative stack offset falls in the outgoing/scratch area.
    pub fn is_scratch_stack_offset(&self, offset: i32) -> bool {
        match self.size_of_stack_scratch_area {
            Some(size) => offset >= 0 && (offset as u32) < size,
            None => false,
        }
    }

    fn needs_prolog_size(&self) -> bool {
        self.has_security_object_slot() || self.generics_context_kind != GenericsContextKind::None
    }
}

pub(crate) fn denormalize_code_offset<A: Architecture>(norm: u32) -> Result<u32> {
    norm.checked_mul(A::code_alignment())
        .ok_or(DecodeError::VarIntOverflow)
}

pub(crate) fn denormalize_stack_offset<A: Architecture>(norm: i32) -> Result<i32> {
    norm.checked_mul(A::stack_slot_alignment())
        .ok_or(DecodeError::VarIntOverflow)
}

pub(crate) fn normalize_code_offset<A: Architecture>(offset: u32) -> u32 {
    assert!(
        offset % A::code_alignment() == 0,
        "code offset {:#x} is not aligned for {}",
        offset,
        A::NAME
    );
    A::normalize_code_offset(offset)
}

pub(crate) fn normalize_stack_offset<A: Architecture>(offset: i32) -> i32 {
    assert!(
        offset % A::stack_slot_alignment() == 0,
        "stack offset {} is not slot aligned for {}",
        offset,
        A::NAME
    );
    A::normalize_stack_offset(offset)
}

/// Decodes the header from the start of a blob.
pub struct HeaderDecoder;

impl HeaderDecoder {
    /// Decode the header of `blob`.
    pub fn decode<A: Architecture>(blob: &GcInfoBlob) -> Result<MethodHeader> {
        let mut reader = blob.reader()?;
        Self::decode_from::<A>(&mut reader)
    }

    /// Decode the header from `reader`, leaving it positioned at the safe point table.
    pub fn decode_from<A: Architecture>(reader: &mut BitStreamReader) -> Result<MethodHeader> {
        let is_var_arg = reader.read_bit()?;
        let has_security_object = reader.read_bit()?;
        let has_gs_cookie = reader.read_bit()?;
        let has_psp_sym = reader.read_bit()?;
        let context_via_this = reader.read_bit()?;
        let context_via_method_desc = reader.read_bit()?;
        let context_via_method_table = reader.read_bit()?;
        let has_stack_base_register = reader.read_bit()?;
        let has_edit_and_continue_area = reader.read_bit()?;
        let has_reverse_pinvoke_frame = reader.read_bit()?;
        let has_stack_scratch_area = reader.read_bit()?;

        let generics_context_kind = match (
            context_via_this,
            context_via_method_desc,
            context_via_method_table,
        ) {
            (false, false, false) => GenericsContextKind::None,
            (true, false, false) => GenericsContextKind::ThisPointer,
            (false, true, false) => GenericsContextKind::MethodDescriptor,
            (false, false, true) => GenericsContextKind::MethodTable,
            _ => {
                return Err(DecodeError::MalformedHeader(
                    "more than one generics context kind",
                ))
            }
        };
        let return_kind = ReturnKind::from_repr(reader.read_bits(RETURN_KIND_BITS)? as u8)
            .ok_or(DecodeError::MalformedHeader("unknown return kind"))?;

        let mut read_slot = |present: bool, base: u32| -> Result<Option<i32>> {
            if present {
                Ok(Some(denormalize_stack_offset::<A>(reader.decode_var_i32(base)?)?))
            } else {
                Ok(None)
            }
        };
        let security_object_stack_slot =
            read_slot(has_security_object, SECURITY_OBJECT_STACK_SLOT_ENCBASE)?;
        let gs_cookie_stack_slot = read_slot(has_gs_cookie, GS_COOKIE_STACK_SLOT_ENCBASE)?;
        let psp_sym_stack_slot = read_slot(has_psp_sym, PSP_SYM_STACK_SLOT_ENCBASE)?;
        let generics_context_stack_slot = read_slot(
            generics_context_kind != GenericsContextKind::None,
            GENERICS_INST_CONTEXT_STACK_SLOT_ENCBASE,
        )?;

        let code_length =
            denormalize_code_offset::<A>(reader.decode_var_u32(CODE_LENGTH_ENCBASE)?)?;

        let valid_range = if has_gs_cookie {
            let prolog =
                denormalize_code_offset::<A>(reader.decode_var_u32(NORM_PROLOG_SIZE_ENCBASE)?)?;
            let epilog =
                denormalize_code_offset::<A>(reader.decode_var_u32(NORM_EPILOG_SIZE_ENCBASE)?)?;
            let end = code_length
                .checked_sub(epilog)
                .ok_or(DecodeError::MalformedHeader("epilog longer than the method"))?;
            Some(ValidRange { start: prolog, end })
        } else if has_security_object || generics_context_kind != GenericsContextKind::None {
            let prolog =
                denormalize_code_offset::<A>(reader.decode_var_u32(NORM_PROLOG_SIZE_ENCBASE)?)?;
            let end = prolog
                .checked_add(1)
                .ok_or(DecodeError::MalformedHeader("prolog size overflows"))?;
            Some(ValidRange { start: prolog, end })
        } else {
            None
        };
        if let Some(range) = valid_range {
            if range.start >= range.end || range.end > code_length {
                return Err(DecodeError::MalformedHeader(
                    "empty or out of bounds valid range",
                ));
            }
        }

        let stack_base_register = if has_stack_base_register {
            let reg = A::denormalize_stack_base_register(
                reader.decode_var_u32(STACK_BASE_REGISTER_ENCBASE)?,
            );
            if reg.as_u32() >= A::NUM_REGISTERS {
                return Err(DecodeError::MalformedHeader(
                    "stack base register out of range",
                ));
            }
            Some(reg)
        } else {
            None
        };
        let size_of_edit_and_continue_area = if has_edit_and_continue_area {
            Some(reader.decode_var_u32(SIZE_OF_EDIT_AND_CONTINUE_PRESERVED_AREA_ENCBASE)?)
        } else {
            None
        };
        let reverse_pinvoke_frame_slot = if has_reverse_pinvoke_frame {
            let offset =
                denormalize_stack_offset::<A>(reader.decode_var_i32(REVERSE_PINVOKE_FRAME_ENCBASE)?)?;
            let base = StackBase::from_bits(reader.read_bits(STACK_BASE_BITS)? as u8)?;
            Some(StackSlotRef { offset, base })
        } else {
            None
        };
        let size_of_stack_scratch_area = if has_stack_scratch_area {
            let norm = reader.decode_var_u32(SIZE_OF_STACK_AREA_ENCBASE)?;
            Some(
                norm.checked_mul(A::stack_slot_alignment() as u32)
                    .ok_or(DecodeError::VarIntOverflow)?,
            )
        } else {
            None
        };

        let num_safe_points = reader.decode_var_u32(NUM_SAFE_POINTS_ENCBASE)?;
        let num_interruptible_ranges = reader.decode_var_u32(NUM_INTERRUPTIBLE_RANGES_ENCBASE)?;

        Ok(MethodHeader {
            is_var_arg,
            security_object_stack_slot,
            gs_cookie_stack_slot,
            psp_sym_stack_slot,
            generics_context_kind,
            generics_context_stack_slot,
            stack_base_register,
            return_kind,
            code_length,
            valid_range,
            size_of_edit_and_continue_area,
            reverse_pinvoke_frame_slot,
            size_of_stack_scratch_area,
            num_safe_points,
            num_interruptible_ranges,
        })
    }

    /// Write `header` in the layout [`HeaderDecoder::decode_from`] reads.
    ///
    /// Panics if the header cannot be represented: misaligned offsets, a special slot that
    /// needs a valid range without one, or a valid range that does not fit the method.
    pub fn encode<A: Architecture>(header: &MethodHeader, writer: &mut BitStreamWriter) {
        let kind = header.generics_context_kind;
        assert_eq!(
            kind != GenericsContextKind::None,
            header.generics_context_stack_slot.is_some(),
            "a generics context kind needs a stack slot"
        );
        writer.write_bit(header.is_var_arg);
        writer.write_bit(header.has_security_object_slot());
        writer.write_bit(header.has_gs_cookie_slot());
        writer.write_bit(header.has_psp_sym_slot());
        writer.write_bit(kind == GenericsContextKind::ThisPointer);
        writer.write_bit(kind == GenericsContextKind::MethodDescriptor);
        writer.write_bit(kind == GenericsContextKind::MethodTable);
        writer.write_bit(header.stack_base_register.is_some());
        writer.write_bit(header.size_of_edit_and_continue_area.is_some());
        writer.write_bit(header.reverse_pinvoke_frame_slot.is_some());
        writer.write_bit(header.size_of_stack_scratch_area.is_some());
        writer.write_bits(header.return_kind as usize, RETURN_KIND_BITS);

        for (slot, base) in [
            (header.security_object_stack_slot, SECURITY_OBJECT_STACK_SLOT_ENCBASE),
            (header.gs_cookie_stack_slot, GS_COOKIE_STACK_SLOT_ENCBASE),
            (header.psp_sym_stack_slot, PSP_SYM_STACK_SLOT_ENCBASE),
            (header.generics_context_stack_slot, GENERICS_INST_CONTEXT_STACK_SLOT_ENCBASE),
        ] {
            if let Some(offset) = slot {
                writer.encode_var_signed(normalize_stack_offset::<A>(offset) as i64, base);
            }
        }

        writer.encode_var_unsigned(
            normalize_code_offset::<A>(header.code_length) as u64,
            CODE_LENGTH_ENCBASE,
        );

        if header.has_gs_cookie_slot() || header.needs_prolog_size() {
            let range = header
                .valid_range
                .expect("special stack slots need a valid range");
            assert!(
                range.start < range.end && range.end <= header.code_length,
                "valid range {:?} does not fit a method of {} bytes",
                range,
                header.code_length
            );
            writer.encode_var_unsigned(
                normalize_code_offset::<A>(range.start) as u64,
                NORM_PROLOG_SIZE_ENCBASE,
            );
            if header.has_gs_cookie_slot() {
                writer.encode_var_unsigned(
                    normalize_code_offset::<A>(header.code_length - range.end) as u64,
                    NORM_EPILOG_SIZE_ENCBASE,
                );
            } else {
                assert_eq!(range.end, range.start + 1, "only the prolog size is encoded");
            }
        }

        if let Some(reg) = header.stack_base_register {
            writer.encode_var_unsigned(
                A::normalize_stack_base_register(reg) as u64,
                STACK_BASE_REGISTER_ENCBASE,
            );
        }
        if let Some(size) = header.size_of_edit_and_continue_area {
            writer.encode_var_unsigned(
                size as u64,
                SIZE_OF_EDIT_AND_CONTINUE_PRESERVED_AREA_ENCBASE,
            );
        }
        if let Some(slot) = header.reverse_pinvoke_frame_slot {
            writer.encode_var_signed(
                normalize_stack_offset::<A>(slot.offset) as i64,
                REVERSE_PINVOKE_FRAME_ENCBASE,
            );
            writer.write_bits(slot.base.to_bits() as usize, STACK_BASE_BITS);
        }
        if let Some(size) = header.size_of_stack_scratch_area {
            writer.encode_var_unsigned(
                normalize_stack_offset::<A>(size as i32) as u64,
                SIZE_OF_STACK_AREA_ENCBASE,
            );
        }

        writer.encode_var_unsigned(header.num_safe_points as u64, NUM_SAFE_POINTS_ENCBASE);
        writer.encode_var_unsigned(
            header.num_interruptible_ranges as u64,
            NUM_INTERRUPTIBLE_RANGES_ENCBASE,
        );
    }
}
