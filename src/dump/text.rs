//! A line-oriented text dump of a method's GC info, for tooling and for eyeballing encoder
//! output.
//!
//! The dump starts with a banner and one line per header field, followed by the liveness
//! transitions found by the [`StateChangeWalker`]:
//!
//! ```text
//! fffffffe +sp+0x8
//! 0004 interruptible
//! 0004 +rbx
//! 0010 +caller.sp-0x10(interior)
//! 0018 -rbx
//! ```
//!
//! Every transition appears exactly once, in ascending offset order. Untracked slots are listed
//! first at the sentinel offset `fffffffe`. If decoding fails, the lines written so far are
//! followed by a single error line. Transitions are buffered until the walk completes, so a
//! failing walk prints none of them. Only I/O errors of the output are returned to the caller.

use std::io::{self, Write};
use std::ops::ControlFlow;

use itertools::Itertools;

use crate::build_info;
use crate::dump::walker::{StateChangeVisitor, StateChangeWalker, WalkError};
use crate::gcinfo::header::MethodHeader;
use crate::gcinfo::{DecodeError, GcInfoBlob, GcInfoDecoder, SlotFlags};
use crate::util::log;
use crate::util::options::{Options, OPTIONS};
use crate::vm::{Arch, Architecture, Arm64, RegisterId, StackBase, X64};

/// Dump `blob` for architecture `A`, with the process-wide [`OPTIONS`].
pub fn dump_gc_info<A: Architecture, W: Write>(blob: &GcInfoBlob, out: &mut W) -> io::Result<()> {
    dump_gc_info_with_options::<A, W>(blob, out, &OPTIONS)
}

/// Dump `blob` for an architecture selected at run time.
pub fn dump_with_arch<W: Write>(arch: Arch, blob: &GcInfoBlob, out: &mut W) -> io::Result<()> {
    match arch {
        Arch::X64 => dump_gc_info::<X64, W>(blob, out),
        Arch::Arm64 => dump_gc_info::<Arm64, W>(blob, out),
    }
}

/// Dump `blob` for the architecture named by the `dump_arch` option.
pub fn dump<W: Write>(blob: &GcInfoBlob, out: &mut W) -> io::Result<()> {
    log::info!("Dumping GC info as {:?}", OPTIONS.dump_arch);
    dump_with_arch(OPTIONS.dump_arch, blob, out)
}

pub fn dump_gc_info_with_options<A: Architecture, W: Write>(
    blob: &GcInfoBlob,
    out: &mut W,
    options: &Options,
) -> io::Result<()> {
    writeln!(
        out,
        "gcinfo {} ({}), {} bytes of {} GC info, format version {}",
        build_info::GCINFO_PKG_VERSION,
        *build_info::GCINFO_GIT_VERSION,
        blob.len(),
        A::NAME,
        blob.version()
    )?;
    let decoder = match GcInfoDecoder::<A>::with_options(blob, options) {
        Ok(decoder) => decoder,
        Err(e) => return report_failure(out, WalkError::Decode(e)),
    };
    write_header::<A, W>(out, decoder.header())?;

    let safe_points = (0..decoder.safe_point_index().num_safe_points())
        .map(|i| decoder.safe_point_index().safe_point_offset(i))
        .collect::<Result<Vec<_>, DecodeError>>();
    let safe_points = match safe_points {
        Ok(safe_points) => safe_points,
        Err(e) => return report_failure(out, WalkError::Decode(e)),
    };
    writeln!(
        out,
        "Safe points: {}",
        safe_points.iter().map(|o| format!("{:04x}", o)).join(" ")
    )?;
    writeln!(
        out,
        "Interruptible ranges: {}",
        decoder
            .interruptible_ranges()
            .iter()
            .map(|r| format!("[{:04x}, {:04x})", r.start, r.stop))
            .join(" ")
    )?;

    let walker = match StateChangeWalker::new(&decoder) {
        Ok(walker) => walker,
        Err(e) => return report_failure(out, e),
    };
    let mut transitions = vec![];
    let mut printer = TransitionPrinter::<A, Vec<u8>> {
        out: &mut transitions,
        warn_suspicious_stack_base: options.warn_suspicious_stack_base,
        io_error: None,
        _arch: std::marker::PhantomData,
    };
    let walked = walker.walk(&mut printer);
    if let Some(e) = printer.io_error {
        return Err(e);
    }
    match walked {
        Ok(_) => out.write_all(&transitions),
        Err(e) => report_failure(out, e),
    }
}

fn report_failure<W: Write>(out: &mut W, error: WalkError) -> io::Result<()> {
    log::error!("Failed to dump GC info: {}", error);
    let message = match error {
        WalkError::Decode(DecodeError::OutOfMemory) => "out of memory",
        WalkError::InvalidPointer(_) => "reported invalid pointer",
        WalkError::Decode(_) => "decoder failed",
    };
    writeln!(out, "{}", message)
}

fn write_header<A: Architecture, W: Write>(out: &mut W, header: &MethodHeader) -> io::Result<()> {
    let caller_sp_slot = |slot: Option<i32>| match slot {
        Some(offset) => stack_slot_name(StackBase::CallerSp, offset),
        None => "<none>".to_string(),
    };
    writeln!(out, "Security object: {}", caller_sp_slot(header.security_object_stack_slot))?;
    write!(out, "GS cookie: {}", caller_sp_slot(header.gs_cookie_stack_slot))?;
    match header.valid_range {
        Some(range) if header.has_gs_cookie_slot() => {
            writeln!(out, " valid in [{:04x}, {:04x})", range.start, range.end)?
        }
        _ => writeln!(out)?,
    }
    writeln!(out, "PSPSym: {}", caller_sp_slot(header.psp_sym_stack_slot))?;
    writeln!(
        out,
        "Generics context: {} ({})",
        caller_sp_slot(header.generics_context_stack_slot),
        header.generics_context_kind
    )?;
    writeln!(out, "Varargs: {}", if header.is_var_arg { "yes" } else { "no" })?;
    match header.stack_base_register {
        Some(reg) => writeln!(out, "Frame pointer: {}", A::register_name(reg))?,
        None => writeln!(out, "Frame pointer: <none>")?,
    }
    writeln!(out, "Return kind: {}", header.return_kind)?;
    writeln!(out, "Code size: {:x}", header.code_length)?;
    if let Some(prolog) = header.prolog_size() {
        writeln!(out, "Prolog size: {:x}", prolog)?;
    }
    if let Some(size) = header.size_of_edit_and_continue_area {
        writeln!(out, "EnC preserved area: {:#x}", size)?;
    }
    if let Some(slot) = header.reverse_pinvoke_frame_slot {
        writeln!(out, "Reverse P/Invoke frame: {}", stack_slot_name(slot.base, slot.offset))?;
    }
    if let Some(size) = header.size_of_stack_scratch_area {
        writeln!(out, "Outgoing/scratch area: {:#x}", size)?;
    }
    Ok(())
}

/// The text name of a stack slot, such as `caller.sp-0x10` or `sp+0x8`.
pub fn stack_slot_name(base: StackBase, offset: i32) -> String {
    let sign = if offset < 0 { '-' } else { '+' };
    format!("{}{}{:#x}", base, sign, offset.unsigned_abs())
}

fn flags_suffix(flags: SlotFlags) -> &'static str {
    match (flags.interior, flags.pinned) {
        (false, false) => "",
        (true, false) => "(interior)",
        (false, true) => "(pinned)",
        (true, true) => "(interior)(pinned)",
    }
}

struct TransitionPrinter<'w, A: Architecture, W: Write> {
    out: &'w mut W,
    warn_suspicious_stack_base: bool,
    io_error: Option<io::Error>,
    _arch: std::marker::PhantomData<A>,
}

impl<A: Architecture, W: Write> TransitionPrinter<'_, A, W> {
    fn line(&mut self, args: std::fmt::Arguments) -> ControlFlow<()> {
        match self.out.write_fmt(args).and_then(|_| self.out.write_all(b"\n")) {
            Ok(()) => ControlFlow::Continue(()),
            Err(e) => {
                self.io_error = Some(e);
                ControlFlow::Break(())
            }
        }
    }

    fn transition(&mut self, offset: u32, becomes_live: bool, name: &str, flags: SlotFlags) -> ControlFlow<()> {
        let marker = if becomes_live { '+' } else { '-' };
        self.line(format_args!(
            "{:04x} {}{}{}",
            offset,
            marker,
            name,
            flags_suffix(flags)
        ))
    }
}

impl<A: Architecture, W: Write> StateChangeVisitor for TransitionPrinter<'_, A, W> {
    fn on_interruptible_change(&mut self, offset: u32, interruptible: bool) -> ControlFlow<()> {
        let state = if interruptible {
            "interruptible"
        } else {
            "not interruptible"
        };
        self.line(format_args!("{:04x} {}", offset, state))
    }

    fn on_safe_point(&mut self, offset: u32) -> ControlFlow<()> {
        self.line(format_args!("{:04x} safe point", offset))
    }

    fn on_register_change(
        &mut self,
        offset: u32,
        reg: RegisterId,
        flags: SlotFlags,
        becomes_live: bool,
    ) -> ControlFlow<()> {
        self.transition(offset, becomes_live, A::register_name(reg), flags)
    }

    fn on_stack_slot_change(
        &mut self,
        offset: u32,
        flags: SlotFlags,
        base: StackBase,
        rel_offset: i32,
        becomes_live: bool,
    ) -> ControlFlow<()> {
        let name = stack_slot_name(base, rel_offset);
        self.transition(offset, becomes_live, &name, flags)?;
        // Slots below the stack pointer hold nothing a caller can rely on. We report them as
        // encoded and only point them out.
        if becomes_live
            && self.warn_suspicious_stack_base
            && base == StackBase::FrameSp
            && rel_offset < 0
        {
            log::warn!("{} is below the stack pointer; is its base register right?", name);
            self.line(format_args!("     warning: {} has a negative offset from sp", name))?;
        }
        ControlFlow::Continue(())
    }
}
