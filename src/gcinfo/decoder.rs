use std::ops::ControlFlow;

use crate::gcinfo::error::Result;
use crate::gcinfo::header::{HeaderDecoder, MethodHeader, ReturnKind};
use crate::gcinfo::liveness::LivenessEnumerator;
use crate::gcinfo::reporter::RootReporter;
use crate::gcinfo::safe_points::{InterruptibleRange, SafePointIndex};
use crate::gcinfo::slot_table::SlotTable;
use crate::gcinfo::{EnumerationFlags, GcInfoBlob};
use crate::util::bitmap::LiveBitmap;
use crate::util::log;
use crate::util::options::{Options, OPTIONS};
use crate::vm::{Architecture, FrameAccessor, RegisterId, RootVisitor};

/// A decoded view of one method's GC info.
///
/// Creating a decoder reads the header, the safe point and interruptible range indices and the
/// eager prefix of the slot table. Everything else is decoded on demand by the queries. A
/// decoder borrows its blob and is meant to live for one stack walk at most; it is not `Sync`
/// because of the live-row cache, but any number of decoders may read the same blob
/// concurrently.
pub struct GcInfoDecoder<'a, A: Architecture> {
    blob: &'a GcInfoBlob,
    header: MethodHeader,
    safe_points: SafePointIndex<'a, A>,
    slots: SlotTable<'a, A>,
    liveness: LivenessEnumerator<'a>,
}

impl<'a, A: Architecture> GcInfoDecoder<'a, A> {
    /// Open `blob` with the process-wide [`OPTIONS`].
    pub fn new(blob: &'a GcInfoBlob) -> Result<Self> {
        Self::with_options(blob, &OPTIONS)
    }

    pub fn with_options(blob: &'a GcInfoBlob, options: &Options) -> Result<Self> {
        let mut reader = blob.reader()?;
        let header = HeaderDecoder::decode_from::<A>(&mut reader)?;
        log::debug!("Decoded {} GC info header: {:?}", A::NAME, header);
        let safe_points = SafePointIndex::decode(&mut reader, &header)?;
        let slots = SlotTable::decode(&mut reader, options.eager_slot_limit)?;
        let liveness = LivenessEnumerator::decode(
            &mut reader,
            &safe_points,
            slots.num_tracked(),
            options.cache_live_rows,
        )?;
        Ok(GcInfoDecoder {
            blob,
            header,
            safe_points,
            slots,
            liveness,
        })
    }

    pub fn blob(&self) -> &'a GcInfoBlob {
        self.blob
    }

    pub fn header(&self) -> &MethodHeader {
        &self.header
    }

    pub fn slot_table(&self) -> &SlotTable<'a, A> {
        &self.slots
    }

    pub fn safe_point_index(&self) -> &SafePointIndex<'a, A> {
        &self.safe_points
    }

    pub fn liveness(&self) -> &LivenessEnumerator<'a> {
        &self.liveness
    }

    pub fn code_length(&self) -> u32 {
        self.header.code_length
    }

    pub fn is_safe_point(&self, offset: u32) -> Result<bool> {
        self.safe_points.is_safe_point(offset)
    }

    pub fn find_safe_point(&self, offset: u32) -> Result<Option<u32>> {
        self.safe_points.find_safe_point(offset)
    }

    pub fn is_interruptible(&self, offset: u32) -> bool {
        self.safe_points.is_interruptible(offset)
    }

    pub fn enumerate_interruptible_ranges<F>(&self, visitor: F) -> ControlFlow<()>
    where
        F: FnMut(InterruptibleRange) -> ControlFlow<()>,
    {
        self.safe_points.enumerate_interruptible_ranges(visitor)
    }

    pub fn interruptible_ranges(&self) -> Vec<InterruptibleRange> {
        self.safe_points.interruptible_ranges().collect()
    }

    /// The tracked slots live at `offset`, as indices into the slot table.
    pub fn tracked_live_slots(&self, offset: u32, flags: &EnumerationFlags) -> Result<LiveBitmap> {
        self.liveness
            .tracked_live_set(offset, flags, &self.safe_points)
    }

    /// Report every root of the frame at `offset`: the live tracked slots, then (unless the
    /// flags suppress them) the untracked slots.
    ///
    /// An error means the root set of the frame is unknown. Roots reported before the error
    /// must not be trusted on their own.
    pub fn enumerate_live_roots<F: FrameAccessor, V: RootVisitor + ?Sized>(
        &self,
        offset: u32,
        frame: &F,
        flags: &EnumerationFlags,
        visitor: &mut V,
    ) -> Result<()> {
        log::trace!("Enumerating live roots at {:#x} with {:?}", offset, flags);
        let reporter = RootReporter::<A>::new(&self.header);
        let live = self.tracked_live_slots(offset, flags)?;
        let mut lookup = self.slots.lookup();
        for index in live.iter_ones() {
            let slot = lookup.get(index as u32)?;
            reporter.report(&slot, frame, flags, visitor)?;
        }
        if flags.reports_untracked() {
            self.report_untracked(&reporter, frame, flags, visitor)?;
        }
        Ok(())
    }

    /// Report the untracked slots only. They are live for the whole method, so no offset is
    /// involved. Scratch slots are reported iff the frame is the active one.
    pub fn enumerate_untracked_roots<F: FrameAccessor, V: RootVisitor + ?Sized>(
        &self,
        frame: &F,
        visitor: &mut V,
    ) -> Result<()> {
        let active = frame.is_active_frame();
        let flags = EnumerationFlags {
            active_frame: active,
            report_scratch: active,
            ..Default::default()
        };
        let reporter = RootReporter::<A>::new(&self.header);
        self.report_untracked(&reporter, frame, &flags, visitor)
    }

    fn report_untracked<F: FrameAccessor, V: RootVisitor + ?Sized>(
        &self,
        reporter: &RootReporter<A>,
        frame: &F,
        flags: &EnumerationFlags,
        visitor: &mut V,
    ) -> Result<()> {
        for slot in self.slots.untracked() {
            let (_, slot) = slot?;
            reporter.report(&slot, frame, flags, visitor)?;
        }
        Ok(())
    }

    pub fn prolog_size(&self) -> Option<u32> {
        self.header.prolog_size()
    }

    pub fn stack_base_register(&self) -> Option<RegisterId> {
        self.header.stack_base_register
    }

    pub fn return_kind(&self) -> ReturnKind {
        self.header.return_kind
    }

    /// The GS cookie's offset from the caller's stack pointer.
    pub fn gs_cookie_stack_slot(&self) -> Option<i32> {
        self.header.gs_cookie_stack_slot
    }
}

// Single-field accessors for unwinding and exception handling, which only need the header.

pub fn decode_prolog_size<A: Architecture>(blob: &GcInfoBlob) -> Result<Option<u32>> {
    Ok(HeaderDecoder::decode::<A>(blob)?.prolog_size())
}

pub fn decode_stack_base_register<A: Architecture>(blob: &GcInfoBlob) -> Result<Option<RegisterId>> {
    Ok(HeaderDecoder::decode::<A>(blob)?.stack_base_register)
}

pub fn decode_return_kind<A: Architecture>(blob: &GcInfoBlob) -> Result<ReturnKind> {
    Ok(HeaderDecoder::decode::<A>(blob)?.return_kind)
}

pub fn decode_gs_cookie_slot<A: Architecture>(blob: &GcInfoBlob) -> Result<Option<i32>> {
    Ok(HeaderDecoder::decode::<A>(blob)?.gs_cookie_stack_slot)
}
