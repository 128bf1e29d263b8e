mod common;

use common::{collect_roots, TestFrame};
use gcinfo::gcinfo::decoder::decode_gs_cookie_slot;
use gcinfo::vm::{FrameAccessor, RegisterId, StackBase, X64};
use gcinfo::{Address, DecodeError, EnumerationFlags, GcInfoDecoder, GcInfoEncoder, SlotFlags};

#[test]
fn gs_cookie_slot_and_valid_range() {
    let code_length = 0x80;
    let (prolog, epilog) = (0x10, 0x8);
    let mut encoder = GcInfoEncoder::<X64>::new(code_length);
    encoder.set_gs_cookie_stack_slot(-8, prolog, code_length - epilog);
    let blob = encoder.build();

    assert_eq!(decode_gs_cookie_slot::<X64>(&blob), Ok(Some(-8)));
    let decoder = GcInfoDecoder::<X64>::new(&blob).unwrap();
    let range = decoder.header().valid_range.unwrap();
    assert_eq!((range.start, range.end), (prolog, code_length - epilog));
    assert_eq!(decoder.prolog_size(), Some(prolog));
}

#[test]
fn two_registers_in_an_interruptible_method() {
    let (r1, r2) = (RegisterId(3), RegisterId(12));
    let code_length = 40;
    let mut encoder = GcInfoEncoder::<X64>::new(code_length);
    let s1 = encoder.get_register_slot_id(r1, SlotFlags::NONE);
    let s2 = encoder.get_register_slot_id(r2, SlotFlags::NONE);
    encoder.define_interruptible_range(0, code_length);
    encoder.set_slot_state(0, s1, true);
    encoder.set_slot_state(10, s1, false);
    encoder.set_slot_state(20, s1, true);
    encoder.set_slot_state(30, s1, false);
    encoder.set_slot_state(5, s2, true);
    let blob = encoder.build();
    let decoder = GcInfoDecoder::<X64>::new(&blob).unwrap();
    let frame = TestFrame::new(false);

    let live_registers = |offset: u32| {
        collect_roots(|visitor| {
            decoder
                .enumerate_live_roots(offset, &frame, &EnumerationFlags::caller(), visitor)
                .unwrap()
        })
        .into_iter()
        .map(|(address, _)| address)
        .collect::<Vec<_>>()
    };
    let both = vec![frame.register_address(r1), frame.register_address(r2)];
    assert_eq!(live_registers(7), both);
    assert_eq!(live_registers(25), both);
    assert_eq!(live_registers(15), vec![frame.register_address(r2)]);
    assert_eq!(live_registers(2), vec![frame.register_address(r1)]);
    assert!(!decoder.is_safe_point(7).unwrap());
}

#[test]
fn untracked_frame_sp_slot_is_reported_at_every_offset() {
    let mut encoder = GcInfoEncoder::<X64>::new(0x30);
    encoder.add_untracked_stack_slot(8, StackBase::FrameSp, SlotFlags::NONE);
    encoder.define_call_sites(&[0x10, 0x20]);
    let blob = encoder.build();
    let decoder = GcInfoDecoder::<X64>::new(&blob).unwrap();
    let frame = TestFrame::new(false);
    let expected = vec![(frame.slot(StackBase::FrameSp, 8), SlotFlags::NONE)];

    let untracked = collect_roots(|visitor| decoder.enumerate_untracked_roots(&frame, visitor).unwrap());
    assert_eq!(untracked, expected);
    // 0x18 lies between the call sites and is not interruptible.
    assert!(!decoder.is_safe_point(0x18).unwrap());
    assert!(!decoder.is_interruptible(0x18));
    for offset in [0x10, 0x18, 0x20] {
        let roots = collect_roots(|visitor| {
            decoder
                .enumerate_live_roots(offset, &frame, &EnumerationFlags::caller(), visitor)
                .unwrap()
        });
        assert_eq!(roots, expected, "offset {:#x}", offset);
    }
}

#[test]
fn safe_point_rows() {
    let mut encoder = GcInfoEncoder::<X64>::new(48);
    let slot0 = encoder.get_stack_slot_id(-8, StackBase::CallerSp, SlotFlags::NONE);
    let slot1 = encoder.get_stack_slot_id(-16, StackBase::CallerSp, SlotFlags::PINNED);
    encoder.set_slot_state(0, slot0, true);
    encoder.set_slot_state(20, slot0, false);
    encoder.set_slot_state(30, slot1, true);
    encoder.define_call_sites(&[12, 40]);
    let index0 = encoder.final_slot_index(slot0);
    let index1 = encoder.final_slot_index(slot1);
    let blob = encoder.build();
    let decoder = GcInfoDecoder::<X64>::new(&blob).unwrap();

    assert!(decoder.is_safe_point(12).unwrap());
    assert!(decoder.is_safe_point(40).unwrap());
    assert!(!decoder.is_safe_point(13).unwrap());

    let flags = EnumerationFlags::caller();
    let at_12 = decoder.tracked_live_slots(12, &flags).unwrap();
    assert_eq!(at_12.iter_ones().collect::<Vec<_>>(), vec![index0 as usize]);
    let at_40 = decoder.tracked_live_slots(40, &flags).unwrap();
    assert_eq!(at_40.iter_ones().collect::<Vec<_>>(), vec![index1 as usize]);

    let frame = TestFrame::new(false);
    let roots = collect_roots(|visitor| decoder.enumerate_live_roots(12, &frame, &flags, visitor).unwrap());
    assert_eq!(roots, vec![(frame.slot(StackBase::CallerSp, -8), SlotFlags::NONE)]);
}

#[test]
fn aborted_frame_outside_interruptible_code() {
    let mut encoder = GcInfoEncoder::<X64>::new(0x40);
    let rbx = encoder.get_register_slot_id(RegisterId(3), SlotFlags::NONE);
    encoder.add_untracked_stack_slot(-8, StackBase::CallerSp, SlotFlags::NONE);
    encoder.define_interruptible_range(0x10, 0x20);
    encoder.set_slot_state(0, rbx, true);
    let blob = encoder.build();
    let decoder = GcInfoDecoder::<X64>::new(&blob).unwrap();
    let frame = TestFrame::new(false);

    let aborted = EnumerationFlags {
        execution_aborted: true,
        ..EnumerationFlags::caller()
    };
    let roots = collect_roots(|visitor| decoder.enumerate_live_roots(0x30, &frame, &aborted, visitor).unwrap());
    assert_eq!(roots, vec![(frame.slot(StackBase::CallerSp, -8), SlotFlags::NONE)]);

    let suppressed = EnumerationFlags {
        no_report_untracked: true,
        ..aborted
    };
    let roots = collect_roots(|visitor| decoder.enumerate_live_roots(0x30, &frame, &suppressed, visitor).unwrap());
    assert!(roots.is_empty());

    // Inside the range the tracked register is reported as usual.
    let roots = collect_roots(|visitor| decoder.enumerate_live_roots(0x18, &frame, &aborted, visitor).unwrap());
    assert_eq!(roots.len(), 2);
}

#[test]
fn aborted_filter_funclet_uses_the_safe_point_row() {
    let mut encoder = GcInfoEncoder::<X64>::new(0x40);
    let rbx = encoder.get_register_slot_id(RegisterId(3), SlotFlags::NONE);
    encoder.set_slot_state(0, rbx, true);
    encoder.define_call_sites(&[0x10]);
    let blob = encoder.build();
    let decoder = GcInfoDecoder::<X64>::new(&blob).unwrap();
    let frame = TestFrame::new(false);
    let rbx_root = vec![(frame.register_address(RegisterId(3)), SlotFlags::NONE)];

    let aborted = EnumerationFlags {
        execution_aborted: true,
        ..EnumerationFlags::caller()
    };
    let in_filter = EnumerationFlags {
        filter_funclet: true,
        ..aborted
    };
    let at_call = |flags: &EnumerationFlags| {
        collect_roots(|visitor| decoder.enumerate_live_roots(0x10, &frame, flags, visitor).unwrap())
    };
    assert_eq!(at_call(&EnumerationFlags::caller()), rbx_root);
    assert_eq!(at_call(&in_filter), rbx_root);
    // Outside a filter the fault did not happen at the call.
    assert!(at_call(&aborted).is_empty());
}

#[test]
fn active_frame_reports_scratch_locations() {
    let rax = RegisterId(0);
    let mut encoder = GcInfoEncoder::<X64>::new(0x40);
    encoder.set_size_of_stack_scratch_area(0x20);
    let reg = encoder.get_register_slot_id(rax, SlotFlags::NONE);
    let outgoing = encoder.get_stack_slot_id(8, StackBase::FrameSp, SlotFlags::INTERIOR);
    let local = encoder.get_stack_slot_id(0x28, StackBase::FrameSp, SlotFlags::NONE);
    for slot in [reg, outgoing, local] {
        encoder.set_slot_state(0, slot, true);
    }
    encoder.define_interruptible_range(0, 0x40);
    let blob = encoder.build();
    let decoder = GcInfoDecoder::<X64>::new(&blob).unwrap();

    let active = TestFrame::new(true);
    let roots = collect_roots(|visitor| {
        decoder
            .enumerate_live_roots(0x18, &active, &EnumerationFlags::active(), visitor)
            .unwrap()
    });
    let mut expected = vec![
        (active.register_address(rax), SlotFlags::NONE),
        (active.slot(StackBase::FrameSp, 8), SlotFlags::INTERIOR),
        (active.slot(StackBase::FrameSp, 0x28), SlotFlags::NONE),
    ];
    expected.sort_by_key(|(address, _)| *address);
    assert_eq!(roots, expected);

    // A caller frame skips the scratch register and the outgoing argument slot.
    let caller = TestFrame::new(false);
    let roots = collect_roots(|visitor| {
        decoder
            .enumerate_live_roots(0x18, &caller, &EnumerationFlags::caller(), visitor)
            .unwrap()
    });
    assert_eq!(roots, vec![(caller.slot(StackBase::FrameSp, 0x28), SlotFlags::NONE)]);

    // Asking for scratch locations of a frame that is not executing is a policy violation.
    let not_active = EnumerationFlags {
        report_scratch: true,
        ..EnumerationFlags::caller()
    };
    let result = decoder.enumerate_live_roots(0x18, &caller, &not_active, &mut |_: Address, _: SlotFlags| {});
    assert_eq!(result, Err(DecodeError::ReportedFramePointerOrScratch));
}

#[test]
fn funclet_flags_suppress_untracked_slots() {
    let mut encoder = GcInfoEncoder::<X64>::new(0x40);
    let rbx = encoder.get_register_slot_id(RegisterId(3), SlotFlags::NONE);
    encoder.set_slot_state(0, rbx, true);
    encoder.add_untracked_stack_slot(-8, StackBase::CallerSp, SlotFlags::PINNED);
    encoder.define_call_sites(&[0x10]);
    let blob = encoder.build();
    let decoder = GcInfoDecoder::<X64>::new(&blob).unwrap();
    let frame = TestFrame::new(false);
    let rbx_root = (frame.register_address(RegisterId(3)), SlotFlags::NONE);
    let untracked_root = (frame.slot(StackBase::CallerSp, -8), SlotFlags::PINNED);

    let at_call = |flags: &EnumerationFlags| {
        collect_roots(|visitor| decoder.enumerate_live_roots(0x10, &frame, flags, visitor).unwrap())
    };
    let mut both = vec![rbx_root, untracked_root];
    both.sort_by_key(|(address, _)| *address);
    assert_eq!(at_call(&EnumerationFlags::caller()), both);
    for flags in [
        EnumerationFlags {
            parent_of_funclet: true,
            ..EnumerationFlags::caller()
        },
        EnumerationFlags {
            no_report_untracked: true,
            ..EnumerationFlags::caller()
        },
    ] {
        assert_eq!(at_call(&flags), vec![rbx_root], "{:?}", flags);
    }
    // The untracked-only query ignores the funclet flags.
    let untracked = collect_roots(|visitor| decoder.enumerate_untracked_roots(&frame, visitor).unwrap());
    assert_eq!(untracked, vec![untracked_root]);
}
