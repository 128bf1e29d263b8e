use criterion::black_box;
use criterion::Criterion;

use gcinfo::util::test_util::fixtures::*;
use gcinfo::util::test_util::MockFrame;
use gcinfo::util::Address;
use gcinfo::vm::X64;
use gcinfo::{EnumerationFlags, GcInfoDecoder, SlotFlags};

fn bench_method(c: &mut Criterion, name: &str, method: &SampleMethod) {
    let frame = MockFrame::new(false);
    let flags = EnumerationFlags::caller();
    c.bench_function(name, |b| {
        b.iter(|| {
            let decoder = GcInfoDecoder::<X64>::new(&method.blob).unwrap();
            let mut count = 0usize;
            for &offset in &method.query_offsets {
                let mut visit = |_: Address, _: SlotFlags| count += 1;
                decoder
                    .enumerate_live_roots(black_box(offset), &frame, &flags, &mut visit)
                    .unwrap();
            }
            count
        })
    });
}

pub fn bench(c: &mut Criterion) {
    bench_method(c, "enumerate call sites", &CallSiteMethod::create().0);
    bench_method(c, "enumerate interruptible", &InterruptibleMethod::create().0);
}
