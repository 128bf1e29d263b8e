use criterion::black_box;
use criterion::Criterion;

use gcinfo::gcinfo::HeaderDecoder;
use gcinfo::util::test_util::fixtures::*;
use gcinfo::vm::X64;
use gcinfo::GcInfoDecoder;

pub fn bench(c: &mut Criterion) {
    let method = CallSiteMethod::create().0;

    c.bench_function("decode header", |b| {
        b.iter(|| HeaderDecoder::decode::<X64>(black_box(&method.blob)))
    });
    c.bench_function("open decoder", |b| {
        b.iter(|| GcInfoDecoder::<X64>::new(black_box(&method.blob)).map(|d| d.code_length()))
    });
    c.bench_function("find safe point", |b| {
        let decoder = GcInfoDecoder::<X64>::new(&method.blob).unwrap();
        let last = *method.query_offsets.last().unwrap();
        b.iter(|| decoder.find_safe_point(black_box(last)))
    });
}
