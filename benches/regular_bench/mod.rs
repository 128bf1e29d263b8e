pub mod decode;
pub mod enumerate;

pub use criterion::Criterion;

pub fn bench(c: &mut Criterion) {
    decode::bench(c);
    enumerate::bench(c);
}
