use criterion::{black_box, criterion_group, criterion_main, Criterion};

use fastchic::lattice::Layout;
use fastchic::ring_buffer::TraceBuffer;
use fastchic::strength::StrengthModel;

const STRAIGHT: &str = "\
kicker 2
kicker 4
insertiondevice 8
kicker 12
insertiondevice 16
kicker 20
kicker 22
detector 42
";

pub fn propagation(c: &mut Criterion) {
    let layout = Layout::parse(STRAIGHT).unwrap();
    let model = StrengthModel::from_layout(&layout).unwrap();
    c.bench_function("generate_beams over one cycle", |b| {
        b.iter(|| {
            for t in 0..200 {
                let kicks = model.geometry_kicks(t as f64);
                let beams = layout.generate_beams(&kicks).unwrap();
                black_box(beams);
            }
        })
    });
}

pub fn trace_logging(c: &mut Criterion) {
    c.bench_function("trace buffer 2^16 refill", |b| {
        b.iter(|| {
            let mut buffer = TraceBuffer::<f64>::new(16).unwrap();
            for n in 0..65536 {
                buffer.push(n as f64);
            }
            let tail: Vec<f64> = buffer.last_n(8).collect();
            black_box(tail);
        })
    });
}

criterion_group!(benches, propagation, trace_logging);
criterion_main!(benches);
