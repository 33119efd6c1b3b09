//! Benchmarks for recurrent cells, time wrappers and attention.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use loom_bench::{random_sequence, random_tensor};
use loom_nn::{
    LstmCell, Rng, RnnCell, TimeAttention, TimeLstm, TimeModule, TimeRnn, WeightInit,
};

// ---------------------------------------------------------------------------
// Single cells
// ---------------------------------------------------------------------------

fn bench_cell_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("cell_step");
    for &(batch, d, h) in &[(1, 16, 32), (32, 64, 128)] {
        let mut rng = Rng::new(42);
        let x = random_tensor(batch, d, 0.5, &mut rng);
        let h0 = random_tensor(batch, h, 0.5, &mut rng);
        let c0 = random_tensor(batch, h, 0.5, &mut rng);
        let label = format!("{batch}x{d}->{h}");

        let mut rnn = RnnCell::new(d, h, WeightInit::Xavier, &mut rng);
        group.bench_with_input(BenchmarkId::new("rnn_fwd_bwd", &label), &(), |b, _| {
            b.iter(|| {
                let out = rnn.forward(black_box(&x), &h0);
                black_box(rnn.backward(&out))
            });
        });

        let mut lstm = LstmCell::new(d, h, WeightInit::Xavier, &mut rng);
        group.bench_with_input(BenchmarkId::new("lstm_fwd_bwd", &label), &(), |b, _| {
            b.iter(|| {
                let (out, cell) = lstm.forward(black_box(&x), &h0, &c0);
                black_box(lstm.backward(&out, &cell))
            });
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Time wrappers
// ---------------------------------------------------------------------------

fn bench_time_recurrent(c: &mut Criterion) {
    let mut group = c.benchmark_group("time_recurrent");
    let (batch, d, h) = (16, 32, 64);
    for &steps in &[8, 32] {
        let mut rng = Rng::new(7);
        let xs = random_sequence(steps, batch, d, &mut rng);

        let mut rnn = TimeRnn::new(RnnCell::new(d, h, WeightInit::Xavier, &mut rng), false);
        group.bench_with_input(BenchmarkId::new("rnn", steps), &steps, |b, _| {
            b.iter(|| {
                let hs = rnn.forward(black_box(&xs));
                black_box(rnn.backward(&hs))
            });
        });

        let mut lstm = TimeLstm::new(LstmCell::new(d, h, WeightInit::Xavier, &mut rng), false);
        group.bench_with_input(BenchmarkId::new("lstm", steps), &steps, |b, _| {
            b.iter(|| {
                let hs = lstm.forward(black_box(&xs));
                black_box(lstm.backward(&hs))
            });
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Attention
// ---------------------------------------------------------------------------

fn bench_time_attention(c: &mut Criterion) {
    let mut group = c.benchmark_group("time_attention");
    let (batch, h) = (16, 64);
    for &(enc, dec) in &[(8, 8), (32, 16)] {
        let mut rng = Rng::new(3);
        let hs_enc = random_sequence(enc, batch, h, &mut rng);
        let hs_dec = random_sequence(dec, batch, h, &mut rng);
        let mut attn = TimeAttention::new();
        group.bench_with_input(
            BenchmarkId::new("fwd_bwd", format!("{enc}x{dec}")),
            &(),
            |b, _| {
                b.iter(|| {
                    let cs = attn.forward(black_box(&hs_enc), black_box(&hs_dec));
                    black_box(attn.backward(&cs))
                });
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_cell_step,
    bench_time_recurrent,
    bench_time_attention
);
criterion_main!(benches);
