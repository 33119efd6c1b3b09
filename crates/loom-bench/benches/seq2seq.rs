//! End-to-end seq2seq training step and greedy generation.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use loom_bench::random_ids;
use loom_nn::{
    clip_grad_norm, Adam, AttentionSeq2Seq, Optimizer, PlainSeq2Seq, Rng, Seq2SeqConfig,
};

const VOCAB: usize = 32;

fn bench_train_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("seq2seq_train_step");
    let config = Seq2SeqConfig::new(VOCAB, 16, 64);
    let mut rng = Rng::new(1);
    let xs = random_ids(8, 16, VOCAB, &mut rng);
    let ts = random_ids(9, 16, VOCAB, &mut rng);

    let mut plain = PlainSeq2Seq::new(&config);
    let mut plain_opt = Adam::new(0.001);
    group.bench_function("plain", |b| {
        b.iter(|| {
            let loss = plain.forward(black_box(&xs), black_box(&ts));
            plain.backward();
            let mut params = plain.parameters_mut();
            clip_grad_norm(&mut params, 5.0);
            plain_opt.step(&mut params);
            black_box(loss)
        });
    });

    let mut attn = AttentionSeq2Seq::new(&config);
    let mut attn_opt = Adam::new(0.001);
    group.bench_function("attention", |b| {
        b.iter(|| {
            let loss = attn.forward(black_box(&xs), black_box(&ts));
            attn.backward();
            let mut params = attn.parameters_mut();
            clip_grad_norm(&mut params, 5.0);
            attn_opt.step(&mut params);
            black_box(loss)
        });
    });

    group.finish();
}

fn bench_generate(c: &mut Criterion) {
    let mut group = c.benchmark_group("seq2seq_generate");
    let config = Seq2SeqConfig::new(VOCAB, 16, 64);
    let xs = random_ids(8, 1, VOCAB, &mut Rng::new(2));
    let mut model = AttentionSeq2Seq::new(&config);
    for &length in &[8, 32] {
        group.bench_with_input(BenchmarkId::new("attention", length), &length, |b, &n| {
            b.iter(|| black_box(model.generate(black_box(&xs), 0, n)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_train_step, bench_generate);
criterion_main!(benches);
