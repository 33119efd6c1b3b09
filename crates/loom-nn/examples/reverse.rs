//! Train an attention seq2seq model to reverse digit strings.
//!
//! ```sh
//! RUST_LOG=info cargo run -p loom-nn --example reverse
//! ```

use loom_nn::{
    sequence, AttentionSeq2Seq, ParameterSet, Rng, Seq2SeqConfig, SequencePairs, Trainer,
    TrainerConfig,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const START: usize = 10;
const VOCAB: usize = 11;
const LENGTH: usize = 4;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut rng = Rng::new(2024);
    let sources: Vec<Vec<usize>> = (0..600)
        .map(|_| (0..LENGTH).map(|_| rng.below(10)).collect())
        .collect();
    let targets: Vec<Vec<usize>> = sources
        .iter()
        .map(|s| std::iter::once(START).chain(s.iter().rev().copied()).collect())
        .collect();
    let (train, test) = SequencePairs::new(sources, targets).split_at(540);

    let config = TrainerConfig::from_json(
        r#"{"epochs": 30, "batch_size": 32, "learning_rate": 0.01, "optimizer": "adam", "max_grad_norm": 5.0}"#,
    )
    .unwrap_or_else(|e| panic!("bad trainer config: {e}"));
    let mut model = AttentionSeq2Seq::new(&Seq2SeqConfig::new(VOCAB, 16, 64));
    let summary = model.summary();
    println!("{}", summary[0]);
    for (i, line) in summary[1..].iter().enumerate() {
        println!("{i:2}: {line}");
    }

    let batches = train.batches(config.batch_size, Some(&mut rng));
    let losses = Trainer::from_config(&mut model, &config).fit(&batches);
    if let Some(last) = losses.last() {
        info!("final training loss {last:.4}");
    }

    let mut correct = 0;
    for i in 0..test.len() {
        let (src, tgt) = test.get(i);
        let guess = model.generate(&sequence(src), START, LENGTH);
        if guess == tgt[1..] {
            correct += 1;
        }
        if i < 5 {
            println!("{src:?} -> {guess:?} (expected {:?})", &tgt[1..]);
        }
    }
    println!(
        "exact-match accuracy: {:.1}%",
        100.0 * correct as f64 / test.len() as f64
    );
}
