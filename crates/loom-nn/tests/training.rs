use loom_nn::{
    checkpoint, lm_batches, mse_loss, mse_loss_grad, Adam, AttentionSeq2Seq, LmConfig, LstmLm,
    Module, Optimizer, Rng, Seq2SeqConfig, SequencePairs, Sequential, Tanh, Tensor, Trainer,
    TrainerConfig, WeightInit,
};

#[test]
fn mlp_learns_xor() {
    let mut model = Sequential::mlp(
        &[2, 16, 1],
        WeightInit::Xavier,
        || Box::new(Tanh::new()),
        &mut Rng::new(42),
    );
    let x = Tensor::from_rows(&[&[0.0, 0.0], &[0.0, 1.0], &[1.0, 0.0], &[1.0, 1.0]]);
    let y = Tensor::column_vector(&[0.0, 1.0, 1.0, 0.0]);
    let mut opt = Adam::new(0.05);

    let initial = mse_loss(&model.forward(&x), &y);
    let mut loss = initial;
    for _ in 0..1000 {
        model.zero_grad();
        let pred = model.forward(&x);
        loss = mse_loss(&pred, &y);
        model.backward(&mse_loss_grad(&pred, &y));
        opt.step(&mut model.parameters_mut());
    }

    assert!(loss < 0.02, "XOR should converge, initial={initial} final={loss}");
}

#[test]
fn lstm_lm_learns_repeating_corpus() {
    let corpus: Vec<usize> = (0..200).map(|i| [0, 1, 2, 3, 2, 1][i % 6]).collect();
    let batches = lm_batches(&corpus, 4, 6);
    assert!(!batches.is_empty());

    let mut lm = LstmLm::new(&LmConfig {
        vocab_size: 4,
        wordvec_size: 8,
        hidden_size: 16,
        weight_init: WeightInit::Xavier,
        dropout: 0.0,
        seed: 3,
    });
    let losses = Trainer::new(&mut lm, Adam::new(0.02))
        .epochs(50)
        .max_grad_norm(5.0)
        .fit(&batches);

    assert_eq!(losses.len(), 50);
    assert!(losses.iter().all(|l| l.is_finite()));
    assert!(
        losses[49] < losses[0] * 0.5,
        "LM should learn the cycle, first={} final={}",
        losses[0],
        losses[49]
    );
}

#[test]
fn trainer_from_json_config() {
    let config = TrainerConfig::from_json(
        r#"{"epochs": 40, "batch_size": 2, "learning_rate": 0.05, "optimizer": "adam", "max_grad_norm": 5.0}"#,
    )
    .unwrap();

    let sources: Vec<Vec<usize>> = vec![vec![1, 2, 3], vec![3, 2, 1], vec![2, 3, 1], vec![1, 3, 2]];
    let targets: Vec<Vec<usize>> = sources
        .iter()
        .map(|s| std::iter::once(0).chain(s.iter().rev().copied()).collect())
        .collect();
    let pairs = SequencePairs::new(sources, targets);
    let batches = pairs.batches(config.batch_size, Some(&mut Rng::new(1)));

    let mut model = AttentionSeq2Seq::new(&Seq2SeqConfig::new(4, 4, 8));
    let losses = Trainer::from_config(&mut model, &config).fit(&batches);

    assert_eq!(losses.len(), 40);
    assert!(losses[39] < losses[0], "first={} final={}", losses[0], losses[39]);
}

#[test]
fn trained_lm_survives_checkpoint() {
    let config = LmConfig {
        vocab_size: 5,
        wordvec_size: 4,
        hidden_size: 6,
        weight_init: WeightInit::Xavier,
        dropout: 0.0,
        seed: 11,
    };
    let corpus: Vec<usize> = (0..60).map(|i| i % 5).collect();
    let batches = lm_batches(&corpus, 2, 5);

    let mut lm = LstmLm::new(&config);
    Trainer::new(&mut lm, Adam::new(0.01)).epochs(3).fit(&batches);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lm.safetensors");
    checkpoint::save(&lm, &path).unwrap();

    let mut restored = LstmLm::new(&LmConfig { seed: 99, ..config });
    checkpoint::load_into(&mut restored, &path).unwrap();

    let (xs, _) = &batches[0];
    lm.reset_state();
    restored.reset_state();
    assert_eq!(lm.predict(xs), restored.predict(xs));
}
