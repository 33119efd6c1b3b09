use loom_tensor::Tensor;

use crate::Rng;

/// A time-major batch: inputs and targets, one `(batch, 1)` id column per step.
pub type SequenceBatch = (Vec<Tensor>, Vec<Tensor>);

/// A single id sequence as a batch of one.
pub fn sequence(ids: &[usize]) -> Vec<Tensor> {
    ids.iter().map(|&id| Tensor::from_ids(&[id])).collect()
}

/// Transpose `rows[b][t]` into `T` columns of shape `(batch, 1)`.
fn time_major(rows: &[&[usize]]) -> Vec<Tensor> {
    let steps = rows.first().map_or(0, |r| r.len());
    (0..steps)
        .map(|t| {
            let column: Vec<usize> = rows.iter().map(|r| r[t]).collect();
            Tensor::from_ids(&column)
        })
        .collect()
}

/// Paired source/target id sequences of fixed lengths (already padded).
#[derive(Debug, Clone)]
pub struct SequencePairs {
    sources: Vec<Vec<usize>>,
    targets: Vec<Vec<usize>>,
}

impl SequencePairs {
    pub fn new(sources: Vec<Vec<usize>>, targets: Vec<Vec<usize>>) -> Self {
        assert_eq!(
            sources.len(),
            targets.len(),
            "source and target counts must match"
        );
        for (name, seqs) in [("source", &sources), ("target", &targets)] {
            if let Some(first) = seqs.first() {
                assert!(
                    seqs.iter().all(|s| s.len() == first.len()),
                    "all {name} sequences must have the same length"
                );
            }
        }
        Self { sources, targets }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn get(&self, index: usize) -> (&[usize], &[usize]) {
        (&self.sources[index], &self.targets[index])
    }

    /// Reverse every source sequence in place.
    pub fn reverse_sources(mut self) -> Self {
        for s in &mut self.sources {
            s.reverse();
        }
        self
    }

    /// Split into the first `n` pairs and the rest.
    pub fn split_at(mut self, n: usize) -> (Self, Self) {
        let sources = self.sources.split_off(n);
        let targets = self.targets.split_off(n);
        (self, Self { sources, targets })
    }

    /// Time-major batches of up to `batch_size` pairs. With an `rng` the
    /// pair order is shuffled first; the last batch may be smaller.
    pub fn batches(&self, batch_size: usize, rng: Option<&mut Rng>) -> Vec<SequenceBatch> {
        assert!(batch_size > 0, "batch_size must be positive");
        let mut indices: Vec<usize> = (0..self.len()).collect();
        if let Some(rng) = rng {
            rng.shuffle(&mut indices);
        }
        indices
            .chunks(batch_size)
            .map(|chunk| {
                let src: Vec<&[usize]> = chunk.iter().map(|&i| self.sources[i].as_slice()).collect();
                let tgt: Vec<&[usize]> = chunk.iter().map(|&i| self.targets[i].as_slice()).collect();
                (time_major(&src), time_major(&tgt))
            })
            .collect()
    }
}

/// Truncated-BPTT batches for a language model over one token stream.
///
/// Each of the `batch_size` rows reads the corpus from its own offset
/// (`row * len / batch_size`), wrapping around, so consecutive batches
/// continue each row's sequence. Targets are the inputs shifted by one.
pub fn lm_batches(corpus: &[usize], batch_size: usize, time_size: usize) -> Vec<SequenceBatch> {
    assert!(
        batch_size > 0 && time_size > 0,
        "batch_size and time_size must be positive"
    );
    if corpus.len() < 2 {
        return Vec::new();
    }
    let xs = &corpus[..corpus.len() - 1];
    let ts = &corpus[1..];
    let data_size = xs.len();
    let iters = data_size / (batch_size * time_size);
    let jump = data_size / batch_size;
    let offsets: Vec<usize> = (0..batch_size).map(|b| b * jump).collect();

    let mut time_idx = 0;
    let mut batches = Vec::with_capacity(iters);
    for _ in 0..iters {
        let mut bx = Vec::with_capacity(time_size);
        let mut bt = Vec::with_capacity(time_size);
        for _ in 0..time_size {
            let positions: Vec<usize> = offsets
                .iter()
                .map(|o| (o + time_idx) % data_size)
                .collect();
            let x: Vec<usize> = positions.iter().map(|&p| xs[p]).collect();
            let t: Vec<usize> = positions.iter().map(|&p| ts[p]).collect();
            bx.push(Tensor::from_ids(&x));
            bt.push(Tensor::from_ids(&t));
            time_idx += 1;
        }
        batches.push((bx, bt));
    }
    batches
}

/// CBOW training pairs from one token stream.
///
/// Every word with `window` neighbours on both sides becomes a target. The
/// result holds `2 * window` context columns, ordered from the leftmost
/// neighbour to the rightmost, and the target column.
pub fn cbow_contexts(corpus: &[usize], window: usize) -> (Vec<Tensor>, Tensor) {
    assert!(window > 0, "window must be positive");
    let centres: Vec<usize> = (window..corpus.len().saturating_sub(window)).collect();
    let offsets = (1..=window).rev().map(|d| -(d as isize)).chain(1..=window as isize);
    let contexts = offsets
        .map(|offset| {
            let ids: Vec<usize> = centres
                .iter()
                .map(|&c| corpus[(c as isize + offset) as usize])
                .collect();
            Tensor::from_ids(&ids)
        })
        .collect();
    let targets: Vec<usize> = centres.iter().map(|&c| corpus[c]).collect();
    (contexts, Tensor::from_ids(&targets))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs() -> SequencePairs {
        SequencePairs::new(
            vec![vec![1, 2, 3], vec![4, 5, 6], vec![7, 8, 9]],
            vec![vec![0, 3], vec![0, 6], vec![0, 9]],
        )
    }

    #[test]
    fn batches_are_time_major() {
        let batches = pairs().batches(2, None);
        assert_eq!(batches.len(), 2);
        let (xs, ts) = &batches[0];
        assert_eq!(xs.len(), 3);
        assert_eq!(xs[0].to_ids(), vec![1, 4]);
        assert_eq!(xs[2].to_ids(), vec![3, 6]);
        assert_eq!(ts[1].to_ids(), vec![3, 6]);
        assert_eq!(batches[1].0[0].shape(), (1, 1));
    }

    #[test]
    fn shuffle_keeps_pairs_together() {
        let batches = pairs().batches(3, Some(&mut Rng::new(9)));
        let (xs, ts) = &batches[0];
        for (last, target) in xs[2].to_ids().into_iter().zip(ts[1].to_ids()) {
            assert_eq!(last, target);
        }
    }

    #[test]
    fn reverse_and_split() {
        let (head, tail) = pairs().reverse_sources().split_at(1);
        assert_eq!(head.len(), 1);
        assert_eq!(tail.len(), 2);
        assert_eq!(head.get(0).0, &[3, 2, 1]);
    }

    #[test]
    #[should_panic(expected = "same length")]
    fn ragged_sources_rejected() {
        SequencePairs::new(vec![vec![1], vec![1, 2]], vec![vec![0], vec![0]]);
    }

    #[test]
    fn lm_batches_shift_by_one() {
        let corpus: Vec<usize> = (0..21).collect();
        let batches = lm_batches(&corpus, 2, 5);
        // 20 inputs / (2 * 5) = 2 iterations
        assert_eq!(batches.len(), 2);
        let (xs, ts) = &batches[0];
        assert_eq!(xs.len(), 5);
        assert_eq!(xs[0].to_ids(), vec![0, 10]);
        assert_eq!(ts[0].to_ids(), vec![1, 11]);
        // second batch continues each row
        assert_eq!(batches[1].0[0].to_ids(), vec![5, 15]);
    }

    #[test]
    fn cbow_contexts_surround_each_target() {
        // you say goodbye and i say hello .
        let corpus = [0, 1, 2, 3, 4, 1, 5, 6];
        let (contexts, target) = cbow_contexts(&corpus, 1);
        assert_eq!(target.to_ids(), vec![1, 2, 3, 4, 1, 5]);
        assert_eq!(contexts.len(), 2);
        assert_eq!(contexts[0].to_ids(), vec![0, 1, 2, 3, 4, 1]);
        assert_eq!(contexts[1].to_ids(), vec![2, 3, 4, 1, 5, 6]);

        let (wide, target) = cbow_contexts(&corpus, 2);
        assert_eq!(target.to_ids(), vec![2, 3, 4, 1]);
        let first: Vec<usize> = wide.iter().map(|c| c.to_ids()[0]).collect();
        assert_eq!(first, vec![0, 1, 3, 4]);
    }

    #[test]
    fn sequence_is_batch_of_one() {
        let s = sequence(&[3, 1]);
        assert_eq!(s.len(), 2);
        assert_eq!(s[1], Tensor::from_ids(&[1]));
    }
}
