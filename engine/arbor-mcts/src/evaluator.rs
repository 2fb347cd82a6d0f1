//! Evaluator contract for position evaluation.
//!
//! The evaluator provides policy logits and value estimates for batches of
//! tensorized positions. In a deployed system this is a neural network; for
//! testing, [`UniformEvaluator`] returns flat logits, which the engine turns
//! into a uniform policy over valid actions and a `[0.5, 0.5]` value.

use arbor_core::{ValueVec, NUM_PLAYERS};
use thiserror::Error;

/// Errors that can occur during evaluation.
#[derive(Debug, Clone, Error)]
pub enum EvaluatorError {
    #[error("model evaluation failed: {0}")]
    Model(String),

    #[error("model returned a malformed batch: {0}")]
    Shape(String),

    #[error("evaluator service is shut down")]
    Disconnected,
}

/// One batch of tensorized inputs, row-major.
#[derive(Debug)]
pub struct InputBatch<'a> {
    /// `rows * row_len` floats.
    pub data: &'a [f32],
    pub rows: usize,
    pub row_len: usize,
}

/// Raw model output for one batch.
///
/// `values` holds `rows * NUM_PLAYERS` value logits; a softmax over each row
/// yields the per-player win-probability distribution. `policy_logits` holds
/// `rows * num_actions` entries; only entries inside a position's valid-action
/// mask are ever consumed.
#[derive(Debug, Clone)]
pub struct BatchOutput {
    pub values: Vec<f32>,
    pub policy_logits: Vec<f32>,
}

/// Trait for batched position evaluators.
///
/// Implementations must be callable from the evaluator service's own thread;
/// the engine never calls `predict` concurrently.
pub trait Evaluator: Send + Sync {
    /// Evaluate a batch of positions.
    ///
    /// `num_actions` is the game's global action-space size and fixes the
    /// expected policy row length.
    fn predict(&self, batch: &InputBatch<'_>, num_actions: usize)
        -> Result<BatchOutput, EvaluatorError>;
}

/// Reference evaluator: zero logits everywhere, which after masking and
/// softmax yields a uniform policy over valid actions and an even value.
#[derive(Debug, Clone, Default)]
pub struct UniformEvaluator;

impl UniformEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl Evaluator for UniformEvaluator {
    fn predict(
        &self,
        batch: &InputBatch<'_>,
        num_actions: usize,
    ) -> Result<BatchOutput, EvaluatorError> {
        Ok(BatchOutput {
            values: vec![0.0; batch.rows * NUM_PLAYERS],
            policy_logits: vec![0.0; batch.rows * num_actions],
        })
    }
}

/// One network evaluation: the value distribution plus the policy logits
/// restricted to the position's valid actions (ascending action order).
///
/// Evaluations are shared between the evaluation cache and every node whose
/// expansion consumed them, via `Arc`.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub value: ValueVec,
    pub local_policy_logits: Box<[f32]>,
}

impl Evaluation {
    /// The uniform evaluation for a position with `num_valid` legal actions;
    /// used in no-model mode.
    pub fn uniform(num_valid: usize) -> Self {
        Self {
            value: ValueVec::DRAW,
            local_policy_logits: vec![0.0; num_valid].into_boxed_slice(),
        }
    }

    /// Softmax of the stored logits: the normalized prior over the
    /// position's valid actions.
    pub fn local_policy(&self) -> Box<[f32]> {
        let mut p: Box<[f32]> = self.local_policy_logits.clone();
        softmax_in_place(&mut p);
        p
    }
}

/// Numerically stable in-place softmax. An empty slice is left untouched;
/// non-finite inputs collapse to a uniform distribution rather than NaN.
pub(crate) fn softmax_in_place(values: &mut [f32]) {
    if values.is_empty() {
        return;
    }
    let max = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        let u = 1.0 / values.len() as f32;
        values.iter_mut().for_each(|v| *v = u);
        return;
    }
    let mut sum = 0.0;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    if sum > 0.0 && sum.is_finite() {
        values.iter_mut().for_each(|v| *v /= sum);
    } else {
        let u = 1.0 / values.len() as f32;
        values.iter_mut().for_each(|v| *v = u);
    }
}

/// Softmax over a pair of value logits.
pub(crate) fn value_distribution(logits: &[f32]) -> ValueVec {
    debug_assert_eq!(logits.len(), NUM_PLAYERS);
    let mut v = [logits[0], logits[1]];
    softmax_in_place(&mut v);
    ValueVec::new(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_evaluator_shapes() {
        let eval = UniformEvaluator::new();
        let data = vec![0.0; 3 * 4];
        let batch = InputBatch {
            data: &data,
            rows: 3,
            row_len: 4,
        };
        let out = eval.predict(&batch, 9).unwrap();
        assert_eq!(out.values.len(), 3 * NUM_PLAYERS);
        assert_eq!(out.policy_logits.len(), 3 * 9);
    }

    #[test]
    fn test_softmax_uniform() {
        let mut v = [0.0f32; 4];
        softmax_in_place(&mut v);
        for x in v {
            assert!((x - 0.25).abs() < 1e-6);
        }
    }

    #[test]
    fn test_softmax_orders() {
        let mut v = [1.0f32, 3.0, 2.0];
        softmax_in_place(&mut v);
        assert!(v[1] > v[2] && v[2] > v[0]);
        assert!((v.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_softmax_non_finite_falls_back() {
        let mut v = [f32::NAN, 1.0];
        softmax_in_place(&mut v);
        assert!((v[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_value_distribution() {
        let v = value_distribution(&[0.0, 0.0]);
        assert!((v.get(0) - 0.5).abs() < 1e-6);

        let v = value_distribution(&[10.0, -10.0]);
        assert!(v.get(0) > 0.99);
    }

    #[test]
    fn test_uniform_evaluation() {
        let e = Evaluation::uniform(4);
        assert_eq!(e.value, ValueVec::DRAW);
        let p = e.local_policy();
        assert_eq!(p.len(), 4);
        assert!((p[0] - 0.25).abs() < 1e-6);
    }
}
