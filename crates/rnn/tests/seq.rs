//! Back-propagation through time over variable-length batches, checked
//! against central differences and against running each sequence alone.

use approx::assert_abs_diff_eq;
use rand::rngs::StdRng;
use rand::SeedableRng;
use seqnet_core::Tensor;
use seqnet_diff::{Grad, Parameterizer, Var};
use seqnet_rnn::{PresentMap, SeqTape, Stack, Step, Vanilla};

fn pm(bits: &[u8]) -> PresentMap {
    PresentMap::new(bits.iter().map(|&b| b == 1).collect())
}

fn values(len: usize, phase: f32) -> Tensor {
    Tensor::from((0..len).map(|i| (i as f32 * 0.7 + phase).sin()).collect::<Vec<_>>())
}

/// Sum of every output weighted by `weights`, one weight tensor per step.
fn weighted_loss(tape: &SeqTape<'_>, weights: &[Tensor]) -> f32 {
    tape.outputs()
        .iter()
        .zip(weights)
        .map(|(out, w)| out.dot(w))
        .sum()
}

fn numeric_grad(
    var: &Var,
    index: usize,
    loss: impl Fn() -> f32,
) -> f32 {
    const EPS: f32 = 1e-2;
    let original = var.snapshot();

    let mut plus = original.clone();
    plus.data[index] += EPS;
    var.set(plus);
    let up = loss();

    let mut minus = original.clone();
    minus.data[index] -= EPS;
    var.set(minus);
    let down = loss();

    var.set(original);
    (up - down) / (2.0 * EPS)
}

#[test]
fn test_vanilla_gradients_match_central_differences() {
    let mut rng = StdRng::seed_from_u64(17);
    let block = Vanilla::new(2, 3, &mut rng);
    // give the start state and biases something to differentiate
    block.start.set(values(3, 0.3));
    block.biases.set(values(3, 1.1));

    let steps = vec![
        Step::new(pm(&[1, 1]), values(4, 0.0)),
        Step::new(pm(&[1, 1]), values(4, 0.5)),
        Step::new(pm(&[1, 0]), values(2, 1.0)),
    ];
    let weights = vec![values(6, 2.0), values(6, 2.5), values(3, 3.0)];

    let tape = SeqTape::forward(&block, 2, &steps);
    let mut grad = Grad::new(&tape.vars());
    tape.backward(weights.clone(), &mut grad);

    let loss = || weighted_loss(&SeqTape::forward(&block, 2, &steps), &weights);
    for var in block.parameters() {
        let analytic = grad.get(&var).expect("parameter tracked").clone();
        for index in 0..var.len() {
            let numeric = numeric_grad(&var, index, &loss);
            assert_abs_diff_eq!(analytic.data[index], numeric, epsilon = 1e-2);
        }
    }
}

#[test]
fn test_input_gradients_match_central_differences() {
    let mut rng = StdRng::seed_from_u64(3);
    let stack = Stack::new(vec![
        Box::new(Vanilla::new(2, 3, &mut rng)),
        Box::new(Vanilla::new(3, 2, &mut rng)),
    ]);
    let inputs: Vec<Var> = vec![Var::new(values(4, 0.2)), Var::new(values(2, 0.9))];
    let presents = [pm(&[1, 1]), pm(&[0, 1])];
    let weights = vec![values(4, 1.7), values(2, 0.4)];

    let steps = || -> Vec<Step> {
        presents
            .iter()
            .zip(&inputs)
            .map(|(p, x)| Step::new(p.clone(), x.snapshot()))
            .collect()
    };

    let tape = SeqTape::forward(&stack, 2, &steps());
    let input_grads = tape.backward(weights.clone(), &mut Grad::default());

    let loss = || weighted_loss(&SeqTape::forward(&stack, 2, &steps()), &weights);
    for (x, analytic) in inputs.iter().zip(&input_grads) {
        for index in 0..x.len() {
            let numeric = numeric_grad(x, index, &loss);
            assert_abs_diff_eq!(analytic.data[index], numeric, epsilon = 1e-2);
        }
    }
}

#[test]
fn test_variable_length_batch_matches_separate_sequences() {
    let mut rng = StdRng::seed_from_u64(29);
    let block = Vanilla::new(2, 3, &mut rng);
    block.start.set(values(3, 0.6));

    let long: Vec<Tensor> = (0..3).map(|t| values(2, t as f32)).collect();
    let short = values(2, 5.0);

    // batch of two: sequence 0 runs for three steps, sequence 1 for one
    let batched_steps = vec![
        Step::new(pm(&[1, 1]), Tensor::concat(&[long[0].clone(), short.clone()])),
        Step::new(pm(&[1, 0]), long[1].clone()),
        Step::new(pm(&[1, 0]), long[2].clone()),
    ];
    let batched = SeqTape::forward(&block, 2, &batched_steps);
    let mut batched_grad = Grad::new(&batched.vars());
    let batched_dx = batched.backward(
        vec![Tensor::full(6, 1.0), Tensor::full(3, 1.0), Tensor::full(3, 1.0)],
        &mut batched_grad,
    );

    let long_steps: Vec<Step> = long.iter().map(|x| Step::new(pm(&[1]), x.clone())).collect();
    let alone_long = SeqTape::forward(&block, 1, &long_steps);
    let alone_short = SeqTape::forward(&block, 1, &[Step::new(pm(&[1]), short.clone())]);

    // outputs agree row by row
    assert_eq!(batched.outputs()[0].slice(0, 3), *alone_long.outputs()[0]);
    assert_eq!(batched.outputs()[0].slice(3, 6), *alone_short.outputs()[0]);
    assert_eq!(batched.outputs()[2], alone_long.outputs()[2]);

    let mut separate_grad = Grad::new(&alone_long.vars());
    let long_dx = alone_long.backward(vec![Tensor::full(3, 1.0); 3], &mut separate_grad);
    let short_dx = alone_short.backward(vec![Tensor::full(3, 1.0)], &mut separate_grad);

    for var in block.parameters() {
        let a = batched_grad.get(&var).unwrap();
        let b = separate_grad.get(&var).unwrap();
        for (x, y) in a.data.iter().zip(&b.data) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-5);
        }
    }

    let expected_first = Tensor::concat(&[long_dx[0].clone(), short_dx[0].clone()]);
    for (x, y) in batched_dx[0].data.iter().zip(&expected_first.data) {
        assert_abs_diff_eq!(*x, *y, epsilon = 1e-5);
    }
    assert_eq!(batched_dx[1].len(), 2);
}

#[test]
fn test_sequence_absent_from_first_step() {
    let mut rng = StdRng::seed_from_u64(8);
    let block = Vanilla::new(1, 2, &mut rng);
    let steps = vec![Step::new(pm(&[0, 1, 1]), values(2, 0.0))];
    let tape = SeqTape::forward(&block, 3, &steps);
    assert_eq!(tape.outputs()[0].len(), 4);

    let mut grad = Grad::new(&tape.vars());
    tape.backward(vec![Tensor::full(4, 1.0)], &mut grad);
    // two of the three broadcast start rows received gradient
    assert!(grad.get(&block.start).unwrap().data.iter().any(|&g| g != 0.0));
}
