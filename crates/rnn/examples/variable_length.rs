//! Variable-Length Sequences Through a Stack
//!
//! Run with: cargo run -p seqnet-rnn --example variable_length
//!
//! This example demonstrates:
//! - Stacking a recurrent block with a pooling layer block
//! - Sequences dropping out of the batch as they end
//! - Back-propagation through time into every parameter, start state included
//! - A few plain gradient-descent steps reducing a squared error
//!
//! Key insight: a state is reduced when sequences end, and its gradient is
//! expanded again on the way back.

use rand::rngs::StdRng;
use rand::SeedableRng;
use seqnet_conv::MaxPool;
use seqnet_core::Tensor;
use seqnet_diff::{Grad, Parameterizer};
use seqnet_rnn::{LayerBlock, PresentMap, SeqTape, Stack, Step, Vanilla};

const LEARNING_RATE: f32 = 0.1;

fn main() {
    println!("=== Variable-Length Sequences Through a Stack ===\n");

    // -------------------------------------------------------------------------
    // 1. Build the model
    // -------------------------------------------------------------------------
    println!("1. Model");
    println!("--------");
    let mut rng = StdRng::seed_from_u64(42);
    let stack = Stack::new(vec![
        Box::new(Vanilla::new(2, 4, &mut rng)),
        Box::new(LayerBlock::new(Box::new(MaxPool::new(2, 1, 4, 1, 1)))),
        Box::new(Vanilla::new(2, 1, &mut rng)),
    ]);
    println!("  {:?}", stack);
    println!("  {} parameter tensors", stack.parameters().len());
    println!();

    // -------------------------------------------------------------------------
    // 2. A batch of three sequences with lengths 3, 1 and 2
    // -------------------------------------------------------------------------
    println!("2. Batch layout");
    println!("---------------");
    let steps = vec![
        Step::new(
            PresentMap::all(3),
            Tensor::from(vec![0.5, -0.2, 0.1, 0.9, -0.4, 0.3]),
        ),
        Step::new(
            PresentMap::new(vec![true, false, true]),
            Tensor::from(vec![0.7, 0.0, -0.6, 0.2]),
        ),
        Step::new(
            PresentMap::new(vec![true, false, false]),
            Tensor::from(vec![-0.3, 0.8]),
        ),
    ];
    for (t, step) in steps.iter().enumerate() {
        println!(
            "  t={}  present={:?}  packed rows={}",
            t,
            step.present.as_slice(),
            step.present.count()
        );
    }
    println!();

    // Target: the last output of each sequence should be 0.5
    let target = 0.5;

    // -------------------------------------------------------------------------
    // 3. Train
    // -------------------------------------------------------------------------
    println!("3. Training");
    println!("-----------");
    for epoch in 0..20 {
        let tape = SeqTape::forward(&stack, 3, &steps);
        let mut grad = Grad::new(&tape.vars());

        // d(loss)/d(output) only at each sequence's final timestep
        let mut loss = 0.0;
        let mut upstreams = Vec::with_capacity(steps.len());
        for (t, out) in tape.outputs().iter().enumerate() {
            let next = steps.get(t + 1).map(|s| &s.present);
            let rows = steps[t].present.indices();
            let mut upstream = Tensor::zeros(out.len());
            for (row, &seq) in rows.iter().enumerate() {
                let ends_here = next.map_or(true, |p| !p.is_present(seq));
                if ends_here {
                    let err = out.data[row] - target;
                    loss += err * err;
                    upstream.data[row] = 2.0 * err;
                }
            }
            upstreams.push(upstream);
        }
        tape.backward(upstreams, &mut grad);

        for var in stack.parameters() {
            if let Some(g) = grad.get(&var) {
                var.set(var.snapshot().add(&g.scale(-LEARNING_RATE)));
            }
        }

        if epoch % 5 == 0 {
            println!("  epoch {:2}: loss = {:.5}", epoch, loss);
        }
    }
    println!();

    println!("=== Summary ===");
    println!("  Each sequence was stepped only while present, and its final");
    println!("  output was pulled toward {}.", target);
}
