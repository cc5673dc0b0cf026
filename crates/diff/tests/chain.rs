//! Integration tests for chaining layers and collecting gradients.

use std::sync::Arc;

use approx::assert_relative_eq;
use seqnet_core::Tensor;
use seqnet_diff::{Grad, Layer, Parameterizer, Res, Var, VarRes, VarSet};

/// `y = w ⊙ x`, with `w` broadcast across the batch.
struct Scale {
    weights: Var,
}

struct ScaleRes {
    input: Arc<dyn Res>,
    weights: Var,
    batch: usize,
    output: Tensor,
}

impl Layer for Scale {
    fn apply(&self, input: Arc<dyn Res>, batch: usize) -> Arc<dyn Res> {
        let w = self.weights.snapshot().repeat(batch);
        let output = input.output().mul(&w);
        Arc::new(ScaleRes {
            input,
            weights: self.weights.clone(),
            batch,
            output,
        })
    }

    fn as_parameterizer(&self) -> Option<&dyn Parameterizer> {
        Some(self)
    }
}

impl Parameterizer for Scale {
    fn parameters(&self) -> Vec<Var> {
        vec![self.weights.clone()]
    }
}

impl Res for ScaleRes {
    fn output(&self) -> &Tensor {
        &self.output
    }

    fn vars(&self) -> VarSet {
        let mut vars = self.input.vars();
        vars.insert(self.weights.clone());
        vars
    }

    fn propagate(&self, upstream: Tensor, grad: &mut Grad) {
        let w = self.weights.snapshot();
        let width = w.len();
        let mut d_w = Tensor::zeros(width);
        for (i, (&u, &x)) in upstream.data.iter().zip(&self.input.output().data).enumerate() {
            d_w.data[i % width] += u * x;
        }
        assert_eq!(upstream.len(), width * self.batch);
        grad.accumulate(&self.weights, &d_w);
        self.input.propagate(upstream.mul(&w.repeat(self.batch)), grad);
    }
}

#[test]
fn test_two_layer_chain() {
    let x = Var::new(Tensor::from(vec![1.0, 2.0, 3.0, 4.0]));
    let first = Scale {
        weights: Var::new(Tensor::from(vec![0.5, -1.0])),
    };
    let second = Scale {
        weights: Var::new(Tensor::from(vec![2.0, 3.0])),
    };

    let h = first.apply(Arc::new(VarRes::new(&x)), 2);
    let y = second.apply(h, 2);
    assert_eq!(y.output().data, vec![1.0, -6.0, 3.0, -12.0]);

    let vars = y.vars();
    assert_eq!(vars.len(), 3);

    let mut grad = Grad::new(&vars);
    y.propagate(Tensor::full(4, 1.0), &mut grad);

    // dy/dx = w1 * w2
    assert_eq!(grad.get(&x).unwrap().data, vec![1.0, -3.0, 1.0, -3.0]);
    // dy/dw2 = h summed over the batch
    let d_w2 = grad.get(&second.weights).unwrap();
    assert_relative_eq!(d_w2.data[0], 0.5 + 1.5);
    assert_relative_eq!(d_w2.data[1], -2.0 + -4.0);
    // dy/dw1 = x * w2 summed over the batch
    let d_w1 = grad.get(&first.weights).unwrap();
    assert_relative_eq!(d_w1.data[0], 2.0 * (1.0 + 3.0));
    assert_relative_eq!(d_w1.data[1], 3.0 * (2.0 + 4.0));
}

#[test]
fn test_frozen_parameters_are_skipped() {
    let x = Var::new(Tensor::from(vec![1.0, 1.0]));
    let layer = Scale {
        weights: Var::new(Tensor::from(vec![4.0, 5.0])),
    };
    let y = layer.apply(Arc::new(VarRes::new(&x)), 1);

    // only track the input
    let mut grad = Grad::new(&VarSet::from_iter([x.clone()]));
    y.propagate(Tensor::full(2, 1.0), &mut grad);
    assert_eq!(grad.len(), 1);
    assert!(grad.get(&layer.weights).is_none());
    assert_eq!(grad.get(&x).unwrap().data, vec![4.0, 5.0]);
}

#[test]
fn test_shared_var_accumulates_from_every_use() {
    let w = Var::new(Tensor::from(vec![3.0]));
    let a = Scale { weights: w.clone() };
    let b = Scale { weights: w.clone() };
    let x = Var::new(Tensor::from(vec![2.0]));

    let y = b.apply(a.apply(Arc::new(VarRes::new(&x)), 1), 1);
    assert_eq!(y.vars().len(), 2);

    let mut grad = Grad::new(&y.vars());
    y.propagate(Tensor::from(vec![1.0]), &mut grad);
    // y = w² x, dy/dw = 2 w x
    assert_relative_eq!(grad.get(&w).unwrap().data[0], 12.0);
}
