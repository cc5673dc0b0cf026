//! # Vanilla Recurrent Block
//!
//! The classic tanh recurrence:
//!
//! ```text
//!   h' = tanh(W·x + U·h + b)        output = h',  next state = h'
//! ```
//!
//! The initial state `h0` is itself trainable: [`Block::start`] broadcasts it
//! to every sequence, and [`Block::propagate_start`] sums the gradient over
//! the batch back into it.
//!
//! ## VJP
//!
//! With `g = upstream + state_upstream` and `d = g ⊙ (1 − h'²)`:
//!
//! | Target | Gradient |
//! |--------|----------|
//! | `W` | `Σ_rows d xᵀ` |
//! | `U` | `Σ_rows d hᵀ` |
//! | `b` | `Σ_rows d` |
//! | `x` | `Wᵀ d` |
//! | `h` | `Uᵀ d` |

use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use seqnet_core::serializer::{deserialize_fields, serialize_fields};
use seqnet_core::{SerializeError, Serializer, Tensor};
use seqnet_diff::{Grad, Parameterizer, Var, VarSet};

use crate::block::{downcast_state, downcast_state_grad, Block, BlockRes, State, StateGrad};
use crate::present::PresentMap;
use crate::state::{VecState, VecStateGrad};

/// A tanh recurrent block with a learned initial state.
#[derive(Debug, Clone)]
pub struct Vanilla {
    input_size: usize,
    state_size: usize,
    /// `state_size × input_size`, row-major.
    pub input_weights: Var,
    /// `state_size × state_size`, row-major.
    pub state_weights: Var,
    /// `state_size`.
    pub biases: Var,
    /// `state_size`.
    pub start: Var,
}

#[derive(Serialize, Deserialize)]
struct VanillaRecord {
    input_size: u64,
    state_size: u64,
    input_weights: Vec<f32>,
    state_weights: Vec<f32>,
    biases: Vec<f32>,
    start: Vec<f32>,
}

impl Vanilla {
    /// Type tag used when persisting a vanilla block.
    pub const SERIALIZER_TYPE: &'static str = "seqnet_rnn::Vanilla";

    /// Create a block with uniformly initialised weights, zero biases and a
    /// zero initial state.
    pub fn new(input_size: usize, state_size: usize, rng: &mut impl Rng) -> Self {
        assert!(
            input_size > 0 && state_size > 0,
            "Vanilla sizes must be positive"
        );
        let mut uniform = |len: usize, fan_in: usize| {
            let scale = 1.0 / (fan_in as f32).sqrt();
            Tensor::from(
                (0..len)
                    .map(|_| rng.gen_range(-scale..scale))
                    .collect::<Vec<f32>>(),
            )
        };
        let input_weights = uniform(state_size * input_size, input_size);
        let state_weights = uniform(state_size * state_size, state_size);
        Self::from_parts(
            input_size,
            state_size,
            input_weights,
            state_weights,
            Tensor::zeros(state_size),
            Tensor::zeros(state_size),
        )
    }

    /// Create a block from explicit parameter values.
    pub fn from_parts(
        input_size: usize,
        state_size: usize,
        input_weights: Tensor,
        state_weights: Tensor,
        biases: Tensor,
        start: Tensor,
    ) -> Self {
        assert_eq!(input_weights.len(), state_size * input_size, "input weights size");
        assert_eq!(state_weights.len(), state_size * state_size, "state weights size");
        assert_eq!(biases.len(), state_size, "biases size");
        assert_eq!(start.len(), state_size, "start state size");
        Self {
            input_size,
            state_size,
            input_weights: Var::new(input_weights),
            state_weights: Var::new(state_weights),
            biases: Var::new(biases),
            start: Var::new(start),
        }
    }

    /// Values per input row.
    pub fn input_size(&self) -> usize {
        self.input_size
    }

    /// Values per state (and output) row.
    pub fn state_size(&self) -> usize {
        self.state_size
    }

    /// Decode a block written by [`Serializer::serialize`].
    pub fn deserialize(data: &[u8]) -> Result<Vanilla, SerializeError> {
        let record: VanillaRecord =
            deserialize_fields(data).map_err(|e| e.context("deserialize Vanilla"))?;
        let invalid = |field: &'static str, value: u64| {
            SerializeError::InvalidField { field, value }.context("deserialize Vanilla")
        };
        let input_size =
            usize::try_from(record.input_size).map_err(|_| invalid("input_size", record.input_size))?;
        let state_size =
            usize::try_from(record.state_size).map_err(|_| invalid("state_size", record.state_size))?;
        let input_len = state_size
            .checked_mul(input_size)
            .ok_or_else(|| invalid("input_size", record.input_size))?;
        let state_len = state_size
            .checked_mul(state_size)
            .ok_or_else(|| invalid("state_size", record.state_size))?;
        let check_len = |field: &'static str, got: usize, want: usize| {
            if got == want {
                Ok(())
            } else {
                Err(invalid(field, got as u64))
            }
        };
        check_len("input_weights", record.input_weights.len(), input_len)?;
        check_len("state_weights", record.state_weights.len(), state_len)?;
        check_len("biases", record.biases.len(), state_size)?;
        check_len("start", record.start.len(), state_size)?;
        Ok(Self::from_parts(
            input_size,
            state_size,
            record.input_weights.into(),
            record.state_weights.into(),
            record.biases.into(),
            record.start.into(),
        ))
    }
}

impl Block for Vanilla {
    fn start(&self, n: usize) -> Arc<dyn State> {
        Arc::new(VecState::broadcast(&self.start.value(), n))
    }

    fn propagate_start(&self, state_grad: &dyn StateGrad, grad: &mut Grad) {
        let state_grad = downcast_state_grad::<VecStateGrad>(state_grad, "Vanilla");
        grad.accumulate(&self.start, &state_grad.sum_rows());
    }

    fn step(&self, state: Arc<dyn State>, input: &Tensor) -> Box<dyn BlockRes> {
        let prev = downcast_state::<VecState>(&*state, "Vanilla");
        assert_eq!(prev.row_size, self.state_size, "Vanilla: state size mismatch");
        let n = prev.present.count();
        assert_eq!(
            input.len(),
            n * self.input_size,
            "Vanilla: input length mismatch"
        );

        let (ni, ns) = (self.input_size, self.state_size);
        let w = self.input_weights.snapshot();
        let u = self.state_weights.snapshot();
        let b = self.biases.value();
        let mut out = Tensor::zeros(n * ns);
        for j in 0..n {
            let x = &input.data[j * ni..(j + 1) * ni];
            let h = &prev.vector.data[j * ns..(j + 1) * ns];
            for s in 0..ns {
                let wx: f32 = dot(&w.data[s * ni..(s + 1) * ni], x);
                let uh: f32 = dot(&u.data[s * ns..(s + 1) * ns], h);
                out.data[j * ns + s] = (wx + uh + b.data[s]).tanh();
            }
        }

        let present = prev.present.clone();
        Box::new(VanillaRes {
            block: self.clone(),
            input_weights: w,
            state_weights: u,
            input: input.clone(),
            prev: state.clone(),
            out_state: Arc::new(VecState::new(out.clone(), ns, present.clone())),
            output: out,
            present,
        })
    }

    fn as_parameterizer(&self) -> Option<&dyn Parameterizer> {
        Some(self)
    }

    fn as_serializer(&self) -> Option<&dyn Serializer> {
        Some(self)
    }
}

impl Parameterizer for Vanilla {
    fn parameters(&self) -> Vec<Var> {
        vec![
            self.input_weights.clone(),
            self.state_weights.clone(),
            self.biases.clone(),
            self.start.clone(),
        ]
    }
}

impl Serializer for Vanilla {
    fn serializer_type(&self) -> &'static str {
        Self::SERIALIZER_TYPE
    }

    fn serialize(&self) -> Result<Vec<u8>, SerializeError> {
        serialize_fields(&VanillaRecord {
            input_size: self.input_size as u64,
            state_size: self.state_size as u64,
            input_weights: self.input_weights.snapshot().data,
            state_weights: self.state_weights.snapshot().data,
            biases: self.biases.snapshot().data,
            start: self.start.snapshot().data,
        })
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

struct VanillaRes {
    // Clones share the block's vars.
    block: Vanilla,
    // W and U as read by the forward pass.
    input_weights: Tensor,
    state_weights: Tensor,
    input: Tensor,
    prev: Arc<dyn State>,
    out_state: Arc<VecState>,
    output: Tensor,
    present: PresentMap,
}

impl BlockRes for VanillaRes {
    fn state(&self) -> Arc<dyn State> {
        self.out_state.clone()
    }

    fn output(&self) -> &Tensor {
        &self.output
    }

    fn vars(&self) -> VarSet {
        VarSet::from_iter([
            self.block.input_weights.clone(),
            self.block.state_weights.clone(),
            self.block.biases.clone(),
        ])
    }

    fn propagate(
        &self,
        upstream: Tensor,
        state_upstream: Option<&dyn StateGrad>,
        grad: &mut Grad,
    ) -> (Tensor, Box<dyn StateGrad>) {
        assert_eq!(
            upstream.len(),
            self.output.len(),
            "Vanilla: upstream length mismatch"
        );
        let mut total = upstream;
        if let Some(sg) = state_upstream {
            let sg = downcast_state_grad::<VecStateGrad>(sg, "Vanilla");
            assert_eq!(
                sg.present, self.present,
                "Vanilla: state gradient present map mismatch"
            );
            total.add_assign(&sg.vector);
        }
        let d_pre = total.mul(&self.output.map(|y| 1.0 - y * y));

        let (ni, ns) = (self.block.input_size, self.block.state_size);
        let n = self.present.count();
        let prev = downcast_state::<VecState>(&*self.prev, "Vanilla");

        let mut d_w = Tensor::zeros(ns * ni);
        let mut d_u = Tensor::zeros(ns * ns);
        let mut d_b = Tensor::zeros(ns);
        let mut d_x = Tensor::zeros(n * ni);
        let mut d_h = Tensor::zeros(n * ns);
        let (w, u) = (&self.input_weights, &self.state_weights);
        for j in 0..n {
            let x = &self.input.data[j * ni..(j + 1) * ni];
            let h = &prev.vector.data[j * ns..(j + 1) * ns];
            for s in 0..ns {
                let g = d_pre.data[j * ns + s];
                d_b.data[s] += g;
                for i in 0..ni {
                    d_w.data[s * ni + i] += g * x[i];
                    d_x.data[j * ni + i] += g * w.data[s * ni + i];
                }
                for k in 0..ns {
                    d_u.data[s * ns + k] += g * h[k];
                    d_h.data[j * ns + k] += g * u.data[s * ns + k];
                }
            }
        }

        grad.accumulate(&self.block.input_weights, &d_w);
        grad.accumulate(&self.block.state_weights, &d_u);
        grad.accumulate(&self.block.biases, &d_b);

        (
            d_x,
            Box::new(VecStateGrad::new(d_h, ns, self.present.clone())),
        )
    }
}
