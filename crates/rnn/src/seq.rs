//! # Sequence Tape
//!
//! Drives a [`Block`] over a batch of variable-length sequences and records
//! every timestep so the whole unrolled computation can be back-propagated.
//!
//! Each [`Step`] carries the present map for that timestep. Once a sequence
//! ends it never comes back, so present maps only shrink:
//!
//! ```text
//!   t=0  [T,T,T]   state ──step──► state
//!   t=1  [T,F,T]   state ─reduce─► state ──step──► state
//!   t=2  [F,F,T]   state ─reduce─► state ──step──► state
//! ```
//!
//! Backward walks the tape in reverse. The state gradient leaving timestep
//! `t` covers `t`'s present map and is expanded to `t-1`'s before it is fed
//! in; the gradient leaving the first timestep is expanded to the full batch
//! and handed to [`Block::propagate_start`].

use seqnet_core::Tensor;
use seqnet_diff::{Grad, VarSet};
use tracing::trace;

use crate::block::{Block, BlockRes, StateGrad};
use crate::present::PresentMap;

/// One timestep of packed input.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Which sequences have an input at this timestep.
    pub present: PresentMap,
    /// One input row per present sequence.
    pub packed: Tensor,
}

impl Step {
    /// Create a step.
    pub fn new(present: PresentMap, packed: Tensor) -> Self {
        Self { present, packed }
    }
}

/// The recorded forward pass of a block over a batch of sequences.
pub struct SeqTape<'a> {
    block: &'a dyn Block,
    batch: usize,
    presents: Vec<PresentMap>,
    reses: Vec<Box<dyn BlockRes>>,
}

impl<'a> SeqTape<'a> {
    /// Run `block` over `steps` for a batch of `batch` sequences.
    ///
    /// Panics if a step's present map is not a subset of the previous one.
    pub fn forward(block: &'a dyn Block, batch: usize, steps: &[Step]) -> Self {
        let mut state = block.start(batch);
        let mut presents = Vec::with_capacity(steps.len());
        let mut reses = Vec::with_capacity(steps.len());
        for (t, step) in steps.iter().enumerate() {
            let current = state.present();
            if step.present != current {
                assert!(
                    step.present.is_subset_of(&current),
                    "step {} present map is not a subset of the previous one",
                    t
                );
                trace!(t, from = current.count(), to = step.present.count(), "reduce state");
                state = state.reduce(&step.present);
            }
            let res = block.step(state, &step.packed);
            state = res.state();
            presents.push(step.present.clone());
            reses.push(res);
        }
        Self {
            block,
            batch,
            presents,
            reses,
        }
    }

    /// Number of recorded timesteps.
    pub fn len(&self) -> usize {
        self.reses.len()
    }

    /// True when no timesteps were recorded.
    pub fn is_empty(&self) -> bool {
        self.reses.is_empty()
    }

    /// The packed output of every timestep.
    pub fn outputs(&self) -> Vec<&Tensor> {
        self.reses.iter().map(|r| r.output()).collect()
    }

    /// Every var the outputs depend on, plus the block's own parameters
    /// (which covers parameters only reached through the start state).
    pub fn vars(&self) -> VarSet {
        let mut vars = VarSet::new();
        for res in &self.reses {
            vars.merge(&res.vars());
        }
        if let Some(p) = self.block.as_parameterizer() {
            vars.extend(p.parameters());
        }
        vars
    }

    /// Back-propagate one upstream gradient per timestep. Returns the packed
    /// input gradient of every timestep.
    pub fn backward(&self, upstreams: Vec<Tensor>, grad: &mut Grad) -> Vec<Tensor> {
        assert_eq!(
            upstreams.len(),
            self.reses.len(),
            "one upstream gradient per timestep"
        );
        let mut carry: Option<Box<dyn StateGrad>> = None;
        let mut input_grads = Vec::with_capacity(self.reses.len());
        for (t, upstream) in upstreams.into_iter().enumerate().rev() {
            let state_upstream = carry.take().map(|g| g.expand(&self.presents[t]));
            let (input_grad, state_grad) =
                self.reses[t].propagate(upstream, state_upstream.as_deref(), grad);
            input_grads.push(input_grad);
            carry = Some(state_grad);
        }
        input_grads.reverse();

        if let Some(state_grad) = carry {
            let full = state_grad.expand(&PresentMap::all(self.batch));
            self.block.propagate_start(&*full, grad);
        }
        input_grads
    }
}
