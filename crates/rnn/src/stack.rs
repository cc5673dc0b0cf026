//! # Stack - Composing Blocks
//!
//! A [`Stack`] chains blocks *within* a timestep: block 0's output is block
//! 1's input, and so on. Each block keeps its own state, so a stack's state
//! is simply one state per block.
//!
//! ```text
//!              ┌─────────┐     ┌─────────┐     ┌─────────┐
//!   input ─────│ block 0 │─────│ block 1 │─────│ block 2 │───── output
//!              └────┬────┘     └────┬────┘     └────┬────┘
//!   StackState:   s[0]            s[1]            s[2]
//! ```
//!
//! ## Backward
//!
//! A stack step records every block's result in order. Propagation walks that
//! tape in reverse: the running gradient starts as the caller's upstream,
//! block `i` receives it along with `state_upstream[i]`, and its input
//! gradient becomes the running gradient for block `i - 1`. What comes out of
//! block 0 is the gradient of the stack's input.
//!
//! ## Batch reduction
//!
//! [`StackState::reduce`] and [`StackGrad::expand`] forward to every block
//! with the same present map. The stack itself keeps no batch bookkeeping;
//! its present map is block 0's, and all blocks must agree.
//!
//! ## Example
//!
//! ```rust
//! use rand::{rngs::StdRng, SeedableRng};
//! use seqnet_core::Tensor;
//! use seqnet_diff::Grad;
//! use seqnet_rnn::{Block, Stack, Vanilla};
//!
//! let mut rng = StdRng::seed_from_u64(7);
//! let stack = Stack::new(vec![
//!     Box::new(Vanilla::new(3, 4, &mut rng)),
//!     Box::new(Vanilla::new(4, 2, &mut rng)),
//! ]);
//!
//! let state = stack.start(2);
//! let res = stack.step(state, &Tensor::full(6, 0.5));
//! assert_eq!(res.output().len(), 4);
//!
//! let mut grad = Grad::new(&res.vars());
//! let (input_grad, _state_grad) = res.propagate(Tensor::full(4, 1.0), None, &mut grad);
//! assert_eq!(input_grad.len(), 6);
//! ```

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use seqnet_core::serializer::serialize_slice;
use seqnet_core::{SerializeError, Serializer, Tensor};
use seqnet_diff::{Grad, Parameterizer, Var, VarSet};

use crate::block::{
    downcast_state, downcast_state_grad, Block, BlockRes, State, StateGrad, BLOCKS,
};
use crate::present::PresentMap;

/// A meta-block that feeds each block's output into the next block.
///
/// An empty stack is invalid: starting or stepping one panics.
#[derive(Default)]
pub struct Stack {
    blocks: Vec<Box<dyn Block>>,
}

impl Stack {
    /// Type tag used when persisting a stack.
    pub const SERIALIZER_TYPE: &'static str = "seqnet_rnn::Stack";

    /// Create a stack from blocks in application order.
    pub fn new(blocks: Vec<Box<dyn Block>>) -> Self {
        Self { blocks }
    }

    /// Append a block.
    pub fn push<B: Block + 'static>(&mut self, block: B) {
        self.blocks.push(Box::new(block));
    }

    /// The blocks in application order.
    pub fn blocks(&self) -> &[Box<dyn Block>] {
        &self.blocks
    }

    /// Number of blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// True when the stack has no blocks.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Decode a stack written by [`Serializer::serialize`].
    ///
    /// Member blocks are decoded through [`BLOCKS`], so any block type
    /// registered there may appear in the stack.
    ///
    /// # Panics
    ///
    /// Panics with `unknown Block type` or `unknown Layer type` when a member
    /// was never registered. A stack holding a `LayerBlock(MaxPool)` needs
    /// `seqnet_conv::register_layers()` to have been called first.
    pub fn deserialize(data: &[u8]) -> Result<Stack, SerializeError> {
        let blocks = BLOCKS
            .decode_slice(data)
            .map_err(|e| e.context("deserialize Stack"))?;
        Ok(Stack { blocks })
    }

    fn assert_non_empty(&self) {
        assert!(!self.blocks.is_empty(), "empty Stack is invalid");
    }
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<&str> = self.blocks.iter().map(|b| b.kind()).collect();
        f.debug_struct("Stack").field("blocks", &kinds).finish()
    }
}

impl Block for Stack {
    fn start(&self, n: usize) -> Arc<dyn State> {
        self.assert_non_empty();
        tracing::trace!(blocks = self.blocks.len(), batch = n, "stack start");
        let states = self.blocks.iter().map(|b| b.start(n)).collect();
        Arc::new(StackState(states))
    }

    fn propagate_start(&self, state_grad: &dyn StateGrad, grad: &mut Grad) {
        let state_grad = downcast_state_grad::<StackGrad>(state_grad, "Stack");
        assert_eq!(
            state_grad.0.len(),
            self.blocks.len(),
            "stack gradient has the wrong number of layers"
        );
        for (block, layer_grad) in self.blocks.iter().zip(state_grad.0.iter()) {
            block.propagate_start(layer_grad.as_ref(), grad);
        }
    }

    fn step(&self, state: Arc<dyn State>, input: &Tensor) -> Box<dyn BlockRes> {
        self.assert_non_empty();
        let state = downcast_state::<StackState>(&*state, "Stack");
        assert_eq!(
            state.0.len(),
            self.blocks.len(),
            "stack state has the wrong number of layers"
        );
        tracing::trace!(blocks = self.blocks.len(), input = input.len(), "stack step");

        let mut reses: Vec<Box<dyn BlockRes>> = Vec::with_capacity(self.blocks.len());
        let mut out_states = Vec::with_capacity(self.blocks.len());
        let mut vars = VarSet::new();
        for (block, layer_state) in self.blocks.iter().zip(state.0.iter()) {
            let layer_input = match reses.last() {
                Some(prev) => prev.output(),
                None => input,
            };
            let res = block.step(layer_state.clone(), layer_input);
            out_states.push(res.state());
            vars.merge(&res.vars());
            reses.push(res);
        }

        Box::new(StackRes {
            reses,
            out_state: Arc::new(StackState(out_states)),
            vars,
            propagated: AtomicBool::new(false),
        })
    }

    fn as_parameterizer(&self) -> Option<&dyn Parameterizer> {
        Some(self)
    }

    fn as_serializer(&self) -> Option<&dyn Serializer> {
        Some(self)
    }
}

impl Parameterizer for Stack {
    /// Every parameter of every block that exposes parameters, in block order,
    /// with duplicates (shared vars) listed once.
    fn parameters(&self) -> Vec<Var> {
        let mut params = VarSet::new();
        for block in &self.blocks {
            if let Some(p) = block.as_parameterizer() {
                params.extend(p.parameters());
            }
        }
        params.into_vec()
    }
}

impl Serializer for Stack {
    fn serializer_type(&self) -> &'static str {
        Self::SERIALIZER_TYPE
    }

    /// Persist every block. Fails if any block cannot be persisted.
    fn serialize(&self) -> Result<Vec<u8>, SerializeError> {
        let mut members: Vec<&dyn Serializer> = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            match block.as_serializer() {
                Some(s) => members.push(s),
                None => {
                    tracing::warn!(kind = block.kind(), "stack member is not a serializer");
                    return Err(SerializeError::NotSerializer { kind: block.kind() }
                        .context("serialize Stack"));
                }
            }
        }
        serialize_slice(&members)
    }
}

struct StackRes {
    reses: Vec<Box<dyn BlockRes>>,
    out_state: Arc<StackState>,
    vars: VarSet,
    propagated: AtomicBool,
}

impl BlockRes for StackRes {
    fn state(&self) -> Arc<dyn State> {
        self.out_state.clone()
    }

    fn output(&self) -> &Tensor {
        match self.reses.last() {
            Some(res) => res.output(),
            None => unreachable!("stack results are never empty"),
        }
    }

    fn vars(&self) -> VarSet {
        self.vars.clone()
    }

    fn propagate(
        &self,
        upstream: Tensor,
        state_upstream: Option<&dyn StateGrad>,
        grad: &mut Grad,
    ) -> (Tensor, Box<dyn StateGrad>) {
        assert!(
            !self.propagated.swap(true, Ordering::SeqCst),
            "Stack result propagated twice"
        );
        let state_upstream =
            state_upstream.map(|sg| downcast_state_grad::<StackGrad>(sg, "Stack"));
        if let Some(sg) = state_upstream {
            assert_eq!(
                sg.0.len(),
                self.reses.len(),
                "stack gradient has the wrong number of layers"
            );
        }
        tracing::trace!(blocks = self.reses.len(), "stack propagate");

        let mut down = upstream;
        let mut layer_grads = Vec::with_capacity(self.reses.len());
        for (i, res) in self.reses.iter().enumerate().rev() {
            let layer_upstream = state_upstream.map(|sg| sg.0[i].as_ref());
            let (next, layer_grad) = res.propagate(down, layer_upstream, grad);
            down = next;
            layer_grads.push(layer_grad);
        }
        layer_grads.reverse();
        (down, Box::new(StackGrad(layer_grads)))
    }
}

/// The state of a [`Stack`]: one state per block.
pub struct StackState(pub Vec<Arc<dyn State>>);

impl State for StackState {
    /// Block 0's present map. All blocks are reduced together, so they agree.
    fn present(&self) -> PresentMap {
        self.0[0].present()
    }

    fn reduce(&self, present: &PresentMap) -> Arc<dyn State> {
        Arc::new(StackState(
            self.0.iter().map(|s| s.reduce(present)).collect(),
        ))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The state gradient of a [`Stack`]: one gradient per block.
pub struct StackGrad(pub Vec<Box<dyn StateGrad>>);

impl StateGrad for StackGrad {
    /// Block 0's present map.
    fn present(&self) -> PresentMap {
        self.0[0].present()
    }

    fn expand(&self, present: &PresentMap) -> Box<dyn StateGrad> {
        Box::new(StackGrad(
            self.0.iter().map(|g| g.expand(present)).collect(),
        ))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{EmptyState, EmptyStateGrad};
    use std::sync::Mutex;

    /// Adds a constant and records the order its results are propagated in.
    struct Offset {
        id: usize,
        amount: f32,
        log: Arc<Mutex<Vec<usize>>>,
    }

    struct OffsetRes {
        id: usize,
        output: Tensor,
        present: PresentMap,
        log: Arc<Mutex<Vec<usize>>>,
    }

    impl Block for Offset {
        fn start(&self, n: usize) -> Arc<dyn State> {
            Arc::new(EmptyState(PresentMap::all(n)))
        }

        fn propagate_start(&self, _state_grad: &dyn StateGrad, _grad: &mut Grad) {}

        fn step(&self, state: Arc<dyn State>, input: &Tensor) -> Box<dyn BlockRes> {
            Box::new(OffsetRes {
                id: self.id,
                output: input.map(|x| x + self.amount),
                present: state.present(),
                log: self.log.clone(),
            })
        }
    }

    impl BlockRes for OffsetRes {
        fn state(&self) -> Arc<dyn State> {
            Arc::new(EmptyState(self.present.clone()))
        }

        fn output(&self) -> &Tensor {
            &self.output
        }

        fn vars(&self) -> VarSet {
            VarSet::new()
        }

        fn propagate(
            &self,
            upstream: Tensor,
            _state_upstream: Option<&dyn StateGrad>,
            _grad: &mut Grad,
        ) -> (Tensor, Box<dyn StateGrad>) {
            self.log.lock().unwrap().push(self.id);
            (upstream.scale(2.0), Box::new(EmptyStateGrad(self.present.clone())))
        }
    }

    fn offsets(n: usize, log: &Arc<Mutex<Vec<usize>>>) -> Stack {
        Stack::new(
            (0..n)
                .map(|id| {
                    Box::new(Offset {
                        id,
                        amount: (id + 1) as f32,
                        log: log.clone(),
                    }) as Box<dyn Block>
                })
                .collect(),
        )
    }

    #[test]
    fn test_start_one_state_per_block() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stack = offsets(3, &log);
        let state = stack.start(4);
        let state = downcast_state::<StackState>(&*state, "test");
        assert_eq!(state.0.len(), 3);
        assert_eq!(state.present(), PresentMap::all(4));
    }

    #[test]
    fn test_step_threads_outputs() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stack = offsets(3, &log);
        let res = stack.step(stack.start(1), &Tensor::from(vec![10.0]));
        // 10 + 1 + 2 + 3
        assert_eq!(res.output().data, vec![16.0]);
    }

    #[test]
    fn test_propagate_walks_layers_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stack = offsets(3, &log);
        let res = stack.step(stack.start(1), &Tensor::from(vec![0.0]));
        let (down, state_grad) = res.propagate(Tensor::from(vec![1.0]), None, &mut Grad::default());

        assert_eq!(*log.lock().unwrap(), vec![2, 1, 0]);
        assert_eq!(down.data, vec![8.0]);
        let state_grad = downcast_state_grad::<StackGrad>(&*state_grad, "test");
        assert_eq!(state_grad.0.len(), 3);
    }

    #[test]
    #[should_panic(expected = "empty Stack is invalid")]
    fn test_empty_stack_start_panics() {
        Stack::default().start(1);
    }

    #[test]
    #[should_panic(expected = "propagated twice")]
    fn test_double_propagate_panics() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stack = offsets(1, &log);
        let res = stack.step(stack.start(1), &Tensor::from(vec![0.0]));
        let mut grad = Grad::default();
        res.propagate(Tensor::from(vec![1.0]), None, &mut grad);
        res.propagate(Tensor::from(vec![1.0]), None, &mut grad);
    }

    #[test]
    fn test_non_serializer_member_named_in_error() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stack = offsets(2, &log);
        let err = stack.serialize().unwrap_err();
        match err.root() {
            SerializeError::NotSerializer { kind } => assert!(kind.ends_with("Offset")),
            other => panic!("unexpected error: {}", other),
        }
    }
}
