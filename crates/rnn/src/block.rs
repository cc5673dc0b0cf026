//! # Blocks
//!
//! A [`Block`] is a differentiable transform applied one timestep at a time.
//! Whatever it remembers between timesteps lives in a [`State`] owned by the
//! caller, never in the block itself:
//!
//! ```text
//!   s0 = block.start(n)
//!   r1 = block.step(s0, x1)      s1 = r1.state()
//!   r2 = block.step(s1, x2)      s2 = r2.state()
//!   ...
//!   backward, last timestep first:
//!   (dx2, ds1) = r2.propagate(dy2, None)
//!   (dx1, ds0) = r1.propagate(dy1, Some(ds1))
//!   block.propagate_start(ds0, grad)
//! ```
//!
//! States and state gradients cover a packed batch described by a
//! [`PresentMap`]; see [`crate::present`] for how they shrink and grow when
//! sequences end.

use std::any::Any;
use std::sync::Arc;

use once_cell::sync::Lazy;
use seqnet_core::{Registry, SerializeError, Serializer, Tensor};
use seqnet_diff::{Grad, Parameterizer, VarSet};

use crate::layer_block::LayerBlock;
use crate::present::PresentMap;
use crate::stack::Stack;
use crate::vanilla::Vanilla;

/// Recurrent memory for a packed batch.
pub trait State: Any + Send + Sync {
    /// Which original batch indices this state covers.
    fn present(&self) -> PresentMap;

    /// Keep only the sequences present in `present`, which must be a subset
    /// of [`State::present`].
    fn reduce(&self, present: &PresentMap) -> Arc<dyn State>;

    /// Upcast for downcasting to the concrete state type.
    fn as_any(&self) -> &dyn Any;
}

/// The gradient of a [`State`].
pub trait StateGrad: Any + Send + Sync {
    /// Which original batch indices this gradient covers.
    fn present(&self) -> PresentMap;

    /// Widen to `present`, a superset of [`StateGrad::present`], filling new
    /// sequences with zero gradient.
    fn expand(&self, present: &PresentMap) -> Box<dyn StateGrad>;

    /// Upcast for downcasting to the concrete gradient type.
    fn as_any(&self) -> &dyn Any;
}

/// The result of stepping a [`Block`] once.
pub trait BlockRes: Send + Sync {
    /// The state after this timestep.
    fn state(&self) -> Arc<dyn State>;

    /// The packed output for this timestep.
    fn output(&self) -> &Tensor;

    /// Every var the output depends on.
    fn vars(&self) -> VarSet;

    /// Back-propagate through this timestep.
    ///
    /// `upstream` is the gradient of [`BlockRes::output`]; `state_upstream`
    /// is the gradient of [`BlockRes::state`] coming from the next timestep,
    /// or `None` when nothing downstream used the state. Returns the input
    /// gradient and the gradient of the state this step consumed.
    ///
    /// Must be called at most once per result.
    fn propagate(
        &self,
        upstream: Tensor,
        state_upstream: Option<&dyn StateGrad>,
        grad: &mut Grad,
    ) -> (Tensor, Box<dyn StateGrad>);
}

/// A differentiable single-timestep transform.
pub trait Block: Send + Sync {
    /// The initial state for a batch of `n` sequences.
    fn start(&self, n: usize) -> Arc<dyn State>;

    /// Back-propagate a gradient of the initial state into `grad`.
    fn propagate_start(&self, state_grad: &dyn StateGrad, grad: &mut Grad);

    /// Apply the block for one timestep.
    ///
    /// `input` holds one packed row per sequence present in `state`.
    fn step(&self, state: Arc<dyn State>, input: &Tensor) -> Box<dyn BlockRes>;

    /// The concrete kind of this block, for diagnostics.
    fn kind(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Query the [`Parameterizer`] capability.
    fn as_parameterizer(&self) -> Option<&dyn Parameterizer> {
        None
    }

    /// Query the [`Serializer`] capability.
    fn as_serializer(&self) -> Option<&dyn Serializer> {
        None
    }
}

/// Downcast a state to the concrete type a block expects.
///
/// Panics with the block's name if the state has a different type.
pub fn downcast_state<'a, S: State>(state: &'a dyn State, block: &str) -> &'a S {
    state
        .as_any()
        .downcast_ref::<S>()
        .unwrap_or_else(|| panic!("{}: unexpected state type", block))
}

/// Downcast a state gradient to the concrete type a block expects.
pub fn downcast_state_grad<'a, G: StateGrad>(grad: &'a dyn StateGrad, block: &str) -> &'a G {
    grad.as_any()
        .downcast_ref::<G>()
        .unwrap_or_else(|| panic!("{}: unexpected state gradient type", block))
}

/// Decoders for every persistable [`Block`] type.
///
/// The blocks defined in this crate are registered up front. Layers wrapped
/// by a [`LayerBlock`](crate::LayerBlock) decode through
/// [`LAYERS`](seqnet_diff::LAYERS) instead, which starts empty; call
/// `seqnet_conv::register_layers()` before decoding pooling blocks.
pub static BLOCKS: Lazy<Registry<dyn Block>> = Lazy::new(|| {
    let registry: Registry<dyn Block> = Registry::new("Block");
    registry.register(Stack::SERIALIZER_TYPE, decode_stack);
    registry.register(Vanilla::SERIALIZER_TYPE, decode_vanilla);
    registry.register(LayerBlock::SERIALIZER_TYPE, decode_layer_block);
    registry
});

fn decode_stack(data: &[u8]) -> Result<Box<dyn Block>, SerializeError> {
    Ok(Box::new(Stack::deserialize(data)?))
}

fn decode_vanilla(data: &[u8]) -> Result<Box<dyn Block>, SerializeError> {
    Ok(Box::new(Vanilla::deserialize(data)?))
}

fn decode_layer_block(data: &[u8]) -> Result<Box<dyn Block>, SerializeError> {
    Ok(Box::new(LayerBlock::deserialize(data)?))
}
