//! # Layer Blocks
//!
//! [`LayerBlock`] lifts a stateless [`Layer`] into a [`Block`] by applying it
//! independently at every timestep. Its state is an [`EmptyState`], so the
//! only thing it carries from step to step is the present map.

use std::sync::Arc;

use seqnet_core::serializer::serialize_typed;
use seqnet_core::{SerializeError, Serializer, Tensor};
use seqnet_diff::{Grad, Layer, Parameterizer, Res, Var, VarRes, VarSet, LAYERS};

use crate::block::{downcast_state, Block, BlockRes, State, StateGrad};
use crate::present::PresentMap;
use crate::state::{EmptyState, EmptyStateGrad};

/// A [`Layer`] applied once per timestep.
pub struct LayerBlock {
    layer: Box<dyn Layer>,
}

impl LayerBlock {
    /// Type tag used when persisting a layer block.
    pub const SERIALIZER_TYPE: &'static str = "seqnet_rnn::LayerBlock";

    /// Wrap `layer`.
    pub fn new(layer: Box<dyn Layer>) -> Self {
        Self { layer }
    }

    /// The wrapped layer.
    pub fn layer(&self) -> &dyn Layer {
        self.layer.as_ref()
    }

    /// Decode a block written by [`Serializer::serialize`].
    ///
    /// # Panics
    ///
    /// Panics with `unknown Layer type` if the inner layer's type is not
    /// registered in [`LAYERS`]. Pooling layers are only registered after
    /// `seqnet_conv::register_layers()` has been called.
    pub fn deserialize(data: &[u8]) -> Result<LayerBlock, SerializeError> {
        let layer = LAYERS
            .decode_typed(data)
            .map_err(|e| e.context("deserialize LayerBlock"))?;
        Ok(Self::new(layer))
    }
}

impl std::fmt::Debug for LayerBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LayerBlock({})", self.layer.kind())
    }
}

impl Block for LayerBlock {
    fn start(&self, n: usize) -> Arc<dyn State> {
        Arc::new(EmptyState(PresentMap::all(n)))
    }

    fn propagate_start(&self, _state_grad: &dyn StateGrad, _grad: &mut Grad) {}

    fn step(&self, state: Arc<dyn State>, input: &Tensor) -> Box<dyn BlockRes> {
        let present = downcast_state::<EmptyState>(&*state, "LayerBlock").0.clone();
        let input_var = Var::new(input.clone());
        let res = self
            .layer
            .apply(Arc::new(VarRes::new(&input_var)), present.count());
        Box::new(LayerBlockRes {
            state: Arc::new(EmptyState(present)),
            input_var,
            res,
        })
    }

    fn as_parameterizer(&self) -> Option<&dyn Parameterizer> {
        self.layer.as_parameterizer()
    }

    fn as_serializer(&self) -> Option<&dyn Serializer> {
        self.layer.as_serializer().map(|_| self as &dyn Serializer)
    }
}

impl Serializer for LayerBlock {
    fn serializer_type(&self) -> &'static str {
        Self::SERIALIZER_TYPE
    }

    fn serialize(&self) -> Result<Vec<u8>, SerializeError> {
        let layer = self.layer.as_serializer().ok_or_else(|| {
            SerializeError::NotSerializer {
                kind: self.layer.kind(),
            }
            .context("serialize LayerBlock")
        })?;
        serialize_typed(layer)
    }
}

struct LayerBlockRes {
    state: Arc<EmptyState>,
    // Stand-in leaf so the input gradient can be read back out of `grad`.
    input_var: Var,
    res: Arc<dyn Res>,
}

impl BlockRes for LayerBlockRes {
    fn state(&self) -> Arc<dyn State> {
        self.state.clone()
    }

    fn output(&self) -> &Tensor {
        self.res.output()
    }

    fn vars(&self) -> VarSet {
        self.res
            .vars()
            .into_vec()
            .into_iter()
            .filter(|v| *v != self.input_var)
            .collect()
    }

    fn propagate(
        &self,
        upstream: Tensor,
        _state_upstream: Option<&dyn StateGrad>,
        grad: &mut Grad,
    ) -> (Tensor, Box<dyn StateGrad>) {
        grad.insert_zeros(&self.input_var);
        self.res.propagate(upstream, grad);
        let input_grad = grad
            .remove(&self.input_var)
            .unwrap_or_else(|| Tensor::zeros(self.input_var.len()));
        (input_grad, Box::new(EmptyStateGrad(self.state.0.clone())))
    }
}
