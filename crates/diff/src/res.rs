//! # Reverse-Mode Results
//!
//! A [`Res`] is a forward value bundled with the function that pushes a
//! gradient back through it. Results form a chain: a layer's result keeps its
//! input's result and calls its `propagate` once it has turned the upstream
//! gradient into an input gradient.
//!
//! ```text
//!   forward:   leaf ──► layer A ──► layer B ──► output
//!   backward:  leaf ◄── vjp(A) ◄─── vjp(B) ◄─── upstream
//! ```
//!
//! The chain ends at a leaf: [`Const`] swallows its gradient, [`VarRes`]
//! accumulates it into a [`Var`].

use seqnet_core::Tensor;

use crate::var::{Grad, Var, VarSet};

/// A forward value together with its backward function.
pub trait Res: Send + Sync {
    /// The forward value.
    fn output(&self) -> &Tensor;

    /// Every var this result depends on.
    fn vars(&self) -> VarSet;

    /// Push `upstream` (the gradient of the output) back into `grad`.
    ///
    /// Must be called at most once per result.
    fn propagate(&self, upstream: Tensor, grad: &mut Grad);
}

/// A constant leaf. Gradients stop here.
#[derive(Debug, Clone)]
pub struct Const(pub Tensor);

impl Res for Const {
    fn output(&self) -> &Tensor {
        &self.0
    }

    fn vars(&self) -> VarSet {
        VarSet::new()
    }

    fn propagate(&self, _upstream: Tensor, _grad: &mut Grad) {}
}

/// A var leaf. The value is snapshotted when the result is created, so later
/// updates to the var do not change this forward pass.
#[derive(Debug, Clone)]
pub struct VarRes {
    var: Var,
    value: Tensor,
}

impl VarRes {
    /// Snapshot `var` as a leaf result.
    pub fn new(var: &Var) -> Self {
        Self {
            var: var.clone(),
            value: var.snapshot(),
        }
    }
}

impl Res for VarRes {
    fn output(&self) -> &Tensor {
        &self.value
    }

    fn vars(&self) -> VarSet {
        VarSet::from_iter([self.var.clone()])
    }

    fn propagate(&self, upstream: Tensor, grad: &mut Grad) {
        assert_eq!(
            upstream.len(),
            self.value.len(),
            "upstream length mismatch"
        );
        grad.accumulate(&self.var, &upstream);
    }
}
