//! # Diff - Reverse-Mode Building Blocks
//!
//! This crate provides the reverse-mode vocabulary shared by every seqnet layer
//! and block:
//!
//! - [`var`]: trainable parameters ([`Var`]), var sets and the [`Grad`] accumulator
//! - [`res`]: forward results that know how to propagate gradients ([`Res`])
//! - [`layer`]: stateless batch transforms and their optional capabilities
//!
//! ## Core Insight
//!
//! The backward pass reverses arrows: for a chain `f ; g`, the gradient flows
//! through `vjp(g) ; vjp(f)`. Each [`Res`] holds exactly what its own VJP
//! needs, so nothing is recomputed on the way back.
//!
//! ## Example
//!
//! ```rust
//! use seqnet_core::Tensor;
//! use seqnet_diff::{Grad, Res, Var, VarRes};
//!
//! let w = Var::new(Tensor::from(vec![1.0, 2.0, 3.0]));
//! let res = VarRes::new(&w);
//!
//! let mut grad = Grad::new(&res.vars());
//! res.propagate(Tensor::full(3, 1.0), &mut grad);
//! assert_eq!(grad.get(&w).unwrap().data, vec![1.0, 1.0, 1.0]);
//! ```

pub mod layer;
pub mod res;
pub mod var;

// Re-export key types
pub use layer::{Layer, Parameterizer, LAYERS};
pub use res::{Const, Res, VarRes};
pub use var::{Grad, Var, VarId, VarSet};
