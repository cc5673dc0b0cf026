//! # Layers and Capabilities
//!
//! A [`Layer`] is a stateless transform over a batch: it takes an input
//! [`Res`] and returns an output [`Res`]. Layers carry configuration and
//! parameters, never batch data.
//!
//! Some layers have extra capabilities. Rather than probing for them by name,
//! a composite asks the trait object directly:
//!
//! - [`Layer::as_parameterizer`]: the layer exposes trainable [`Var`]s
//! - [`Layer::as_serializer`]: the layer can persist itself
//!
//! Both default to `None`.

use std::sync::Arc;

use once_cell::sync::Lazy;
use seqnet_core::{Registry, Serializer};

use crate::res::Res;
use crate::var::Var;

/// Exposes an ordered list of trainable parameters.
pub trait Parameterizer {
    /// The parameters, in a stable order.
    fn parameters(&self) -> Vec<Var>;
}

/// A stateless differentiable transform over a batch.
pub trait Layer: Send + Sync {
    /// Apply the layer to `input`, which holds `batch` samples back to back.
    fn apply(&self, input: Arc<dyn Res>, batch: usize) -> Arc<dyn Res>;

    /// The concrete kind of this layer, for diagnostics.
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

/// Decoders for every persistable [`Layer`] type.
///
/// Crates that define layers register them here (see
/// `seqnet_conv::register_layers`).
pub static LAYERS: Lazy<Registry<dyn Layer>> = Lazy::new(|| Registry::new("Layer"));

#[cfg(test)]
mod tests {
    use super::*;
    use crate::res::Const;
    use seqnet_core::Tensor;

    struct Negate;

    impl Layer for Negate {
        fn apply(&self, input: Arc<dyn Res>, _batch: usize) -> Arc<dyn Res> {
            Arc::new(Const(input.output().scale(-1.0)))
        }
    }

    #[test]
    fn test_default_capabilities_absent() {
        let layer = Negate;
        assert!(layer.as_parameterizer().is_none());
        assert!(layer.as_serializer().is_none());
        assert!(layer.kind().ends_with("Negate"));
    }

    #[test]
    fn test_apply_through_trait_object() {
        let layer: Box<dyn Layer> = Box::new(Negate);
        let out = layer.apply(Arc::new(Const(Tensor::from(vec![1.0, -2.0]))), 1);
        assert_eq!(out.output().data, vec![-1.0, 2.0]);
    }
}
