//! # Conv - Spatial Layers
//!
//! Layers over row-major, depth-minor images stored back to back in a batch:
//!
//! - [`geometry`]: sliding-window output sizes
//! - [`im2col`]: the gather table that extracts every filter window
//! - [`max_pool`]: differentiable max pooling built from two index maps
//!
//! **Call [`register_layers`] before decoding persisted layers or blocks
//! that may contain a [`MaxPool`].** Without it, decoding such a record
//! (for example a `seqnet_rnn::Stack` holding a `LayerBlock(MaxPool)`)
//! panics with `unknown Layer type`.

pub mod geometry;
pub mod im2col;
pub mod max_pool;

// Re-export key types
pub use geometry::ConvGeometry;
pub use im2col::window_map;
pub use max_pool::{MaxPool, MaxPoolConfig};

use once_cell::sync::OnceCell;
use seqnet_core::SerializeError;
use seqnet_diff::{Layer, LAYERS};

/// Register this crate's layer decoders in [`seqnet_diff::LAYERS`].
///
/// Only the first call registers; later calls return immediately.
pub fn register_layers() {
    static REGISTERED: OnceCell<()> = OnceCell::new();
    REGISTERED.get_or_init(|| {
        LAYERS.register(MaxPool::SERIALIZER_TYPE, decode_max_pool);
    });
}

fn decode_max_pool(data: &[u8]) -> Result<Box<dyn Layer>, SerializeError> {
    Ok(Box::new(MaxPool::deserialize(data)?))
}
