//! # RNN - Stateful Time-Stepped Blocks
//!
//! This crate runs differentiable blocks one timestep at a time over batches
//! of variable-length sequences:
//!
//! - [`block`]: the [`Block`], [`State`] and [`BlockRes`] contracts
//! - [`present`]: present maps and packed-row reduction/expansion
//! - [`state`]: vector and empty states
//! - [`stack`]: composing blocks within a timestep
//! - [`vanilla`]: the tanh recurrence with a learned start state
//! - [`layer_block`]: lifting a stateless layer into a block
//! - [`seq`]: unrolling a block over sequences and back-propagating through time
//!
//! ## Persistence
//!
//! Every block defined here is registered in [`BLOCKS`] under its
//! `SERIALIZER_TYPE`, so a serialized [`Stack`] can be decoded without knowing
//! its members up front. Blocks wrapping layers also need the layer types
//! registered in [`seqnet_diff::LAYERS`].

pub mod block;
pub mod layer_block;
pub mod present;
pub mod seq;
pub mod stack;
pub mod state;
pub mod vanilla;

// Re-export key types
pub use block::{Block, BlockRes, State, StateGrad, BLOCKS};
pub use layer_block::LayerBlock;
pub use present::PresentMap;
pub use seq::{SeqTape, Step};
pub use stack::{Stack, StackGrad, StackState};
pub use state::{EmptyState, EmptyStateGrad, VecState, VecStateGrad};
pub use vanilla::Vanilla;
