//! # Core - seqnet Foundations
//!
//! This crate provides the leaf abstractions every other seqnet crate builds on:
//!
//! - **Tensors**: flat `f32` buffers with an implied row-major, depth-minor layout
//! - **Index maps**: precomputed gather tables and their accumulating transposes
//! - **Persistence**: typed records, field records and type-tag registries
//! - **Errors**: recoverable format errors with operation context
//!
//! ## Design Philosophy
//!
//! Gradients in seqnet are never derived symbolically. Each forward computation
//! records the exact index tables it used, and the backward pass replays their
//! transposes in reverse. [`IndexMap`] is the shared vocabulary for that.

pub mod error;
pub mod mapper;
pub mod serializer;
pub mod tensor;

// Re-export key types at crate root for convenience
pub use error::SerializeError;
pub use mapper::IndexMap;
pub use serializer::{Registry, Serializer};
pub use tensor::Tensor;
