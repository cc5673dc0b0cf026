//! # Concrete States
//!
//! - [`VecState`] / [`VecStateGrad`]: one packed row of `row_size` values per
//!   present sequence. Used by blocks whose memory is a plain vector.
//! - [`EmptyState`] / [`EmptyStateGrad`]: no memory at all, only the present
//!   map. Used by blocks with no recurrence.

use std::any::Any;
use std::sync::Arc;

use seqnet_core::Tensor;

use crate::block::{State, StateGrad};
use crate::present::{expand_rows, reduce_rows, PresentMap};

/// A packed per-sequence vector state.
#[derive(Debug, Clone, PartialEq)]
pub struct VecState {
    /// Packed rows, one per present sequence.
    pub vector: Tensor,
    /// Values per row.
    pub row_size: usize,
    /// Which sequences the rows belong to.
    pub present: PresentMap,
}

impl VecState {
    /// Wrap packed rows. `vector` must hold exactly one row per present sequence.
    pub fn new(vector: Tensor, row_size: usize, present: PresentMap) -> Self {
        assert_eq!(
            vector.len(),
            row_size * present.count(),
            "state length does not match present map"
        );
        Self {
            vector,
            row_size,
            present,
        }
    }

    /// Every one of `n` sequences starting from the same `row`.
    pub fn broadcast(row: &Tensor, n: usize) -> Self {
        Self::new(row.repeat(n), row.len(), PresentMap::all(n))
    }
}

impl State for VecState {
    fn present(&self) -> PresentMap {
        self.present.clone()
    }

    fn reduce(&self, present: &PresentMap) -> Arc<dyn State> {
        let vector = reduce_rows(&self.vector, &self.present, present, self.row_size);
        Arc::new(VecState::new(vector, self.row_size, present.clone()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The gradient of a [`VecState`].
#[derive(Debug, Clone, PartialEq)]
pub struct VecStateGrad {
    /// Packed gradient rows, one per present sequence.
    pub vector: Tensor,
    /// Values per row.
    pub row_size: usize,
    /// Which sequences the rows belong to.
    pub present: PresentMap,
}

impl VecStateGrad {
    /// Wrap packed gradient rows.
    pub fn new(vector: Tensor, row_size: usize, present: PresentMap) -> Self {
        assert_eq!(
            vector.len(),
            row_size * present.count(),
            "state gradient length does not match present map"
        );
        Self {
            vector,
            row_size,
            present,
        }
    }

    /// Sum the packed rows into one row.
    pub fn sum_rows(&self) -> Tensor {
        let mut total = Tensor::zeros(self.row_size);
        if self.row_size == 0 {
            return total;
        }
        for row in self.vector.data.chunks(self.row_size) {
            for (t, g) in total.data.iter_mut().zip(row) {
                *t += g;
            }
        }
        total
    }
}

impl StateGrad for VecStateGrad {
    fn present(&self) -> PresentMap {
        self.present.clone()
    }

    fn expand(&self, present: &PresentMap) -> Box<dyn StateGrad> {
        let vector = expand_rows(&self.vector, &self.present, present, self.row_size);
        Box::new(VecStateGrad::new(vector, self.row_size, present.clone()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A state that carries nothing but its present map.
#[derive(Debug, Clone, PartialEq)]
pub struct EmptyState(pub PresentMap);

impl State for EmptyState {
    fn present(&self) -> PresentMap {
        self.0.clone()
    }

    fn reduce(&self, present: &PresentMap) -> Arc<dyn State> {
        assert!(
            present.is_subset_of(&self.0),
            "present map is not a subset of the state's"
        );
        Arc::new(EmptyState(present.clone()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The gradient of an [`EmptyState`].
#[derive(Debug, Clone, PartialEq)]
pub struct EmptyStateGrad(pub PresentMap);

impl StateGrad for EmptyStateGrad {
    fn present(&self) -> PresentMap {
        self.0.clone()
    }

    fn expand(&self, present: &PresentMap) -> Box<dyn StateGrad> {
        assert!(
            self.0.is_subset_of(present),
            "present map is not a superset of the gradient's"
        );
        Box::new(EmptyStateGrad(present.clone()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
