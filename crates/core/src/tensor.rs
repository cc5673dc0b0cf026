//! # Flat Tensors
//!
//! Every value flowing through seqnet is a flat `f32` buffer. Shape is implied
//! by whoever produced the buffer:
//!
//! - images are row-major and depth-minor, so element `(x, y, z)` of a
//!   `width × height × depth` image lives at `(y * width + x) * depth + z`
//! - batches are concatenated, so sample `i` of a batch of fixed-size items
//!   occupies `[i * item, (i + 1) * item)`
//!
//! ## Example
//!
//! ```rust
//! use seqnet_core::Tensor;
//!
//! let a = Tensor::from(vec![1.0, 2.0]);
//! let b = Tensor::from(vec![3.0, 4.0]);
//! let batch = Tensor::concat(&[a, b]);
//! assert_eq!(batch.data, vec![1.0, 2.0, 3.0, 4.0]);
//! assert_eq!(batch.slice(2, 4).data, vec![3.0, 4.0]);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// A flat, row-major numeric buffer.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    /// Flattened data.
    pub data: Vec<f32>,
}

impl Tensor {
    /// Create a tensor of `len` zeros.
    pub fn zeros(len: usize) -> Self {
        Self {
            data: vec![0.0; len],
        }
    }

    /// Create a tensor of `len` copies of `value`.
    pub fn full(len: usize, value: f32) -> Self {
        Self {
            data: vec![value; len],
        }
    }

    /// Create a tensor of zeros with the same length.
    pub fn zeros_like(&self) -> Self {
        Self::zeros(self.len())
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the tensor holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Copy out the elements in `[start, end)`.
    pub fn slice(&self, start: usize, end: usize) -> Tensor {
        assert!(
            start <= end && end <= self.len(),
            "slice [{}, {}) out of range for length {}",
            start,
            end,
            self.len()
        );
        Tensor {
            data: self.data[start..end].to_vec(),
        }
    }

    /// Concatenate tensors end to end.
    pub fn concat(parts: &[Tensor]) -> Tensor {
        let total = parts.iter().map(Tensor::len).sum();
        let mut data = Vec::with_capacity(total);
        for part in parts {
            data.extend_from_slice(&part.data);
        }
        Tensor { data }
    }

    /// Repeat this tensor `n` times end to end.
    pub fn repeat(&self, n: usize) -> Tensor {
        let mut data = Vec::with_capacity(self.len() * n);
        for _ in 0..n {
            data.extend_from_slice(&self.data);
        }
        Tensor { data }
    }

    /// Element-wise addition.
    pub fn add(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.len(), other.len(), "length mismatch for add");
        let data = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a + b)
            .collect();
        Tensor { data }
    }

    /// In-place element-wise addition.
    pub fn add_assign(&mut self, other: &Tensor) {
        assert_eq!(self.len(), other.len(), "length mismatch for add_assign");
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += b;
        }
    }

    /// Element-wise multiplication.
    pub fn mul(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.len(), other.len(), "length mismatch for mul");
        let data = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a * b)
            .collect();
        Tensor { data }
    }

    /// Scalar multiplication.
    pub fn scale(&self, scalar: f32) -> Tensor {
        self.map(|x| x * scalar)
    }

    /// Apply a function to each element.
    pub fn map(&self, f: impl Fn(f32) -> f32) -> Tensor {
        Tensor {
            data: self.data.iter().map(|&x| f(x)).collect(),
        }
    }

    /// Sum of all elements.
    pub fn sum(&self) -> f32 {
        self.data.iter().sum()
    }

    /// Dot product with another tensor of the same length.
    pub fn dot(&self, other: &Tensor) -> f32 {
        assert_eq!(self.len(), other.len(), "length mismatch for dot");
        self.data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a * b)
            .sum()
    }
}

impl From<Vec<f32>> for Tensor {
    fn from(data: Vec<f32>) -> Self {
        Self { data }
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor[{}]={:?}", self.len(), self.data)
    }
}
