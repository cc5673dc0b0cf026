//! # Index Maps
//!
//! An [`IndexMap`] is a precomputed gather table: output slot `i` reads input
//! slot `table[i]`. The same table also defines the adjoint scatter used on the
//! backward pass, which *accumulates* because several output slots may read
//! the same input slot:
//!
//! ```text
//!   map:            out[i]            = in[table[i]]
//!   map_transpose:  grad_in[table[i]] += grad_out[i]
//! ```
//!
//! Gathers compose; so do their transposes, in reverse order. Max pooling is
//! exactly that: a window-extraction map followed by an argmax map, whose
//! gradient is the argmax transpose followed by the window transpose.
//!
//! ## Example
//!
//! ```rust
//! use seqnet_core::IndexMap;
//!
//! // Read slot 1 twice and slot 0 once; slot 2 is never read.
//! let m = IndexMap::new(3, vec![1, 1, 0]);
//! let mut out = [0.0; 3];
//! m.map(&[10.0, 20.0, 30.0], &mut out);
//! assert_eq!(out, [20.0, 20.0, 10.0]);
//!
//! let mut grad_in = [0.0; 3];
//! m.map_transpose(&[1.0, 2.0, 3.0], &mut grad_in);
//! assert_eq!(grad_in, [3.0, 3.0, 0.0]);
//! ```

use crate::tensor::Tensor;

/// An immutable gather/scatter index table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMap {
    in_size: usize,
    table: Vec<usize>,
}

impl IndexMap {
    /// Build a map from `in_size` input slots through `table`.
    ///
    /// Panics if any entry of `table` is not a valid input slot.
    pub fn new(in_size: usize, table: Vec<usize>) -> Self {
        if let Some(&bad) = table.iter().find(|&&idx| idx >= in_size) {
            panic!("index {} out of range for input size {}", bad, in_size);
        }
        Self { in_size, table }
    }

    /// Build the argmax map of `values` split into consecutive groups of
    /// `group_size`.
    ///
    /// Output slot `g` selects the position of the largest element of group
    /// `g`. Ties resolve to the first occurrence in scan order.
    pub fn argmax_groups(values: &[f32], group_size: usize) -> Self {
        assert!(group_size > 0, "argmax group size must be positive");
        assert_eq!(
            values.len() % group_size,
            0,
            "{} values do not split into groups of {}",
            values.len(),
            group_size
        );
        let table = values
            .chunks(group_size)
            .enumerate()
            .map(|(g, group)| {
                let mut best = 0;
                for (i, &v) in group.iter().enumerate().skip(1) {
                    if v > group[best] {
                        best = i;
                    }
                }
                g * group_size + best
            })
            .collect();
        Self {
            in_size: values.len(),
            table,
        }
    }

    /// Number of input slots.
    pub fn in_size(&self) -> usize {
        self.in_size
    }

    /// Number of output slots.
    pub fn out_size(&self) -> usize {
        self.table.len()
    }

    /// The raw table, one input slot per output slot.
    pub fn table(&self) -> &[usize] {
        &self.table
    }

    /// Gather: `out[i] = input[table[i]]`.
    pub fn map(&self, input: &[f32], out: &mut [f32]) {
        assert_eq!(input.len(), self.in_size, "map input length mismatch");
        assert_eq!(out.len(), self.out_size(), "map output length mismatch");
        for (dst, &src) in out.iter_mut().zip(self.table.iter()) {
            *dst = input[src];
        }
    }

    /// Accumulating scatter: `grad_in[table[i]] += grad_out[i]`.
    pub fn map_transpose(&self, grad_out: &[f32], grad_in: &mut [f32]) {
        assert_eq!(
            grad_out.len(),
            self.out_size(),
            "map_transpose input length mismatch"
        );
        assert_eq!(
            grad_in.len(),
            self.in_size,
            "map_transpose output length mismatch"
        );
        for (&g, &dst) in grad_out.iter().zip(self.table.iter()) {
            grad_in[dst] += g;
        }
    }

    /// Allocating form of [`IndexMap::map`].
    pub fn gather(&self, input: &Tensor) -> Tensor {
        let mut out = Tensor::zeros(self.out_size());
        self.map(&input.data, &mut out.data);
        out
    }

    /// Allocating form of [`IndexMap::map_transpose`], scattering into zeros.
    pub fn scatter(&self, grad_out: &Tensor) -> Tensor {
        let mut grad_in = Tensor::zeros(self.in_size);
        self.map_transpose(&grad_out.data, &mut grad_in.data);
        grad_in
    }
}
