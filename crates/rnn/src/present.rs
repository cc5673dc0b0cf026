//! # Present Maps
//!
//! Sequences in a batch end at different timesteps. A [`PresentMap`] records,
//! for every index of the *original* batch, whether that sequence is still
//! being stepped. Per-sequence data is stored packed: only present rows are
//! materialised, in original-batch order.
//!
//! ```text
//!   original batch:   0    1    2    3
//!   present:         [T,   F,   T,   T]
//!   packed rows:     r0        r2   r3      (3 rows, not 4)
//! ```
//!
//! Reduction and expansion are pure index remapping. Reducing from `from` to
//! `to` is an [`IndexMap`] gather over packed rows; expanding a gradient back
//! is the transpose of that same map scattered into zeros, so rows absent
//! from the reduced set come back as zero.

use serde::{Deserialize, Serialize};
use seqnet_core::{IndexMap, Tensor};

/// Membership of each original batch index in the active set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PresentMap(Vec<bool>);

impl PresentMap {
    /// Every one of `n` sequences present.
    pub fn all(n: usize) -> Self {
        Self(vec![true; n])
    }

    /// Wrap an explicit membership vector.
    pub fn new(present: Vec<bool>) -> Self {
        Self(present)
    }

    /// Width of the original batch.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the original batch is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of present sequences, i.e. the packed row count.
    pub fn count(&self) -> usize {
        self.0.iter().filter(|&&p| p).count()
    }

    /// Whether original index `i` is present.
    pub fn is_present(&self, i: usize) -> bool {
        self.0[i]
    }

    /// The raw membership vector.
    pub fn as_slice(&self) -> &[bool] {
        &self.0
    }

    /// Original indices of the present sequences, ascending.
    pub fn indices(&self) -> Vec<usize> {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(i, &p)| p.then_some(i))
            .collect()
    }

    /// Whether every sequence present here is also present in `other`.
    pub fn is_subset_of(&self, other: &PresentMap) -> bool {
        self.len() == other.len() && self.0.iter().zip(other.0.iter()).all(|(&a, &b)| !a || b)
    }
}

/// The gather map taking packed rows laid out by `from` to packed rows laid
/// out by `to`, where each row holds `row_size` values.
///
/// Panics unless `to` is a subset of `from`.
pub fn reduction_map(from: &PresentMap, to: &PresentMap, row_size: usize) -> IndexMap {
    assert!(
        to.is_subset_of(from),
        "present map {:?} is not a subset of {:?}",
        to.as_slice(),
        from.as_slice()
    );
    let mut table = Vec::with_capacity(to.count() * row_size);
    let mut packed_row = 0;
    for (&was, &keep) in from.as_slice().iter().zip(to.as_slice()) {
        if !was {
            continue;
        }
        if keep {
            let start = packed_row * row_size;
            table.extend(start..start + row_size);
        }
        packed_row += 1;
    }
    IndexMap::new(from.count() * row_size, table)
}

/// Keep only the rows of `packed` (laid out by `from`) that are present in `to`.
pub fn reduce_rows(packed: &Tensor, from: &PresentMap, to: &PresentMap, row_size: usize) -> Tensor {
    assert_eq!(
        packed.len(),
        from.count() * row_size,
        "packed length does not match present map"
    );
    reduction_map(from, to, row_size).gather(packed)
}

/// Inverse of [`reduce_rows`]: re-insert zero rows for sequences present in
/// `to` but absent from `from`.
pub fn expand_rows(packed: &Tensor, from: &PresentMap, to: &PresentMap, row_size: usize) -> Tensor {
    assert_eq!(
        packed.len(),
        from.count() * row_size,
        "packed length does not match present map"
    );
    reduction_map(to, from, row_size).scatter(packed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pm(bits: &[u8]) -> PresentMap {
        PresentMap::new(bits.iter().map(|&b| b == 1).collect())
    }

    #[test]
    fn test_counts_and_indices() {
        let p = pm(&[1, 0, 1, 1]);
        assert_eq!(p.len(), 4);
        assert_eq!(p.count(), 3);
        assert_eq!(p.indices(), vec![0, 2, 3]);
    }

    #[test]
    fn test_subset() {
        assert!(pm(&[1, 0, 0]).is_subset_of(&pm(&[1, 1, 0])));
        assert!(!pm(&[0, 0, 1]).is_subset_of(&pm(&[1, 1, 0])));
        assert!(!pm(&[1]).is_subset_of(&pm(&[1, 1])));
    }

    #[test]
    fn test_reduce_then_expand() {
        let from = pm(&[1, 0, 1, 1]);
        let to = pm(&[0, 0, 1, 1]);
        // rows for original indices 0, 2, 3, two values each
        let packed = Tensor::from(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        let reduced = reduce_rows(&packed, &from, &to, 2);
        assert_eq!(reduced.data, vec![3.0, 4.0, 5.0, 6.0]);

        let expanded = expand_rows(&reduced, &to, &from, 2);
        assert_eq!(expanded.data, vec![0.0, 0.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_reduce_to_nothing_and_back() {
        let from = pm(&[1, 1]);
        let to = pm(&[0, 0]);
        let reduced = reduce_rows(&Tensor::from(vec![1.0, 2.0]), &from, &to, 1);
        assert!(reduced.is_empty());
        assert_eq!(expand_rows(&reduced, &to, &from, 1).data, vec![0.0, 0.0]);
    }

    #[test]
    #[should_panic(expected = "not a subset")]
    fn test_reduce_requires_subset() {
        reduce_rows(&Tensor::from(vec![1.0]), &pm(&[1, 0]), &pm(&[0, 1]), 1);
    }
}
