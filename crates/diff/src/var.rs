//! # Parameters and Gradients
//!
//! - [`Var`]: a trainable tensor with identity. Clones share storage, so a
//!   block and every result it produces see the same weights.
//! - [`VarSet`]: an insertion-ordered set of vars, deduplicated by identity.
//! - [`Grad`]: the gradient accumulator filled in by backward passes.
//!
//! A [`Grad`] only tracks the vars it was created with. Gradient contributions
//! for any other var are dropped, which is how parameters get frozen.
//!
//! ## Example
//!
//! ```rust
//! use seqnet_core::Tensor;
//! use seqnet_diff::{Grad, Var, VarSet};
//!
//! let w = Var::new(Tensor::from(vec![1.0, 2.0]));
//! let frozen = Var::new(Tensor::from(vec![3.0]));
//!
//! let mut grad = Grad::new(&VarSet::from_iter([w.clone()]));
//! grad.accumulate(&w, &Tensor::from(vec![0.5, 0.5]));
//! grad.accumulate(&w, &Tensor::from(vec![0.5, 0.0]));
//! grad.accumulate(&frozen, &Tensor::from(vec![9.0]));
//!
//! assert_eq!(grad.get(&w).unwrap().data, vec![1.0, 0.5]);
//! assert!(grad.get(&frozen).is_none());
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use seqnet_core::Tensor;

static NEXT_VAR_ID: AtomicU64 = AtomicU64::new(0);

/// Identity of a [`Var`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(u64);

/// A shared trainable tensor.
#[derive(Clone)]
pub struct Var {
    id: VarId,
    value: Arc<RwLock<Tensor>>,
}

impl Var {
    /// Create a new var holding `value`.
    pub fn new(value: Tensor) -> Self {
        Self {
            id: VarId(NEXT_VAR_ID.fetch_add(1, Ordering::Relaxed)),
            value: Arc::new(RwLock::new(value)),
        }
    }

    /// This var's identity.
    pub fn id(&self) -> VarId {
        self.id
    }

    /// Borrow the current value.
    pub fn value(&self) -> RwLockReadGuard<'_, Tensor> {
        self.value.read()
    }

    /// Copy out the current value.
    pub fn snapshot(&self) -> Tensor {
        self.value.read().clone()
    }

    /// Replace the current value. The length must not change.
    pub fn set(&self, value: Tensor) {
        let mut guard = self.value.write();
        assert_eq!(guard.len(), value.len(), "var length cannot change");
        *guard = value;
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.value.read().len()
    }

    /// True when the var holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PartialEq for Var {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Var {}

impl fmt::Debug for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Var#{}(len={})", self.id.0, self.len())
    }
}

/// An insertion-ordered, identity-deduplicated set of vars.
#[derive(Debug, Clone, Default)]
pub struct VarSet {
    vars: Vec<Var>,
    ids: HashSet<VarId>,
}

impl VarSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a var. Returns false if it was already present.
    pub fn insert(&mut self, var: Var) -> bool {
        if self.ids.insert(var.id) {
            self.vars.push(var);
            true
        } else {
            false
        }
    }

    /// Whether `var` is in the set.
    pub fn contains(&self, var: &Var) -> bool {
        self.ids.contains(&var.id)
    }

    /// Union `other` into this set, keeping first-seen order.
    pub fn merge(&mut self, other: &VarSet) {
        for var in &other.vars {
            self.insert(var.clone());
        }
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Var> {
        self.vars.iter()
    }

    /// Number of distinct vars.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// True when the set is empty.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// The vars in insertion order.
    pub fn into_vec(self) -> Vec<Var> {
        self.vars
    }
}

impl FromIterator<Var> for VarSet {
    fn from_iter<I: IntoIterator<Item = Var>>(iter: I) -> Self {
        let mut set = VarSet::new();
        set.extend(iter);
        set
    }
}

impl Extend<Var> for VarSet {
    fn extend<I: IntoIterator<Item = Var>>(&mut self, iter: I) {
        for var in iter {
            self.insert(var);
        }
    }
}

/// Gradient accumulator keyed by var identity.
#[derive(Debug, Clone, Default)]
pub struct Grad {
    entries: HashMap<VarId, Tensor>,
}

impl Grad {
    /// Track every var in `vars`, starting from zero.
    pub fn new(vars: &VarSet) -> Self {
        let mut grad = Grad::default();
        for var in vars.iter() {
            grad.insert_zeros(var);
        }
        grad
    }

    /// Start tracking `var` with a zero gradient.
    pub fn insert_zeros(&mut self, var: &Var) {
        self.entries.insert(var.id, Tensor::zeros(var.len()));
    }

    /// Stop tracking `var`, returning its accumulated gradient.
    pub fn remove(&mut self, var: &Var) -> Option<Tensor> {
        self.entries.remove(&var.id)
    }

    /// Whether `var` is tracked.
    pub fn contains(&self, var: &Var) -> bool {
        self.entries.contains_key(&var.id)
    }

    /// Add `delta` to `var`'s gradient if it is tracked.
    pub fn accumulate(&mut self, var: &Var, delta: &Tensor) {
        if let Some(entry) = self.entries.get_mut(&var.id) {
            entry.add_assign(delta);
        }
    }

    /// The accumulated gradient for `var`.
    pub fn get(&self, var: &Var) -> Option<&Tensor> {
        self.entries.get(&var.id)
    }

    /// Number of tracked vars.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
