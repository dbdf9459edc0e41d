//! Add-Wins Observed-Remove Set (AW-OR-Set)
//!
//! Every element is tagged with the dot of the write that produced it. A
//! removal covers exactly the dots it has observed, so an add concurrent with
//! a remove survives the join.
//!
//! `add` here has assign semantics: it removes every observed entry before
//! inserting the new one. Used as the history of a graph node, this means a
//! replica that has seen every write holds a single snapshot, and concurrent
//! writers leave one snapshot each until somebody overwrites them all.

use crate::context::{AgentId, Dot, DotContext};
use crate::kernel::DotKernel;
use crate::lattice::Lattice;
use serde::{Deserialize, Serialize};

/// An add-wins observed-remove set with its own causal context.
///
/// Mutators return the delta to ship; the delta is itself an `AworSet`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AworSet<V> {
    kernel: DotKernel<V>,
    context: DotContext,
}

impl<V> Default for AworSet<V> {
    fn default() -> Self {
        Self {
            kernel: DotKernel::new(),
            context: DotContext::new(),
        }
    }
}

impl<V> AworSet<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble a set (or a delta) from a kernel and the context it was observed under.
    pub fn from_parts(kernel: DotKernel<V>, context: DotContext) -> Self {
        Self { kernel, context }
    }

    pub fn into_parts(self) -> (DotKernel<V>, DotContext) {
        (self.kernel, self.context)
    }

    pub fn kernel(&self) -> &DotKernel<V> {
        &self.kernel
    }

    pub fn context(&self) -> &DotContext {
        &self.context
    }

    /// The value carrying the greatest dot.
    pub fn read(&self) -> Option<&V> {
        self.kernel.last().map(|(_, v)| v)
    }

    pub fn read_with_dot(&self) -> Option<(&Dot, &V)> {
        self.kernel.last()
    }

    pub fn values(&self) -> impl DoubleEndedIterator<Item = &V> {
        self.kernel.values()
    }

    pub fn dots(&self) -> impl DoubleEndedIterator<Item = &Dot> {
        self.kernel.dots()
    }

    pub fn len(&self) -> usize {
        self.kernel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernel.is_empty()
    }

    /// Remove every element. Returns the removal delta.
    pub fn reset(&mut self) -> Self {
        let (kernel, context) = self.kernel.clear();
        Self { kernel, context }
    }
}

impl<V: PartialEq> AworSet<V> {
    pub fn contains(&self, value: &V) -> bool {
        self.kernel.values().any(|v| v == value)
    }

    /// Remove every entry equal to `value`. Returns the removal delta.
    pub fn remove(&mut self, value: &V) -> Self {
        let (kernel, context) = self.kernel.remove_where(|v| v == value);
        Self { kernel, context }
    }
}

impl<V: Clone> AworSet<V> {
    /// Add `value` under a fresh dot for `replica_id`, superseding every
    /// observed entry. Returns the delta.
    pub fn add(&mut self, replica_id: AgentId, value: V) -> Self {
        let (kernel, context) = self.kernel.assign(&mut self.context, replica_id, value);
        Self { kernel, context }
    }
}

impl<V: Clone + PartialEq> Lattice for AworSet<V> {
    fn bottom() -> Self {
        Self::new()
    }

    fn join_assign(&mut self, other: &Self) {
        self.kernel
            .join_with(&self.context, &other.kernel, &other.context);
        self.context.join_assign(&other.context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_awset_add_is_assign() {
        let mut set = AworSet::new();
        set.add(1, "a");
        set.add(1, "b");
        assert_eq!(set.len(), 1);
        assert_eq!(set.read(), Some(&"b"));
        assert!(!set.contains(&"a"));
    }

    #[test]
    fn test_awset_concurrent_adds_coexist() {
        let mut a = AworSet::new();
        let mut b = AworSet::new();
        a.add(1, "x");
        b.add(2, "y");

        let joined = a.join(&b);
        assert_eq!(joined.len(), 2);
        // greatest dot wins the read: (2, 1) > (1, 1)
        assert_eq!(joined.read(), Some(&"y"));
        assert_eq!(joined, b.join(&a));
    }

    #[test]
    fn test_awset_add_wins_over_concurrent_remove() {
        let mut a = AworSet::new();
        let delta = a.add(1, 5);
        let mut b = AworSet::new();
        b.join_assign(&delta);

        // a re-adds while b removes what it saw
        a.add(1, 6);
        b.remove(&5);

        let joined = a.join(&b);
        assert_eq!(joined.read(), Some(&6));
        assert_eq!(joined.len(), 1);
    }

    #[test]
    fn test_awset_remove_is_not_undone_by_old_delta() {
        let mut a = AworSet::new();
        let add = a.add(1, "v");
        let remove = a.reset();
        assert!(a.is_empty());

        a.join_assign(&add);
        assert!(a.is_empty());

        let mut b = AworSet::new();
        b.join_assign(&remove);
        b.join_assign(&add);
        assert!(b.is_empty());
    }

    #[test]
    fn test_awset_deltas_reach_full_state() {
        let mut a = AworSet::new();
        let mut deltas = Vec::new();
        deltas.push(a.add(1, 1));
        deltas.push(a.add(1, 2));
        deltas.push(a.remove(&2));
        deltas.push(a.add(1, 3));

        let mut b = AworSet::new();
        for delta in deltas.iter().rev() {
            b.join_assign(delta);
        }
        assert_eq!(a, b);
    }

    #[test]
    fn test_awset_serialization() {
        let mut set = AworSet::new();
        set.add(3, "node".to_string());
        let json = serde_json::to_string(&set).unwrap();
        let back: AworSet<String> = serde_json::from_str(&json).unwrap();
        assert_eq!(set, back);
    }
}
