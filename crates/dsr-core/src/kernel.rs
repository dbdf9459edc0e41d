//! Dot kernel: the dot store shared by every causal CRDT in this crate.
//!
//! A [`DotKernel`] maps dots to values. It never owns a causal context of its
//! own: joins are evaluated against the contexts supplied by the caller, which
//! lets one context be shared by many kernels (the graph store keeps one
//! kernel per node and a single store-wide context).
//!
//! Join rule, for kernels `(m, c)` and `(m', c')`:
//!
//! ```text
//! { (d, v) ∈ m  | d ∈ m' ∨ d ∉ c' }  ∪  { (d, v) ∈ m' | d ∉ c }
//! ```

use crate::context::{AgentId, Dot, DotContext};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// A map from dots to values.
#[derive(Clone, Debug, PartialEq)]
pub struct DotKernel<V> {
    entries: BTreeMap<Dot, V>,
}

// Serialize as Vec<(Dot, V)>: JSON object keys must be strings.
impl<V: Serialize> Serialize for DotKernel<V> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let entries: Vec<(&Dot, &V)> = self.entries.iter().collect();
        entries.serialize(serializer)
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for DotKernel<V> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let entries: Vec<(Dot, V)> = Vec::deserialize(deserializer)?;
        Ok(Self {
            entries: entries.into_iter().collect(),
        })
    }
}

impl<V> Default for DotKernel<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> DotKernel<V> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&Dot, &V)> {
        self.entries.iter()
    }

    pub fn values(&self) -> impl DoubleEndedIterator<Item = &V> {
        self.entries.values()
    }

    pub fn dots(&self) -> impl DoubleEndedIterator<Item = &Dot> {
        self.entries.keys()
    }

    pub fn get(&self, dot: &Dot) -> Option<&V> {
        self.entries.get(dot)
    }

    pub fn contains_dot(&self, dot: &Dot) -> bool {
        self.entries.contains_key(dot)
    }

    /// The entry with the greatest dot.
    pub fn last(&self) -> Option<(&Dot, &V)> {
        self.entries.iter().next_back()
    }

    /// Insert a value under an explicit dot (used when rebuilding state).
    pub fn insert(&mut self, dot: Dot, value: V) -> Option<V> {
        self.entries.insert(dot, value)
    }

    /// Remove every entry matching `pred`.
    ///
    /// Returns the delta: an empty kernel whose context holds the removed dots.
    pub fn remove_where(&mut self, pred: impl Fn(&V) -> bool) -> (DotKernel<V>, DotContext) {
        let mut removed = DotContext::new();
        self.entries.retain(|dot, value| {
            if pred(value) {
                removed.insert_dot(*dot);
                false
            } else {
                true
            }
        });
        (DotKernel::new(), removed)
    }

    /// Remove every entry.
    pub fn clear(&mut self) -> (DotKernel<V>, DotContext) {
        self.remove_where(|_| true)
    }
}

impl<V: Clone> DotKernel<V> {
    /// Replace every observed entry by `value` under a freshly issued dot.
    ///
    /// The dot is drawn from (and recorded in) `context`. The returned delta
    /// carries the new entry plus every dot it supersedes.
    pub fn assign(
        &mut self,
        context: &mut DotContext,
        replica_id: AgentId,
        value: V,
    ) -> (DotKernel<V>, DotContext) {
        let mut delta_context = DotContext::new();
        for dot in self.entries.keys() {
            delta_context.insert_dot(*dot);
        }
        self.entries.clear();

        let dot = context.next_dot(replica_id);
        self.entries.insert(dot, value.clone());
        delta_context.insert_dot(dot);

        let mut delta = DotKernel::new();
        delta.entries.insert(dot, value);
        (delta, delta_context)
    }

    /// Join `other` (observed under `other_context`) into this kernel, which
    /// was observed under `context`.
    ///
    /// Contexts are not merged here; callers join them afterwards.
    /// Returns whether the kernel changed.
    pub fn join_with(
        &mut self,
        context: &DotContext,
        other: &DotKernel<V>,
        other_context: &DotContext,
    ) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|dot, _| other.entries.contains_key(dot) || !other_context.dot_in(dot));
        let mut changed = self.entries.len() != before;

        for (dot, value) in &other.entries {
            if !self.entries.contains_key(dot) && !context.dot_in(dot) {
                self.entries.insert(*dot, value.clone());
                changed = true;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_supersedes_observed_entries() {
        let mut cc = DotContext::new();
        let mut kernel = DotKernel::new();

        kernel.assign(&mut cc, 1, "a");
        let (delta, delta_cc) = kernel.assign(&mut cc, 1, "b");

        assert_eq!(kernel.values().collect::<Vec<_>>(), vec![&"b"]);
        assert_eq!(delta.len(), 1);
        assert!(delta_cc.dot_in(&Dot::new(1, 1)));
        assert!(delta_cc.dot_in(&Dot::new(1, 2)));
    }

    #[test]
    fn test_join_drops_entries_removed_remotely() {
        let mut cc_a = DotContext::new();
        let mut a = DotKernel::new();
        a.assign(&mut cc_a, 1, 10);

        let mut b = a.clone();
        let mut cc_b = cc_a.clone();
        b.clear();
        // b has observed (1,1) and no longer holds it
        assert!(cc_b.dot_in(&Dot::new(1, 1)));
        let changed = a.join_with(&cc_a, &b, &cc_b);
        assert!(changed);
        assert!(a.is_empty());

        // and the removal is not undone by re-delivering the original add
        let mut original = DotKernel::new();
        original.insert(Dot::new(1, 1), 10);
        cc_b.insert_dot(Dot::new(1, 1));
        let changed = b.join_with(&cc_b, &original, &cc_b.clone());
        assert!(!changed);
        assert!(b.is_empty());
    }

    #[test]
    fn test_join_keeps_concurrent_entries() {
        let mut cc_a = DotContext::new();
        let mut a = DotKernel::new();
        a.assign(&mut cc_a, 1, "from-1");

        let mut cc_b = DotContext::new();
        let mut b = DotKernel::new();
        b.assign(&mut cc_b, 2, "from-2");

        a.join_with(&cc_a, &b, &cc_b);
        assert_eq!(a.len(), 2);
        assert_eq!(a.last().map(|(_, v)| *v), Some("from-2"));
    }

    #[test]
    fn test_kernel_serialization() {
        let mut cc = DotContext::new();
        let mut kernel = DotKernel::new();
        kernel.assign(&mut cc, 3, 42u32);

        let json = serde_json::to_string(&kernel).unwrap();
        let back: DotKernel<u32> = serde_json::from_str(&json).unwrap();
        assert_eq!(kernel, back);
    }
}
