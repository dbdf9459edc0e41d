//! Multi-Value Register CRDT
//!
//! The Multi-Value Register (MV-Register) maintains a set of concurrent values
//! instead of choosing a single winner. Each value is tagged with the dot of
//! the write that produced it.
//!
//! A write removes every value it has observed (causal dominance). Writes that
//! did not see each other are all retained by the join until a later write
//! observes and overwrites them.

use crate::context::{AgentId, Dot, DotContext};
use crate::kernel::DotKernel;
use crate::lattice::Lattice;
use serde::{Deserialize, Serialize};

/// A Multi-Value Register CRDT.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MvRegister<T> {
    values: DotKernel<T>,
    context: DotContext,
}

impl<T> Default for MvRegister<T> {
    fn default() -> Self {
        Self {
            values: DotKernel::new(),
            context: DotContext::new(),
        }
    }
}

impl<T> MvRegister<T> {
    /// Create a new empty Multi-Value Register
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a register from its values and every dot it has observed.
    ///
    /// An empty `values` with a non-empty `context` masks the older writes
    /// covered by the context when joined.
    pub fn from_parts(values: DotKernel<T>, context: DotContext) -> Self {
        Self { values, context }
    }

    /// All concurrent values, ordered by dot.
    pub fn read(&self) -> Vec<&T> {
        self.values.values().collect()
    }

    /// All concurrent values with their dots.
    pub fn read_with_dots(&self) -> impl DoubleEndedIterator<Item = (&Dot, &T)> {
        self.values.iter()
    }

    /// Pick one value deterministically: the greatest `key`, ties broken in
    /// favour of the greater dot.
    pub fn resolve_by<K, F>(&self, key: F) -> Option<&T>
    where
        K: Ord,
        F: Fn(&T) -> K,
    {
        self.values
            .iter()
            .max_by(|(da, a), (db, b)| key(a).cmp(&key(b)).then(da.cmp(db)))
            .map(|(_, v)| v)
    }

    pub fn context(&self) -> &DotContext {
        &self.context
    }

    /// Does the register hold more than one value?
    pub fn has_conflict(&self) -> bool {
        self.values.len() > 1
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Drop every observed value. Returns the delta.
    pub fn clear(&mut self) -> Self {
        let (values, context) = self.values.clear();
        Self { values, context }
    }
}

impl<T: Clone> MvRegister<T> {
    /// Write a new value, superseding every value seen so far. Returns the delta.
    pub fn write(&mut self, replica_id: AgentId, value: T) -> Self {
        let (values, context) = self.values.assign(&mut self.context, replica_id, value);
        Self { values, context }
    }
}

impl<T: Clone + PartialEq> Lattice for MvRegister<T> {
    fn bottom() -> Self {
        Self::new()
    }

    fn join_assign(&mut self, other: &Self) {
        self.values
            .join_with(&self.context, &other.values, &other.context);
        self.context.join_assign(&other.context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mvreg_single_write() {
        let mut reg = MvRegister::new();
        reg.write(1, 42);
        assert_eq!(reg.read(), vec![&42]);
        assert!(!reg.has_conflict());
    }

    #[test]
    fn test_mvreg_sequential_writes_overwrite() {
        let mut reg = MvRegister::new();
        reg.write(1, 1);
        reg.write(1, 2);
        assert_eq!(reg.read(), vec![&2]);
    }

    #[test]
    fn test_mvreg_concurrent_writes_kept() {
        let mut a = MvRegister::new();
        let mut b = MvRegister::new();
        a.write(1, "left");
        b.write(2, "right");

        let merged = a.join(&b);
        assert!(merged.has_conflict());
        assert_eq!(merged.read(), vec![&"left", &"right"]);
        assert_eq!(merged, b.join(&a));
    }

    #[test]
    fn test_mvreg_write_after_merge_collapses() {
        let mut a = MvRegister::new();
        let mut b = MvRegister::new();
        a.write(1, 10);
        b.write(2, 20);
        a.join_assign(&b);

        let delta = a.write(1, 30);
        assert_eq!(a.read(), vec![&30]);

        b.join_assign(&delta);
        assert_eq!(b.read(), vec![&30]);
    }

    #[test]
    fn test_mvreg_resolve_by_key_then_dot() {
        let mut a = MvRegister::new();
        let mut b = MvRegister::new();
        let mut c = MvRegister::new();
        a.write(1, (5, "a"));
        b.write(2, (9, "b"));
        c.write(3, (9, "c"));
        let merged = a.join(&b).join(&c);

        assert_eq!(merged.resolve_by(|(k, _)| *k), Some(&(9, "c")));
        assert_eq!(merged.resolve_by(|(k, _)| -k), Some(&(5, "a")));
        assert_eq!(MvRegister::<u8>::new().resolve_by(|v| *v), None);
    }

    #[test]
    fn test_mvreg_clear() {
        let mut a = MvRegister::new();
        let write = a.write(1, 'x');
        let mut b = MvRegister::new();
        b.join_assign(&write);

        let clear = a.clear();
        b.join_assign(&clear);
        assert!(a.is_empty());
        assert!(b.is_empty());
    }

    #[test]
    fn test_mvreg_empty_register_masks_observed_writes() {
        let mut a = MvRegister::new();
        let write = a.write(1, 7);
        let masked = MvRegister::<i32>::from_parts(DotKernel::new(), write.context().clone());
        assert!(a.join(&masked).is_empty());

        // a write the mask has not seen survives
        let mut b = MvRegister::new();
        b.write(2, 9);
        assert_eq!(b.join(&masked).read(), vec![&9]);
    }

    #[test]
    fn test_mvreg_serialization() {
        let mut reg = MvRegister::new();
        reg.write(1, "value".to_string());

        let json = serde_json::to_string(&reg).unwrap();
        let restored: MvRegister<String> = serde_json::from_str(&json).unwrap();
        assert_eq!(reg, restored);
    }
}
