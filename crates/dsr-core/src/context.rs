//! Causal context: a version vector with exceptions.
//!
//! Every write issued by a replica is identified by a [`Dot`]. A
//! [`DotContext`] summarises every dot a replica has observed as
//!
//! - a compact part: the highest contiguous counter seen per replica, and
//! - an exception set: dots above that frontier that arrived out of order.
//!
//! A dot is "seen" iff it is at or below the compact counter of its replica or
//! it is present in the exception set. Joining two contexts unions both parts
//! and folds exceptions that became contiguous back into the compact part.

use crate::lattice::Lattice;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Identifier of a writer (agent) in the system.
pub type AgentId = u32;

/// A unique identifier for a single write: `(replica, counter)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Dot {
    pub replica_id: AgentId,
    pub counter: u64,
}

impl Dot {
    pub fn new(replica_id: AgentId, counter: u64) -> Self {
        Self {
            replica_id,
            counter,
        }
    }
}

impl fmt::Display for Dot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.replica_id, self.counter)
    }
}

/// Compact record of all dots a replica has observed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DotContext {
    /// Highest contiguous counter seen per replica.
    compact: BTreeMap<AgentId, u64>,
    /// Dots seen above the contiguous frontier.
    exceptions: BTreeSet<Dot>,
}

impl DotContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from its two components, compacting the result.
    pub fn from_parts(
        compact: impl IntoIterator<Item = (AgentId, u64)>,
        exceptions: impl IntoIterator<Item = Dot>,
    ) -> Self {
        let mut context = Self {
            compact: compact.into_iter().filter(|(_, c)| *c > 0).collect(),
            exceptions: exceptions.into_iter().collect(),
        };
        context.compact();
        context
    }

    /// Has this dot been observed?
    pub fn dot_in(&self, dot: &Dot) -> bool {
        self.compact
            .get(&dot.replica_id)
            .is_some_and(|&c| dot.counter <= c)
            || self.exceptions.contains(dot)
    }

    /// Highest counter observed for a replica, contiguous or not.
    pub fn max_seen(&self, replica_id: AgentId) -> u64 {
        let compact = self.compact.get(&replica_id).copied().unwrap_or(0);
        let exception = self
            .exceptions
            .range(Dot::new(replica_id, 0)..=Dot::new(replica_id, u64::MAX))
            .next_back()
            .map(|d| d.counter)
            .unwrap_or(0);
        compact.max(exception)
    }

    /// Issue the next dot for `replica_id` and record it as observed.
    pub fn next_dot(&mut self, replica_id: AgentId) -> Dot {
        let dot = Dot::new(replica_id, self.max_seen(replica_id) + 1);
        self.insert_dot(dot);
        dot
    }

    /// Record a dot as observed.
    pub fn insert_dot(&mut self, dot: Dot) {
        if self.dot_in(&dot) {
            return;
        }
        let frontier = self.compact.entry(dot.replica_id).or_insert(0);
        if dot.counter == *frontier + 1 {
            *frontier = dot.counter;
            self.compact();
        } else {
            if *frontier == 0 {
                self.compact.remove(&dot.replica_id);
            }
            self.exceptions.insert(dot);
        }
    }

    /// Fold exceptions that are contiguous with (or covered by) the compact part.
    pub fn compact(&mut self) {
        // Exceptions are ordered by (replica, counter), so one ascending pass
        // sees each replica's dots in counter order.
        let exceptions = std::mem::take(&mut self.exceptions);
        for dot in exceptions {
            let frontier = self.compact.get(&dot.replica_id).copied().unwrap_or(0);
            if dot.counter == frontier + 1 {
                self.compact.insert(dot.replica_id, dot.counter);
            } else if dot.counter > frontier {
                self.exceptions.insert(dot);
            }
        }
    }

    /// Iterate over the compact part.
    pub fn compact_entries(&self) -> impl Iterator<Item = (AgentId, u64)> + '_ {
        self.compact.iter().map(|(&r, &c)| (r, c))
    }

    /// Iterate over the exceptions.
    pub fn exceptions(&self) -> impl Iterator<Item = &Dot> {
        self.exceptions.iter()
    }

    /// Does this context know about nothing at all?
    pub fn is_empty(&self) -> bool {
        self.compact.is_empty() && self.exceptions.is_empty()
    }

    /// Does this context cover every dot of `other`?
    pub fn includes(&self, other: &DotContext) -> bool {
        other.compact.iter().all(|(&r, &c)| {
            let mine = self.compact.get(&r).copied().unwrap_or(0);
            c <= mine || (mine + 1..=c).all(|n| self.exceptions.contains(&Dot::new(r, n)))
        }) && other.exceptions.iter().all(|d| self.dot_in(d))
    }
}

impl Lattice for DotContext {
    fn bottom() -> Self {
        Self::new()
    }

    fn join_assign(&mut self, other: &Self) {
        for (&replica_id, &counter) in &other.compact {
            let entry = self.compact.entry(replica_id).or_insert(0);
            *entry = (*entry).max(counter);
        }
        self.exceptions.extend(other.exceptions.iter().copied());
        self.compact();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_dot_is_contiguous() {
        let mut cc = DotContext::new();
        assert_eq!(cc.next_dot(1), Dot::new(1, 1));
        assert_eq!(cc.next_dot(1), Dot::new(1, 2));
        assert_eq!(cc.next_dot(2), Dot::new(2, 1));

        assert!(cc.dot_in(&Dot::new(1, 2)));
        assert!(!cc.dot_in(&Dot::new(1, 3)));
        assert_eq!(cc.exceptions().count(), 0);
    }

    #[test]
    fn test_out_of_order_dots_become_exceptions() {
        let mut cc = DotContext::new();
        cc.insert_dot(Dot::new(7, 3));
        assert!(cc.dot_in(&Dot::new(7, 3)));
        assert!(!cc.dot_in(&Dot::new(7, 1)));
        assert_eq!(cc.exceptions().count(), 1);

        cc.insert_dot(Dot::new(7, 1));
        cc.insert_dot(Dot::new(7, 2));
        assert_eq!(cc.exceptions().count(), 0);
        assert_eq!(cc.compact_entries().collect::<Vec<_>>(), vec![(7, 3)]);
    }

    #[test]
    fn test_next_dot_skips_past_exceptions() {
        let mut cc = DotContext::new();
        cc.insert_dot(Dot::new(4, 5));
        // Never reissue a counter another replica may already hold.
        assert_eq!(cc.next_dot(4), Dot::new(4, 6));
    }

    #[test]
    fn test_join_compacts() {
        let a = DotContext::from_parts([(1, 2)], [Dot::new(2, 2)]);
        let b = DotContext::from_parts([(1, 1), (2, 1)], [Dot::new(1, 4)]);

        let joined = a.join(&b);
        assert_eq!(
            joined.compact_entries().collect::<Vec<_>>(),
            vec![(1, 2), (2, 2)]
        );
        assert_eq!(joined.exceptions().copied().collect::<Vec<_>>(), vec![Dot::new(1, 4)]);
        assert!(joined.includes(&a));
        assert!(joined.includes(&b));
    }

    #[test]
    fn test_join_laws() {
        let a = DotContext::from_parts([(1, 3)], [Dot::new(2, 5)]);
        let b = DotContext::from_parts([(2, 4)], [Dot::new(1, 9)]);
        let c = DotContext::from_parts([(3, 1)], []);

        assert_eq!(a.join(&b), b.join(&a));
        assert_eq!(a.join(&b).join(&c), a.join(&b.join(&c)));
        assert_eq!(a.join(&a), a);
        assert_eq!(a.join(&DotContext::bottom()), a);
    }

    #[test]
    fn test_context_serialization() {
        let cc = DotContext::from_parts([(1, 3)], [Dot::new(2, 5)]);
        let json = serde_json::to_string(&cc).unwrap();
        let back: DotContext = serde_json::from_str(&json).unwrap();
        assert_eq!(cc, back);
    }
}
