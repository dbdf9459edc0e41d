//! Delta-state CRDT primitives for the replicated DSR graph.
//!
//! - [`context`]: dots and the causal context (version vector with exceptions)
//! - [`kernel`]: the dot store shared by the causal CRDTs
//! - [`orset`]: add-wins observed-remove set
//! - [`mvreg`]: multi-value register
//! - [`pairs`]: serde helper for maps with structured keys

pub mod context;
pub mod kernel;
pub mod lattice;
pub mod mvreg;
pub mod orset;
pub mod pairs;

pub use context::{AgentId, Dot, DotContext};
pub use kernel::DotKernel;
pub use lattice::Lattice;
pub use mvreg::MvRegister;
pub use orset::AworSet;
