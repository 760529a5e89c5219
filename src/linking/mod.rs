//! Post-deployment linking
//!
//! Linking issues an ordered list of setter calls that make deployed
//! contracts reference one another. Steps run strictly in order and each one
//! is confirmed before the next is sent. The first failure halts the run
//! without undoing confirmed steps; re-running the whole list recovers,
//! since setting a peer address twice leaves the same state.

pub mod bootstrap;
pub mod plan;

pub use bootstrap::LinkingBootstrap;
pub use plan::{LinkState, LinkStep};
