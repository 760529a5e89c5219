//! Deployment state persisted between runs
//!
//! Handles:
//! - Recording confirmed contract addresses per network
//! - Resolving contract names to addresses for linking

mod manifest;

pub use manifest::{ManifestEntry, ManifestStore};
