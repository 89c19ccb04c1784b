//! Entity storage.
//!
//! - [`EntityStore`]: the repository seam used by the entity use case
//! - [`MemoryEntityStore`]: `DashMap`-backed implementation with simulated
//!   I/O latency that honours request cancellation

pub mod engine;
pub mod engines;

pub use engine::{EntityStore, StoreError};
pub use engines::MemoryEntityStore;
