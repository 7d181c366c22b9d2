//! Persistence of execution trees.
//!
//! The engine talks to storage through the [`ExecutionStore`] trait only.
//! [`InMemoryStore`] is the bundled implementation.

pub mod memory;
pub mod store;

pub use memory::InMemoryStore;
pub use store::{EmbeddedKind, EmbeddedLink, ExecutionStore};
