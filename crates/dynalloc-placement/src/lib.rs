//! dynalloc-placement — decides which hosts an app request asks for.
//!
//! The selector never allocates anything itself. It reads idle-node
//! snapshots from a [`ResourceManager`](dynalloc_state::ResourceManager)
//! and produces a [`Selection`] that the gateway turns into an allocation.
//!
//! # Components
//!
//! - **`selector`** — the optional policy and a single mandatory attempt,
//!   both pure functions of a snapshot
//! - **`retry`** — the mandatory wait: re-snapshot, re-check, sleep, repeat,
//!   cancellable through the shutdown signal

pub mod error;
pub mod retry;
pub mod selector;

pub use error::{SelectionError, SelectionResult};
pub use retry::{select, select_mandatory};
pub use selector::{Selection, SelectionRequest, select_optional, try_select_mandatory};
