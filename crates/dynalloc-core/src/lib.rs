//! dynalloc-core — shared building blocks for the dynamic allocation broker.
//!
//! - **`hostlist`** — `HostSet` and the compact node-range grammar
//! - **`layout`** — run-length encoding of per-node task counts
//! - **`config`** — `dynalloc.toml` parsing
//! - **`types`** — selection policy and return mode shared by every crate

pub mod config;
pub mod hostlist;
pub mod layout;
pub mod types;

pub use config::DynallocConfig;
pub use hostlist::{HostSet, HostlistError, HostlistResult, compress, expand};
pub use layout::layout_to_string;
pub use types::*;
