//! Shared types used across dynalloc crates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How nodes are chosen for an app request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionPolicy {
    /// Prefer the named range, backfill from any idle node.
    Optional,
    /// Every node must come from the named range; wait until enough are idle.
    Mandatory,
}

impl SelectionPolicy {
    /// Interpret a `flag=` value. Only `mandatory` (any case) is strict,
    /// every other value falls back to the optional policy.
    pub fn from_flag(flag: &str) -> Self {
        if flag.eq_ignore_ascii_case("mandatory") {
            SelectionPolicy::Mandatory
        } else {
            SelectionPolicy::Optional
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionPolicy::Optional => "optional",
            SelectionPolicy::Mandatory => "mandatory",
        }
    }
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether app outcomes are aggregated into one response or streamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnMode {
    /// One response after every app has been processed.
    All,
    /// One response per app, sent as soon as that app resolves.
    #[default]
    PerApp,
}

impl ReturnMode {
    /// Interpret a `return=` value: `all` aggregates, anything else streams.
    pub fn from_flag(flag: &str) -> Self {
        if flag == "all" {
            ReturnMode::All
        } else {
            ReturnMode::PerApp
        }
    }
}
