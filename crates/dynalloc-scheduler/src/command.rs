//! The key=value grammar shared by every command kind.
//!
//! A segment is split on whitespace and each token on its first `=`.
//! Tokens without `=` (the `allocate` and `deallocate` verbs) and keys the
//! command kind does not recognize are skipped, so newer clients can add
//! keys without breaking older brokers. Keys are case-sensitive.

use std::collections::HashMap;

use tracing::trace;

use crate::error::{ProtocolError, ProtocolResult};

/// A command kind and the keys it understands.
#[derive(Debug, Clone, Copy)]
pub struct CommandKind {
    pub name: &'static str,
    pub keys: &'static [&'static str],
}

/// First segment of a job request.
pub const JOB_HEADER: CommandKind = CommandKind {
    name: "job header",
    keys: &["jobid", "return", "timeout"],
};

/// One app segment of a job request.
pub const APP: CommandKind = CommandKind {
    name: "app",
    keys: &["app", "np", "N", "node_list", "flag"],
};

/// The single-line `allocate` form.
pub const ALLOCATE: CommandKind = CommandKind {
    name: "allocate",
    keys: &["N", "node_list", "flag", "timeout"],
};

/// One segment of a release request.
pub const RELEASE: CommandKind = CommandKind {
    name: "release",
    keys: &["slurm_jobid", "job_return_code"],
};

/// Recognized key/value pairs of one segment.
#[derive(Debug, Clone)]
pub struct Fields<'a> {
    kind: CommandKind,
    values: HashMap<&'static str, &'a str>,
}

impl<'a> Fields<'a> {
    /// Tokenize `segment` and keep the keys `kind` recognizes. A repeated
    /// key keeps its last value.
    pub fn parse(segment: &'a str, kind: CommandKind) -> Self {
        let mut values = HashMap::new();
        for token in segment.split_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            match kind.keys.iter().find(|k| **k == key) {
                Some(known) => {
                    values.insert(*known, value);
                }
                None => trace!(kind = kind.name, key, "ignoring unrecognized key"),
            }
        }
        Self { kind, values }
    }

    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.values.get(key).copied()
    }

    /// Value of a key the command cannot do without.
    pub fn require(&self, key: &str) -> ProtocolResult<&'a str> {
        self.get(key).ok_or_else(|| {
            ProtocolError::MalformedRequest(format!("{} segment is missing {key}=", self.kind.name))
        })
    }

    /// Numeric value of an optional key. Present but unparsable is an error.
    pub fn get_u32(&self, key: &str) -> ProtocolResult<Option<u32>> {
        self.get(key)
            .map(|value| {
                value.parse::<u32>().map_err(|_| {
                    ProtocolError::MalformedRequest(format!(
                        "{} segment has non-numeric {key}={value}",
                        self.kind.name
                    ))
                })
            })
            .transpose()
    }

    pub fn require_u32(&self, key: &str) -> ProtocolResult<u32> {
        let value = self.require(key)?;
        value.parse::<u32>().map_err(|_| {
            ProtocolError::MalformedRequest(format!(
                "{} segment has non-numeric {key}={value}",
                self.kind.name
            ))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Split a message into its `:`-separated segments, dropping empty ones.
pub fn segments(message: &str) -> impl Iterator<Item = &str> {
    message.split(':').map(str::trim).filter(|s| !s.is_empty())
}
