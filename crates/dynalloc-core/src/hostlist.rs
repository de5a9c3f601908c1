//! Host sets and the compact node-range grammar.
//!
//! A range expression is a comma-separated list of items. Each item is either
//! a plain host name (`vm1`) or a prefix followed by one bracketed list of
//! numbers and inclusive ranges, with an optional suffix (`node[01-04,7]-ib`).
//!
//! Expansion preserves the written order and drops duplicates. Compression
//! only merges neighbouring hosts that share a prefix, so the round trip
//! `expand(&compress(&set)) == set` holds for every set.

use std::collections::HashSet;
use std::fmt;

use thiserror::Error;

/// Upper bound on the hosts a single expression may expand to.
pub const MAX_EXPANDED_HOSTS: usize = 65_536;

pub type HostlistResult<T> = Result<T, HostlistError>;

/// Errors raised while expanding a range expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostlistError {
    #[error("unbalanced brackets in range expression: {0}")]
    UnbalancedBrackets(String),

    #[error("invalid numeric range `{range}` in `{expr}`")]
    InvalidRange { expr: String, range: String },

    #[error("range expression expands past {MAX_EXPANDED_HOSTS} hosts: {0}")]
    TooLarge(String),
}

/// An insertion-ordered collection of unique host names.
#[derive(Debug, Clone, Default)]
pub struct HostSet {
    hosts: Vec<String>,
    index: HashSet<String>,
}

impl HostSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a range expression. Shorthand for [`expand`].
    pub fn parse(expr: &str) -> HostlistResult<Self> {
        expand(expr)
    }

    /// Append a host unless it is already present. Returns true if added.
    pub fn push(&mut self, host: impl Into<String>) -> bool {
        let host = host.into();
        if self.index.contains(&host) {
            return false;
        }
        self.index.insert(host.clone());
        self.hosts.push(host);
        true
    }

    pub fn contains(&self, host: &str) -> bool {
        self.index.contains(host)
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.hosts.iter().map(String::as_str)
    }

    /// Hosts of `self` followed by hosts of `other` not already present.
    pub fn union(&self, other: &HostSet) -> HostSet {
        let mut out = self.clone();
        for host in other.iter() {
            out.push(host);
        }
        out
    }

    /// Hosts of `self` that are also in `other`, in `self`'s order.
    pub fn intersection(&self, other: &HostSet) -> HostSet {
        self.iter().filter(|h| other.contains(h)).collect()
    }

    /// Hosts of `self` that are not in `other`, in `self`'s order.
    pub fn difference(&self, other: &HostSet) -> HostSet {
        self.iter().filter(|h| !other.contains(h)).collect()
    }

    /// The first `count` hosts in iteration order.
    pub fn take(&self, count: usize) -> HostSet {
        self.iter().take(count).collect()
    }

    /// Canonical compact form, see [`compress`].
    pub fn compress(&self) -> String {
        compress(self)
    }

    /// Explicit `h1,h2,h3` form used in responses.
    pub fn to_comma_list(&self) -> String {
        self.hosts.join(",")
    }

    pub fn into_vec(self) -> Vec<String> {
        self.hosts
    }
}

impl PartialEq for HostSet {
    fn eq(&self, other: &Self) -> bool {
        self.hosts == other.hosts
    }
}

impl Eq for HostSet {}

impl fmt::Display for HostSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&compress(self))
    }
}

impl<S: Into<String>> FromIterator<S> for HostSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = HostSet::new();
        for host in iter {
            set.push(host);
        }
        set
    }
}

impl From<Vec<String>> for HostSet {
    fn from(hosts: Vec<String>) -> Self {
        hosts.into_iter().collect()
    }
}

// ── Expansion ──────────────────────────────────────────────────────

/// Expand a range expression into an ordered host set.
///
/// Empty input yields an empty set.
pub fn expand(expr: &str) -> HostlistResult<HostSet> {
    let mut set = HostSet::new();
    for item in split_top_level(expr)? {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        expand_item(expr, item, &mut set)?;
        if set.len() > MAX_EXPANDED_HOSTS {
            return Err(HostlistError::TooLarge(expr.to_string()));
        }
    }
    Ok(set)
}

/// Split on commas that are not inside brackets.
fn split_top_level(expr: &str) -> HostlistResult<Vec<&str>> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in expr.char_indices() {
        match c {
            '[' => {
                depth += 1;
                if depth > 1 {
                    return Err(HostlistError::UnbalancedBrackets(expr.to_string()));
                }
            }
            ']' => {
                if depth == 0 {
                    return Err(HostlistError::UnbalancedBrackets(expr.to_string()));
                }
                depth -= 1;
            }
            ',' if depth == 0 => {
                items.push(&expr[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(HostlistError::UnbalancedBrackets(expr.to_string()));
    }
    items.push(&expr[start..]);
    Ok(items)
}

fn expand_item(expr: &str, item: &str, set: &mut HostSet) -> HostlistResult<()> {
    let Some(open) = item.find('[') else {
        set.push(item);
        return Ok(());
    };
    // split_top_level guarantees a matching close bracket.
    let close = item[open..]
        .find(']')
        .map(|i| open + i)
        .ok_or_else(|| HostlistError::UnbalancedBrackets(expr.to_string()))?;
    let prefix = &item[..open];
    let body = &item[open + 1..close];
    let suffix = &item[close + 1..];
    if suffix.contains('[') {
        return Err(HostlistError::UnbalancedBrackets(expr.to_string()));
    }

    for part in body.split(',') {
        let part = part.trim();
        let invalid = || HostlistError::InvalidRange {
            expr: expr.to_string(),
            range: part.to_string(),
        };
        let (lo_str, hi_str) = part.split_once('-').unwrap_or((part, part));
        if !is_digits(lo_str) || !is_digits(hi_str) {
            return Err(invalid());
        }
        let lo: u64 = lo_str.parse().map_err(|_| invalid())?;
        let hi: u64 = hi_str.parse().map_err(|_| invalid())?;
        if hi < lo {
            return Err(invalid());
        }
        // Checked against the running total so many small parts cannot add up.
        let span = (hi - lo).saturating_add(1);
        if (set.len() as u64).saturating_add(span) > MAX_EXPANDED_HOSTS as u64 {
            return Err(HostlistError::TooLarge(expr.to_string()));
        }
        let width = padded_width(lo_str);
        for n in lo..=hi {
            set.push(format!("{prefix}{n:0width$}{suffix}"));
        }
    }
    Ok(())
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Zero-padded numbers keep their width; others are printed as-is.
fn padded_width(digits: &str) -> usize {
    if digits.len() > 1 && digits.starts_with('0') {
        digits.len()
    } else {
        0
    }
}

// ── Compression ────────────────────────────────────────────────────

/// A host split into `prefix` + numeric suffix.
struct NumberedHost<'a> {
    prefix: &'a str,
    digits: &'a str,
    value: u64,
}

fn split_numbered(host: &str) -> Option<NumberedHost<'_>> {
    let prefix = host.trim_end_matches(|c: char| c.is_ascii_digit());
    let digits = &host[prefix.len()..];
    if digits.is_empty() || prefix.contains(['[', ']', ',']) {
        return None;
    }
    let value = digits.parse().ok()?;
    Some(NumberedHost {
        prefix,
        digits,
        value,
    })
}

/// A run of neighbouring hosts sharing a prefix and number width.
struct Group<'a> {
    prefix: &'a str,
    width: usize,
    values: Vec<u64>,
}

impl Group<'_> {
    /// Whether `host` can be printed with this group's prefix and width.
    fn accepts(&self, host: &NumberedHost<'_>) -> bool {
        if host.prefix != self.prefix {
            return false;
        }
        match (self.width, padded_width(host.digits)) {
            (0, 0) => true,
            (w, 0) => host.digits.len() == w,
            (w, hw) => w == hw,
        }
    }

    fn render(&self, out: &mut String) {
        let width = self.width;
        if let [only] = self.values.as_slice() {
            out.push_str(&format!("{}{only:0width$}", self.prefix));
            return;
        }
        out.push_str(self.prefix);
        out.push('[');
        let mut i = 0;
        let mut first = true;
        while i < self.values.len() {
            let start = self.values[i];
            let mut end = start;
            while i + 1 < self.values.len() && end.checked_add(1) == Some(self.values[i + 1]) {
                end += 1;
                i += 1;
            }
            if !first {
                out.push(',');
            }
            first = false;
            if start == end {
                out.push_str(&format!("{start:0width$}"));
            } else {
                out.push_str(&format!("{start:0width$}-{end:0width$}"));
            }
            i += 1;
        }
        out.push(']');
    }
}

fn flush(group: Option<Group<'_>>, out: &mut String) {
    if let Some(group) = group {
        if !out.is_empty() {
            out.push(',');
        }
        group.render(out);
    }
}

/// Compress a host set into its canonical range expression.
///
/// Contiguous ascending numeric suffixes collapse into `a-b`; an empty set
/// compresses to the empty string.
pub fn compress(set: &HostSet) -> String {
    let mut out = String::new();
    let mut current: Option<Group<'_>> = None;

    for host in set.iter() {
        match split_numbered(host) {
            Some(numbered) => {
                if let Some(group) = current.as_mut() {
                    if group.accepts(&numbered) {
                        group.values.push(numbered.value);
                        continue;
                    }
                }
                flush(current.take(), &mut out);
                current = Some(Group {
                    prefix: numbered.prefix,
                    width: padded_width(numbered.digits),
                    values: vec![numbered.value],
                });
            }
            None => {
                flush(current.take(), &mut out);
                if !out.is_empty() {
                    out.push(',');
                }
                out.push_str(host);
            }
        }
    }
    flush(current, &mut out);
    out
}
