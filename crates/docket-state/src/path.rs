//! Dot-delimited field paths.
//!
//! A path addresses a location in a document's raw value tree. Each segment
//! is either an object key or an array index; the textual form joins them
//! with dots (`items.0.name`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single segment in a field path.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Seg {
    /// Object key access.
    Key(String),
    /// Array index access.
    Index(usize),
}

impl Seg {
    /// Create a key segment.
    #[inline]
    pub fn key(k: impl Into<String>) -> Self {
        Seg::Key(k.into())
    }

    /// Create an index segment.
    #[inline]
    pub fn index(i: usize) -> Self {
        Seg::Index(i)
    }

    /// Returns true if this is an index segment.
    #[inline]
    pub fn is_index(&self) -> bool {
        matches!(self, Seg::Index(_))
    }

    /// Get the index if this is an index segment.
    #[inline]
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Seg::Key(_) => None,
            Seg::Index(i) => Some(*i),
        }
    }

    /// The segment as an object key. Index segments render as their decimal form.
    pub fn to_key(&self) -> String {
        match self {
            Seg::Key(k) => k.clone(),
            Seg::Index(i) => i.to_string(),
        }
    }

    fn parse(raw: &str) -> Self {
        match raw.parse::<usize>() {
            // "007" is a key, not index 7
            Ok(i) if i.to_string() == raw => Seg::Index(i),
            _ => Seg::Key(raw.to_owned()),
        }
    }
}

impl fmt::Display for Seg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Seg::Key(k) => f.write_str(k),
            Seg::Index(i) => write!(f, "{}", i),
        }
    }
}

impl From<String> for Seg {
    fn from(s: String) -> Self {
        Seg::Key(s)
    }
}

impl From<&str> for Seg {
    fn from(s: &str) -> Self {
        Seg::Key(s.to_owned())
    }
}

impl From<usize> for Seg {
    fn from(i: usize) -> Self {
        Seg::Index(i)
    }
}

/// A complete path into a document.
///
/// # Examples
///
/// ```
/// use docket_state::Path;
///
/// let path = Path::parse("items.0.name");
/// assert_eq!(path.len(), 3);
/// assert_eq!(path.to_string(), "items.0.name");
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Path(Vec<Seg>);

impl Path {
    /// Create an empty path (root).
    #[inline]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Create a path from a vector of segments.
    #[inline]
    pub fn from_segments(segments: Vec<Seg>) -> Self {
        Self(segments)
    }

    /// Parse a dot-delimited path. Empty segments are skipped.
    pub fn parse(raw: &str) -> Self {
        raw.split('.')
            .filter(|s| !s.is_empty())
            .map(Seg::parse)
            .collect()
    }

    /// Append a key segment and return self (builder pattern).
    #[inline]
    pub fn key(mut self, k: impl Into<String>) -> Self {
        self.0.push(Seg::Key(k.into()));
        self
    }

    /// Append an index segment and return self (builder pattern).
    #[inline]
    pub fn index(mut self, i: usize) -> Self {
        self.0.push(Seg::Index(i));
        self
    }

    /// Push a segment onto the path (mutating).
    #[inline]
    pub fn push(&mut self, seg: Seg) {
        self.0.push(seg);
    }

    /// Get the segments of this path.
    #[inline]
    pub fn segments(&self) -> &[Seg] {
        &self.0
    }

    /// Check if this path is empty (root).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the number of segments in this path.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Get the first segment.
    #[inline]
    pub fn first(&self) -> Option<&Seg> {
        self.0.first()
    }

    /// Get the last segment.
    #[inline]
    pub fn last(&self) -> Option<&Seg> {
        self.0.last()
    }

    /// The one-segment path holding this path's first segment.
    pub fn top(&self) -> Path {
        Path(self.0.iter().take(1).cloned().collect())
    }

    /// Join this path with another path.
    #[inline]
    pub fn join(&self, other: &Path) -> Path {
        let mut result = self.clone();
        result.0.extend(other.0.iter().cloned());
        result
    }

    /// Append a segment and return a new path (non-mutating builder).
    #[inline]
    pub fn with_segment(&self, seg: Seg) -> Path {
        let mut result = self.clone();
        result.0.push(seg);
        result
    }

    /// Check if this path is a prefix of another path.
    ///
    /// A path is a prefix of itself.
    #[inline]
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        other.0.starts_with(&self.0)
    }

    /// Check if this path is a strict ancestor of another path.
    #[inline]
    pub fn is_ancestor_of(&self, other: &Path) -> bool {
        self.len() < other.len() && self.is_prefix_of(other)
    }

    /// Get the parent path (path without the last segment).
    #[inline]
    pub fn parent(&self) -> Option<Path> {
        if self.0.is_empty() {
            None
        } else {
            Some(Path(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Every strict ancestor, shortest first. The root is not included.
    pub fn ancestors(&self) -> impl Iterator<Item = Path> + '_ {
        (1..self.0.len()).map(move |n| Path(self.0[..n].to_vec()))
    }

    /// The remainder of this path after `prefix`, if `prefix` is a prefix.
    pub fn strip_prefix(&self, prefix: &Path) -> Option<Path> {
        if prefix.is_prefix_of(self) {
            Some(Path(self.0[prefix.len()..].to_vec()))
        } else {
            None
        }
    }

    /// Replace the `old` prefix with `new`. Returns `None` if `old` is not a prefix.
    pub fn rebase(&self, old: &Path, new: &Path) -> Option<Path> {
        self.strip_prefix(old).map(|rest| new.join(&rest))
    }

    /// Iterate over the segments.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Seg> {
        self.0.iter()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", seg)?;
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Path::parse(s))
    }
}

impl From<&str> for Path {
    fn from(s: &str) -> Self {
        Path::parse(s)
    }
}

impl From<String> for Path {
    fn from(s: String) -> Self {
        Path::parse(&s)
    }
}

impl From<&String> for Path {
    fn from(s: &String) -> Self {
        Path::parse(s)
    }
}

impl From<&Path> for Path {
    fn from(p: &Path) -> Self {
        p.clone()
    }
}

impl FromIterator<Seg> for Path {
    fn from_iter<I: IntoIterator<Item = Seg>>(iter: I) -> Self {
        Path(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Path {
    type Item = &'a Seg;
    type IntoIter = std::slice::Iter<'a, Seg>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl std::ops::Index<usize> for Path {
    type Output = Seg;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

/// Construct a `Path` from a sequence of segments.
///
/// ```
/// use docket_state::path;
///
/// let p = path!("items", 0, "name");
/// assert_eq!(p.to_string(), "items.0.name");
/// ```
#[macro_export]
macro_rules! path {
    () => {
        $crate::Path::root()
    };
    ($($seg:expr),+ $(,)?) => {{
        let mut p = $crate::Path::root();
        $(
            p.push($crate::Seg::from($seg));
        )+
        p
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_segments() {
        let p = Path::parse("items.0.name");
        assert_eq!(p[0], Seg::Key("items".into()));
        assert_eq!(p[1], Seg::Index(0));
        assert_eq!(p[2], Seg::Key("name".into()));
    }

    #[test]
    fn test_parse_keeps_padded_numbers_as_keys() {
        let p = Path::parse("codes.007");
        assert_eq!(p[1], Seg::Key("007".into()));
    }

    #[test]
    fn test_display_round_trips() {
        let p = path!("a", "b", 3, "c");
        assert_eq!(p.to_string(), "a.b.3.c");
        assert_eq!(Path::parse(&p.to_string()), p);
    }

    #[test]
    fn test_ancestors_shortest_first() {
        let p = Path::parse("a.b.c");
        let ancestors: Vec<String> = p.ancestors().map(|a| a.to_string()).collect();
        assert_eq!(ancestors, vec!["a", "a.b"]);
    }

    #[test]
    fn test_prefix_relations() {
        let parent = Path::parse("nested");
        let child = Path::parse("nested.a");
        assert!(parent.is_prefix_of(&child));
        assert!(parent.is_prefix_of(&parent));
        assert!(parent.is_ancestor_of(&child));
        assert!(!parent.is_ancestor_of(&parent));
        assert!(!Path::parse("nest").is_prefix_of(&child));
    }

    #[test]
    fn test_rebase() {
        let p = Path::parse("items.3.name");
        let moved = p
            .rebase(&Path::parse("items.3"), &Path::parse("items.1"))
            .unwrap();
        assert_eq!(moved.to_string(), "items.1.name");
        assert!(p.rebase(&Path::parse("other"), &Path::root()).is_none());
    }

    #[test]
    fn test_path_serde() {
        let path = Path::parse("users.0");
        let json = serde_json::to_string(&path).unwrap();
        let parsed: Path = serde_json::from_str(&json).unwrap();
        assert_eq!(path, parsed);
    }
}
