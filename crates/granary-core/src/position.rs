//! Hierarchical segment ordinals.
//!
//! A segment's place in its document is a dot-separated ordinal string such
//! as `"1"`, `"1.2"`, or `"1.2.3"`. Components compare numerically, so
//! `"1.10"` sorts after `"1.9"` (plain string comparison would not). The
//! parent of a position is its prefix with one fewer component; siblings
//! share the parent prefix and differ only in the last component.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Parsed form of a `position_in_doc` string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SegmentPosition {
    components: Vec<u64>,
}

impl SegmentPosition {
    /// Build a position from explicit components. Must be non-empty.
    pub fn new(components: Vec<u64>) -> Result<Self> {
        if components.is_empty() {
            return Err(Error::Validation("position must have at least one component".into()));
        }
        Ok(Self { components })
    }

    /// Number of components (hierarchy depth).
    pub fn depth(&self) -> usize {
        self.components.len()
    }

    /// The numeric components, outermost first.
    pub fn components(&self) -> &[u64] {
        &self.components
    }

    /// Last component (the ordinal within the parent).
    pub fn last(&self) -> u64 {
        *self.components.last().expect("position is never empty")
    }

    /// Parent position, or `None` for top-level positions.
    pub fn parent(&self) -> Option<SegmentPosition> {
        if self.components.len() <= 1 {
            return None;
        }
        Some(SegmentPosition {
            components: self.components[..self.components.len() - 1].to_vec(),
        })
    }

    /// Whether `other` shares this position's parent (and equal depth).
    pub fn is_sibling_of(&self, other: &SegmentPosition) -> bool {
        self.depth() == other.depth()
            && self.components[..self.depth() - 1] == other.components[..other.depth() - 1]
    }
}

impl FromStr for SegmentPosition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::Validation("empty position_in_doc".into()));
        }
        let components = s
            .split('.')
            .map(|part| {
                part.parse::<u64>().map_err(|_| {
                    Error::Validation(format!("invalid position component {:?} in {:?}", part, s))
                })
            })
            .collect::<Result<Vec<u64>>>()?;
        SegmentPosition::new(components)
    }
}

impl fmt::Display for SegmentPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.components.iter().map(u64::to_string).collect();
        write!(f, "{}", parts.join("."))
    }
}

impl Ord for SegmentPosition {
    fn cmp(&self, other: &Self) -> Ordering {
        // Component-wise numeric compare; a strict prefix sorts first.
        self.components.cmp(&other.components)
    }
}

impl PartialOrd for SegmentPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(s: &str) -> SegmentPosition {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_and_display_roundtrip() {
        for s in ["1", "1.2", "1.2.3", "10.0.7"] {
            assert_eq!(pos(s).to_string(), s);
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<SegmentPosition>().is_err());
        assert!("1..2".parse::<SegmentPosition>().is_err());
        assert!("a.b".parse::<SegmentPosition>().is_err());
        assert!("1.-2".parse::<SegmentPosition>().is_err());
        assert!("1.2.".parse::<SegmentPosition>().is_err());
    }

    #[test]
    fn test_numeric_not_lexicographic_order() {
        assert!(pos("1.9") < pos("1.10"));
        assert!(pos("2") > pos("1.10"));
        assert!(pos("1") < pos("1.1"));
    }

    #[test]
    fn test_parent() {
        assert_eq!(pos("1.2.3").parent(), Some(pos("1.2")));
        assert_eq!(pos("1.2").parent(), Some(pos("1")));
        assert_eq!(pos("1").parent(), None);
    }

    #[test]
    fn test_siblings() {
        assert!(pos("1.2").is_sibling_of(&pos("1.3")));
        assert!(pos("1").is_sibling_of(&pos("4")));
        assert!(!pos("1.2").is_sibling_of(&pos("2.2")));
        assert!(!pos("1.2").is_sibling_of(&pos("1.2.1")));
    }

    #[test]
    fn test_depth_and_last() {
        let p = pos("3.1.4");
        assert_eq!(p.depth(), 3);
        assert_eq!(p.last(), 4);
        assert_eq!(p.components(), &[3, 1, 4]);
    }
}
