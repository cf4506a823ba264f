use std::fmt;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::codec::{hash_hex, option_hash_hex, ErrorKind, Hash};

/// A block a message claims to be proven against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct ChainAnchor {
    #[serde(with = "hash_hex")]
    pub hash: Hash,
    pub height: u32,
}

/// Trusted tree roots at a block height, as shipped in a trust bundle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct RootAnchor {
    /// Root of the spaces tree (space ownership).
    #[serde(with = "hash_hex")]
    pub spaces_root: Hash,
    /// Root of the ptrs tree (delegation and commitments), if known.
    #[serde(with = "option_hash_hex", default)]
    pub ptrs_root: Option<Hash>,
    pub block: ChainAnchor,
}

/// Error when loading or updating anchors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnchorError {
    /// At least one anchor is required
    Empty,
    /// Heights must be strictly increasing or strictly decreasing
    NotSorted,
    /// Trust bundle is not valid JSON
    Malformed { reason: String },
}

impl AnchorError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidInput
    }
}

impl fmt::Display for AnchorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "at least one anchor is required"),
            Self::NotSorted => write!(f, "anchor heights must be strictly monotonic"),
            Self::Malformed { reason } => write!(f, "malformed trust bundle: {}", reason),
        }
    }
}

impl std::error::Error for AnchorError {}

/// The trusted height window `[oldest, newest]`.
///
/// Immutable once built; verifiers share it behind an `Arc`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnchorSet {
    // Ascending by height, no duplicates.
    anchors: Vec<RootAnchor>,
}

impl AnchorSet {
    /// Build from anchors listed either newest-first or oldest-first.
    pub fn new(mut anchors: Vec<RootAnchor>) -> Result<Self, AnchorError> {
        if anchors.is_empty() {
            return Err(AnchorError::Empty);
        }
        let ascending = anchors.windows(2).all(|w| w[0].block.height < w[1].block.height);
        let descending = anchors.windows(2).all(|w| w[0].block.height > w[1].block.height);
        if !ascending {
            if !descending {
                return Err(AnchorError::NotSorted);
            }
            anchors.reverse();
        }
        Ok(Self { anchors })
    }

    /// Parse a JSON trust bundle: an array of [`RootAnchor`].
    pub fn from_json(json: &str) -> Result<Self, AnchorError> {
        let anchors: Vec<RootAnchor> = serde_json::from_str(json)
            .map_err(|e| AnchorError::Malformed { reason: e.to_string() })?;
        Self::new(anchors)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.anchors).expect("anchor serialization should not fail")
    }

    pub fn oldest(&self) -> &RootAnchor {
        &self.anchors[0]
    }

    pub fn newest(&self) -> &RootAnchor {
        &self.anchors[self.anchors.len() - 1]
    }

    pub fn oldest_anchor(&self) -> u32 {
        self.oldest().block.height
    }

    pub fn newest_anchor(&self) -> u32 {
        self.newest().block.height
    }

    /// The anchor recorded at exactly `height`.
    pub fn get(&self, height: u32) -> Option<&RootAnchor> {
        self.anchors
            .binary_search_by_key(&height, |a| a.block.height)
            .ok()
            .map(|pos| &self.anchors[pos])
    }

    /// Whether `height` falls inside the trusted window.
    pub fn contains_height(&self, height: u32) -> bool {
        (self.oldest_anchor()..=self.newest_anchor()).contains(&height)
    }

    /// True iff `oldest <= height` and `height + depth <= newest`.
    ///
    /// Heights below the window are not final: the set cannot vouch for them.
    pub fn is_finalized(&self, height: u32, depth: u32) -> bool {
        height >= self.oldest_anchor()
            && height
                .checked_add(depth)
                .is_some_and(|h| h <= self.newest_anchor())
    }

    pub fn iter(&self) -> impl Iterator<Item = &RootAnchor> {
        self.anchors.iter()
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchor(height: u32) -> RootAnchor {
        RootAnchor {
            spaces_root: [height as u8; 32],
            ptrs_root: None,
            block: ChainAnchor { hash: [0xab; 32], height },
        }
    }

    #[test]
    fn accepts_both_orders() {
        let up = AnchorSet::new(vec![anchor(100), anchor(150), anchor(200)]).unwrap();
        let down = AnchorSet::new(vec![anchor(200), anchor(150), anchor(100)]).unwrap();
        assert_eq!(up, down);
        assert_eq!(up.oldest_anchor(), 100);
        assert_eq!(up.newest_anchor(), 200);
        assert_eq!(up.get(150).map(|a| a.block.height), Some(150));
        assert!(up.get(151).is_none());
    }

    #[test]
    fn rejects_empty_and_unsorted() {
        assert_eq!(AnchorSet::new(vec![]), Err(AnchorError::Empty));
        assert_eq!(
            AnchorSet::new(vec![anchor(100), anchor(300), anchor(200)]),
            Err(AnchorError::NotSorted)
        );
        assert_eq!(
            AnchorSet::new(vec![anchor(100), anchor(100)]),
            Err(AnchorError::NotSorted)
        );
        let err = AnchorSet::from_json("{not json").unwrap_err();
        assert!(matches!(err, AnchorError::Malformed { .. }));
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn finality_boundary() {
        let set = AnchorSet::new(vec![anchor(100), anchor(200)]).unwrap();
        let depth = 6;
        assert!(set.is_finalized(200 - depth, depth));
        assert!(!set.is_finalized(200 - depth + 1, depth));
        assert!(!set.is_finalized(250, depth));
        assert!(!set.is_finalized(99, depth));
        assert!(!set.is_finalized(u32::MAX, depth));
        assert!(set.contains_height(100) && set.contains_height(200));
        assert!(!set.contains_height(201));
    }

    #[test]
    fn json_roundtrip() {
        let set = AnchorSet::new(vec![anchor(200), anchor(100)]).unwrap();
        let json = set.to_json();
        assert!(json.contains(&hex::encode([0xab; 32])));
        assert_eq!(AnchorSet::from_json(&json).unwrap(), set);
    }
}
