//! Merkle inclusion proofs against trusted roots.
//!
//! Trees are binary SHA-256 trees over leaves sorted by key hash:
//!
//! ```text
//! leaf  = H(0x00 || H(key) || H(value))
//! node  = H(0x01 || left || right)
//! empty = H(0x02)
//! ```
//!
//! An unpaired node at the end of a level is promoted unchanged, so the shape
//! of the path is fully determined by `index` and `leaf_count`.
//!
//! Absence of a key is shown by opening the two adjacent leaves whose key
//! hashes bracket it (see [`ExclusionProof`]).

use std::fmt;
use bitcoin::hashes::{sha256, Hash as _, HashEngine};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::codec::{hash_hex, hash_vec_hex, ErrorKind, Hash};

const LEAF_TAG: u8 = 0x00;
const NODE_TAG: u8 = 0x01;
const EMPTY_TAG: u8 = 0x02;

pub fn sha256(data: &[u8]) -> Hash {
    sha256::Hash::hash(data).to_byte_array()
}

pub fn leaf_hash(key: &[u8], value: &[u8]) -> Hash {
    leaf_hash_from_digests(&sha256(key), &sha256(value))
}

fn leaf_hash_from_digests(key_hash: &Hash, value_hash: &Hash) -> Hash {
    let mut engine = sha256::Hash::engine();
    engine.input(&[LEAF_TAG]);
    engine.input(key_hash);
    engine.input(value_hash);
    sha256::Hash::from_engine(engine).to_byte_array()
}

fn node_hash(left: &Hash, right: &Hash) -> Hash {
    let mut engine = sha256::Hash::engine();
    engine.input(&[NODE_TAG]);
    engine.input(left);
    engine.input(right);
    sha256::Hash::from_engine(engine).to_byte_array()
}

pub fn empty_root() -> Hash {
    sha256(&[EMPTY_TAG])
}

/// Proof that a key/value leaf is included under a root.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Position of the leaf in key-hash order.
    pub index: u32,
    /// Number of leaves in the tree the proof was made from.
    pub leaf_count: u32,
    /// Sibling hashes from the leaf level upwards, skipping promoted levels.
    #[serde(with = "hash_vec_hex")]
    pub siblings: Vec<Hash>,
}

impl MerkleProof {
    /// Recompute the root implied by this proof for the given leaf.
    pub fn compute_root(&self, key: &[u8], value: &[u8]) -> Result<Hash, ProofError> {
        self.compute_root_from_leaf(leaf_hash(key, value))
    }

    fn compute_root_from_leaf(&self, leaf: Hash) -> Result<Hash, ProofError> {
        if self.index >= self.leaf_count {
            return Err(ProofError::Malformed {
                reason: format!("index {} out of range for {} leaves", self.index, self.leaf_count),
            });
        }

        let mut current = leaf;
        let mut index = self.index;
        let mut width = self.leaf_count;
        let mut siblings = self.siblings.iter();

        while width > 1 {
            let is_right = index % 2 == 1;
            let has_sibling = is_right || index + 1 < width;
            if has_sibling {
                let sibling = siblings.next().ok_or_else(|| ProofError::Malformed {
                    reason: "not enough sibling hashes".to_string(),
                })?;
                current = if is_right {
                    node_hash(sibling, &current)
                } else {
                    node_hash(&current, sibling)
                };
            }
            index /= 2;
            width = width.div_ceil(2);
        }

        if siblings.next().is_some() {
            return Err(ProofError::Malformed {
                reason: "too many sibling hashes".to_string(),
            });
        }
        Ok(current)
    }

    /// Verify the leaf is included under `root`.
    pub fn verify(&self, key: &[u8], value: &[u8], root: &Hash) -> Result<(), ProofError> {
        check_root(self.compute_root(key, value)?, root)
    }

    /// Digest identifying this proof.
    pub fn hash(&self) -> Hash {
        sha256(&borsh::to_vec(self).expect("proof serialization should not fail"))
    }
}

fn check_root(computed: Hash, root: &Hash) -> Result<(), ProofError> {
    if &computed != root {
        return Err(ProofError::RootMismatch {
            expected: *root,
            got: computed,
        });
    }
    Ok(())
}

/// A leaf opened by its key and value digests.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct LeafOpening {
    #[serde(with = "hash_hex")]
    pub key_hash: Hash,
    #[serde(with = "hash_hex")]
    pub value_hash: Hash,
    pub proof: MerkleProof,
}

impl LeafOpening {
    pub fn verify(&self, root: &Hash) -> Result<(), ProofError> {
        let leaf = leaf_hash_from_digests(&self.key_hash, &self.value_hash);
        check_root(self.proof.compute_root_from_leaf(leaf)?, root)
    }
}

/// Proof that a key is absent from a tree.
///
/// `left` and `right` are the adjacent leaves whose key hashes bracket the
/// missing key. At the edges of the tree one side is `None`; both are `None`
/// only for the empty tree.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct ExclusionProof {
    pub left: Option<LeafOpening>,
    pub right: Option<LeafOpening>,
}

impl ExclusionProof {
    /// Verify `key` is not a leaf of the tree under `root`.
    pub fn verify(&self, key: &[u8], root: &Hash) -> Result<(), ProofError> {
        let target = sha256(key);
        let malformed = |reason: &str| ProofError::Malformed { reason: reason.to_string() };

        for opening in [&self.left, &self.right].into_iter().flatten() {
            if opening.key_hash == target {
                opening.verify(root)?;
                return Err(ProofError::KeyPresent);
            }
        }

        match (&self.left, &self.right) {
            (None, None) => check_root(empty_root(), root),
            (Some(left), None) => {
                if left.key_hash > target {
                    return Err(malformed("left neighbor sorts after key"));
                }
                if left.proof.index.checked_add(1) != Some(left.proof.leaf_count) {
                    return Err(malformed("left neighbor is not the last leaf"));
                }
                left.verify(root)
            }
            (None, Some(right)) => {
                if right.key_hash < target {
                    return Err(malformed("right neighbor sorts before key"));
                }
                if right.proof.index != 0 {
                    return Err(malformed("right neighbor is not the first leaf"));
                }
                right.verify(root)
            }
            (Some(left), Some(right)) => {
                if !(left.key_hash < target && target < right.key_hash) {
                    return Err(malformed("neighbors do not bracket key"));
                }
                if left.proof.leaf_count != right.proof.leaf_count
                    || left.proof.index.checked_add(1) != Some(right.proof.index)
                {
                    return Err(malformed("neighbors are not adjacent"));
                }
                left.verify(root)?;
                right.verify(root)
            }
        }
    }
}

/// In-memory tree used by provers and tooling to build roots and proofs.
#[derive(Clone, Debug, Default)]
pub struct MerkleTree {
    // Sorted by key hash.
    leaves: Vec<(Hash, Vec<u8>, Vec<u8>)>,
}

impl MerkleTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Insert or replace the value stored under `key`.
    pub fn insert(&mut self, key: &[u8], value: Vec<u8>) {
        let key_hash = sha256(key);
        match self.leaves.binary_search_by(|(h, _, _)| h.cmp(&key_hash)) {
            Ok(pos) => self.leaves[pos].2 = value,
            Err(pos) => self.leaves.insert(pos, (key_hash, key.to_vec(), value)),
        }
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        let key_hash = sha256(key);
        let pos = self.leaves.binary_search_by(|(h, _, _)| h.cmp(&key_hash)).ok()?;
        Some(self.leaves.remove(pos).2)
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        let key_hash = sha256(key);
        let pos = self.leaves.binary_search_by(|(h, _, _)| h.cmp(&key_hash)).ok()?;
        Some(&self.leaves[pos].2)
    }

    pub fn root(&self) -> Hash {
        if self.leaves.is_empty() {
            return empty_root();
        }
        let mut level: Vec<Hash> = self.leaves.iter().map(|(_, k, v)| leaf_hash(k, v)).collect();
        while level.len() > 1 {
            level = level
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => node_hash(left, right),
                    [single] => *single,
                    _ => unreachable!("chunks(2) yields one or two items"),
                })
                .collect();
        }
        level[0]
    }

    /// Build an inclusion proof for `key`, if present.
    pub fn prove(&self, key: &[u8]) -> Option<MerkleProof> {
        Some(self.prove_index(self.position(key).ok()?))
    }

    /// Open the leaf stored under `key`, if present.
    pub fn open(&self, key: &[u8]) -> Option<LeafOpening> {
        Some(self.open_index(self.position(key).ok()?))
    }

    /// Build an exclusion proof for `key`, or `None` if it is present.
    pub fn prove_exclusion(&self, key: &[u8]) -> Option<ExclusionProof> {
        let pos = self.position(key).err()?;
        Some(ExclusionProof {
            left: pos.checked_sub(1).map(|i| self.open_index(i)),
            right: (pos < self.leaves.len()).then(|| self.open_index(pos)),
        })
    }

    fn position(&self, key: &[u8]) -> Result<usize, usize> {
        let key_hash = sha256(key);
        self.leaves.binary_search_by(|(h, _, _)| h.cmp(&key_hash))
    }

    fn open_index(&self, pos: usize) -> LeafOpening {
        let (key_hash, _, value) = &self.leaves[pos];
        LeafOpening {
            key_hash: *key_hash,
            value_hash: sha256(value),
            proof: self.prove_index(pos),
        }
    }

    fn prove_index(&self, pos: usize) -> MerkleProof {
        let mut siblings = Vec::new();
        let mut index = pos;
        let mut level: Vec<Hash> = self.leaves.iter().map(|(_, k, v)| leaf_hash(k, v)).collect();
        while level.len() > 1 {
            let sibling = index ^ 1;
            if sibling < level.len() {
                siblings.push(level[sibling]);
            }
            level = level
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => node_hash(left, right),
                    [single] => *single,
                    _ => unreachable!("chunks(2) yields one or two items"),
                })
                .collect();
            index /= 2;
        }

        MerkleProof {
            index: pos as u32,
            leaf_count: self.leaves.len() as u32,
            siblings,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProofError {
    /// Proof structure is inconsistent with its own leaf count
    Malformed { reason: String },
    /// Proof is well formed but leads to a different root
    RootMismatch { expected: Hash, got: Hash },
    /// Exclusion proof opens the very key it claims is absent
    KeyPresent,
}

impl ProofError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Malformed { .. } => ErrorKind::InvalidInput,
            Self::RootMismatch { .. } | Self::KeyPresent => ErrorKind::VerificationFailed,
        }
    }
}

impl fmt::Display for ProofError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { reason } => write!(f, "malformed proof: {}", reason),
            Self::RootMismatch { expected, got } => write!(
                f,
                "root mismatch: expected {}, got {}",
                hex::encode(expected),
                hex::encode(got)
            ),
            Self::KeyPresent => write!(f, "key is present in the tree"),
        }
    }
}

impl std::error::Error for ProofError {}
