use std::io::{Read, Write};
use bitcoin::ScriptBuf;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::anchor::ChainAnchor;
use crate::cert::Signature;
use crate::codec::{self, bytes_b64, option_bytes_b64, DecodeError};
use crate::proof::{sha256, ExclusionProof, MerkleProof};
use crate::sname::{Label, NameLike, SLabel, SName};
use crate::{Commitment, Zone};

/// Context for a verification query.
///
/// Contains the handles to verify and any zones the caller knows about.
/// Zones are used for parent lookups and `is_better_than` comparison.
///
/// A context has a single writer: populate it, then hand it to
/// [`Veritas::verify_message`](crate::Veritas::verify_message) by shared
/// reference. It performs no locking of its own.
#[derive(Clone, Debug, Default)]
pub struct QueryContext {
    /// Handles to verify. Empty = verify all handles in the message.
    pub requests: Vec<SName>,
    /// Known zones - parents, leaves, any zones the caller has.
    pub zones: Vec<Zone>,
}

impl QueryContext {
    /// Create an empty context (verify all, no prior zones).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context from known zones (verify all).
    pub fn from_zones(zones: Vec<Zone>) -> Self {
        let mut ctx = Self::new();
        for zone in zones {
            ctx.add_zone(zone);
        }
        ctx
    }

    /// Add a handle to the request list.
    pub fn add_request(&mut self, handle: SName) {
        if !self.requests.iter().any(|h| h == &handle) {
            self.requests.push(handle);
        }
    }

    /// Add a zone to the context.
    ///
    /// When a zone for the same handle is already known, the better one by
    /// fork-choice is kept. A contradiction keeps the existing zone.
    pub fn add_zone(&mut self, zone: Zone) {
        match self.zones.iter_mut().find(|z| z.handle == zone.handle) {
            Some(existing) => {
                if let Ok(true) = zone.is_better_than(existing) {
                    *existing = zone;
                }
            }
            None => self.zones.push(zone),
        }
    }

    /// True when no handle was requested explicitly.
    pub fn is_wildcard(&self) -> bool {
        self.requests.is_empty()
    }

    /// Check if a handle is requested (empty requests = want all).
    pub fn wants(&self, handle: &SName) -> bool {
        self.is_wildcard() || self.requests.iter().any(|h| h == handle)
    }

    /// Get a zone by exact handle.
    pub fn get_zone(&self, handle: &SName) -> Option<&Zone> {
        self.zones.iter().find(|z| &z.handle == handle)
    }

    /// Get the parent (root) zone for a space.
    ///
    /// For `alice@bitcoin`, this finds the `@bitcoin` zone.
    pub fn get_parent_zone(&self, space: &SLabel) -> Option<&Zone> {
        self.zones.iter().find(|z| {
            z.handle.is_single_label() && z.handle.space().as_ref() == Some(space)
        })
    }
}

/// A message proving space ownership and handle bindings at one anchor.
///
/// Space records are proven against the anchor's trusted roots; handles are
/// proven against their space's committed state root or authorized by the
/// space's signing key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct Message {
    /// The block anchor this message is valid for.
    pub anchor: ChainAnchor,
    /// Per-space records. Uniqueness enforced during verification.
    pub spaces: Vec<Bundle>,
}

impl Message {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        codec::decode(bytes, "message")
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("message serialization should not fail")
    }

    /// Find the bundle for a space.
    pub fn bundle(&self, space: &SLabel) -> Option<&Bundle> {
        self.spaces.iter().find(|b| &b.space == space)
    }

    /// Whether the message carries proof material for `handle`.
    pub fn references(&self, handle: &SName) -> bool {
        let Some(bundle) = handle.space().and_then(|space| self.bundle(&space)) else {
            return false;
        };
        match handle.label_count() {
            1 => true,
            2 => handle
                .subspace()
                .is_some_and(|label| bundle.handles.iter().any(|h| h.name == label)),
            _ => false,
        }
    }
}

/// Data for a single space.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct Bundle {
    /// The space this record is for (e.g., "@bitcoin").
    pub space: SLabel,
    /// Ownership record from the spaces tree.
    pub owner: SpaceRecord,
    /// Inclusion of `owner` under the anchor's spaces root.
    pub owner_proof: MerkleProof,
    /// Delegation and commitment record from the ptrs tree.
    /// `None` leaves both unknown.
    pub ptrs: Option<ProvenPtrs>,
    /// Off-chain data signed by the space owner.
    pub offchain_data: Option<OffchainData>,
    /// Off-chain data signed by the delegate.
    pub delegate_offchain_data: Option<OffchainData>,
    /// Handles under this space.
    pub handles: Vec<Handle>,
}

impl Bundle {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        codec::decode(bytes, "bundle")
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("bundle serialization should not fail")
    }

    pub fn handle(&self, name: &Label) -> Option<&Handle> {
        self.handles.iter().find(|h| &h.name == name)
    }
}

/// Value stored under a space's key in the spaces tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct SpaceRecord {
    #[borsh(
        serialize_with = "codec::script_borsh::serialize",
        deserialize_with = "codec::script_borsh::deserialize"
    )]
    pub script_pubkey: ScriptBuf,
    #[serde(with = "option_bytes_b64")]
    pub data: Option<Vec<u8>>,
}

impl SpaceRecord {
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("space record serialization should not fail")
    }
}

/// Value stored under a space's key in the ptrs tree.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct PtrsRecord {
    pub delegate: Option<DelegateRecord>,
    /// Latest on-chain commitment of the handle tree.
    pub commitment: Option<Commitment>,
}

impl PtrsRecord {
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("ptrs record serialization should not fail")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct DelegateRecord {
    #[borsh(
        serialize_with = "codec::script_borsh::serialize",
        deserialize_with = "codec::script_borsh::deserialize"
    )]
    pub script_pubkey: ScriptBuf,
    #[serde(with = "option_bytes_b64")]
    pub data: Option<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct ProvenPtrs {
    pub record: PtrsRecord,
    /// Inclusion of `record` under the anchor's ptrs root.
    pub proof: MerkleProof,
}

/// A handle being proven under its space.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handle {
    /// The handle name (e.g., "alice" for "alice@bitcoin").
    pub name: Label,
    /// The genesis script pubkey the handle was initialized with.
    pub genesis_spk: ScriptBuf,
    /// Off-chain data signed by the handle owner
    pub data: Option<OffchainData>,
    /// Inclusion in the space's committed handle tree, for final certificates.
    pub inclusion: Option<MerkleProof>,
    /// Signature from the delegate for temporary certificates.
    /// `None` for final certificates (handle committed to tree).
    pub signature: Option<Signature>,
    /// Absence from the committed handle tree, required for temporary
    /// certificates once the space has a commitment.
    pub exclusion: Option<ExclusionProof>,
}

impl Handle {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        codec::decode(bytes, "handle")
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("handle serialization should not fail")
    }

    /// Key of this handle in its space's handle tree.
    pub fn tree_key(&self) -> &[u8] {
        self.name.as_slabel().as_ref()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffchainData {
    pub seq: u32,
    #[serde(with = "bytes_b64")]
    pub data: Vec<u8>,
    pub signature: Signature,
}

impl OffchainData {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        codec::decode(bytes, "offchain data")
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("offchain data serialization should not fail")
    }

    /// Returns the bytes to sign: seq || data
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + self.data.len());
        bytes.extend_from_slice(&self.seq.to_le_bytes());
        bytes.extend_from_slice(&self.data);
        bytes
    }

    /// Verify the signature against the given script pubkey.
    pub fn verify(&self, script_pubkey: &ScriptBuf) -> Result<(), crate::SignatureError> {
        crate::verify_with_script_pubkey(&self.signing_bytes(), &self.signature, script_pubkey)
    }

    pub fn is_better_than(&self, other: &Self) -> bool {
        if self.seq != other.seq {
            return self.seq > other.seq;
        }
        // Same seq, compare data hash for deterministic tiebreaker
        sha256(&self.data) > sha256(&other.data)
    }
}

// Borsh implementations

impl BorshSerialize for Handle {
    fn serialize<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        BorshSerialize::serialize(&self.name, writer)?;
        BorshSerialize::serialize(&self.genesis_spk.as_bytes().to_vec(), writer)?;
        BorshSerialize::serialize(&self.data, writer)?;
        BorshSerialize::serialize(&self.inclusion, writer)?;
        BorshSerialize::serialize(&self.signature, writer)?;
        BorshSerialize::serialize(&self.exclusion, writer)
    }
}

impl BorshDeserialize for Handle {
    fn deserialize_reader<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let name = Label::deserialize_reader(reader)?;
        let spk_bytes: Vec<u8> = Vec::deserialize_reader(reader)?;
        let genesis_spk = ScriptBuf::from_bytes(spk_bytes);
        let data = Option::<OffchainData>::deserialize_reader(reader)?;
        let inclusion = Option::<MerkleProof>::deserialize_reader(reader)?;
        let signature = Option::<Signature>::deserialize_reader(reader)?;
        let exclusion = Option::<ExclusionProof>::deserialize_reader(reader)?;
        Ok(Handle { name, genesis_spk, data, inclusion, signature, exclusion })
    }
}

impl BorshSerialize for OffchainData {
    fn serialize<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        BorshSerialize::serialize(&self.seq, writer)?;
        BorshSerialize::serialize(&self.data, writer)?;
        BorshSerialize::serialize(&self.signature, writer)
    }
}

impl BorshDeserialize for OffchainData {
    fn deserialize_reader<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let seq = u32::deserialize_reader(reader)?;
        let data = Vec::<u8>::deserialize_reader(reader)?;
        let signature = Signature::deserialize_reader(reader)?;
        Ok(OffchainData { seq, data, signature })
    }
}
