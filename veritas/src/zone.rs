use std::fmt;
use std::io::{Read, Write};
use bitcoin::hashes::{sha256, Hash as _, HashEngine};
use bitcoin::ScriptBuf;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::cert::Signature;
use crate::codec::{self, hash_hex, invalid_tag, option_bytes_b64, option_hash_hex, DecodeError, ErrorKind, Hash};
use crate::msg::OffchainData;
use crate::sname::SName;
use crate::SignatureError;

#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SovereigntyState {
    /// Fully sovereign, independent and self-governing.
    Sovereign,

    /// Pending: commitment not yet finalized.
    /// May eventually become sovereign or remain dependent.
    Pending,

    /// Dependent on external authority, not self-governing.
    Dependent,
}

impl fmt::Display for SovereigntyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sovereign => write!(f, "sovereign"),
            Self::Pending => write!(f, "pending"),
            Self::Dependent => write!(f, "dependent"),
        }
    }
}

/// A verified zone representing ownership and state for a space handle.
///
/// Zones are produced by verifying messages against trusted anchors.
/// They contain all proven information about a handle's current state,
/// including ownership, delegation, and commitment data.
///
/// Zones are immutable snapshots: the verifier never updates one in place,
/// it only picks between candidates with [`Zone::is_better_than`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    /// The block height of the anchor used to prove this zone (snapshot version).
    pub anchor: u32,
    /// The sovereignty state indicating finality of the zone's commitment.
    pub sovereignty: SovereigntyState,
    /// The space handle this zone represents (e.g., "alice@bitcoin").
    pub handle: SName,
    /// The current script pubkey that controls this handle.
    pub script_pubkey: ScriptBuf,
    /// Optional on-chain data associated with the handle.
    #[serde(with = "option_bytes_b64")]
    pub data: Option<Vec<u8>>,
    /// Optional off-chain data signed by the handle owner
    pub offchain_data: Option<OffchainData>,
    /// Delegate information if the handle has delegated signing authority.
    pub delegate: ProvableOption<Delegate>,
    /// Commitment information including state root and finality status.
    pub commitment: ProvableOption<CommitmentInfo>,
}

/// An on-chain commitment to a space's handle tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct Commitment {
    /// Root of the handle tree at this commitment.
    #[serde(with = "hash_hex")]
    pub state_root: Hash,
    /// State root of the previous commitment, `None` for the first one.
    #[serde(with = "option_hash_hex")]
    pub prev_root: Option<Hash>,
    /// Hash chaining every state root committed so far.
    #[serde(with = "hash_hex")]
    pub rolling_hash: Hash,
    pub block_height: u32,
}

/// `H(prev_rolling_hash || state_root)`
pub fn rolling_hash(prev: &Hash, state_root: &Hash) -> Hash {
    let mut engine = sha256::Hash::engine();
    engine.input(prev);
    engine.input(state_root);
    sha256::Hash::from_engine(engine).to_byte_array()
}

impl Commitment {
    /// First commitment of a space: the rolling hash starts at the state root.
    pub fn genesis(state_root: Hash, block_height: u32) -> Self {
        Self {
            state_root,
            prev_root: None,
            rolling_hash: state_root,
            block_height,
        }
    }

    /// The commitment that follows this one.
    pub fn next(&self, state_root: Hash, block_height: u32) -> Self {
        Self {
            state_root,
            prev_root: Some(self.state_root),
            rolling_hash: rolling_hash(&self.rolling_hash, &state_root),
            block_height,
        }
    }

    /// Checks what can be checked without the previous commitment.
    pub fn is_well_formed(&self) -> bool {
        match self.prev_root {
            None => self.rolling_hash == self.state_root,
            Some(_) => true,
        }
    }

    /// True if `self` directly follows `prev` in the commitment chain.
    pub fn is_successor_of(&self, prev: &Commitment) -> bool {
        self.prev_root == Some(prev.state_root)
            && self.block_height >= prev.block_height
            && self.rolling_hash == rolling_hash(&prev.rolling_hash, &self.state_root)
    }
}

/// Information about a space's commitment state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct CommitmentInfo {
    /// The on-chain commitment data.
    pub onchain: Commitment,
    /// Hash of the proof that authenticated this commitment (if verified).
    #[serde(with = "option_hash_hex")]
    pub receipt_hash: Option<Hash>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegate {
    pub script_pubkey: ScriptBuf,
    #[serde(with = "option_bytes_b64")]
    pub data: Option<Vec<u8>>,
    /// Off-chain data signed by the delegate.
    pub offchain_data: Option<OffchainData>,
}

/// Knowledge about a piece of zone state.
///
/// `Empty` is a proof of absence; `Unknown` is the absence of a proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProvableOption<T> {
    Exists { value: T },
    Empty,
    Unknown,
}

impl<T> ProvableOption<T> {
    /// Exists > Empty > Unknown
    fn knowledge(&self) -> u8 {
        match self {
            Self::Exists { .. } => 2,
            Self::Empty => 1,
            Self::Unknown => 0,
        }
    }

    pub fn as_ref(&self) -> Option<&T> {
        match self {
            Self::Exists { value } => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneCompareError {
    /// Cannot compare zones for different handles
    DifferentHandles,
    /// Same handle and anchor, but neither commitment descends from the other
    ConflictingCommitments { handle: String },
}

impl ZoneCompareError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DifferentHandles => ErrorKind::InvalidInput,
            Self::ConflictingCommitments { .. } => ErrorKind::VerificationFailed,
        }
    }
}

impl fmt::Display for ZoneCompareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DifferentHandles => write!(f, "cannot compare zones for different handles"),
            Self::ConflictingCommitments { handle } => {
                write!(f, "conflicting commitments for {} at the same anchor", handle)
            }
        }
    }
}

impl std::error::Error for ZoneCompareError {}

impl Zone {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        codec::decode(bytes, "zone")
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("zone serialization should not fail")
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Returns the zone serialized for signing.
    ///
    /// The `anchor` and `offchain_data` fields are zeroed out so delegate
    /// signatures remain valid across different anchor snapshots and
    /// don't include owner-signed data.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut zone = self.clone();
        zone.anchor = 0;
        zone.offchain_data = None;
        zone.to_bytes()
    }

    /// Verify a schnorr signature over this zone's signing bytes.
    pub fn verify_signature(&self, signature: &Signature, signer: &ScriptBuf) -> Result<(), SignatureError> {
        crate::verify_with_script_pubkey(&self.signing_bytes(), signature, signer)
    }

    /// Verify the offchain_data signature against the zone's script_pubkey.
    pub fn verify_offchain_data(&self) -> Result<(), SignatureError> {
        let offchain = self.offchain_data.as_ref()
            .ok_or(SignatureError::InvalidSignature)?;
        offchain.verify(&self.script_pubkey)
    }

    /// Returns true if self should replace other as the canonical state of the handle.
    ///
    /// Comparison order:
    /// 1. Higher anchor (more recent chain state)
    /// 2. Commitment knowledge (Exists > Empty > Unknown)
    /// 3. For two known commitments at the same anchor, the one whose rolling
    ///    hash chains from the other; unrelated commitments are a conflict
    /// 4. Delegate knowledge (Exists > Empty > Unknown)
    /// 5. Fresher owner off-chain data
    ///
    /// Equal zones compare as `false` in both directions.
    pub fn is_better_than(&self, other: &Self) -> Result<bool, ZoneCompareError> {
        if self.handle != other.handle {
            return Err(ZoneCompareError::DifferentHandles);
        }

        if self.anchor != other.anchor {
            return Ok(self.anchor > other.anchor);
        }

        match (&self.commitment, &other.commitment) {
            (ProvableOption::Exists { value: a }, ProvableOption::Exists { value: b }) => {
                if a.onchain != b.onchain {
                    if a.onchain.is_successor_of(&b.onchain) {
                        return Ok(true);
                    }
                    if b.onchain.is_successor_of(&a.onchain) {
                        return Ok(false);
                    }
                    return Err(ZoneCompareError::ConflictingCommitments {
                        handle: self.handle.to_string(),
                    });
                }
                // Same commitment: an authenticated one wins
                match (&a.receipt_hash, &b.receipt_hash) {
                    (Some(_), None) => return Ok(true),
                    (None, Some(_)) => return Ok(false),
                    _ => {}
                }
            }
            (a, b) => {
                if a.knowledge() != b.knowledge() {
                    return Ok(a.knowledge() > b.knowledge());
                }
            }
        }

        if self.delegate.knowledge() != other.delegate.knowledge() {
            return Ok(self.delegate.knowledge() > other.delegate.knowledge());
        }

        // Higher offchain_data seq = newer owner-signed data
        match (&self.offchain_data, &other.offchain_data) {
            (Some(a), Some(b)) => Ok(a.is_better_than(b)),
            (Some(_), None) => Ok(true),
            _ => Ok(false),
        }
    }

    /// Copy receipt_hash from other if commitment roots match.
    /// Avoids re-authenticating commitments we've already verified.
    pub fn update_receipt_cache(&mut self, other: &Self) {
        if let (
            ProvableOption::Exists { value: mine },
            ProvableOption::Exists { value: theirs },
        ) = (&mut self.commitment, &other.commitment) {
            if mine.onchain == theirs.onchain && mine.receipt_hash.is_none() {
                mine.receipt_hash = theirs.receipt_hash;
            }
        }
    }
}

// Borsh implementations

impl BorshSerialize for SovereigntyState {
    fn serialize<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        let variant: u8 = match self {
            Self::Sovereign => 0,
            Self::Pending => 1,
            Self::Dependent => 2,
        };
        BorshSerialize::serialize(&variant, writer)
    }
}

impl BorshDeserialize for SovereigntyState {
    fn deserialize_reader<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let variant = u8::deserialize_reader(reader)?;
        match variant {
            0 => Ok(Self::Sovereign),
            1 => Ok(Self::Pending),
            2 => Ok(Self::Dependent),
            _ => Err(invalid_tag("SovereigntyState", variant)),
        }
    }
}

impl BorshSerialize for Delegate {
    fn serialize<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        BorshSerialize::serialize(&self.script_pubkey.as_bytes().to_vec(), writer)?;
        BorshSerialize::serialize(&self.data, writer)?;
        BorshSerialize::serialize(&self.offchain_data, writer)
    }
}

impl BorshDeserialize for Delegate {
    fn deserialize_reader<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let spk_bytes: Vec<u8> = Vec::deserialize_reader(reader)?;
        let data: Option<Vec<u8>> = Option::deserialize_reader(reader)?;
        let offchain_data = Option::<OffchainData>::deserialize_reader(reader)?;
        Ok(Delegate {
            script_pubkey: ScriptBuf::from_bytes(spk_bytes),
            data,
            offchain_data,
        })
    }
}

const TAG_EXISTS: u8 = 1;
const TAG_EMPTY: u8 = 2;
const TAG_UNKNOWN: u8 = 3;

impl<T: BorshSerialize> BorshSerialize for ProvableOption<T> {
    fn serialize<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            Self::Exists { value } => {
                BorshSerialize::serialize(&TAG_EXISTS, writer)?;
                BorshSerialize::serialize(value, writer)
            }
            Self::Empty => BorshSerialize::serialize(&TAG_EMPTY, writer),
            Self::Unknown => BorshSerialize::serialize(&TAG_UNKNOWN, writer),
        }
    }
}

impl<T: BorshDeserialize> BorshDeserialize for ProvableOption<T> {
    fn deserialize_reader<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let variant = u8::deserialize_reader(reader)?;
        match variant {
            TAG_EXISTS => {
                let value = T::deserialize_reader(reader)?;
                Ok(Self::Exists { value })
            }
            TAG_EMPTY => Ok(Self::Empty),
            TAG_UNKNOWN => Ok(Self::Unknown),
            _ => Err(invalid_tag("ProvableOption", variant)),
        }
    }
}

impl BorshSerialize for Zone {
    fn serialize<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        BorshSerialize::serialize(&self.anchor, writer)?;
        BorshSerialize::serialize(&self.sovereignty, writer)?;
        BorshSerialize::serialize(&self.handle, writer)?;
        BorshSerialize::serialize(&self.script_pubkey.as_bytes().to_vec(), writer)?;
        BorshSerialize::serialize(&self.data, writer)?;
        BorshSerialize::serialize(&self.offchain_data, writer)?;
        BorshSerialize::serialize(&self.delegate, writer)?;
        BorshSerialize::serialize(&self.commitment, writer)
    }
}

impl BorshDeserialize for Zone {
    fn deserialize_reader<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let anchor = u32::deserialize_reader(reader)?;
        let sovereignty = SovereigntyState::deserialize_reader(reader)?;
        let handle = SName::deserialize_reader(reader)?;
        let spk_bytes: Vec<u8> = Vec::deserialize_reader(reader)?;
        let data: Option<Vec<u8>> = Option::deserialize_reader(reader)?;
        let offchain_data = Option::<OffchainData>::deserialize_reader(reader)?;
        let delegate: ProvableOption<Delegate> = ProvableOption::deserialize_reader(reader)?;
        let commitment: ProvableOption<CommitmentInfo> = ProvableOption::deserialize_reader(reader)?;

        Ok(Zone {
            anchor,
            sovereignty,
            handle,
            script_pubkey: ScriptBuf::from_bytes(spk_bytes),
            data,
            offchain_data,
            delegate,
            commitment,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn zone(handle: &str, anchor: u32) -> Zone {
        Zone {
            anchor,
            sovereignty: SovereigntyState::Sovereign,
            handle: SName::from_str(handle).unwrap(),
            script_pubkey: ScriptBuf::from_bytes(vec![0x51, 0x20, 7, 7]),
            data: None,
            offchain_data: None,
            delegate: ProvableOption::Unknown,
            commitment: ProvableOption::Unknown,
        }
    }

    fn with_commitment(mut z: Zone, c: Commitment) -> Zone {
        z.commitment = ProvableOption::Exists {
            value: CommitmentInfo { onchain: c, receipt_hash: None },
        };
        z
    }

    #[test]
    fn higher_anchor_wins() {
        let old = with_commitment(zone("@bitcoin", 100), Commitment::genesis([1; 32], 90));
        let new = zone("@bitcoin", 101);
        assert_eq!(new.is_better_than(&old), Ok(true));
        assert_eq!(old.is_better_than(&new), Ok(false));
    }

    #[test]
    fn knowledge_breaks_anchor_ties() {
        let unknown = zone("@bitcoin", 100);
        let mut empty = zone("@bitcoin", 100);
        empty.commitment = ProvableOption::Empty;
        let exists = with_commitment(zone("@bitcoin", 100), Commitment::genesis([1; 32], 90));

        assert_eq!(exists.is_better_than(&empty), Ok(true));
        assert_eq!(empty.is_better_than(&unknown), Ok(true));
        assert_eq!(unknown.is_better_than(&exists), Ok(false));
        assert_eq!(empty.is_better_than(&exists), Ok(false));
    }

    #[test]
    fn successor_commitment_wins_and_unrelated_conflict() {
        let first = Commitment::genesis([1; 32], 90);
        let second = first.next([2; 32], 95);
        let a = with_commitment(zone("@bitcoin", 100), first.clone());
        let b = with_commitment(zone("@bitcoin", 100), second);
        assert_eq!(b.is_better_than(&a), Ok(true));
        assert_eq!(a.is_better_than(&b), Ok(false));

        let forged = with_commitment(zone("@bitcoin", 100), Commitment {
            state_root: [3; 32],
            prev_root: Some(first.state_root),
            rolling_hash: [0; 32],
            block_height: 95,
        });
        assert!(matches!(
            forged.is_better_than(&a),
            Err(ZoneCompareError::ConflictingCommitments { .. })
        ));
        assert_eq!(
            forged.is_better_than(&a).unwrap_err().kind(),
            ErrorKind::VerificationFailed
        );
    }

    #[test]
    fn comparison_is_irreflexive_and_handle_scoped() {
        let a = with_commitment(zone("alice@bitcoin", 100), Commitment::genesis([1; 32], 90));
        assert_eq!(a.is_better_than(&a), Ok(false));

        let b = zone("bob@bitcoin", 100);
        assert_eq!(a.is_better_than(&b), Err(ZoneCompareError::DifferentHandles));
        assert_eq!(ZoneCompareError::DifferentHandles.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn rolling_hash_chains() {
        let first = Commitment::genesis([1; 32], 10);
        assert!(first.is_well_formed());
        let second = first.next([2; 32], 20);
        assert_eq!(second.rolling_hash, rolling_hash(&[1; 32], &[2; 32]));
        assert!(second.is_successor_of(&first));
        assert!(!first.is_successor_of(&second));

        let mut bad = Commitment::genesis([1; 32], 10);
        bad.rolling_hash = [9; 32];
        assert!(!bad.is_well_formed());
    }

    #[test]
    fn zone_roundtrip_and_unknown_tag() {
        let mut z = with_commitment(zone("alice@bitcoin", 100), Commitment::genesis([1; 32], 90));
        z.delegate = ProvableOption::Exists {
            value: Delegate {
                script_pubkey: ScriptBuf::from_bytes(vec![1, 2, 3]),
                data: Some(vec![4]),
                offchain_data: None,
            },
        };
        z.data = Some(b"hello".to_vec());
        let bytes = z.to_bytes();
        assert_eq!(Zone::from_slice(&bytes).unwrap(), z);

        // Commitment tag is the first byte after the delegate payload; corrupt
        // the final ProvableOption tag of a zone that ends in Unknown.
        let mut plain = zone("alice@bitcoin", 100).to_bytes();
        let last = plain.len() - 1;
        assert_eq!(plain[last], TAG_UNKNOWN);
        plain[last] = 9;
        let err = Zone::from_slice(&plain).unwrap_err();
        assert!(err.reason.contains("ProvableOption"), "{}", err);
    }
}
