use std::fmt;
use std::io::{Read, Write};
use bitcoin::ScriptBuf;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::codec::{self, invalid_tag, DecodeError};
use crate::constants::CERTIFICATE_VERSION;
use crate::msg::OffchainData;
use crate::proof::{ExclusionProof, MerkleProof};
use crate::sname::SName;

/// A slim offline backup certificate for space handle ownership.
///
/// Certificate contains only data that cannot be recovered from chain state:
/// - Owner-signed off-chain data (for root certs)
/// - Handle tree inclusion proofs (from the operator's off-chain tree)
/// - Signatures and identity information
///
/// Space and ptrs records are always recoverable from a chain source and are
/// not stored in the certificate.
///
/// # Certificate Types
///
/// - **Root certificates** (`Witness::Root`) for top-level spaces (e.g., `@bitcoin`)
/// - **Leaf certificates** (`Witness::Leaf`) for handles under a space (e.g., `alice@bitcoin`)
///   - Final: handle is committed to the operator's tree (inclusion proof)
///   - Temporary: handle is authorized by parent signature, with proof it is
///     absent from the committed tree when the space has a commitment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    /// Certificate format version for future compatibility.
    pub version: u8,
    /// The space handle this certificate attests to.
    pub subject: SName,
    /// The witness proving this certificate's validity.
    pub witness: Witness,
}

/// Witness for a certificate, containing only non-recoverable proof data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Witness {
    /// Root certificate for a top-level space.
    Root {
        /// Off-chain data signed by the space owner, if any.
        offchain_data: Option<OffchainData>,
    },
    /// Leaf certificate for a delegated handle.
    Leaf {
        /// The genesis script pubkey the handle was initialized with.
        genesis_spk: ScriptBuf,
        /// Inclusion proof in the committed handle tree (final certs).
        inclusion: Option<MerkleProof>,
        /// Present for temporary certificates: a schnorr signature from
        /// the parent delegate/owner authorizing this handle.
        signature: Option<Signature>,
        /// Absence from the committed handle tree (temporary certs).
        exclusion: Option<ExclusionProof>,
    },
}

impl Certificate {
    /// Creates a new certificate with the current version.
    pub fn new(subject: SName, witness: Witness) -> Self {
        Self {
            version: CERTIFICATE_VERSION,
            subject,
            witness,
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        codec::decode(bytes, "certificate")
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("certificate serialization should not fail")
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Returns true if this is a leaf certificate.
    pub fn is_leaf(&self) -> bool {
        matches!(self.witness, Witness::Leaf { .. })
    }

    /// Returns true if this is a temporary leaf certificate.
    /// Root certificates are never temporary.
    pub fn is_temporary(&self) -> bool {
        matches!(
            self.witness,
            Witness::Leaf { signature: Some(_), .. }
        )
    }

    /// Returns true if this is a final certificate.
    /// Root certificates are always final. Leaf certificates are final
    /// when committed (no signature).
    pub fn is_final(&self) -> bool {
        match &self.witness {
            Witness::Root { .. } => true,
            Witness::Leaf { signature, .. } => signature.is_none(),
        }
    }

    /// String tag of the certificate kind: `root`, `final` or `temporary`.
    pub fn cert_type(&self) -> &'static str {
        match &self.witness {
            Witness::Root { .. } => "root",
            Witness::Leaf { .. } if self.is_temporary() => "temporary",
            Witness::Leaf { .. } => "final",
        }
    }

    /// Returns the genesis script pubkey if this is a leaf certificate.
    pub fn genesis_spk(&self) -> Option<&ScriptBuf> {
        match &self.witness {
            Witness::Leaf { genesis_spk, .. } => Some(genesis_spk),
            _ => None,
        }
    }
}

/// A 64-byte Schnorr signature.
#[derive(Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Signature(pub [u8; 64]);

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(self.0))
    }
}

impl TryFrom<&[u8]> for Signature {
    type Error = usize;

    /// Fails with the actual length when it is not 64.
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 64] = bytes.try_into().map_err(|_| bytes.len())?;
        Ok(Signature(arr))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(self.0))
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = if deserializer.is_human_readable() {
            let s = <String as Deserialize>::deserialize(deserializer)?;
            hex::decode(s).map_err(serde::de::Error::custom)?
        } else {
            <Vec<u8> as Deserialize>::deserialize(deserializer)?
        };
        Signature::try_from(bytes.as_slice()).map_err(|len| {
            serde::de::Error::custom(format!("expected 64 bytes, got {}", len))
        })
    }
}

// Borsh implementations

impl BorshSerialize for Certificate {
    fn serialize<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        BorshSerialize::serialize(&self.version, writer)?;
        BorshSerialize::serialize(&self.subject, writer)?;
        BorshSerialize::serialize(&self.witness, writer)
    }
}

impl BorshDeserialize for Certificate {
    fn deserialize_reader<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let version = u8::deserialize_reader(reader)?;
        if version != CERTIFICATE_VERSION {
            return Err(invalid_tag("Certificate version", version));
        }
        let subject = SName::deserialize_reader(reader)?;
        let witness = Witness::deserialize_reader(reader)?;
        Ok(Certificate { version, subject, witness })
    }
}

impl BorshSerialize for Witness {
    fn serialize<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            Witness::Root { offchain_data } => {
                BorshSerialize::serialize(&0u8, writer)?;
                BorshSerialize::serialize(offchain_data, writer)
            }
            Witness::Leaf { genesis_spk, inclusion, signature, exclusion } => {
                BorshSerialize::serialize(&1u8, writer)?;
                BorshSerialize::serialize(&genesis_spk.as_bytes().to_vec(), writer)?;
                BorshSerialize::serialize(inclusion, writer)?;
                BorshSerialize::serialize(signature, writer)?;
                BorshSerialize::serialize(exclusion, writer)
            }
        }
    }
}

impl BorshDeserialize for Witness {
    fn deserialize_reader<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let variant = u8::deserialize_reader(reader)?;
        match variant {
            0 => {
                let offchain_data = Option::<OffchainData>::deserialize_reader(reader)?;
                Ok(Witness::Root { offchain_data })
            }
            1 => {
                let spk_bytes: Vec<u8> = Vec::deserialize_reader(reader)?;
                let inclusion = Option::<MerkleProof>::deserialize_reader(reader)?;
                let signature = Option::<Signature>::deserialize_reader(reader)?;
                let exclusion = Option::<ExclusionProof>::deserialize_reader(reader)?;
                Ok(Witness::Leaf {
                    genesis_spk: ScriptBuf::from_bytes(spk_bytes),
                    inclusion,
                    signature,
                    exclusion,
                })
            }
            _ => Err(invalid_tag("Witness", variant)),
        }
    }
}
