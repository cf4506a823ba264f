//! Binary and JSON encoding helpers shared by every wire entity.
//!
//! Binary encoding is borsh: little-endian integers, `u32` length prefixes
//! for byte strings and vectors, a one-byte presence flag for options.
//! Variant tags are written by hand next to each type so that an unknown
//! discriminant is always a decode error.

use std::fmt;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use borsh::BorshDeserialize;
use serde::{Deserialize, Deserializer, Serializer};

/// A 32-byte SHA-256 digest.
pub type Hash = [u8; 32];

/// The two kinds of failure callers can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or ill-typed input the caller could have fixed before calling.
    InvalidInput,
    /// Structurally valid input that fails cryptographic or consensus validation.
    VerificationFailed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput => write!(f, "invalid input"),
            Self::VerificationFailed => write!(f, "verification failed"),
        }
    }
}

/// Failure to decode one of the binary wire entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    /// What was being decoded (e.g. "zone", "message").
    pub what: &'static str,
    pub reason: String,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.what, self.reason)
    }
}

impl std::error::Error for DecodeError {}

impl DecodeError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidInput
    }
}

/// Decode a complete buffer. Truncated input, unknown tags, length mismatches
/// and trailing bytes are all rejected.
pub fn decode<T: BorshDeserialize>(bytes: &[u8], what: &'static str) -> Result<T, DecodeError> {
    borsh::from_slice(bytes).map_err(|e| DecodeError {
        what,
        reason: e.to_string(),
    })
}

pub(crate) fn invalid_tag(entity: &str, tag: u8) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("invalid {} variant: {}", entity, tag),
    )
}

/// Borsh for `ScriptBuf` fields: a length-prefixed byte string.
pub(crate) mod script_borsh {
    use std::io::{Read, Write};
    use bitcoin::ScriptBuf;
    use borsh::{BorshDeserialize, BorshSerialize};

    pub fn serialize<W: Write>(spk: &ScriptBuf, writer: &mut W) -> std::io::Result<()> {
        BorshSerialize::serialize(&spk.as_bytes().to_vec(), writer)
    }

    pub fn deserialize<R: Read>(reader: &mut R) -> std::io::Result<ScriptBuf> {
        Vec::<u8>::deserialize_reader(reader).map(ScriptBuf::from_bytes)
    }
}

// Serde helpers: hashes are hex, opaque payloads are base64 when human readable.

pub(crate) mod hash_hex {
    use super::*;

    pub fn serialize<S: Serializer>(hash: &Hash, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(hash))
        } else {
            serializer.serialize_bytes(hash)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Hash, D::Error> {
        if deserializer.is_human_readable() {
            let s = <String as Deserialize>::deserialize(deserializer)?;
            let mut bytes = [0u8; 32];
            hex::decode_to_slice(&s, &mut bytes).map_err(serde::de::Error::custom)?;
            Ok(bytes)
        } else {
            <[u8; 32] as Deserialize>::deserialize(deserializer)
        }
    }
}

pub(crate) mod option_hash_hex {
    use super::*;

    pub fn serialize<S: Serializer>(hash: &Option<Hash>, serializer: S) -> Result<S::Ok, S::Error> {
        match hash {
            Some(bytes) => {
                if serializer.is_human_readable() {
                    serializer.serialize_some(&hex::encode(bytes))
                } else {
                    serializer.serialize_some(bytes)
                }
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Hash>, D::Error> {
        if deserializer.is_human_readable() {
            let opt: Option<String> = <Option<String> as Deserialize>::deserialize(deserializer)?;
            match opt {
                None => Ok(None),
                Some(s) => {
                    let mut bytes = [0u8; 32];
                    hex::decode_to_slice(&s, &mut bytes).map_err(serde::de::Error::custom)?;
                    Ok(Some(bytes))
                }
            }
        } else {
            <Option<[u8; 32]> as Deserialize>::deserialize(deserializer)
        }
    }
}

pub(crate) mod hash_vec_hex {
    use super::*;
    use serde::Serialize;

    struct HexHash<'a>(&'a Hash);

    impl Serialize for HexHash<'_> {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            hash_hex::serialize(self.0, serializer)
        }
    }

    struct OwnedHexHash(Hash);

    impl<'de> Deserialize<'de> for OwnedHexHash {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            hash_hex::deserialize(deserializer).map(OwnedHexHash)
        }
    }

    pub fn serialize<S: Serializer>(hashes: &[Hash], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(hashes.iter().map(HexHash))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Hash>, D::Error> {
        let items = <Vec<OwnedHexHash> as Deserialize>::deserialize(deserializer)?;
        Ok(items.into_iter().map(|h| h.0).collect())
    }
}

pub(crate) mod bytes_b64 {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&BASE64.encode(bytes))
        } else {
            serializer.serialize_bytes(bytes)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        if deserializer.is_human_readable() {
            let s = <String as Deserialize>::deserialize(deserializer)?;
            BASE64.decode(&s).map_err(serde::de::Error::custom)
        } else {
            <Vec<u8> as Deserialize>::deserialize(deserializer)
        }
    }
}

pub(crate) mod option_bytes_b64 {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) if serializer.is_human_readable() => {
                serializer.serialize_some(&BASE64.encode(bytes))
            }
            Some(bytes) => serializer.serialize_some(bytes),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        if deserializer.is_human_readable() {
            let opt = <Option<String> as Deserialize>::deserialize(deserializer)?;
            opt.map(|s| BASE64.decode(&s).map_err(serde::de::Error::custom))
                .transpose()
        } else {
            <Option<Vec<u8>> as Deserialize>::deserialize(deserializer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Sample {
        #[serde(with = "hash_hex")]
        root: Hash,
        #[serde(with = "option_hash_hex")]
        prev: Option<Hash>,
        #[serde(with = "option_bytes_b64")]
        data: Option<Vec<u8>>,
    }

    #[test]
    fn decode_rejects_trailing_and_truncated_bytes() {
        let bytes = borsh::to_vec(&(7u32, vec![1u8, 2, 3])).unwrap();
        let ok: (u32, Vec<u8>) = decode(&bytes, "sample").unwrap();
        assert_eq!(ok, (7, vec![1, 2, 3]));

        let mut trailing = bytes.clone();
        trailing.push(0);
        let err = decode::<(u32, Vec<u8>)>(&trailing, "sample").unwrap_err();
        assert_eq!(err.what, "sample");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        assert!(decode::<(u32, Vec<u8>)>(&bytes[..bytes.len() - 1], "sample").is_err());
    }

    #[test]
    fn json_helpers_use_hex_and_base64() {
        let sample = Sample { root: [0xab; 32], prev: None, data: Some(b"hi".to_vec()) };
        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(json["root"], hex::encode([0xab; 32]));
        assert!(json["prev"].is_null());
        assert_eq!(json["data"], "aGk=");

        let back: Sample = serde_json::from_value(json).unwrap();
        assert_eq!(back, sample);

        let bad = serde_json::json!({ "root": "zz", "prev": null, "data": null });
        assert!(serde_json::from_value::<Sample>(bad).is_err());
    }
}
