use std::fmt::{Display, Formatter};
use std::io::{Read, Write};
use std::str::FromStr;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde::de::Error as DeError;

/// Maximum length of a space name in bytes.
pub const MAX_SPACE_LEN: usize = 255;

/// Maximum length of a single label in bytes.
pub const MAX_LABEL_LEN: usize = 63;

/// A DNS-encoded name representing a space handle.
///
/// An `SName` stores a hierarchical name using DNS wire format encoding, where each label
/// is prefixed by its length byte and the name is terminated by a null byte.
///
/// # Display Format
///
/// When displayed as a string, an `SName` uses the format `labels@space` where:
/// - The **space** (root) appears after the `@` symbol with no dots following it
/// - **Subspace labels** appear before the `@`, separated by dots
///
/// For example, `hello.world@bitcoin` represents:
/// - `bitcoin` - the space (root label)
/// - `world` - a subspace of `bitcoin`
/// - `hello` - a label within `world`
///
/// # Wire Format
///
/// Internally, labels are stored in order with length prefixes:
/// ```text
/// \x05hello\x05world\x07bitcoin\x00
///   ^5 bytes  ^5 bytes  ^7 bytes  ^null terminator
/// ```
///
/// Borsh encodes the wire bytes with a `u32` length prefix.
///
/// # Examples
///
/// ```
/// use std::str::FromStr;
/// use libveritas::sname::SName;
///
/// let name = SName::from_str("alice@bitcoin").unwrap();
/// assert_eq!(name.to_string(), "alice@bitcoin");
///
/// let name = SName::from_str("key.wallet@bitcoin").unwrap();
/// assert_eq!(name.to_string(), "key.wallet@bitcoin");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SName([u8; MAX_SPACE_LEN]);

/// A single space label in wire form (`len || bytes`), displayed as `@label`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SLabel(Vec<u8>);

/// A subspace label, displayed without the `@` prefix (e.g. `alice`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(SLabel);

/// Error type for space name parsing and validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Name is empty.
    Empty,
    /// Name exceeds maximum length of 255 bytes.
    TooLong,
    /// Label exceeds maximum length of 63 bytes.
    LabelTooLong,
    /// Missing null terminator in wire format.
    MissingNullTerminator,
    /// Invalid label length byte in wire format.
    InvalidLabelLength,
    /// Name contains invalid characters (must be lowercase alphanumeric).
    InvalidCharacter,
    /// Malformed name.
    Malformed,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Empty => write!(f, "name is empty"),
            Error::TooLong => write!(f, "name exceeds maximum length of {} bytes", MAX_SPACE_LEN),
            Error::LabelTooLong => write!(f, "label exceeds maximum length of {} bytes", MAX_LABEL_LEN),
            Error::MissingNullTerminator => write!(f, "missing null terminator"),
            Error::InvalidLabelLength => write!(f, "invalid label length byte"),
            Error::InvalidCharacter => write!(f, "invalid character (must be lowercase alphanumeric)"),
            Error::Malformed => write!(f, "malformed name structure"),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn kind(&self) -> crate::codec::ErrorKind {
        crate::codec::ErrorKind::InvalidInput
    }
}

fn check_label(label: &[u8]) -> Result<(), Error> {
    if label.is_empty() {
        return Err(Error::Malformed);
    }
    if label.len() > MAX_LABEL_LEN {
        return Err(Error::LabelTooLong);
    }
    if label
        .iter()
        .any(|b| !b.is_ascii_alphanumeric() || b.is_ascii_uppercase())
    {
        return Err(Error::InvalidCharacter);
    }
    Ok(())
}

// SLabel

impl SLabel {
    /// Parses a label without the `@` prefix.
    pub fn from_str_unprefixed(s: &str) -> Result<Self, Error> {
        check_label(s.as_bytes())?;
        let mut bytes = Vec::with_capacity(s.len() + 1);
        bytes.push(s.len() as u8);
        bytes.extend_from_slice(s.as_bytes());
        Ok(SLabel(bytes))
    }

    /// The label text without the length byte or `@` prefix.
    pub fn as_str_unprefixed(&self) -> &str {
        // Validated as ASCII on construction.
        std::str::from_utf8(&self.0[1..]).unwrap_or_default()
    }

    pub fn to_string_unprefixed(&self) -> String {
        self.as_str_unprefixed().to_string()
    }
}

impl AsRef<[u8]> for SLabel {
    /// Wire form: length byte followed by the label.
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for SLabel {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let (&len, label) = value.split_first().ok_or(Error::Empty)?;
        if len as usize != label.len() {
            return Err(Error::InvalidLabelLength);
        }
        check_label(label)?;
        Ok(SLabel(value.to_vec()))
    }
}

impl FromStr for SLabel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unprefixed = s.strip_prefix('@').ok_or(Error::Malformed)?;
        SLabel::from_str_unprefixed(unprefixed)
    }
}

impl Display for SLabel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.as_str_unprefixed())
    }
}

impl BorshSerialize for SLabel {
    fn serialize<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        BorshSerialize::serialize(&self.0, writer)
    }
}

impl BorshDeserialize for SLabel {
    fn deserialize_reader<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let bytes: Vec<u8> = BorshDeserialize::deserialize_reader(reader)?;
        SLabel::try_from(bytes.as_slice())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    }
}

impl Serialize for SLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for SLabel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = <String as Deserialize>::deserialize(deserializer)?;
            SLabel::from_str(&s).map_err(DeError::custom)
        } else {
            let bytes = <Vec<u8> as Deserialize>::deserialize(deserializer)?;
            SLabel::try_from(bytes.as_slice()).map_err(DeError::custom)
        }
    }
}

// Label

impl Label {
    pub fn as_slabel(&self) -> &SLabel {
        &self.0
    }
}

impl From<SLabel> for Label {
    fn from(value: SLabel) -> Self {
        Label(value)
    }
}

impl Display for Label {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.as_str_unprefixed())
    }
}

impl FromStr for Label {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Label(SLabel::from_str_unprefixed(s)?))
    }
}

impl BorshSerialize for Label {
    fn serialize<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        BorshSerialize::serialize(&self.0, writer)
    }
}

impl BorshDeserialize for Label {
    fn deserialize_reader<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        Ok(Label(SLabel::deserialize_reader(reader)?))
    }
}

impl Serialize for Label {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            Serialize::serialize(&self.0, serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Label {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = <String as Deserialize>::deserialize(deserializer)?;
            Label::from_str(&s).map_err(DeError::custom)
        } else {
            Ok(Label(<SLabel as Deserialize>::deserialize(deserializer)?))
        }
    }
}

/// A borrowed reference to a space name.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SNameRef<'a>(&'a [u8]);

/// Iterator over the labels in a space name.
pub struct LabelIterator<'a>(&'a [u8]);

/// Trait for types that behave like space names.
pub trait NameLike {
    /// Returns the underlying byte representation.
    fn inner_bytes(&self) -> &[u8];

    /// Returns the wire-format bytes including the null terminator.
    fn to_bytes(&self) -> &[u8] {
        let mut len = 0;
        for label in self.iter() {
            len += label.len() + 1;
        }
        len += 1; // null byte
        &self.inner_bytes()[..len]
    }

    /// Returns `true` if this name has exactly one label.
    #[inline(always)]
    fn is_single_label(&self) -> bool {
        self.label_count() == 1
    }

    /// Returns the number of labels in this name.
    fn label_count(&self) -> usize {
        self.iter().count()
    }

    /// Returns an iterator over the labels in this name.
    #[inline(always)]
    fn iter(&self) -> LabelIterator<'_> {
        LabelIterator(self.inner_bytes())
    }
}

impl NameLike for SName {
    fn inner_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl NameLike for SNameRef<'_> {
    fn inner_bytes(&self) -> &[u8] {
        self.0
    }
}

impl SName {
    /// Returns a borrowed reference to this name.
    pub fn as_name_ref(&self) -> SNameRef<'_> {
        SNameRef(&self.0)
    }

    /// The root handle of a space, e.g. `@bitcoin`.
    pub fn from_space(space: &SLabel) -> Result<Self, Error> {
        SName::try_from(format!("{}", space).as_str())
    }

    /// Joins a subspace label and its space, e.g. `alice` + `@bitcoin`.
    pub fn join(label: &Label, space: &SLabel) -> Result<Self, Error> {
        SName::try_from(format!("{}{}", label, space).as_str())
    }

    /// Returns the top-level space (the label after `@`).
    ///
    /// For `hello.world@bitcoin`, this returns `Some(SLabel("@bitcoin"))`.
    pub fn space(&self) -> Option<SLabel> {
        let last = self.iter().last()?;
        let s = std::str::from_utf8(last).ok()?;
        SLabel::from_str_unprefixed(s).ok()
    }

    /// Returns the subspace (the second-level label, immediately before the space).
    ///
    /// For `hello.world@bitcoin`, this returns `Some(Label("world"))`.
    /// Returns `None` if the name has fewer than two labels.
    pub fn subspace(&self) -> Option<Label> {
        let labels: Vec<&[u8]> = self.iter().collect();
        if labels.len() < 2 {
            return None;
        }
        let second_to_last = labels[labels.len() - 2];
        let s = std::str::from_utf8(second_to_last).ok()?;
        Label::from_str(s).ok()
    }
}

impl SNameRef<'_> {
    /// Creates an owned copy of this name reference.
    pub fn to_owned(&self) -> SName {
        let mut owned = SName([0; MAX_SPACE_LEN]);
        owned.0[..self.0.len()].copy_from_slice(self.0);
        owned
    }
}

// Display implementations

impl Display for SName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // Labels are validated ASCII on every construction path.
        let labels: Vec<&str> = self
            .iter()
            .map(|label| std::str::from_utf8(label).map_err(|_| std::fmt::Error))
            .collect::<Result<_, _>>()?;

        let Some((space, subspaces)) = labels.split_last() else {
            return Err(std::fmt::Error);
        };
        write!(f, "{}@{}", subspaces.join("."), space)
    }
}

impl Display for SNameRef<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_owned())
    }
}

// FromStr and TryFrom implementations

impl FromStr for SName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.try_into()
    }
}

impl TryFrom<&str> for SName {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let (subspace, space) = value
            .split_once('@')
            .ok_or(Error::Malformed)?;

        if space.is_empty() || space.contains('.') {
            return Err(Error::Malformed);
        }

        let mut space_bytes = [0; MAX_SPACE_LEN];
        let mut space_len = 0;

        for label in subspace.split('.').chain(std::iter::once(space)) {
            if space_len == 0 && label.is_empty() {
                continue; // Skip initial subspace label if empty
            }

            check_label(label.as_bytes())?;
            let label_len = label.len();
            if space_len + label_len + 2 > MAX_SPACE_LEN {
                return Err(Error::TooLong);
            }

            space_bytes[space_len] = label_len as u8;
            space_len += 1;
            space_bytes[space_len..space_len + label_len].copy_from_slice(label.as_bytes());
            space_len += label_len;
        }

        // Mark end with null byte
        space_bytes[space_len] = 0;

        Ok(SName(space_bytes))
    }
}

impl TryFrom<String> for SName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.as_str().try_into()
    }
}

impl<const N: usize> TryFrom<&[u8; N]> for SName {
    type Error = Error;

    fn try_from(value: &[u8; N]) -> Result<Self, Self::Error> {
        value.as_slice().try_into()
    }
}

impl TryFrom<&Vec<u8>> for SName {
    type Error = Error;

    fn try_from(value: &Vec<u8>) -> Result<Self, Self::Error> {
        value.as_slice().try_into()
    }
}

impl TryFrom<&[u8]> for SName {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let name_ref: SNameRef = value.try_into()?;
        Ok(name_ref.to_owned())
    }
}

impl<'a> TryFrom<&'a [u8]> for SNameRef<'a> {
    type Error = Error;

    fn try_from(value: &'a [u8]) -> Result<Self, Self::Error> {
        let mut remaining = value;
        if remaining.is_empty() {
            return Err(Error::Empty);
        }

        let mut parsed_len = 0;
        loop {
            if remaining.is_empty() {
                return Err(Error::MissingNullTerminator);
            }
            let label_len = remaining[0] as usize;
            if label_len == 0 {
                parsed_len += 1;
                break;
            }
            if label_len > MAX_LABEL_LEN {
                return Err(Error::LabelTooLong);
            }
            if label_len + 1 > remaining.len() {
                return Err(Error::InvalidLabelLength);
            }
            check_label(&remaining[1..label_len + 1])?;
            remaining = &remaining[label_len + 1..];
            parsed_len += label_len + 1;
            if parsed_len + 1 > MAX_SPACE_LEN {
                return Err(Error::TooLong);
            }
        }

        if parsed_len == 1 {
            return Err(Error::Empty);
        }
        Ok(SNameRef(&value[..parsed_len]))
    }
}

// Iterator implementation

impl<'a> Iterator for LabelIterator<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.0.is_empty() || self.0[0] == 0 {
            return None;
        }

        let label_len = self.0[0] as usize;
        let (label, rest) = self.0.split_at(label_len + 1);
        self.0 = rest;
        Some(&label[1..])
    }
}

// Borsh: u32 length prefix followed by the wire bytes

impl BorshSerialize for SName {
    fn serialize<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        BorshSerialize::serialize(&self.to_bytes().to_vec(), writer)
    }
}

impl BorshDeserialize for SName {
    fn deserialize_reader<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let bytes: Vec<u8> = BorshDeserialize::deserialize_reader(reader)?;
        let name_ref = SNameRef::try_from(bytes.as_slice())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        if name_ref.0.len() != bytes.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "trailing bytes after name terminator",
            ));
        }
        Ok(name_ref.to_owned())
    }
}

// Serde implementations

impl Serialize for SName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(self.to_string().as_str())
        } else {
            serializer.serialize_bytes(self.to_bytes())
        }
    }
}

impl<'de> Deserialize<'de> for SName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = <String as Deserialize>::deserialize(deserializer)?;
            SName::from_str(&s).map_err(DeError::custom)
        } else {
            let bytes = <Vec<u8> as Deserialize>::deserialize(deserializer)?;
            SName::try_from(bytes.as_slice()).map_err(DeError::custom)
        }
    }
}
