//! Byte-oriented boundary over libveritas.
//!
//! Every input is bytes or a string, every failure is one of the two
//! [`VeritasError`] kinds. Host-language glue builds on top of this crate.

use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use libveritas::cert::Certificate;
use libveritas::msg::QueryContext;
use libveritas::sname::SName;
use libveritas::{AnchorSet, ErrorKind, ProvableOption, VeritasConfig, Zone};
use tracing::{debug, error};

/// Core contract version this adapter was written against.
pub const EXPECTED_API_VERSION: u32 = 2;

// -- Errors --

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VeritasError {
    #[error("{message}")]
    InvalidInput { message: String },
    #[error("{message}")]
    VerificationFailed { message: String },
}

impl VeritasError {
    fn new(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::InvalidInput => Self::InvalidInput { message },
            ErrorKind::VerificationFailed => Self::VerificationFailed { message },
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput { message: message.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::VerificationFailed { .. } => ErrorKind::VerificationFailed,
        }
    }
}

macro_rules! classified {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for VeritasError {
                fn from(e: $ty) -> Self {
                    VeritasError::new(e.kind(), e.to_string())
                }
            }
        )*
    };
}

classified!(
    libveritas::MessageError,
    libveritas::SignatureError,
    libveritas::AnchorError,
    libveritas::ConfigError,
    libveritas::DecodeError,
    libveritas::ZoneCompareError,
    libveritas::sname::Error,
);

/// Check once per process that the core speaks the contract this adapter expects.
pub fn check_api_version() -> Result<(), VeritasError> {
    static CHECKED: OnceLock<Result<(), VeritasError>> = OnceLock::new();
    CHECKED
        .get_or_init(|| {
            if libveritas::API_VERSION == EXPECTED_API_VERSION {
                return Ok(());
            }
            error!(
                core = libveritas::API_VERSION,
                expected = EXPECTED_API_VERSION,
                "libveritas API version mismatch"
            );
            Err(VeritasError::invalid(format!(
                "libveritas API version {} does not match expected {}",
                libveritas::API_VERSION,
                EXPECTED_API_VERSION
            )))
        })
        .clone()
}

fn parse_handle(handle: &str) -> Result<SName, VeritasError> {
    SName::from_str(handle)
        .map_err(|e| VeritasError::invalid(format!("invalid handle '{}': {}", handle, e)))
}

fn fixed<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N], VeritasError> {
    bytes.try_into().map_err(|_| {
        VeritasError::invalid(format!("{} must be {} bytes, got {}", what, N, bytes.len()))
    })
}

// -- Enums --

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VeritasDelegateState {
    Exists {
        script_pubkey: Vec<u8>,
        data: Option<Vec<u8>>,
        offchain_data: Option<VeritasOffchainData>,
    },
    Empty,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VeritasCommitmentState {
    Exists {
        state_root: Vec<u8>,
        prev_root: Option<Vec<u8>>,
        rolling_hash: Vec<u8>,
        block_height: u32,
        receipt_hash: Option<Vec<u8>>,
    },
    Empty,
    Unknown,
}

// -- Records --

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VeritasOffchainData {
    pub seq: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VeritasCertificate {
    pub subject: String,
    pub cert_type: String,
    pub bytes: Vec<u8>,
}

impl From<&Certificate> for VeritasCertificate {
    fn from(c: &Certificate) -> Self {
        VeritasCertificate {
            subject: c.subject.to_string(),
            cert_type: c.cert_type().to_string(),
            bytes: c.to_bytes(),
        }
    }
}

impl From<&libveritas::msg::OffchainData> for VeritasOffchainData {
    fn from(od: &libveritas::msg::OffchainData) -> Self {
        VeritasOffchainData {
            seq: od.seq,
            data: od.data.clone(),
        }
    }
}

// -- Objects --

#[derive(Debug, Clone)]
pub struct VeritasZone {
    inner: Zone,
}

impl VeritasZone {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VeritasError> {
        Ok(VeritasZone { inner: Zone::from_slice(bytes)? })
    }

    pub fn anchor(&self) -> u32 {
        self.inner.anchor
    }

    pub fn sovereignty(&self) -> String {
        self.inner.sovereignty.to_string()
    }

    pub fn handle(&self) -> String {
        self.inner.handle.to_string()
    }

    pub fn script_pubkey(&self) -> Vec<u8> {
        self.inner.script_pubkey.as_bytes().to_vec()
    }

    pub fn data(&self) -> Option<Vec<u8>> {
        self.inner.data.clone()
    }

    pub fn offchain_data(&self) -> Option<VeritasOffchainData> {
        self.inner.offchain_data.as_ref().map(Into::into)
    }

    pub fn delegate(&self) -> VeritasDelegateState {
        match &self.inner.delegate {
            ProvableOption::Exists { value } => VeritasDelegateState::Exists {
                script_pubkey: value.script_pubkey.as_bytes().to_vec(),
                data: value.data.clone(),
                offchain_data: value.offchain_data.as_ref().map(Into::into),
            },
            ProvableOption::Empty => VeritasDelegateState::Empty,
            ProvableOption::Unknown => VeritasDelegateState::Unknown,
        }
    }

    pub fn commitment(&self) -> VeritasCommitmentState {
        match &self.inner.commitment {
            ProvableOption::Exists { value } => VeritasCommitmentState::Exists {
                state_root: value.onchain.state_root.to_vec(),
                prev_root: value.onchain.prev_root.map(|r| r.to_vec()),
                rolling_hash: value.onchain.rolling_hash.to_vec(),
                block_height: value.onchain.block_height,
                receipt_hash: value.receipt_hash.map(|h| h.to_vec()),
            },
            ProvableOption::Empty => VeritasCommitmentState::Empty,
            ProvableOption::Unknown => VeritasCommitmentState::Unknown,
        }
    }

    pub fn is_better_than(&self, other: &VeritasZone) -> Result<bool, VeritasError> {
        Ok(self.inner.is_better_than(&other.inner)?)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.inner.to_bytes()
    }

    pub fn to_json(&self) -> Result<String, VeritasError> {
        self.inner
            .to_json()
            .map_err(|e| VeritasError::invalid(e.to_string()))
    }
}

/// Handles to verify and zones already trusted by the caller.
///
/// Single writer: fill it in, then pass it to [`Veritas::verify_message`].
#[derive(Debug, Clone, Default)]
pub struct VeritasQueryContext {
    inner: QueryContext,
}

impl VeritasQueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handle to verify (e.g. "alice@bitcoin").
    /// If no requests are added, all handles in the message are verified.
    pub fn add_request(&mut self, handle: &str) -> Result<(), VeritasError> {
        let sname = parse_handle(handle)?;
        self.inner.add_request(sname);
        Ok(())
    }

    /// Add a known zone from stored bytes (from a previous verification).
    pub fn add_zone(&mut self, zone_bytes: &[u8]) -> Result<(), VeritasError> {
        let zone = Zone::from_slice(zone_bytes)?;
        self.inner.add_zone(zone);
        Ok(())
    }
}

/// A parsed trust bundle. Cheap to clone; verifiers share it.
#[derive(Debug, Clone)]
pub struct VeritasAnchors {
    inner: Arc<AnchorSet>,
}

impl VeritasAnchors {
    pub fn from_json(json: &str) -> Result<Self, VeritasError> {
        let set = AnchorSet::from_json(json)?;
        Ok(VeritasAnchors { inner: Arc::new(set) })
    }

    pub fn oldest_anchor(&self) -> u32 {
        self.inner.oldest_anchor()
    }

    pub fn newest_anchor(&self) -> u32 {
        self.inner.newest_anchor()
    }
}

#[derive(Debug, Clone)]
pub struct Veritas {
    inner: libveritas::Veritas,
}

impl Veritas {
    /// Build a verifier. `dev_mode` disables finality checks and must stay
    /// off outside test and staging networks.
    pub fn new(anchors: &VeritasAnchors, dev_mode: bool) -> Result<Self, VeritasError> {
        check_api_version()?;
        Ok(Veritas {
            inner: libveritas::Veritas::new(anchors.inner.clone(), dev_mode),
        })
    }

    /// Build a verifier from a JSON [`VeritasConfig`].
    pub fn with_config(anchors: &VeritasAnchors, config_json: &str) -> Result<Self, VeritasError> {
        check_api_version()?;
        let config = VeritasConfig::from_json(config_json)?;
        Ok(Veritas {
            inner: libveritas::Veritas::with_config(anchors.inner.clone(), config)?,
        })
    }

    pub fn oldest_anchor(&self) -> u32 {
        self.inner.oldest_anchor()
    }

    pub fn newest_anchor(&self) -> u32 {
        self.inner.newest_anchor()
    }

    pub fn is_finalized(&self, height: u32) -> bool {
        self.inner.is_finalized(height)
    }

    pub fn sovereignty_for(&self, commitment_height: u32) -> String {
        self.inner.sovereignty_for(commitment_height).to_string()
    }

    /// Verify an encoded message against a query context.
    pub fn verify_message(
        &self,
        ctx: &VeritasQueryContext,
        msg: &[u8],
    ) -> Result<VerifiedMessage, VeritasError> {
        let inner = self
            .inner
            .verify_message_bytes(&ctx.inner, msg)
            .inspect_err(|e| debug!(error = %e, "message rejected"))?;
        Ok(VerifiedMessage { inner })
    }
}

#[derive(Debug, Clone)]
pub struct VerifiedMessage {
    inner: libveritas::VerifiedMessage,
}

impl VerifiedMessage {
    pub fn zones(&self) -> Vec<VeritasZone> {
        self.inner
            .zones()
            .iter()
            .map(|z| VeritasZone { inner: z.clone() })
            .collect()
    }

    pub fn certificate(&self, handle: &str) -> Result<Option<VeritasCertificate>, VeritasError> {
        let sname = parse_handle(handle)?;
        Ok(self.inner.certificate(&sname).as_ref().map(Into::into))
    }

    pub fn certificates(&self) -> Vec<VeritasCertificate> {
        self.inner.certificates().map(|c| (&c).into()).collect()
    }

    /// The verified subset of the message, re-encoded.
    pub fn message_bytes(&self) -> Vec<u8> {
        self.inner.message.to_bytes()
    }
}

// -- Free functions --

/// Hash a message with the Spaces signed-message prefix (SHA256).
/// Returns the 32-byte digest suitable for Schnorr signing/verification.
pub fn hash_signable_message(msg: &[u8]) -> [u8; 32] {
    libveritas::signable_digest(msg)
}

/// Verify a Schnorr signature over a message using the Spaces signed-message prefix.
///
/// - `msg`: raw message bytes (prefixed and hashed internally)
/// - `signature`: 64-byte Schnorr signature
/// - `pubkey`: 32-byte x-only public key
pub fn verify_spaces_message(msg: &[u8], signature: &[u8], pubkey: &[u8]) -> Result<(), VeritasError> {
    let sig: [u8; 64] = fixed(signature, "signature")?;
    let pk: [u8; 32] = fixed(pubkey, "pubkey")?;
    Ok(libveritas::verify_spaces_message(msg, &sig, &pk)?)
}

/// Verify a raw Schnorr signature (no prefix, caller provides the 32-byte message hash).
pub fn verify_schnorr(msg_hash: &[u8], signature: &[u8], pubkey: &[u8]) -> Result<(), VeritasError> {
    let hash: [u8; 32] = fixed(msg_hash, "msg_hash")?;
    let sig: [u8; 64] = fixed(signature, "signature")?;
    let pk: [u8; 32] = fixed(pubkey, "pubkey")?;
    Ok(libveritas::verify_schnorr(&hash, &sig, &pk)?)
}

/// Decode stored zone bytes to JSON.
pub fn decode_zone(bytes: &[u8]) -> Result<String, VeritasError> {
    VeritasZone::from_bytes(bytes)?.to_json()
}

/// Decode stored certificate bytes to JSON.
pub fn decode_certificate(bytes: &[u8]) -> Result<String, VeritasError> {
    let cert = Certificate::from_slice(bytes)?;
    cert.to_json().map_err(|e| VeritasError::invalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use libveritas_testutil::{p2tr_spk, sign_message, TestChain, TestHandleTree};

    struct Setup {
        anchors: VeritasAnchors,
        message: Vec<u8>,
        temporary: Vec<u8>,
    }

    fn setup() -> Setup {
        let mut chain = TestChain::new();
        chain.increase_time(100);
        let space = chain.add_space_with_delegation("@bitcoin");
        let mut tree = TestHandleTree::new(&space);
        tree.add_handle("alice");
        tree.commit(&mut chain);
        chain.snapshot();
        tree.add_handle("bob");
        chain.increase_time(200);
        chain.snapshot();

        let json = serde_json::to_string(&chain.root_anchors()).unwrap();
        Setup {
            anchors: VeritasAnchors::from_json(&json).unwrap(),
            message: tree.build_message(&chain, 100, &["alice"]).to_bytes(),
            temporary: tree.build_temporary_message(&chain, 300, "bob").to_bytes(),
        }
    }

    #[test]
    fn version_check_passes() {
        assert_eq!(check_api_version(), Ok(()));
        assert_eq!(check_api_version(), Ok(()));
    }

    #[test]
    fn verify_requested_handle() {
        let s = setup();
        assert_eq!(s.anchors.oldest_anchor(), 100);
        assert_eq!(s.anchors.newest_anchor(), 300);
        let veritas = Veritas::new(&s.anchors, false).unwrap();

        let mut ctx = VeritasQueryContext::new();
        ctx.add_request("alice@bitcoin").unwrap();
        let verified = veritas.verify_message(&ctx, &s.message).unwrap();

        let zones = verified.zones();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].handle(), "alice@bitcoin");
        assert_eq!(zones[0].sovereignty(), "sovereign");
        assert_eq!(zones[0].delegate(), VeritasDelegateState::Unknown);

        let cert = verified.certificate("alice@bitcoin").unwrap().expect("cert");
        assert_eq!(cert.cert_type, "final");
        assert!(decode_certificate(&cert.bytes).unwrap().contains("alice@bitcoin"));
        assert!(verified.certificate("@bitcoin").unwrap().is_none());

        // Stored zones feed back into a context
        let mut ctx = VeritasQueryContext::new();
        ctx.add_zone(&zones[0].to_bytes()).unwrap();
        assert!(decode_zone(&zones[0].to_bytes()).unwrap().contains("\"anchor\":100"));
    }

    #[test]
    fn not_final_is_verification_failed() {
        let s = setup();
        let veritas = Veritas::new(&s.anchors, false).unwrap();
        let mut ctx = VeritasQueryContext::new();
        ctx.add_request("bob@bitcoin").unwrap();

        let err = veritas.verify_message(&ctx, &s.temporary).unwrap_err();
        assert!(matches!(err, VeritasError::VerificationFailed { .. }), "{}", err);

        let dev = Veritas::new(&s.anchors, true).unwrap();
        let verified = dev.verify_message(&ctx, &s.temporary).unwrap();
        assert_eq!(verified.certificates()[0].cert_type, "temporary");
    }

    #[test]
    fn wildcard_root_zone_states() {
        let s = setup();
        let veritas = Veritas::with_config(&s.anchors, r#"{"finality_depth": 6}"#).unwrap();
        let verified = veritas
            .verify_message(&VeritasQueryContext::new(), &s.message)
            .unwrap();

        let root = verified.zones().into_iter().find(|z| z.handle() == "@bitcoin").unwrap();
        assert!(matches!(root.delegate(), VeritasDelegateState::Exists { .. }));
        let VeritasCommitmentState::Exists { block_height, receipt_hash, .. } = root.commitment() else {
            panic!("expected commitment");
        };
        assert_eq!(block_height, 100);
        assert!(receipt_hash.is_some());
        assert_eq!(verified.certificates().len(), 2);
        assert_eq!(root.is_better_than(&root), Ok(false));
    }

    #[test]
    fn malformed_inputs_are_invalid_input() {
        let s = setup();
        let veritas = Veritas::new(&s.anchors, false).unwrap();

        let err = veritas
            .verify_message(&VeritasQueryContext::new(), &s.message[..10])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let mut ctx = VeritasQueryContext::new();
        assert!(matches!(ctx.add_request("Alice@bitcoin"), Err(VeritasError::InvalidInput { .. })));
        assert!(matches!(ctx.add_zone(&[1, 2, 3]), Err(VeritasError::InvalidInput { .. })));
        assert!(matches!(decode_zone(&[]), Err(VeritasError::InvalidInput { .. })));
        assert!(matches!(decode_certificate(&[9]), Err(VeritasError::InvalidInput { .. })));
        assert!(matches!(VeritasAnchors::from_json("[]"), Err(VeritasError::InvalidInput { .. })));
        assert!(matches!(VeritasAnchors::from_json("{"), Err(VeritasError::InvalidInput { .. })));
        assert!(matches!(
            Veritas::with_config(&s.anchors, r#"{"finality_depth": 0}"#),
            Err(VeritasError::InvalidInput { .. })
        ));
    }

    #[test]
    fn signature_functions() {
        let (spk, keypair) = p2tr_spk("signer");
        let pubkey = &spk.as_bytes()[2..];
        let msg = b"hello";
        let sig = sign_message(msg, &keypair);

        assert_eq!(verify_spaces_message(msg, &sig.0, pubkey), Ok(()));
        let digest = hash_signable_message(msg);
        assert_eq!(verify_schnorr(&digest, &sig.0, pubkey), Ok(()));

        let err = verify_spaces_message(b"hellp", &sig.0, pubkey).unwrap_err();
        assert!(matches!(err, VeritasError::VerificationFailed { .. }));

        let err = verify_schnorr(&digest, &sig.0[..63], pubkey).unwrap_err();
        assert_eq!(err, VeritasError::InvalidInput {
            message: "signature must be 64 bytes, got 63".to_string(),
        });
        assert!(matches!(verify_schnorr(&digest[..31], &sig.0, pubkey), Err(VeritasError::InvalidInput { .. })));
        assert!(matches!(verify_spaces_message(msg, &sig.0, &[0xff; 32]), Err(VeritasError::InvalidInput { .. })));
    }

    #[test]
    fn verifier_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Veritas>();
        assert_send_sync::<VeritasAnchors>();
    }
}
