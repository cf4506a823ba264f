use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use bitcoin::hashes::{sha256, Hash as _, HashEngine};
use bitcoin::secp256k1::{self, XOnlyPublicKey};
use bitcoin::ScriptBuf;
use tracing::{debug, info, warn};

use crate::cert::{Certificate, Signature, Witness};
use crate::msg::{Bundle, Handle, Message, QueryContext};
use crate::proof::{MerkleProof, ProofError};
use crate::sname::{NameLike, SName};

pub mod anchor;
pub mod cert;
pub mod codec;
pub mod config;
pub mod constants;
pub mod msg;
pub mod proof;
pub mod sname;
mod zone;

pub use anchor::{AnchorError, AnchorSet, ChainAnchor, RootAnchor};
pub use codec::{DecodeError, ErrorKind, Hash};
pub use config::{ConfigError, VeritasConfig};
pub use constants::{API_VERSION, COMMITMENT_FINALITY_INTERVAL, SPACES_SIGNED_MSG_PREFIX};
pub use zone::{
    rolling_hash, Commitment, CommitmentInfo, Delegate, ProvableOption, SovereigntyState, Zone,
    ZoneCompareError,
};

/// Result of verifying a message.
///
/// Contains the verified zones and the sanitized message data.
/// The message can be used to construct certificates for storage.
#[derive(Clone, Debug)]
pub struct VerifiedMessage {
    pub zones: Vec<Zone>,
    pub message: Message,
}

impl VerifiedMessage {
    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    /// Create a certificate for a verified handle.
    ///
    /// Returns `None` if the handle was not verified in this message.
    pub fn certificate(&self, handle: &SName) -> Option<Certificate> {
        if !self.zones.iter().any(|z| &z.handle == handle) {
            return None;
        }

        let space = handle.space()?;
        let bundle = self.message.bundle(&space)?;

        if handle.is_single_label() {
            return Some(root_certificate(handle.clone(), bundle));
        }

        let label = handle.subspace()?;
        let h = bundle.handle(&label)?;
        Some(leaf_certificate(handle.clone(), h))
    }

    /// Iterate over all certificates from this verified message.
    pub fn certificates(&self) -> CertificateIter<'_> {
        CertificateIter {
            zones: &self.zones,
            bundles: self.message.spaces.iter(),
            current: None,
        }
    }
}

fn root_certificate(subject: SName, bundle: &Bundle) -> Certificate {
    Certificate::new(
        subject,
        Witness::Root {
            offchain_data: bundle.offchain_data.clone(),
        },
    )
}

fn leaf_certificate(subject: SName, handle: &Handle) -> Certificate {
    Certificate::new(
        subject,
        Witness::Leaf {
            genesis_spk: handle.genesis_spk.clone(),
            inclusion: handle.inclusion.clone(),
            signature: handle.signature,
            exclusion: handle.exclusion.clone(),
        },
    )
}

/// Iterator over certificates from a verified message.
pub struct CertificateIter<'a> {
    zones: &'a [Zone],
    bundles: std::slice::Iter<'a, Bundle>,
    current: Option<(&'a Bundle, std::slice::Iter<'a, Handle>)>,
}

impl Iterator for CertificateIter<'_> {
    type Item = Certificate;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            // Emit the remaining handles of the current bundle
            if let Some((bundle, handles)) = &mut self.current {
                if let Some(h) = handles.next() {
                    let Ok(subject) = SName::join(&h.name, &bundle.space) else {
                        continue;
                    };
                    return Some(leaf_certificate(subject, h));
                }
            }

            let bundle = self.bundles.next()?;
            self.current = Some((bundle, bundle.handles.iter()));

            // Emit root cert if zone exists
            let Ok(root_handle) = SName::from_space(&bundle.space) else {
                continue;
            };
            if self.zones.iter().any(|z| z.handle == root_handle) {
                return Some(root_certificate(root_handle, bundle));
            }
        }
    }
}

/// Verifies messages against a trusted anchor window.
///
/// A verifier is immutable during verification and can be shared across
/// threads; the anchor set is held behind an `Arc` and never copied.
#[derive(Clone, Debug)]
pub struct Veritas {
    anchors: Arc<AnchorSet>,
    config: VeritasConfig,
}

impl Veritas {
    /// Build a verifier with the default finality depth.
    ///
    /// `dev_mode` disables finality checks and must stay off in production.
    pub fn new(anchors: impl Into<Arc<AnchorSet>>, dev_mode: bool) -> Self {
        let config = VeritasConfig {
            dev_mode,
            ..VeritasConfig::default()
        };
        Self::build(anchors.into(), config)
    }

    pub fn with_config(anchors: impl Into<Arc<AnchorSet>>, config: VeritasConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(anchors.into(), config))
    }

    pub fn from_anchors(anchors: Vec<RootAnchor>) -> Result<Self, AnchorError> {
        Ok(Self::new(AnchorSet::new(anchors)?, false))
    }

    fn build(anchors: Arc<AnchorSet>, config: VeritasConfig) -> Self {
        info!(
            oldest = anchors.oldest_anchor(),
            newest = anchors.newest_anchor(),
            finality_depth = config.finality_depth,
            "veritas verifier ready"
        );
        if config.dev_mode {
            warn!("veritas dev mode enabled: finality checks are disabled");
        }
        Self { anchors, config }
    }

    pub fn anchors(&self) -> &AnchorSet {
        &self.anchors
    }

    pub fn config(&self) -> &VeritasConfig {
        &self.config
    }

    pub fn oldest_anchor(&self) -> u32 {
        self.anchors.oldest_anchor()
    }

    pub fn newest_anchor(&self) -> u32 {
        self.anchors.newest_anchor()
    }

    /// Replace the anchor window, e.g. after fetching a newer trust bundle.
    pub fn update(&mut self, anchors: Vec<RootAnchor>) -> Result<(), AnchorError> {
        self.anchors = Arc::new(AnchorSet::new(anchors)?);
        info!(
            oldest = self.anchors.oldest_anchor(),
            newest = self.anchors.newest_anchor(),
            "veritas anchors updated"
        );
        Ok(())
    }

    pub fn set_dev_mode(&mut self, enabled: bool) {
        if enabled && !self.config.dev_mode {
            warn!("veritas dev mode enabled: finality checks are disabled");
        }
        self.config.dev_mode = enabled;
    }

    pub fn is_dev_mode(&self) -> bool {
        self.config.dev_mode
    }

    /// Check if an anchor height is finalized within the trusted window.
    ///
    /// Heights beyond the newest anchor or below the oldest are not final.
    pub fn is_finalized(&self, height: u32) -> bool {
        self.anchors.is_finalized(height, self.config.finality_depth)
    }

    /// Get sovereignty state for a commitment at the given block height.
    ///
    /// A commitment is sovereign once it trails the newest anchor by the
    /// finality depth, even if it predates the window.
    pub fn sovereignty_for(&self, commitment_height: u32) -> SovereigntyState {
        let newest = self.anchors.newest_anchor();
        if commitment_height <= newest && newest - commitment_height >= self.config.finality_depth {
            SovereigntyState::Sovereign
        } else {
            SovereigntyState::Pending
        }
    }

    /// Decode and verify a message.
    pub fn verify_message_bytes(&self, ctx: &QueryContext, bytes: &[u8]) -> Result<VerifiedMessage, MessageError> {
        let msg = Message::from_slice(bytes).map_err(MessageError::Decode)?;
        self.verify_message(ctx, msg)
    }

    /// Verify a message and return verified zones along with sanitized message data.
    ///
    /// Uses `ctx.zones` for parent lookups and `is_better_than` comparison.
    /// If `ctx.requests` is empty, verifies all handles in the message and
    /// drops the ones that fail. Otherwise, only verifies requested handles
    /// and any failure among them fails the whole call.
    ///
    /// Returns `VerifiedMessage` containing the best zone for each handle
    /// and sanitized message data (only verified bundles and handles).
    pub fn verify_message(&self, ctx: &QueryContext, msg: Message) -> Result<VerifiedMessage, MessageError> {
        let anchor = self.check_msg_anchor(&msg)?.clone();
        self.check_msg_duplicates(&msg)?;
        self.check_msg_requests(ctx, &msg)?;

        let mut zones = Vec::new();
        let mut verified_bundles = Vec::new();

        for bundle in msg.spaces {
            let (bundle_zones, verified_bundle) =
                self.verify_bundle(ctx, &msg.anchor, &anchor, bundle)?;
            zones.extend(bundle_zones);
            verified_bundles.extend(verified_bundle);
        }

        Ok(VerifiedMessage {
            zones,
            message: Message {
                anchor: msg.anchor,
                spaces: verified_bundles,
            },
        })
    }

    fn verify_bundle(
        &self,
        ctx: &QueryContext,
        anchor: &ChainAnchor,
        root_anchor: &RootAnchor,
        bundle: Bundle,
    ) -> Result<(Vec<Zone>, Option<Bundle>), MessageError> {
        let space = bundle.space.clone();
        let root_handle = SName::from_space(&space)
            .map_err(|_| MessageError::InvalidSubject { subject: space.to_string() })?;
        let subjects = bundle
            .handles
            .iter()
            .map(|h| {
                SName::join(&h.name, &space).map_err(|_| MessageError::InvalidSubject {
                    subject: format!("{}{}", h.name, space),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let wants_root = ctx.wants(&root_handle);
        if !wants_root && !subjects.iter().any(|s| ctx.wants(s)) {
            return Ok((vec![], None));
        }

        let parent = match self.resolve_parent_zone(ctx, anchor, root_anchor, &bundle) {
            Ok(zone) => zone,
            Err(e) if ctx.is_wildcard() => {
                debug!(space = %space, error = %e, "excluding space from wildcard result");
                return Ok((vec![], None));
            }
            Err(e) => return Err(e),
        };

        let mut zones: Vec<Zone> = Vec::new();
        let mut root_verified = false;
        if wants_root {
            match self.check_finality(&parent) {
                Ok(()) => {
                    zones.push(parent.clone());
                    root_verified = true;
                }
                Err(e) if ctx.is_wildcard() => {
                    debug!(handle = %root_handle, error = %e, "excluding handle from wildcard result");
                }
                Err(e) => return Err(e),
            }
        }

        let mut verified_handles: Vec<Handle> = Vec::new();
        for (handle, subject) in bundle.handles.into_iter().zip(subjects) {
            if !ctx.wants(&subject) {
                continue;
            }

            let result = self
                .verify_handle(anchor.height, &handle, &subject, &parent)
                .and_then(|zone| self.best_zone(ctx, zone))
                .and_then(|zone| self.check_finality(&zone).map(|_| zone));

            match result {
                Ok(zone) => {
                    zones.push(zone);
                    verified_handles.push(handle);
                }
                Err(e) if ctx.is_wildcard() => {
                    debug!(handle = %subject, error = %e, "excluding handle from wildcard result");
                }
                Err(e) => return Err(e),
            }
        }

        // Build verified bundle if anything was verified
        let verified_bundle = if root_verified || !verified_handles.is_empty() {
            Some(Bundle {
                space,
                owner: bundle.owner,
                owner_proof: bundle.owner_proof,
                ptrs: bundle.ptrs,
                offchain_data: bundle.offchain_data,
                delegate_offchain_data: bundle.delegate_offchain_data,
                handles: verified_handles,
            })
        } else {
            None
        };

        Ok((zones, verified_bundle))
    }

    fn check_msg_anchor(&self, msg: &Message) -> Result<&RootAnchor, MessageError> {
        let height = msg.anchor.height;

        if height < self.anchors.oldest_anchor() {
            return Err(MessageError::AnchorStale {
                anchor: height,
                oldest: self.anchors.oldest_anchor(),
            });
        }
        if height > self.anchors.newest_anchor() {
            return Err(MessageError::AnchorAhead {
                anchor: height,
                tip: self.anchors.newest_anchor(),
            });
        }

        let anchor = self.anchors.get(height)
            .ok_or(MessageError::NoAnchorAtHeight { anchor: height })?;

        if msg.anchor.hash != anchor.block.hash {
            return Err(MessageError::AnchorHashMismatch {
                height,
                expected: anchor.block.hash,
                got: msg.anchor.hash,
            });
        }

        Ok(anchor)
    }

    fn check_msg_duplicates(&self, msg: &Message) -> Result<(), MessageError> {
        let mut seen: HashSet<&[u8]> = HashSet::new();
        for bundle in &msg.spaces {
            if !seen.insert(bundle.space.as_ref()) {
                return Err(MessageError::DuplicateSpace {
                    space: bundle.space.to_string(),
                });
            }
            let mut names: HashSet<&[u8]> = HashSet::new();
            for handle in &bundle.handles {
                if !names.insert(handle.tree_key()) {
                    return Err(MessageError::DuplicateHandle {
                        handle: format!("{}{}", handle.name, bundle.space),
                    });
                }
            }
        }
        Ok(())
    }

    /// Every explicitly requested handle must be present in the message.
    fn check_msg_requests(&self, ctx: &QueryContext, msg: &Message) -> Result<(), MessageError> {
        for request in &ctx.requests {
            if !msg.references(request) {
                return Err(MessageError::RequestNotInMessage {
                    handle: request.to_string(),
                });
            }
        }
        Ok(())
    }

    fn check_finality(&self, zone: &Zone) -> Result<(), MessageError> {
        if self.config.dev_mode || self.is_finalized(zone.anchor) {
            return Ok(());
        }
        Err(MessageError::ZoneNotFinal {
            handle: zone.handle.to_string(),
            anchor: zone.anchor,
            newest: self.anchors.newest_anchor(),
            depth: self.config.finality_depth,
        })
    }

    /// Pick between the zone proven by the message and a cached zone.
    fn resolve_parent_zone(
        &self,
        ctx: &QueryContext,
        anchor: &ChainAnchor,
        root_anchor: &RootAnchor,
        bundle: &Bundle,
    ) -> Result<Zone, MessageError> {
        let mut extracted = self.extract_parent_zone(anchor, root_anchor, bundle)?;

        // Cached zones outside the trusted window cannot be vouched for
        let cached = ctx
            .get_parent_zone(&bundle.space)
            .filter(|z| self.anchors.contains_height(z.anchor));
        let Some(cached) = cached else {
            return Ok(extracted);
        };

        extracted.update_receipt_cache(cached);
        let better = extracted.is_better_than(cached).map_err(|error| MessageError::ForkChoice {
            handle: extracted.handle.to_string(),
            error,
        })?;
        if better {
            return Ok(extracted);
        }
        debug!(handle = %cached.handle, anchor = cached.anchor, "using cached parent zone");
        Ok(cached.clone())
    }

    /// Extract parent zone from the bundle's proofs and set sovereignty based on commitment finality.
    fn extract_parent_zone(
        &self,
        anchor: &ChainAnchor,
        root_anchor: &RootAnchor,
        bundle: &Bundle,
    ) -> Result<Zone, MessageError> {
        let space = &bundle.space;
        let handle = SName::from_space(space)
            .map_err(|_| MessageError::InvalidSubject { subject: space.to_string() })?;

        bundle
            .owner_proof
            .verify(space.as_ref(), &bundle.owner.to_bytes(), &root_anchor.spaces_root)
            .map_err(|error| MessageError::SpaceProofInvalid {
                space: space.to_string(),
                error,
            })?;

        let mut z = Zone {
            anchor: anchor.height,
            sovereignty: SovereigntyState::Sovereign,
            handle,
            script_pubkey: bundle.owner.script_pubkey.clone(),
            data: bundle.owner.data.clone(),
            offchain_data: None,
            delegate: ProvableOption::Unknown,
            commitment: ProvableOption::Unknown,
        };

        match (&bundle.ptrs, root_anchor.ptrs_root) {
            (Some(ptrs), Some(ptrs_root)) => {
                ptrs.proof
                    .verify(space.as_ref(), &ptrs.record.to_bytes(), &ptrs_root)
                    .map_err(|error| MessageError::PtrsProofInvalid {
                        space: space.to_string(),
                        error,
                    })?;

                z.delegate = match &ptrs.record.delegate {
                    None => ProvableOption::Empty,
                    Some(delegate) => ProvableOption::Exists {
                        value: Delegate {
                            script_pubkey: delegate.script_pubkey.clone(),
                            data: delegate.data.clone(),
                            offchain_data: None,
                        },
                    },
                };

                z.commitment = match &ptrs.record.commitment {
                    None => ProvableOption::Empty,
                    Some(commitment) => {
                        if !commitment.is_well_formed() {
                            return Err(MessageError::CommitmentMalformed {
                                space: space.to_string(),
                            });
                        }
                        z.sovereignty = self.sovereignty_for(commitment.block_height);
                        ProvableOption::Exists {
                            value: CommitmentInfo {
                                onchain: commitment.clone(),
                                receipt_hash: Some(ptrs.proof.hash()),
                            },
                        }
                    }
                };
            }
            (Some(_), None) => {
                debug!(space = %space, "anchor has no ptrs root, ptrs record left unknown");
            }
            (None, _) => {}
        }

        if let Some(offchain) = &bundle.offchain_data {
            offchain.verify(&z.script_pubkey).map_err(|e| MessageError::OffchainDataInvalid {
                handle: z.handle.to_string(),
                reason: e.to_string(),
            })?;
            z.offchain_data = Some(offchain.clone());
        }

        if let Some(offchain) = &bundle.delegate_offchain_data {
            let ProvableOption::Exists { value: delegate } = &mut z.delegate else {
                return Err(MessageError::OffchainDataInvalid {
                    handle: z.handle.to_string(),
                    reason: "delegate data without a proven delegate".to_string(),
                });
            };
            offchain.verify(&delegate.script_pubkey).map_err(|e| MessageError::OffchainDataInvalid {
                handle: z.handle.to_string(),
                reason: e.to_string(),
            })?;
            delegate.offchain_data = Some(offchain.clone());
        }

        Ok(z)
    }

    fn verify_handle(
        &self,
        anchor_height: u32,
        handle: &Handle,
        subject: &SName,
        parent_zone: &Zone,
    ) -> Result<Zone, MessageError> {
        match (&handle.inclusion, &handle.signature) {
            (Some(_), None) if handle.exclusion.is_some() => Err(MessageError::AmbiguousHandleProof {
                handle: subject.to_string(),
            }),
            (Some(inclusion), None) => {
                self.verify_final_handle(anchor_height, handle, inclusion, subject, parent_zone)
            }
            (None, Some(signature)) => {
                verify_temporary_handle(anchor_height, handle, signature, subject, parent_zone)
            }
            (Some(_), Some(_)) => Err(MessageError::AmbiguousHandleProof {
                handle: subject.to_string(),
            }),
            (None, None) => Err(MessageError::MissingHandleProof {
                handle: subject.to_string(),
            }),
        }
    }

    /// Verify a final handle certificate (inclusion in the committed handle tree).
    fn verify_final_handle(
        &self,
        anchor_height: u32,
        handle: &Handle,
        inclusion: &MerkleProof,
        subject: &SName,
        parent_zone: &Zone,
    ) -> Result<Zone, MessageError> {
        let ProvableOption::Exists { value: commitment } = &parent_zone.commitment else {
            return Err(MessageError::FinalCertRequiresCommitment {
                handle: subject.to_string(),
            });
        };

        inclusion
            .verify(
                handle.tree_key(),
                handle.genesis_spk.as_bytes(),
                &commitment.onchain.state_root,
            )
            .map_err(|error| MessageError::HandleProofInvalid {
                handle: subject.to_string(),
                error,
            })?;

        let zone = Zone {
            anchor: anchor_height,
            sovereignty: self.sovereignty_for(commitment.onchain.block_height),
            handle: subject.clone(),
            script_pubkey: handle.genesis_spk.clone(),
            data: None,
            offchain_data: handle.data.clone(),
            delegate: ProvableOption::Unknown,
            commitment: ProvableOption::Unknown,
        };

        verify_handle_offchain_data(&zone)?;
        Ok(zone)
    }

    /// Return the better of the new zone and a cached zone for the same handle.
    ///
    /// Cached zones outside the trusted window are ignored.
    fn best_zone(&self, ctx: &QueryContext, zone: Zone) -> Result<Zone, MessageError> {
        let cached = ctx
            .get_zone(&zone.handle)
            .filter(|z| self.anchors.contains_height(z.anchor));
        let Some(cached) = cached else {
            return Ok(zone);
        };
        let better = zone.is_better_than(cached).map_err(|error| MessageError::ForkChoice {
            handle: zone.handle.to_string(),
            error,
        })?;
        if better {
            return Ok(zone);
        }
        debug!(handle = %cached.handle, anchor = cached.anchor, "using cached zone");
        Ok(cached.clone())
    }
}

/// Verify a temporary handle certificate (exclusion proof + signature).
///
/// Once the parent has a commitment, the handle must be proven absent from
/// the committed tree; a committed handle is only ever served as final.
fn verify_temporary_handle(
    anchor_height: u32,
    handle: &Handle,
    signature: &Signature,
    subject: &SName,
    parent_zone: &Zone,
) -> Result<Zone, MessageError> {
    let signer = match &parent_zone.delegate {
        ProvableOption::Exists { value: delegate } => &delegate.script_pubkey,
        ProvableOption::Empty => &parent_zone.script_pubkey,
        ProvableOption::Unknown => {
            return Err(MessageError::ParentDelegateUnknown { handle: subject.to_string() });
        }
    };

    match &parent_zone.commitment {
        ProvableOption::Exists { value: commitment } => {
            let exclusion = handle.exclusion.as_ref().ok_or_else(|| {
                MessageError::MissingExclusionProof { handle: subject.to_string() }
            })?;
            exclusion
                .verify(handle.tree_key(), &commitment.onchain.state_root)
                .map_err(|error| match error {
                    ProofError::KeyPresent => MessageError::HandleAlreadyExists {
                        handle: subject.to_string(),
                    },
                    error => MessageError::HandleProofInvalid {
                        handle: subject.to_string(),
                        error,
                    },
                })?;
        }
        ProvableOption::Empty => {}
        ProvableOption::Unknown => {
            return Err(MessageError::ParentCommitmentUnknown { handle: subject.to_string() });
        }
    }

    let zone = Zone {
        anchor: anchor_height,
        sovereignty: SovereigntyState::Dependent,
        handle: subject.clone(),
        script_pubkey: handle.genesis_spk.clone(),
        data: None,
        offchain_data: handle.data.clone(),
        delegate: ProvableOption::Unknown,
        commitment: ProvableOption::Unknown,
    };

    zone.verify_signature(signature, signer)
        .map_err(|e| MessageError::SignatureInvalid {
            handle: zone.handle.to_string(),
            reason: e.to_string(),
        })?;

    verify_handle_offchain_data(&zone)?;
    Ok(zone)
}

fn verify_handle_offchain_data(zone: &Zone) -> Result<(), MessageError> {
    if zone.offchain_data.is_none() {
        return Ok(());
    }
    zone.verify_offchain_data().map_err(|e| MessageError::OffchainDataInvalid {
        handle: zone.handle.to_string(),
        reason: e.to_string(),
    })
}

/// SHA-256 over the Spaces signed-message prefix and `msg`.
pub fn signable_digest(msg: &[u8]) -> [u8; 32] {
    let mut engine = sha256::Hash::engine();
    engine.input(SPACES_SIGNED_MSG_PREFIX);
    engine.input(msg);
    sha256::Hash::from_engine(engine).to_byte_array()
}

/// [`signable_digest`] as a secp256k1 message, ready for signing or verification.
pub fn hash_signable_message(msg: &[u8]) -> secp256k1::Message {
    secp256k1::Message::from_digest(signable_digest(msg))
}

/// Verify a Schnorr signature over a message using the Spaces signed-message prefix.
///
/// - `msg`: the raw message bytes (will be prefixed and hashed internally)
/// - `signature`: 64-byte Schnorr signature
/// - `pubkey`: 32-byte x-only public key
pub fn verify_spaces_message(msg: &[u8], signature: &[u8; 64], pubkey: &[u8; 32]) -> Result<(), SignatureError> {
    verify_digest(&hash_signable_message(msg), signature, pubkey)
}

/// Verify a raw Schnorr signature (no prefix, caller provides the 32-byte message hash).
///
/// - `msg_hash`: 32-byte SHA256 hash of the message
/// - `signature`: 64-byte Schnorr signature
/// - `pubkey`: 32-byte x-only public key
pub fn verify_schnorr(msg_hash: &[u8; 32], signature: &[u8; 64], pubkey: &[u8; 32]) -> Result<(), SignatureError> {
    verify_digest(&secp256k1::Message::from_digest(*msg_hash), signature, pubkey)
}

fn verify_digest(msg: &secp256k1::Message, signature: &[u8; 64], pubkey: &[u8; 32]) -> Result<(), SignatureError> {
    let xonly = XOnlyPublicKey::from_slice(pubkey)
        .map_err(|_| SignatureError::InvalidPublicKey)?;
    let sig = secp256k1::schnorr::Signature::from_slice(signature)
        .map_err(|_| SignatureError::InvalidSignature)?;
    secp256k1::Secp256k1::verification_only()
        .verify_schnorr(&sig, msg, &xonly)
        .map_err(|_| SignatureError::VerificationFailed)
}

/// Verify a signature over `signable` by the key of a taproot script
/// (`OP_1 <32-byte x-only key>`).
pub fn verify_with_script_pubkey(
    signable: &[u8],
    signature: &Signature,
    script_pubkey: &ScriptBuf,
) -> Result<(), SignatureError> {
    if !script_pubkey.is_p2tr() {
        return Err(SignatureError::InvalidPublicKey);
    }
    let pubkey: &[u8; 32] = script_pubkey.as_bytes()[2..]
        .try_into()
        .map_err(|_| SignatureError::InvalidPublicKey)?;
    verify_spaces_message(signable, &signature.0, pubkey)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// Script pubkey is not a valid schnorr public key
    InvalidPublicKey,
    /// Signature bytes are malformed
    InvalidSignature,
    /// Signature verification failed
    VerificationFailed,
}

impl SignatureError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidPublicKey | Self::InvalidSignature => ErrorKind::InvalidInput,
            Self::VerificationFailed => ErrorKind::VerificationFailed,
        }
    }
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPublicKey => write!(f, "invalid schnorr public key"),
            Self::InvalidSignature => write!(f, "invalid signature format"),
            Self::VerificationFailed => write!(f, "signature verification failed"),
        }
    }
}

impl std::error::Error for SignatureError {}

/// Error during message verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// Message bytes could not be decoded
    Decode(DecodeError),
    /// Message anchor is too old
    AnchorStale { anchor: u32, oldest: u32 },
    /// Message anchor is newer than our tip
    AnchorAhead { anchor: u32, tip: u32 },
    /// No anchor exists at this height
    NoAnchorAtHeight { anchor: u32 },
    /// Anchor hash doesn't match our known anchor at this height
    AnchorHashMismatch { height: u32, expected: Hash, got: Hash },
    /// Duplicate space in message bundles
    DuplicateSpace { space: String },
    /// Duplicate handle within a space bundle
    DuplicateHandle { handle: String },
    /// Subject name is invalid
    InvalidSubject { subject: String },
    /// An explicitly requested handle has no proof in the message
    RequestNotInMessage { handle: String },
    /// Space record is not proven by the anchor's spaces root
    SpaceProofInvalid { space: String, error: ProofError },
    /// Ptrs record is not proven by the anchor's ptrs root
    PtrsProofInvalid { space: String, error: ProofError },
    /// Commitment rolling hash is inconsistent
    CommitmentMalformed { space: String },
    /// Zone anchor has not reached finality depth
    ZoneNotFinal { handle: String, anchor: u32, newest: u32, depth: u32 },
    /// Candidate zones contradict each other
    ForkChoice { handle: String, error: ZoneCompareError },
    /// Handle carries neither an inclusion proof nor a signature
    MissingHandleProof { handle: String },
    /// Handle carries both an inclusion proof and a signature
    AmbiguousHandleProof { handle: String },
    /// Final certificate requires a known commitment
    FinalCertRequiresCommitment { handle: String },
    /// Handle inclusion proof does not match the committed state root
    HandleProofInvalid { handle: String, error: ProofError },
    /// Parent delegate is unknown, cannot verify signature
    ParentDelegateUnknown { handle: String },
    /// Parent commitment is unknown, cannot check the handle is uncommitted
    ParentCommitmentUnknown { handle: String },
    /// Temporary certificate lacks proof of absence from the committed tree
    MissingExclusionProof { handle: String },
    /// Temporary certificate for a handle that is already committed
    HandleAlreadyExists { handle: String },
    /// Signature verification failed
    SignatureInvalid { handle: String, reason: String },
    /// Offchain data signature verification failed
    OffchainDataInvalid { handle: String, reason: String },
}

impl MessageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Decode(e) => e.kind(),
            Self::AnchorStale { .. }
            | Self::AnchorAhead { .. }
            | Self::NoAnchorAtHeight { .. }
            | Self::DuplicateSpace { .. }
            | Self::DuplicateHandle { .. }
            | Self::InvalidSubject { .. }
            | Self::MissingHandleProof { .. }
            | Self::AmbiguousHandleProof { .. } => ErrorKind::InvalidInput,
            Self::SpaceProofInvalid { error, .. }
            | Self::PtrsProofInvalid { error, .. }
            | Self::HandleProofInvalid { error, .. } => error.kind(),
            Self::ForkChoice { error, .. } => error.kind(),
            Self::AnchorHashMismatch { .. }
            | Self::RequestNotInMessage { .. }
            | Self::CommitmentMalformed { .. }
            | Self::ZoneNotFinal { .. }
            | Self::FinalCertRequiresCommitment { .. }
            | Self::ParentDelegateUnknown { .. }
            | Self::ParentCommitmentUnknown { .. }
            | Self::MissingExclusionProof { .. }
            | Self::HandleAlreadyExists { .. }
            | Self::SignatureInvalid { .. }
            | Self::OffchainDataInvalid { .. } => ErrorKind::VerificationFailed,
        }
    }
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "{}", e),
            Self::AnchorStale { anchor, oldest } => {
                write!(f, "anchor {} is stale, oldest is {}", anchor, oldest)
            }
            Self::AnchorAhead { anchor, tip } => {
                write!(f, "anchor {} is ahead of tip {}", anchor, tip)
            }
            Self::NoAnchorAtHeight { anchor } => {
                write!(f, "no anchor at height {}", anchor)
            }
            Self::AnchorHashMismatch { height, expected, got } => {
                write!(
                    f,
                    "anchor hash mismatch at {}: expected {}, got {}",
                    height, hex::encode(expected), hex::encode(got)
                )
            }
            Self::DuplicateSpace { space } => {
                write!(f, "duplicate space in message: {}", space)
            }
            Self::DuplicateHandle { handle } => {
                write!(f, "duplicate handle in message: {}", handle)
            }
            Self::InvalidSubject { subject } => {
                write!(f, "invalid subject: {}", subject)
            }
            Self::RequestNotInMessage { handle } => {
                write!(f, "requested handle {} is not in the message", handle)
            }
            Self::SpaceProofInvalid { space, error } => {
                write!(f, "space proof invalid for {}: {}", space, error)
            }
            Self::PtrsProofInvalid { space, error } => {
                write!(f, "ptrs proof invalid for {}: {}", space, error)
            }
            Self::CommitmentMalformed { space } => {
                write!(f, "commitment rolling hash inconsistent for {}", space)
            }
            Self::ZoneNotFinal { handle, anchor, newest, depth } => {
                write!(
                    f,
                    "zone {} at anchor {} is not final (newest {}, depth {})",
                    handle, anchor, newest, depth
                )
            }
            Self::ForkChoice { handle, error } => {
                write!(f, "fork choice failed for {}: {}", handle, error)
            }
            Self::MissingHandleProof { handle } => {
                write!(f, "handle {} has neither inclusion proof nor signature", handle)
            }
            Self::AmbiguousHandleProof { handle } => {
                write!(f, "handle {} has both inclusion proof and signature", handle)
            }
            Self::FinalCertRequiresCommitment { handle } => {
                write!(f, "final certificate requires a known commitment for {}", handle)
            }
            Self::HandleProofInvalid { handle, error } => {
                write!(f, "handle proof invalid for {}: {}", handle, error)
            }
            Self::ParentDelegateUnknown { handle } => {
                write!(f, "parent delegate unknown for {}", handle)
            }
            Self::ParentCommitmentUnknown { handle } => {
                write!(f, "parent commitment unknown for {}", handle)
            }
            Self::MissingExclusionProof { handle } => {
                write!(f, "temporary certificate for {} lacks an exclusion proof", handle)
            }
            Self::HandleAlreadyExists { handle } => {
                write!(f, "handle {} is already committed", handle)
            }
            Self::SignatureInvalid { handle, reason } => {
                write!(f, "signature invalid for {}: {}", handle, reason)
            }
            Self::OffchainDataInvalid { handle, reason } => {
                write!(f, "offchain data invalid for {}: {}", handle, reason)
            }
        }
    }
}

impl std::error::Error for MessageError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchors(heights: &[u32]) -> AnchorSet {
        AnchorSet::new(
            heights
                .iter()
                .map(|&height| RootAnchor {
                    spaces_root: [0; 32],
                    ptrs_root: None,
                    block: ChainAnchor { hash: [height as u8; 32], height },
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn verifier_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Veritas>();
        assert_send_sync::<AnchorSet>();
    }

    #[test]
    fn finality_uses_configured_depth() {
        let config = VeritasConfig { dev_mode: false, finality_depth: 6 };
        let veritas = Veritas::with_config(anchors(&[100, 200]), config).unwrap();
        assert!(veritas.is_finalized(194));
        assert!(!veritas.is_finalized(195));
        assert!(!veritas.is_finalized(250));
        assert!(!veritas.is_finalized(50));

        assert_eq!(veritas.sovereignty_for(194), SovereigntyState::Sovereign);
        assert_eq!(veritas.sovereignty_for(50), SovereigntyState::Sovereign);
        assert_eq!(veritas.sovereignty_for(195), SovereigntyState::Pending);
        assert_eq!(veritas.sovereignty_for(300), SovereigntyState::Pending);
    }

    #[test]
    fn default_depth_and_zero_depth() {
        let veritas = Veritas::new(anchors(&[100, 400]), false);
        assert_eq!(veritas.config().finality_depth, COMMITMENT_FINALITY_INTERVAL);
        assert!(veritas.is_finalized(400 - COMMITMENT_FINALITY_INTERVAL));

        let err = Veritas::with_config(
            anchors(&[100]),
            VeritasConfig { dev_mode: false, finality_depth: 0 },
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::ZeroFinalityDepth);
    }

    #[test]
    fn update_replaces_anchor_window() {
        let mut veritas = Veritas::new(anchors(&[100, 200]), false);
        let next = anchors(&[300, 400]);
        let roots = vec![next.oldest().clone(), next.newest().clone()];
        veritas.update(roots).unwrap();
        assert_eq!(veritas.oldest_anchor(), 300);
        assert_eq!(veritas.newest_anchor(), 400);
        assert!(veritas.anchors().get(200).is_none());

        let err = veritas.update(vec![]).unwrap_err();
        assert!(matches!(err, AnchorError::Empty));
        assert_eq!(veritas.newest_anchor(), 400);
    }

    #[test]
    fn shares_anchor_set() {
        let set = Arc::new(anchors(&[100, 200]));
        let a = Veritas::new(set.clone(), false);
        let b = Veritas::new(set.clone(), true);
        assert!(std::ptr::eq(a.anchors(), b.anchors()));
        assert!(b.is_dev_mode());
    }

    #[test]
    fn rejects_unknown_anchor_heights() {
        let veritas = Veritas::new(anchors(&[100, 200]), false);
        let ctx = QueryContext::new();
        let msg = |height: u32, hash: Hash| Message {
            anchor: ChainAnchor { hash, height },
            spaces: vec![],
        };

        let err = veritas.verify_message(&ctx, msg(99, [0; 32])).unwrap_err();
        assert!(matches!(err, MessageError::AnchorStale { .. }));
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = veritas.verify_message(&ctx, msg(150, [0; 32])).unwrap_err();
        assert!(matches!(err, MessageError::NoAnchorAtHeight { anchor: 150 }));

        let err = veritas.verify_message(&ctx, msg(200, [1; 32])).unwrap_err();
        assert!(matches!(err, MessageError::AnchorHashMismatch { .. }));
        assert_eq!(err.kind(), ErrorKind::VerificationFailed);

        let ok = veritas.verify_message(&ctx, msg(200, [200; 32])).unwrap();
        assert!(ok.zones().is_empty());
        assert_eq!(ok.certificates().count(), 0);
    }

    #[test]
    fn schnorr_rejects_malformed_keys() {
        // exceeds the field size
        let err = verify_schnorr(&[0; 32], &[0; 64], &[0xff; 32]).unwrap_err();
        assert_eq!(err, SignatureError::InvalidPublicKey);
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let not_taproot = ScriptBuf::from_bytes(vec![0x00, 0x14, 1, 2, 3]);
        assert_eq!(
            verify_with_script_pubkey(b"x", &Signature([0; 64]), &not_taproot),
            Err(SignatureError::InvalidPublicKey)
        );
    }
}
