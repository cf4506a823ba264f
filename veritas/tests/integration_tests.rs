use libveritas::cert::{Certificate, Signature, Witness};
use libveritas::msg::{Handle, Message, OffchainData, QueryContext};
use libveritas::proof::{ExclusionProof, ProofError};
use libveritas::sname::NameLike;
use libveritas::{
    ErrorKind, MessageError, ProvableOption, SovereigntyState, Veritas, VeritasConfig, Zone,
};
use libveritas_testutil::{
    init_tracing, label, p2tr_spk, sign_zone, sname, signed_offchain_data, veritas_with_depth,
    TestChain, TestDelegatedSpace, TestHandleTree,
};

const DEPTH: u32 = 6;

/// Chain layout shared by the tests below:
///
/// - height 100: `@bitcoin` delegated, commitment 0 = {alice, bob}
/// - height 150: commitment 1 = {alice, bob, charlie}
/// - height 153: newest anchor
/// - staged (never committed): staged, dave, eve
///
/// With a finality depth of 6, anchor 100 is final and anchor 150 is not.
struct Fixture {
    chain: TestChain,
    space: TestDelegatedSpace,
    handles: TestHandleTree,
}

const FINAL_ANCHOR: u32 = 100;
const PENDING_ANCHOR: u32 = 150;
const NEWEST_ANCHOR: u32 = 153;

impl Fixture {
    fn new() -> Self {
        init_tracing();
        let mut chain = TestChain::new();

        chain.increase_time(FINAL_ANCHOR);
        let space = chain.add_space_with_delegation("@bitcoin");
        let mut handles = TestHandleTree::new(&space);
        handles.add_handle("alice");
        handles.add_handle("bob");
        handles.commit(&mut chain);
        chain.snapshot();

        chain.increase_time(PENDING_ANCHOR - FINAL_ANCHOR);
        handles.add_handle("charlie");
        handles.commit(&mut chain);
        chain.snapshot();

        chain.increase_time(NEWEST_ANCHOR - PENDING_ANCHOR);
        chain.snapshot();

        handles.add_handle("staged");
        handles.add_handle("dave");
        handles.add_handle("eve");

        Self { chain, space, handles }
    }

    /// Finality enforced with the short test depth.
    fn veritas(&self) -> Veritas {
        veritas_with_depth(&self.chain, DEPTH)
    }

    /// Same depth, finality checks relaxed.
    fn dev_veritas(&self) -> Veritas {
        let config = VeritasConfig { dev_mode: true, finality_depth: DEPTH };
        Veritas::with_config(self.chain.anchor_set(), config).expect("valid config")
    }

    /// Message proving commitment 0 against the final anchor.
    fn finalized_message(&self, handles: &[&str]) -> Message {
        self.handles.build_message(&self.chain, FINAL_ANCHOR, handles)
    }

    /// Message proving commitment 1 against a not yet final anchor.
    fn pending_message(&self, handles: &[&str]) -> Message {
        self.handles.build_message(&self.chain, PENDING_ANCHOR, handles)
    }

    /// Temporary certificate messages for staged handles at `height`.
    fn temporary_message(&self, height: u32, names: &[&str]) -> Message {
        let mut bundle = self.chain.bundle(&self.handles.space, height);
        bundle.handles = names
            .iter()
            .map(|n| self.handles.temporary_handle(&self.chain, height, n))
            .collect();
        self.chain.message(height, vec![bundle])
    }

    /// A delegate-signed temporary certificate binding `name` to a fresh key.
    fn reissued_handle(&self, name: &str, exclusion: Option<ExclusionProof>) -> Handle {
        let (genesis_spk, _) = p2tr_spk("reissued");
        let zone = self.handles.temporary_zone(name, &genesis_spk);
        Handle {
            name: label(name),
            genesis_spk,
            data: None,
            inclusion: None,
            signature: Some(sign_zone(&zone, &self.space.delegate.keypair)),
            exclusion,
        }
    }

    fn message_with(&self, height: u32, handles: Vec<Handle>) -> Message {
        let mut bundle = self.chain.bundle(&self.handles.space, height);
        bundle.handles = handles;
        self.chain.message(height, vec![bundle])
    }
}

fn find<'a>(zones: &'a [Zone], handle: &str) -> &'a Zone {
    zones
        .iter()
        .find(|z| z.handle == sname(handle))
        .unwrap_or_else(|| panic!("missing zone {}", handle))
}

// ─────────────────────────────────────────────────────────────────────────────
// End-to-end
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn requested_handle_with_final_zone_verifies() {
    let f = Fixture::new();
    let veritas = f.veritas();

    for msg in [
        f.finalized_message(&["alice"]),
        f.temporary_message(FINAL_ANCHOR, &["dave"]),
    ] {
        let subject = if msg.spaces[0].handles[0].signature.is_some() {
            "dave@bitcoin"
        } else {
            "alice@bitcoin"
        };
        let mut ctx = QueryContext::new();
        ctx.add_request(sname(subject));

        let result = veritas.verify_message(&ctx, msg).expect("verify");
        assert_eq!(result.zones().len(), 1);
        assert_eq!(result.zones()[0].handle, sname(subject));
        assert!(result.certificate(&sname(subject)).is_some());
    }
}

#[test]
fn requested_handle_not_final_fails() {
    let f = Fixture::new();
    let veritas = f.veritas();

    let mut ctx = QueryContext::new();
    ctx.add_request(sname("alice@bitcoin"));
    let err = veritas
        .verify_message(&ctx, f.pending_message(&["alice"]))
        .unwrap_err();

    assert!(matches!(err, MessageError::ZoneNotFinal { anchor: PENDING_ANCHOR, .. }), "{}", err);
    assert_eq!(err.kind(), ErrorKind::VerificationFailed);

    // The same message passes once finality is relaxed
    f.dev_veritas()
        .verify_message(&ctx, f.pending_message(&["alice"]))
        .expect("dev mode skips finality");
}

#[test]
fn wildcard_excludes_handle_with_bad_signature() {
    let f = Fixture::new();
    let veritas = f.veritas();

    let mut msg = f.temporary_message(FINAL_ANCHOR, &["dave", "eve"]);
    let eve = msg.spaces[0].handles.iter_mut().find(|h| h.name.to_string() == "eve").unwrap();
    let mut sig = eve.signature.unwrap();
    sig.0[0] ^= 0x01;
    eve.signature = Some(sig);

    let result = veritas.verify_message(&QueryContext::new(), msg).expect("verify");

    let handles: Vec<String> = result
        .zones()
        .iter()
        .filter(|z| !z.handle.is_single_label())
        .map(|z| z.handle.to_string())
        .collect();
    assert_eq!(handles, vec!["dave@bitcoin".to_string()]);
    assert_eq!(result.message.spaces[0].handles.len(), 1);
    assert!(result.certificate(&sname("eve@bitcoin")).is_none());
}

#[test]
fn explicit_request_with_bad_signature_fails() {
    let f = Fixture::new();
    let veritas = f.veritas();

    let mut msg = f.temporary_message(FINAL_ANCHOR, &["dave", "eve"]);
    msg.spaces[0].handles[1].signature = Some(Signature([7u8; 64]));

    let mut ctx = QueryContext::new();
    ctx.add_request(sname("dave@bitcoin"));
    ctx.add_request(sname("eve@bitcoin"));
    let err = veritas.verify_message(&ctx, msg).unwrap_err();
    assert!(matches!(err, MessageError::SignatureInvalid { .. }), "{}", err);
    assert_eq!(err.kind(), ErrorKind::VerificationFailed);
}

// ─────────────────────────────────────────────────────────────────────────────
// Roots and final handles
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn verify_root_finalized() {
    let f = Fixture::new();
    let veritas = f.veritas();

    let result = veritas
        .verify_message(&QueryContext::new(), f.finalized_message(&[]))
        .expect("verify");

    assert_eq!(result.zones().len(), 1);
    let zone = &result.zones()[0];
    assert_eq!(zone.handle, sname("@bitcoin"));
    assert_eq!(zone.anchor, FINAL_ANCHOR);
    assert_eq!(zone.sovereignty, SovereigntyState::Sovereign);
    assert_eq!(zone.script_pubkey, f.space.space.script_pubkey);
    let ProvableOption::Exists { value: c } = &zone.commitment else {
        panic!("expected commitment Exists");
    };
    assert_eq!(c.onchain, f.handles.commitments[0].commitment);
    assert!(c.receipt_hash.is_some());
    let ProvableOption::Exists { value: delegate } = &zone.delegate else {
        panic!("expected delegate Exists");
    };
    assert_eq!(delegate.script_pubkey, f.space.delegate.script_pubkey);
}

#[test]
fn verify_leaf_finalized() {
    let f = Fixture::new();
    let veritas = f.veritas();

    let result = veritas
        .verify_message(&QueryContext::new(), f.finalized_message(&["alice", "bob"]))
        .expect("verify");

    assert_eq!(result.zones().len(), 3);
    for name in ["alice@bitcoin", "bob@bitcoin"] {
        let zone = find(result.zones(), name);
        assert_eq!(zone.sovereignty, SovereigntyState::Sovereign);
        assert_eq!(zone.anchor, FINAL_ANCHOR);
    }
}

#[test]
fn verify_root_and_leaf_pending() {
    let f = Fixture::new();
    let veritas = f.dev_veritas();

    let result = veritas
        .verify_message(&QueryContext::new(), f.pending_message(&["alice", "charlie"]))
        .expect("verify");

    let root = find(result.zones(), "@bitcoin");
    assert_eq!(root.sovereignty, SovereigntyState::Pending);
    let ProvableOption::Exists { value: c } = &root.commitment else {
        panic!("expected commitment Exists");
    };
    assert_eq!(c.onchain, f.handles.commitments[1].commitment);
    assert!(c.onchain.is_successor_of(&f.handles.commitments[0].commitment));

    // alice was committed first but is proven against the latest root
    assert_eq!(find(result.zones(), "alice@bitcoin").sovereignty, SovereigntyState::Pending);
    assert_eq!(find(result.zones(), "charlie@bitcoin").sovereignty, SovereigntyState::Pending);
}

#[test]
fn final_handle_against_wrong_root_fails() {
    let f = Fixture::new();
    let veritas = f.dev_veritas();

    // Proof from commitment 0 presented with the anchor of commitment 1
    let mut msg = f.pending_message(&["alice"]);
    msg.spaces[0].handles[0] = f.handles.final_handle(&f.chain, FINAL_ANCHOR, "alice");

    let mut ctx = QueryContext::new();
    ctx.add_request(sname("alice@bitcoin"));
    let err = veritas.verify_message(&ctx, msg).unwrap_err();
    assert!(matches!(err, MessageError::HandleProofInvalid { .. }), "{}", err);
    assert_eq!(err.kind(), ErrorKind::VerificationFailed);
}

#[test]
fn handle_with_both_or_no_proof_is_invalid_input() {
    let f = Fixture::new();
    let veritas = f.veritas();
    let mut ctx = QueryContext::new();
    ctx.add_request(sname("alice@bitcoin"));

    let mut msg = f.finalized_message(&["alice"]);
    msg.spaces[0].handles[0].signature = Some(Signature([1u8; 64]));
    let err = veritas.verify_message(&ctx, msg).unwrap_err();
    assert!(matches!(err, MessageError::AmbiguousHandleProof { .. }), "{}", err);
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let mut msg = f.finalized_message(&["alice"]);
    msg.spaces[0].handles[0].exclusion = Some(ExclusionProof::default());
    let err = veritas.verify_message(&ctx, msg).unwrap_err();
    assert!(matches!(err, MessageError::AmbiguousHandleProof { .. }), "{}", err);

    let mut msg = f.finalized_message(&["alice"]);
    msg.spaces[0].handles[0].inclusion = None;
    let err = veritas.verify_message(&ctx, msg).unwrap_err();
    assert!(matches!(err, MessageError::MissingHandleProof { .. }), "{}", err);
}

#[test]
fn verify_leaf_temporary() {
    let f = Fixture::new();
    let veritas = f.veritas();

    let result = veritas
        .verify_message(&QueryContext::new(), f.temporary_message(FINAL_ANCHOR, &["staged"]))
        .expect("verify");
    let staged = find(result.zones(), "staged@bitcoin");
    assert_eq!(staged.sovereignty, SovereigntyState::Dependent);
    assert_eq!(
        &staged.script_pubkey,
        &f.handles.staged[&libveritas_testutil::label("staged")].handle.genesis_spk
    );

    let cert = result.certificate(&sname("staged@bitcoin")).expect("cert");
    assert!(cert.is_temporary());
    match &cert.witness {
        Witness::Leaf { exclusion, .. } => assert!(exclusion.is_some()),
        other => panic!("unexpected witness {:?}", other),
    }
}

#[test]
fn temporary_cert_for_committed_handle_is_rejected() {
    let f = Fixture::new();
    let veritas = f.veritas();
    let mut ctx = QueryContext::new();
    ctx.add_request(sname("alice@bitcoin"));

    // No exclusion proof against a space that has a commitment
    let msg = f.message_with(FINAL_ANCHOR, vec![f.reissued_handle("alice", None)]);
    let err = veritas.verify_message(&ctx, msg.clone()).unwrap_err();
    assert!(matches!(err, MessageError::MissingExclusionProof { .. }), "{}", err);
    assert_eq!(err.kind(), ErrorKind::VerificationFailed);

    let result = veritas
        .verify_message(&QueryContext::new(), msg)
        .expect("wildcard drops the handle");
    assert!(result.zones().iter().all(|z| z.handle != sname("alice@bitcoin")));

    // An opening of alice's own leaf shows the handle is committed
    let tc = f.handles.commitment_at(&f.chain, FINAL_ANCHOR).expect("commitment 0");
    let opened = ExclusionProof {
        left: tc.handle_tree.open(label("alice").as_slabel().as_ref()),
        right: None,
    };
    let msg = f.message_with(FINAL_ANCHOR, vec![f.reissued_handle("alice", Some(opened))]);
    let err = veritas.verify_message(&ctx, msg).unwrap_err();
    assert!(matches!(err, MessageError::HandleAlreadyExists { .. }), "{}", err);
    assert_eq!(err.kind(), ErrorKind::VerificationFailed);
}

#[test]
fn stale_exclusion_proof_is_rejected() {
    let f = Fixture::new();
    let veritas = f.dev_veritas();
    let mut ctx = QueryContext::new();
    ctx.add_request(sname("charlie@bitcoin"));

    // charlie was absent from commitment 0 but is part of commitment 1
    let tc = f.handles.commitment_at(&f.chain, FINAL_ANCHOR).expect("commitment 0");
    let stale = tc
        .handle_tree
        .prove_exclusion(label("charlie").as_slabel().as_ref())
        .expect("absent from commitment 0");
    let msg = f.message_with(PENDING_ANCHOR, vec![f.reissued_handle("charlie", Some(stale))]);
    let err = veritas.verify_message(&ctx, msg).unwrap_err();
    assert!(
        matches!(
            err,
            MessageError::HandleProofInvalid { error: ProofError::RootMismatch { .. }, .. }
        ),
        "{}",
        err
    );
}

#[test]
fn tampered_or_missing_ptrs() {
    let f = Fixture::new();
    let veritas = f.veritas();

    // Strip the delegate record: ptrs proof no longer matches
    let mut msg = f.temporary_message(FINAL_ANCHOR, &["dave"]);
    msg.spaces[0].ptrs.as_mut().unwrap().record.delegate = None;
    let result = veritas
        .verify_message(&QueryContext::new(), msg)
        .expect("wildcard drops the space");
    assert!(result.zones().is_empty());

    // Without ptrs the delegate is unknown and a signature cannot be checked
    let mut msg = f.temporary_message(FINAL_ANCHOR, &["dave"]);
    msg.spaces[0].ptrs = None;
    let mut ctx = QueryContext::new();
    ctx.add_request(sname("dave@bitcoin"));
    let err = veritas.verify_message(&ctx, msg).unwrap_err();
    assert!(matches!(err, MessageError::ParentDelegateUnknown { .. }), "{}", err);
}

#[test]
fn empty_ptrs_lets_owner_sign() {
    init_tracing();
    let mut chain = TestChain::new();
    chain.increase_time(10);
    let owner = chain.add_space("@solo");
    chain.add_empty_ptrs(&owner.label);
    chain.snapshot();
    chain.increase_time(DEPTH);
    chain.snapshot();

    // Owner-signed handle: the owner key is the signer when no delegate exists
    let ds = TestDelegatedSpace {
        space: owner.clone(),
        delegate: libveritas_testutil::TestDelegate {
            script_pubkey: owner.script_pubkey.clone(),
            keypair: owner.keypair,
        },
    };
    let mut tree = TestHandleTree::new(&ds);
    tree.add_handle("alice");
    let msg = tree.build_temporary_message(&chain, 10, "alice");

    let veritas = veritas_with_depth(&chain, DEPTH);
    let result = veritas.verify_message(&QueryContext::new(), msg).expect("verify");

    let root = find(result.zones(), "@solo");
    assert_eq!(root.delegate, ProvableOption::Empty);
    assert_eq!(root.commitment, ProvableOption::Empty);
    assert_eq!(find(result.zones(), "alice@solo").sovereignty, SovereigntyState::Dependent);
}

// ─────────────────────────────────────────────────────────────────────────────
// Message-level checks
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn anchor_checks() {
    let f = Fixture::new();
    let veritas = f.veritas();
    let ctx = QueryContext::new();

    let mut msg = f.finalized_message(&[]);
    msg.anchor.hash[0] ^= 0xff;
    let err = veritas.verify_message(&ctx, msg).unwrap_err();
    assert!(matches!(err, MessageError::AnchorHashMismatch { height: FINAL_ANCHOR, .. }));
    assert_eq!(err.kind(), ErrorKind::VerificationFailed);

    for (height, stale) in [(99, true), (154, false), (120, false)] {
        let mut msg = f.finalized_message(&[]);
        msg.anchor.height = height;
        let err = veritas.verify_message(&ctx, msg).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput, "{}", err);
        assert_eq!(matches!(err, MessageError::AnchorStale { .. }), stale);
    }
}

#[test]
fn duplicate_space_is_rejected() {
    let f = Fixture::new();
    let veritas = f.veritas();

    let mut msg = f.finalized_message(&["alice"]);
    msg.spaces.push(msg.spaces[0].clone());
    let err = veritas.verify_message(&QueryContext::new(), msg).unwrap_err();
    assert!(matches!(err, MessageError::DuplicateSpace { .. }));
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let msg = f.finalized_message(&["alice", "alice"]);
    let err = veritas.verify_message(&QueryContext::new(), msg).unwrap_err();
    assert!(matches!(err, MessageError::DuplicateHandle { .. }));
}

#[test]
fn requested_handle_missing_from_message() {
    let f = Fixture::new();
    let veritas = f.veritas();

    let mut ctx = QueryContext::new();
    ctx.add_request(sname("alice@bitcoin"));
    ctx.add_request(sname("zed@bitcoin"));
    let err = veritas
        .verify_message(&ctx, f.finalized_message(&["alice"]))
        .unwrap_err();
    assert!(matches!(err, MessageError::RequestNotInMessage { .. }), "{}", err);
    assert_eq!(err.kind(), ErrorKind::VerificationFailed);
}

#[test]
fn tampered_space_record_is_dropped_or_rejected() {
    let f = Fixture::new();
    let veritas = f.veritas();

    let mut msg = f.finalized_message(&[]);
    msg.spaces[0].owner.data = Some(b"forged".to_vec());

    let result = veritas
        .verify_message(&QueryContext::new(), msg.clone())
        .expect("wildcard");
    assert!(result.zones().is_empty());
    assert!(result.message.spaces.is_empty());

    let mut ctx = QueryContext::new();
    ctx.add_request(sname("@bitcoin"));
    let err = veritas.verify_message(&ctx, msg).unwrap_err();
    assert!(matches!(err, MessageError::SpaceProofInvalid { .. }), "{}", err);
    assert_eq!(err.kind(), ErrorKind::VerificationFailed);
}

#[test]
fn verify_message_bytes_decodes_first() {
    let f = Fixture::new();
    let veritas = f.veritas();
    let ctx = QueryContext::new();

    let bytes = f.finalized_message(&["alice"]).to_bytes();
    let result = veritas.verify_message_bytes(&ctx, &bytes).expect("verify");
    assert_eq!(result.zones().len(), 2);

    let err = veritas
        .verify_message_bytes(&ctx, &bytes[..bytes.len() - 3])
        .unwrap_err();
    assert!(matches!(err, MessageError::Decode(_)));
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn verify_with_request_filter() {
    let f = Fixture::new();
    let veritas = f.veritas();

    let mut ctx = QueryContext::new();
    ctx.add_request(sname("alice@bitcoin"));
    let result = veritas
        .verify_message(&ctx, f.finalized_message(&["alice", "bob"]))
        .expect("verify");

    assert_eq!(result.zones().len(), 1);
    assert_eq!(result.zones()[0].handle, sname("alice@bitcoin"));
    assert_eq!(result.message.spaces[0].handles.len(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Off-chain data
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn offchain_data_is_authenticated() {
    let f = Fixture::new();
    let veritas = f.veritas();

    let mut msg = f.finalized_message(&[]);
    msg.spaces[0].offchain_data = Some(signed_offchain_data(3, b"records", &f.space.space.keypair));
    msg.spaces[0].delegate_offchain_data =
        Some(signed_offchain_data(1, b"relay", &f.space.delegate.keypair));
    let result = veritas.verify_message(&QueryContext::new(), msg).expect("verify");
    let root = &result.zones()[0];
    assert_eq!(root.offchain_data.as_ref().map(|d| d.seq), Some(3));
    let ProvableOption::Exists { value: delegate } = &root.delegate else {
        panic!("expected delegate Exists");
    };
    assert_eq!(delegate.offchain_data.as_ref().map(|d| d.data.as_slice()), Some(&b"relay"[..]));

    let cert = result.certificate(&sname("@bitcoin")).expect("root cert");
    assert!(matches!(cert.witness, Witness::Root { offchain_data: Some(_) }));

    // Signed by the wrong key
    let mut msg = f.finalized_message(&[]);
    msg.spaces[0].offchain_data = Some(signed_offchain_data(3, b"records", &f.space.delegate.keypair));
    let mut ctx = QueryContext::new();
    ctx.add_request(sname("@bitcoin"));
    let err = veritas.verify_message(&ctx, msg).unwrap_err();
    assert!(matches!(err, MessageError::OffchainDataInvalid { .. }), "{}", err);
}

#[test]
fn handle_offchain_data_is_checked() {
    let f = Fixture::new();
    let veritas = f.veritas();
    let alice = f.handles.committed_handle("alice").unwrap();

    let mut msg = f.finalized_message(&["alice"]);
    msg.spaces[0].handles[0].data = Some(signed_offchain_data(0, b"hi", &alice.keypair));
    let result = veritas.verify_message(&QueryContext::new(), msg).expect("verify");
    let zone = find(result.zones(), "alice@bitcoin");
    assert_eq!(zone.offchain_data.as_ref().map(|d| d.seq), Some(0));

    let mut msg = f.finalized_message(&["alice"]);
    msg.spaces[0].handles[0].data = Some(OffchainData {
        seq: 0,
        data: b"hi".to_vec(),
        signature: Signature([0u8; 64]),
    });
    let result = veritas.verify_message(&QueryContext::new(), msg).expect("verify");
    assert!(result.zones().iter().all(|z| z.handle != sname("alice@bitcoin")));
}

// ─────────────────────────────────────────────────────────────────────────────
// Cached zones
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn verify_with_cached_parent_zone() {
    let f = Fixture::new();
    let veritas = f.veritas();

    let result = veritas
        .verify_message(&QueryContext::new(), f.finalized_message(&[]))
        .expect("verify");
    let parent_zone = result.zones()[0].clone();

    let ctx = QueryContext::from_zones(vec![parent_zone.clone()]);
    let result = veritas
        .verify_message(&ctx, f.finalized_message(&["alice"]))
        .expect("verify");
    assert_eq!(find(result.zones(), "@bitcoin"), &parent_zone);
    find(result.zones(), "alice@bitcoin");
}

#[test]
fn newer_cached_parent_wins_and_stale_one_is_ignored() {
    let f = Fixture::new();
    let veritas = f.veritas();

    let result = veritas
        .verify_message(&QueryContext::new(), f.finalized_message(&[]))
        .expect("verify");
    let mut newer = result.zones()[0].clone();
    newer.anchor = FINAL_ANCHOR + 2;

    let ctx = QueryContext::from_zones(vec![newer.clone()]);
    let result = veritas
        .verify_message(&ctx, f.finalized_message(&[]))
        .expect("verify");
    assert_eq!(result.zones()[0].anchor, FINAL_ANCHOR + 2);

    // Outside the trusted window: not vouched for, message zone is used
    let mut outside = newer;
    outside.anchor = NEWEST_ANCHOR + 1000;
    let ctx = QueryContext::from_zones(vec![outside]);
    let result = veritas
        .verify_message(&ctx, f.finalized_message(&[]))
        .expect("verify");
    assert_eq!(result.zones()[0].anchor, FINAL_ANCHOR);
}

#[test]
fn conflicting_cached_commitment_fails() {
    let f = Fixture::new();
    let veritas = f.veritas();

    let result = veritas
        .verify_message(&QueryContext::new(), f.finalized_message(&[]))
        .expect("verify");
    let mut forked = result.zones()[0].clone();
    let ProvableOption::Exists { value: c } = &mut forked.commitment else {
        panic!("expected commitment Exists");
    };
    c.onchain = libveritas::Commitment::genesis([9u8; 32], FINAL_ANCHOR);

    let mut ctx = QueryContext::from_zones(vec![forked]);
    ctx.add_request(sname("@bitcoin"));
    let err = veritas
        .verify_message(&ctx, f.finalized_message(&[]))
        .unwrap_err();
    assert!(matches!(err, MessageError::ForkChoice { .. }), "{}", err);
    assert_eq!(err.kind(), ErrorKind::VerificationFailed);
}

#[test]
fn verify_uses_better_cached_zone() {
    let f = Fixture::new();
    let veritas = f.veritas();

    let cached_zone = Zone {
        anchor: 0,
        sovereignty: SovereigntyState::Dependent,
        handle: sname("alice@bitcoin"),
        script_pubkey: bitcoin::ScriptBuf::new(),
        data: None,
        offchain_data: None,
        delegate: ProvableOption::Unknown,
        commitment: ProvableOption::Unknown,
    };

    let ctx = QueryContext::from_zones(vec![cached_zone]);
    let result = veritas
        .verify_message(&ctx, f.finalized_message(&["alice"]))
        .expect("verify");

    let alice = find(result.zones(), "alice@bitcoin");
    assert_eq!(alice.anchor, FINAL_ANCHOR);
    assert_eq!(alice.sovereignty, SovereigntyState::Sovereign);
}

#[test]
fn cached_zone_outside_anchor_window_is_ignored() {
    let f = Fixture::new();
    let veritas = f.veritas();
    let mut ctx = QueryContext::new();
    ctx.add_request(sname("alice@bitcoin"));

    let verified = veritas
        .verify_message(&ctx, f.finalized_message(&["alice"]))
        .expect("verify");
    let mut future = find(verified.zones(), "alice@bitcoin").clone();
    future.anchor = NEWEST_ANCHOR + 10_000;
    future.script_pubkey = p2tr_spk("reissued").0;

    let mut ctx = QueryContext::from_zones(vec![future]);
    ctx.add_request(sname("alice@bitcoin"));
    let result = veritas
        .verify_message(&ctx, f.finalized_message(&["alice"]))
        .expect("verify");

    let alice = find(result.zones(), "alice@bitcoin");
    assert_eq!(alice.anchor, FINAL_ANCHOR);
    assert_eq!(
        alice.script_pubkey,
        f.handles.committed_handle("alice").expect("committed").genesis_spk
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Certificates
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn certificate_iterator() {
    let f = Fixture::new();
    let veritas = f.veritas();

    let result = veritas
        .verify_message(&QueryContext::new(), f.finalized_message(&["alice", "bob"]))
        .expect("verify");

    let certs: Vec<Certificate> = result.certificates().collect();
    assert_eq!(certs.len(), 3);
    assert_eq!(certs[0].subject, sname("@bitcoin"));
    assert_eq!(certs[0].cert_type(), "root");

    for name in ["alice@bitcoin", "bob@bitcoin"] {
        let cert = certs.iter().find(|c| c.subject == sname(name)).expect("leaf cert");
        assert_eq!(cert.cert_type(), "final");
        let bytes = cert.to_bytes();
        assert_eq!(&Certificate::from_slice(&bytes).unwrap(), cert);
    }
}

#[test]
fn certificate_iterator_leaves_only() {
    let f = Fixture::new();
    let veritas = f.veritas();

    let mut ctx = QueryContext::new();
    ctx.add_request(sname("alice@bitcoin"));
    let result = veritas
        .verify_message(&ctx, f.finalized_message(&["alice"]))
        .expect("verify");

    let certs: Vec<Certificate> = result.certificates().collect();
    assert_eq!(certs.len(), 1);
    assert_eq!(certs[0].subject, sname("alice@bitcoin"));
    assert!(matches!(certs[0].witness, Witness::Leaf { .. }));
    assert!(result.certificate(&sname("@bitcoin")).is_none());
}
