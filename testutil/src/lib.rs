//! Test utilities for libveritas.
//!
//! Provides simulated chain state and handle trees for testing message
//! verification without a real blockchain.

use bitcoin::key::Keypair;
use bitcoin::opcodes::all::OP_PUSHNUM_1;
use bitcoin::script::Builder;
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::ScriptBuf;
use libveritas::cert::Signature;
use libveritas::msg::{
    Bundle, DelegateRecord, Handle, Message, OffchainData, ProvenPtrs, PtrsRecord, SpaceRecord,
};
use libveritas::proof::{sha256, MerkleTree};
use libveritas::sname::{Label, SLabel, SName};
use libveritas::{
    hash_signable_message, rolling_hash, AnchorSet, ChainAnchor, Commitment, ProvableOption,
    RootAnchor, SovereigntyState, Veritas, VeritasConfig, Zone,
};
use std::collections::HashMap;
use std::str::FromStr;

pub mod fixture;

// ─────────────────────────────────────────────────────────────────────────────
// Helper functions
// ─────────────────────────────────────────────────────────────────────────────

pub fn sname(s: &str) -> SName {
    SName::from_str(s).unwrap()
}

pub fn slabel(s: &str) -> SLabel {
    SLabel::from_str(s).unwrap()
}

pub fn label(s: &str) -> Label {
    Label::from_str(s).unwrap()
}

pub fn sign_message(signable: &[u8], keypair: &Keypair) -> Signature {
    let msg = hash_signable_message(signable);
    let secp = Secp256k1::new();
    let sig = secp.sign_schnorr_no_aux_rand(&msg, keypair);
    Signature(sig.serialize())
}

pub fn sign_zone(zone: &Zone, keypair: &Keypair) -> Signature {
    sign_message(&zone.signing_bytes(), keypair)
}

pub fn signed_offchain_data(seq: u32, data: &[u8], keypair: &Keypair) -> OffchainData {
    let mut offchain = OffchainData {
        seq,
        data: data.to_vec(),
        signature: Signature([0u8; 64]),
    };
    offchain.signature = sign_message(&offchain.signing_bytes(), keypair);
    offchain
}

/// Deterministic taproot key derived from `seed`.
pub fn p2tr_spk(seed: &str) -> (ScriptBuf, Keypair) {
    let secp = Secp256k1::new();
    let secret_key = SecretKey::from_slice(&sha256(seed.as_bytes())).expect("valid secret key");
    let keypair = Keypair::from_secret_key(&secp, &secret_key);
    let (xonly, _parity) = keypair.x_only_public_key();

    let script = Builder::new()
        .push_opcode(OP_PUSHNUM_1)
        .push_slice(xonly.serialize())
        .into_script();

    (script, keypair)
}

/// Install a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ─────────────────────────────────────────────────────────────────────────────
// Test primitives
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct TestSpace {
    pub label: SLabel,
    pub script_pubkey: ScriptBuf,
    pub keypair: Keypair,
    pub data: Option<Vec<u8>>,
}

#[derive(Clone)]
pub struct TestDelegate {
    pub script_pubkey: ScriptBuf,
    pub keypair: Keypair,
}

#[derive(Clone)]
pub struct TestDelegatedSpace {
    pub space: TestSpace,
    pub delegate: TestDelegate,
}

#[derive(Clone)]
pub struct TestHandle {
    pub name: Label,
    pub genesis_spk: ScriptBuf,
    pub keypair: Keypair,
    pub offchain_data: Option<OffchainData>,
}

#[derive(Clone)]
pub struct StagedHandle {
    pub handle: TestHandle,
    pub signature: Signature,
}

#[derive(Clone)]
pub struct TestCommitment {
    pub commitment: Commitment,
    pub handles: HashMap<Label, TestHandle>,
    pub handle_tree: MerkleTree,
}

impl TestSpace {
    pub fn new(name: &str) -> Self {
        let (script_pubkey, keypair) = p2tr_spk(name);
        TestSpace {
            label: slabel(name),
            script_pubkey,
            keypair,
            data: None,
        }
    }

    pub fn record(&self) -> SpaceRecord {
        SpaceRecord {
            script_pubkey: self.script_pubkey.clone(),
            data: self.data.clone(),
        }
    }
}

impl TestHandle {
    pub fn set_offchain_data(&mut self, seq: u32, data: &[u8]) {
        self.offchain_data = Some(signed_offchain_data(seq, data, &self.keypair));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TestChain - spaces and ptrs trees with anchor snapshots
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ChainSnapshot {
    pub anchor: RootAnchor,
    pub spaces_tree: MerkleTree,
    pub ptrs_tree: MerkleTree,
    pub ptrs: HashMap<SLabel, PtrsRecord>,
}

#[derive(Clone)]
pub struct TestChain {
    pub spaces_tree: MerkleTree,
    pub ptrs_tree: MerkleTree,
    pub spaces: HashMap<SLabel, TestSpace>,
    pub ptrs: HashMap<SLabel, PtrsRecord>,
    pub snapshots: Vec<ChainSnapshot>,
    pub block_height: u32,
}

impl TestChain {
    pub fn new() -> Self {
        Self {
            spaces_tree: MerkleTree::new(),
            ptrs_tree: MerkleTree::new(),
            spaces: Default::default(),
            ptrs: Default::default(),
            snapshots: vec![],
            block_height: 0,
        }
    }

    pub fn increase_time(&mut self, n: u32) {
        self.block_height += n;
    }

    pub fn add_space(&mut self, name: &str) -> TestSpace {
        let space = TestSpace::new(name);
        assert!(!self.spaces.contains_key(&space.label));

        self.spaces_tree.insert(space.label.as_ref(), space.record().to_bytes());
        self.spaces.insert(space.label.clone(), space.clone());
        space
    }

    pub fn add_space_with_delegation(&mut self, name: &str) -> TestDelegatedSpace {
        let space = self.add_space(name);
        let (script_pubkey, keypair) = p2tr_spk(&format!("{}/delegate", name));
        let delegate = TestDelegate { script_pubkey, keypair };

        let mut record = self.ptrs.get(&space.label).cloned().unwrap_or_default();
        record.delegate = Some(DelegateRecord {
            script_pubkey: delegate.script_pubkey.clone(),
            data: None,
        });
        self.set_ptrs(&space.label, record);

        TestDelegatedSpace { space, delegate }
    }

    /// Record an empty ptrs entry: the space provably has no delegate or commitment.
    pub fn add_empty_ptrs(&mut self, space: &SLabel) {
        self.set_ptrs(space, PtrsRecord::default());
    }

    pub fn set_ptrs(&mut self, space: &SLabel, record: PtrsRecord) {
        self.ptrs_tree.insert(space.as_ref(), record.to_bytes());
        self.ptrs.insert(space.clone(), record);
    }

    /// Commit a new handle tree root for a space at the current height.
    pub fn insert_commitment(&mut self, space: &SLabel, root: [u8; 32]) -> Commitment {
        let mut record = self.ptrs.get(space).cloned().unwrap_or_default();
        let commitment = match &record.commitment {
            None => Commitment::genesis(root, self.block_height),
            Some(prev) => prev.next(root, self.block_height),
        };
        record.commitment = Some(commitment.clone());
        self.set_ptrs(space, record);
        commitment
    }

    pub fn current_root_anchor(&self) -> RootAnchor {
        let spaces_root = self.spaces_tree.root();
        let ptrs_root = self.ptrs_tree.root();
        let mut preimage = spaces_root.to_vec();
        preimage.extend_from_slice(&self.block_height.to_le_bytes());

        RootAnchor {
            spaces_root,
            ptrs_root: Some(ptrs_root),
            block: ChainAnchor {
                hash: rolling_hash(&sha256(&preimage), &ptrs_root),
                height: self.block_height,
            },
        }
    }

    /// Record the current state as a trusted anchor.
    pub fn snapshot(&mut self) -> RootAnchor {
        let anchor = self.current_root_anchor();
        self.snapshots.retain(|s| s.anchor.block.height != self.block_height);
        self.snapshots.push(ChainSnapshot {
            anchor: anchor.clone(),
            spaces_tree: self.spaces_tree.clone(),
            ptrs_tree: self.ptrs_tree.clone(),
            ptrs: self.ptrs.clone(),
        });
        anchor
    }

    /// Trust bundle ordered newest-first.
    pub fn root_anchors(&self) -> Vec<RootAnchor> {
        let mut anchors: Vec<RootAnchor> = self.snapshots.iter().map(|s| s.anchor.clone()).collect();
        anchors.sort_by(|a, b| b.block.height.cmp(&a.block.height));
        anchors
    }

    pub fn anchor_set(&self) -> AnchorSet {
        AnchorSet::new(self.root_anchors()).expect("valid anchors")
    }

    pub fn snapshot_at(&self, height: u32) -> &ChainSnapshot {
        self.snapshots
            .iter()
            .find(|s| s.anchor.block.height == height)
            .expect("snapshot at height")
    }

    /// Build the proven parts of a space bundle as of the anchor at `height`.
    pub fn bundle(&self, space: &SLabel, height: u32) -> Bundle {
        let snapshot = self.snapshot_at(height);
        let owner_bytes = snapshot.spaces_tree.get(space.as_ref()).expect("space exists");
        let owner: SpaceRecord = borsh::from_slice(owner_bytes).expect("valid space record");
        let owner_proof = snapshot.spaces_tree.prove(space.as_ref()).expect("prove space");

        let ptrs = snapshot.ptrs.get(space).map(|record| ProvenPtrs {
            record: record.clone(),
            proof: snapshot.ptrs_tree.prove(space.as_ref()).expect("prove ptrs"),
        });

        Bundle {
            space: space.clone(),
            owner,
            owner_proof,
            ptrs,
            offchain_data: None,
            delegate_offchain_data: None,
            handles: vec![],
        }
    }

    pub fn message(&self, height: u32, spaces: Vec<Bundle>) -> Message {
        Message {
            anchor: self.snapshot_at(height).anchor.block,
            spaces,
        }
    }
}

impl Default for TestChain {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TestHandleTree - operator's off-chain handle tree
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct TestHandleTree {
    pub space: SLabel,
    pub ds: TestDelegatedSpace,
    pub handle_tree: MerkleTree,
    pub commitments: Vec<TestCommitment>,
    pub staged: HashMap<Label, StagedHandle>,
}

impl TestHandleTree {
    pub fn new(ds: &TestDelegatedSpace) -> Self {
        Self {
            space: ds.space.label.clone(),
            ds: ds.clone(),
            handle_tree: MerkleTree::new(),
            commitments: vec![],
            staged: Default::default(),
        }
    }

    /// The zone a temporary handle's signer authorizes.
    pub fn temporary_zone(&self, name: &str, genesis_spk: &ScriptBuf) -> Zone {
        Zone {
            anchor: 0,
            sovereignty: SovereigntyState::Dependent,
            handle: sname(&format!("{}{}", name, self.space)),
            script_pubkey: genesis_spk.clone(),
            data: None,
            offchain_data: None,
            delegate: ProvableOption::Unknown,
            commitment: ProvableOption::Unknown,
        }
    }

    pub fn add_handle(&mut self, name: &str) -> &mut StagedHandle {
        let label = label(name);
        assert!(self.handle_tree.get(label.as_slabel().as_ref()).is_none(), "already exists");
        assert!(!self.staged.contains_key(&label), "already staged");

        let (genesis_spk, keypair) = p2tr_spk(&format!("{}{}", name, self.space));
        let zone = self.temporary_zone(name, &genesis_spk);
        let signature = sign_zone(&zone, &self.ds.delegate.keypair);

        let handle = TestHandle {
            name: label.clone(),
            genesis_spk,
            keypair,
            offchain_data: None,
        };
        self.staged
            .entry(label)
            .or_insert(StagedHandle { handle, signature })
    }

    pub fn commit(&mut self, chain: &mut TestChain) -> Commitment {
        assert!(!self.staged.is_empty(), "no handles to commit");

        let handles: HashMap<Label, TestHandle> = std::mem::take(&mut self.staged)
            .into_iter()
            .map(|(k, v)| (k, v.handle))
            .collect();

        for handle in handles.values() {
            self.handle_tree.insert(
                handle.name.as_slabel().as_ref(),
                handle.genesis_spk.to_bytes(),
            );
        }

        let commitment = chain.insert_commitment(&self.space, self.handle_tree.root());
        self.commitments.push(TestCommitment {
            commitment: commitment.clone(),
            handles,
            handle_tree: self.handle_tree.clone(),
        });
        commitment
    }

    pub fn committed_handle(&self, name: &str) -> Option<&TestHandle> {
        let l = label(name);
        self.commitments.iter().find_map(|c| c.handles.get(&l))
    }

    /// The commitment visible in the ptrs record at anchor `height`, if any.
    pub fn commitment_at(&self, chain: &TestChain, height: u32) -> Option<&TestCommitment> {
        let state_root = chain
            .snapshot_at(height)
            .ptrs
            .get(&self.space)
            .and_then(|r| r.commitment.as_ref())?
            .state_root;
        let tc = self
            .commitments
            .iter()
            .find(|c| c.commitment.state_root == state_root)
            .expect("known commitment");
        Some(tc)
    }

    /// A committed handle proven against the commitment visible at `height`.
    pub fn final_handle(&self, chain: &TestChain, height: u32, name: &str) -> Handle {
        let tc = self.commitment_at(chain, height).expect("commitment at anchor");
        let handle = self.committed_handle(name).expect("handle must be committed");

        Handle {
            name: handle.name.clone(),
            genesis_spk: handle.genesis_spk.clone(),
            data: handle.offchain_data.clone(),
            inclusion: tc.handle_tree.prove(handle.name.as_slabel().as_ref()),
            signature: None,
            exclusion: None,
        }
    }

    /// A staged handle authorized by the delegate's signature, proven absent
    /// from the commitment visible at `height`.
    pub fn temporary_handle(&self, chain: &TestChain, height: u32, name: &str) -> Handle {
        let staged = self.staged.get(&label(name)).expect("handle must be staged");
        let exclusion = self.commitment_at(chain, height).map(|tc| {
            tc.handle_tree
                .prove_exclusion(staged.handle.name.as_slabel().as_ref())
                .expect("staged handle is not committed")
        });
        Handle {
            name: staged.handle.name.clone(),
            genesis_spk: staged.handle.genesis_spk.clone(),
            data: staged.handle.offchain_data.clone(),
            inclusion: None,
            signature: Some(staged.signature),
            exclusion,
        }
    }

    /// Build a message proving committed handles at the anchor `height`.
    pub fn build_message(&self, chain: &TestChain, height: u32, handle_names: &[&str]) -> Message {
        let mut bundle = chain.bundle(&self.space, height);
        bundle.handles = handle_names
            .iter()
            .map(|name| self.final_handle(chain, height, name))
            .collect();
        chain.message(height, vec![bundle])
    }

    /// Build a temporary certificate message for a staged handle.
    pub fn build_temporary_message(&self, chain: &TestChain, height: u32, handle_name: &str) -> Message {
        let mut bundle = chain.bundle(&self.space, height);
        bundle.handles = vec![self.temporary_handle(chain, height, handle_name)];
        chain.message(height, vec![bundle])
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Veritas builder helpers
// ─────────────────────────────────────────────────────────────────────────────

pub fn veritas_from_anchors(anchors: Vec<RootAnchor>) -> Veritas {
    Veritas::new(AnchorSet::new(anchors).expect("valid anchors"), true)
}

pub fn veritas_with_depth(chain: &TestChain, finality_depth: u32) -> Veritas {
    let config = VeritasConfig {
        dev_mode: false,
        finality_depth,
    };
    Veritas::with_config(chain.anchor_set(), config).expect("valid config")
}
