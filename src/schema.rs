//! The logical record types exchanged between the core and its collaborators.  Behavior lives
//! in the modules that produce and consume them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::crypto::chaum_pedersen;
use crate::crypto::chaum_pedersen::range;
use crate::crypto::elgamal::Ciphertext;
use crate::crypto::group::{ElectionConstants, ElementModP, ElementModQ};
use crate::crypto::hash::Digest256;
use crate::crypto::schnorr;

/// Per-contest, per-selection map of values, keyed by contest id then selection id.
pub type ContestMap<T> = BTreeMap<String, BTreeMap<String, T>>;

/// Everything needed to fix an election before the key ceremony.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ElectionConfig {
    pub constants: ElectionConstants,

    /// Hash of the election manifest, which is otherwise opaque to the core.
    pub manifest_hash: Digest256,

    /// The number of guardians `n`.
    pub number_of_guardians: u32,

    /// The number of guardians `k` needed to decrypt.
    pub quorum: u32,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// A guardian's public contribution to the joint key.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct GuardianKeyShare {
    pub guardian_id: String,

    /// The point at which other guardians evaluate their polynomials for this guardian.
    pub x_coordinate: u32,

    /// `K_ij = g^{a_ij}` for each secret coefficient `a_ij`; `K_i0` is the guardian's public key.
    pub coefficient_commitments: Vec<ElementModP>,

    /// A Schnorr proof of knowledge of each `a_ij`.
    pub coefficient_proofs: Vec<schnorr::Proof>,
}

/// The outcome of a key ceremony: the configuration bound to the joint key and the hashes that
/// tie every later proof to this election.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ElectionInitialized {
    pub config: ElectionConfig,

    /// The election public key `K = ∏ K_i0`.
    pub joint_public_key: ElementModP,

    pub manifest_hash: Digest256,

    /// Hash of the group constants, `n`, `k` and the manifest hash.
    pub base_hash: Digest256,

    /// The base hash extended with every guardian's coefficient commitments.
    pub extended_base_hash: Digest256,

    pub guardians: Vec<GuardianKeyShare>,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct PlaintextBallot {
    pub ballot_id: String,
    pub contests: Vec<PlaintextContest>,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct PlaintextContest {
    pub contest_id: String,

    /// The most votes the selections of this contest may add up to.
    pub votes_allowed: u32,

    pub selections: Vec<PlaintextSelection>,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct PlaintextSelection {
    pub selection_id: String,
    pub vote: u32,

    /// The most votes this one selection may receive.
    #[serde(default = "default_option_limit")]
    pub option_limit: u32,
}

fn default_option_limit() -> u32 {
    1
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum BallotState {
    Cast,
    Spoiled,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct EncryptedBallot {
    pub ballot_id: String,
    pub state: BallotState,
    pub contests: Vec<EncryptedContest>,

    /// Commitment to the ballot id and every contest hash.
    pub crypto_hash: Digest256,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct EncryptedContest {
    pub contest_id: String,
    pub votes_allowed: u32,
    pub selections: Vec<EncryptedSelection>,

    /// Proof that the homomorphic sum of `selections` encrypts a value in `0..=votes_allowed`.
    pub proof: range::Proof,

    pub crypto_hash: Digest256,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct EncryptedSelection {
    pub selection_id: String,
    pub option_limit: u32,
    pub ciphertext: Ciphertext,

    /// Proof that `ciphertext` encrypts a value in `0..=option_limit`.
    pub proof: range::Proof,

    pub crypto_hash: Digest256,
}

/// The homomorphic sum of every cast ballot, plus the ids of the ballots folded in.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct CiphertextTally {
    pub tally_id: String,
    pub contests: ContestMap<Ciphertext>,
    pub cast_ballot_ids: BTreeSet<String>,

    /// Spoiled ballots seen by the accumulator.  They never contribute to `contests`.
    pub spoiled_ballot_ids: BTreeSet<String>,

    /// The largest `option_limit` of any cast selection.  No sum in `contests` exceeds
    /// `cast_ballot_ids.len() * max_option_limit`.
    #[serde(default)]
    pub max_option_limit: u64,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct TallyResult {
    pub election: ElectionInitialized,
    pub tally: CiphertextTally,
}

/// A present guardian's share `M_i = A^{s_i}` of the decryption of `(A, B)`.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct PartialDecryption {
    pub guardian_id: String,
    pub share: ElementModP,

    /// Proof that `share` is `A` raised to the secret behind the guardian's public key.
    pub proof: chaum_pedersen::Proof,
}

/// A present guardian's fragment `M_{i,ℓ} = A^{P_ℓ(x_i)}` of an absent guardian `ℓ`'s share.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct CompensatedDecryption {
    pub guardian_id: String,
    pub missing_guardian_id: String,
    pub share: ElementModP,

    /// `g^{P_ℓ(x_i)}`, recomputable by anyone from the absent guardian's commitments.
    pub recovery_public_key: ElementModP,

    /// Proof that `share` is `A` raised to the secret behind `recovery_public_key`.
    pub proof: chaum_pedersen::Proof,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct SelectionDecryptionShare {
    pub partial: PartialDecryption,

    /// Fragments for every absent guardian, keyed by the absent guardian's id.
    pub compensated: BTreeMap<String, CompensatedDecryption>,
}

/// Everything one guardian contributes to decrypting one tally or one spoiled ballot.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct DecryptionShare {
    pub guardian_id: String,

    /// The tally id or ballot id being decrypted.
    pub target_id: String,

    pub contests: ContestMap<SelectionDecryptionShare>,
}

/// The decryption of an encrypted value, with proofs that it was decrypted properly.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct DecryptedValue {
    /// The cleartext value `t`.
    pub cleartext: u64,

    /// The decrypted value `M = g^t`.
    pub decrypted_value: ElementModP,

    /// The encryption of `t`.  Decrypting this reveals `g^t`, which is `decrypted_value` above.
    pub encrypted_value: Ciphertext,

    /// One share `M_i` per guardian, present or compensated, whose product strips the blinding
    /// from `encrypted_value`.
    pub shares: Vec<Share>,
}

/// A single guardian's share of a decryption of some encrypted message `(a, b)`.  The encrypted
/// message can be an encrypted tally or a selection from a spoiled ballot.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Share {
    pub guardian_id: String,

    /// The information used to reconstruct this decryption share, if this guardian was absent
    /// during decryption.
    pub recovery: Option<ShareRecovery>,

    /// The proof that the share was properly derived from the message and the guardian's secret
    /// key.  This is `None` if the guardian was absent - in that case, the share should be
    /// checked against the recovery fragments instead.
    pub proof: Option<chaum_pedersen::Proof>,

    /// The share of the decrypted message `M_i`.
    pub share: ElementModP,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ShareRecovery {
    /// The fragments, one per present guardian, used to reconstruct this decryption share.
    pub fragments: Vec<Fragment>,
}

/// A fragment of a missing guardian's share of a decryption, including the Lagrange
/// coefficient.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Fragment {
    /// The guardian who produced this fragment.
    pub guardian_id: String,
    pub x_coordinate: u32,

    /// The actual fragment `M_{i,ℓ}`, which is guardian `i`'s piece of the missing guardian
    /// `ℓ`'s share of a decryption.
    pub fragment: ElementModP,

    /// `g^{P_ℓ(x_i)}`.
    pub recovery_public_key: ElementModP,

    /// The Lagrange coefficient `w_i` used to compute the decryption share from the fragments.
    pub lagrange_coefficient: ElementModQ,

    /// The proof that the fragment is the encrypted message raised to the secret behind
    /// `recovery_public_key`.
    pub proof: chaum_pedersen::Proof,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct DecryptedBallot {
    pub ballot_id: String,
    pub contests: ContestMap<DecryptedValue>,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct DecryptionResult {
    pub tally_result: TallyResult,
    pub tally: ContestMap<DecryptedValue>,

    #[serde(default)]
    pub spoiled_ballots: Vec<DecryptedBallot>,

    /// Guardians who took part directly.
    pub decrypting_guardians: Vec<String>,

    /// Absent guardians whose shares were reconstructed.
    pub compensated_guardians: Vec<String>,
}
