//! Threshold decryption of tallies and spoiled ballots.
//!
//! Each available guardian, holding a `trustee::DecryptingTrustee`, produces one
//! `DecryptionShare` per target (the tally, or one spoiled ballot).  The share carries a
//! partial decryption `M_i = A^{s_i}` of every selection and, for each absent guardian `ℓ`, a
//! fragment `M_{i,ℓ} = A^{P_ℓ(x_i)}`, all with Chaum-Pedersen proofs.
//! `combiner::DecryptionCombiner` checks every proof, rebuilds each absent share as
//! `M_ℓ = ∏_i M_{i,ℓ}^{w_i}`, and solves for the plaintext.

use log::info;
use rand::Rng;

use crate::crypto::elgamal::Ciphertext;
use crate::crypto::group::{ElementModQ, Group};
use crate::crypto::hash::{challenge, Digest256};
use crate::errors::{Error, Result};
use crate::schema::{DecryptionResult, ElectionInitialized, EncryptedBallot, TallyResult};

pub mod combiner;
pub mod trustee;

use combiner::DecryptionCombiner;
use trustee::DecryptingTrustee;

/// Challenge for a partial or compensated decryption proof.  `statement` is `(K, M)`, the
/// public key and the share; `ciphertext` supplies the base `A`.
pub fn share_challenge(
    group: &Group,
    extended_base_hash: &Digest256,
    ciphertext: &Ciphertext,
    statement: &Ciphertext,
    commitment: &Ciphertext,
) -> ElementModQ {
    challenge(
        group,
        &[extended_base_hash, &"decryption share", ciphertext, statement, commitment],
    )
}

pub(crate) fn selection_target(target_id: &str, contest_id: &str, selection_id: &str) -> String {
    format!("{}/{}/{}", target_id, contest_id, selection_id)
}

/// The ids of election guardians with no trustee present.
pub fn missing_guardians(
    election: &ElectionInitialized,
    trustees: &[DecryptingTrustee],
) -> Vec<String> {
    election
        .guardians
        .iter()
        .filter(|g| !trustees.iter().any(|t| t.guardian_id == g.guardian_id))
        .map(|g| g.guardian_id.clone())
        .collect()
}

/// Run a whole decryption in one process: every trustee in `trustees` computes its shares of
/// the tally and of each spoiled ballot, and the combiner puts them together.
pub fn decrypt_with_trustees<R: Rng + ?Sized>(
    tally_result: &TallyResult,
    spoiled_ballots: &[EncryptedBallot],
    trustees: &[DecryptingTrustee],
    rng: &mut R,
) -> Result<DecryptionResult> {
    let election = &tally_result.election;
    let group = election.group()?;
    if trustees.len() < election.quorum() {
        return Err(Error::QuorumNotMet {
            needed: election.quorum(),
            available: trustees.len(),
        });
    }
    let missing = missing_guardians(election, trustees);
    info!(
        "decrypting with {} guardians, compensating for {}",
        trustees.len(),
        missing.len()
    );

    let tally = &tally_result.tally;
    let tally_shares = trustees
        .iter()
        .map(|t| {
            t.compute_share(&group, election, &tally.tally_id, &tally.contests, &missing, rng)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut ballot_shares = Vec::with_capacity(spoiled_ballots.len());
    for ballot in spoiled_ballots {
        let ciphertexts = ballot.ciphertexts();
        let shares = trustees
            .iter()
            .map(|t| {
                t.compute_share(&group, election, &ballot.ballot_id, &ciphertexts, &missing, rng)
            })
            .collect::<Result<Vec<_>>>()?;
        ballot_shares.push((ballot, shares));
    }

    let combiner = DecryptionCombiner::new(election)?;
    combiner.decryption_result(tally_result, &tally_shares, &ballot_shares)
}
