use log::{info, warn};
use rayon::prelude::*;
use std::collections::BTreeMap;

use super::{selection_target, share_challenge};
use crate::crypto::chaum_pedersen;
use crate::crypto::elgamal::{Ciphertext, DiscreteLog};
use crate::crypto::group::{ElementModP, ElementModQ, Group};
use crate::errors::{Error, Result};
use crate::keyceremony::polynomial::{commitment_at, lagrange_coefficient};
use crate::schema::{
    ContestMap, DecryptedBallot, DecryptedValue, DecryptionResult, DecryptionShare,
    ElectionInitialized, EncryptedBallot, Fragment, GuardianKeyShare, SelectionDecryptionShare,
    Share, ShareRecovery, TallyResult,
};
use crate::serialize::Validate;

impl Validate for DecryptionShare {
    fn validate(&self, group: &Group) -> Result<()> {
        for selection in self.contests.values().flat_map(|c| c.values()) {
            selection.partial.share.validate(group)?;
            selection.partial.proof.validate(group)?;
            for fragment in selection.compensated.values() {
                fragment.share.validate(group)?;
                fragment.recovery_public_key.validate(group)?;
                fragment.proof.validate(group)?;
            }
        }
        Ok(())
    }
}

impl Validate for DecryptedValue {
    fn validate(&self, group: &Group) -> Result<()> {
        self.decrypted_value.validate(group)?;
        self.encrypted_value.validate(group)?;
        for share in &self.shares {
            share.share.validate(group)?;
            share.proof.validate(group)?;
            for f in share.recovery.iter().flat_map(|r| &r.fragments) {
                f.fragment.validate(group)?;
                f.recovery_public_key.validate(group)?;
                f.lagrange_coefficient.validate(group)?;
                f.proof.validate(group)?;
            }
        }
        Ok(())
    }
}

impl Validate for DecryptedBallot {
    fn validate(&self, group: &Group) -> Result<()> {
        self.contests.validate(group)
    }
}

impl Validate for DecryptionResult {
    fn validate(&self, group: &Group) -> Result<()> {
        self.tally_result.validate(group)?;
        self.tally.validate(group)?;
        self.spoiled_ballots.validate(group)
    }
}

/// Who is present, who is missing, and the precomputed public values needed to check and
/// combine shares for one election.
struct Participants<'s> {
    /// Present guardians, in election order, with their shares and Lagrange weights.
    present: Vec<(&'s GuardianKeyShare, &'s DecryptionShare, ElementModQ)>,

    /// Absent guardians, with `g^{P_ℓ(x_i)}` for each present `i` in the same order as
    /// `present`.
    missing: Vec<(&'s GuardianKeyShare, Vec<ElementModP>)>,
}

/// Checks every guardian's decryption share and combines them into plaintexts.
pub struct DecryptionCombiner<'a> {
    group: Group,
    election: &'a ElectionInitialized,
    plaintext_bound: Option<u64>,
}

impl<'a> DecryptionCombiner<'a> {
    pub fn new(election: &'a ElectionInitialized) -> Result<DecryptionCombiner<'a>> {
        Ok(DecryptionCombiner {
            group: election.group()?,
            election,
            plaintext_bound: None,
        })
    }

    /// Largest plaintext the discrete-log search will try.  Without this, a tally is searched
    /// up to its number of cast ballots times its largest option limit, and a ballot up to its
    /// largest option limit.
    pub fn with_plaintext_bound(mut self, bound: u64) -> DecryptionCombiner<'a> {
        self.plaintext_bound = Some(bound);
        self
    }

    /// Decrypt `ciphertexts` (belonging to `target_id`) from the guardians' `shares`.
    /// `default_bound` is the plaintext bound used unless one was configured.
    pub fn combine(
        &self,
        target_id: &str,
        ciphertexts: &ContestMap<Ciphertext>,
        shares: &[DecryptionShare],
        default_bound: u64,
    ) -> Result<ContestMap<DecryptedValue>> {
        let participants = self.participants(target_id, shares)?;
        let dlog = DiscreteLog::new(self.plaintext_bound.unwrap_or(default_bound));

        let selections: Vec<(&String, &String, &Ciphertext)> = ciphertexts
            .iter()
            .flat_map(|(c, sels)| sels.iter().map(move |(s, ct)| (c, s, ct)))
            .collect();
        let decrypted = selections
            .par_iter()
            .map(|&(contest_id, selection_id, ciphertext)| {
                let target = selection_target(target_id, contest_id, selection_id);
                let value = self.combine_selection(
                    &participants,
                    &target,
                    contest_id,
                    selection_id,
                    ciphertext,
                    &dlog,
                )?;
                Ok((contest_id, selection_id, value))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut contests: ContestMap<DecryptedValue> = BTreeMap::new();
        for (contest_id, selection_id, value) in decrypted {
            contests
                .entry(contest_id.clone())
                .or_default()
                .insert(selection_id.clone(), value);
        }
        Ok(contests)
    }

    pub fn decrypt_tally(
        &self,
        tally_result: &TallyResult,
        shares: &[DecryptionShare],
    ) -> Result<ContestMap<DecryptedValue>> {
        let tally = &tally_result.tally;
        let cast = tally.cast_ballot_ids.len() as u64;
        let bound = cast.saturating_mul(tally.max_option_limit);
        let decrypted = self.combine(&tally.tally_id, &tally.contests, shares, bound)?;
        info!("decrypted tally {} ({} cast ballots)", tally.tally_id, cast);
        Ok(decrypted)
    }

    pub fn decrypt_ballot(
        &self,
        ballot: &EncryptedBallot,
        shares: &[DecryptionShare],
    ) -> Result<DecryptedBallot> {
        let contests = self.combine(
            &ballot.ballot_id,
            &ballot.ciphertexts(),
            shares,
            ballot.max_option_limit(),
        )?;
        info!("decrypted spoiled ballot {}", ballot.ballot_id);
        Ok(DecryptedBallot {
            ballot_id: ballot.ballot_id.clone(),
            contests,
        })
    }

    /// Decrypt the tally and every spoiled ballot, and bind them to `tally_result`.
    pub fn decryption_result(
        &self,
        tally_result: &TallyResult,
        tally_shares: &[DecryptionShare],
        ballot_shares: &[(&EncryptedBallot, Vec<DecryptionShare>)],
    ) -> Result<DecryptionResult> {
        let tally = self.decrypt_tally(tally_result, tally_shares)?;
        let spoiled_ballots = ballot_shares
            .iter()
            .map(|(ballot, shares)| self.decrypt_ballot(ballot, shares))
            .collect::<Result<Vec<_>>>()?;

        let decrypting_guardians: Vec<String> = self
            .election
            .guardians
            .iter()
            .filter(|g| tally_shares.iter().any(|s| s.guardian_id == g.guardian_id))
            .map(|g| g.guardian_id.clone())
            .collect();
        let compensated_guardians = self
            .election
            .guardians
            .iter()
            .filter(|g| !decrypting_guardians.contains(&g.guardian_id))
            .map(|g| g.guardian_id.clone())
            .collect();

        Ok(DecryptionResult {
            tally_result: tally_result.clone(),
            tally,
            spoiled_ballots,
            decrypting_guardians,
            compensated_guardians,
        })
    }

    fn participants<'s>(
        &'s self,
        target_id: &str,
        shares: &'s [DecryptionShare],
    ) -> Result<Participants<'s>> {
        let mut by_guardian: BTreeMap<&str, &DecryptionShare> = BTreeMap::new();
        for share in shares {
            let invalid = || Error::InvalidShare {
                guardian_id: share.guardian_id.clone(),
                target: target_id.to_owned(),
            };
            if self.election.guardian(&share.guardian_id).is_none() {
                warn!("decryption share from unknown guardian {}", share.guardian_id);
                return Err(invalid());
            }
            if share.target_id != target_id {
                warn!(
                    "guardian {} sent a share of {} when {} was being decrypted",
                    share.guardian_id, share.target_id, target_id
                );
                return Err(invalid());
            }
            if by_guardian.insert(&share.guardian_id, share).is_some() {
                warn!("guardian {} sent two shares of {}", share.guardian_id, target_id);
                return Err(invalid());
            }
        }

        let quorum = self.election.quorum();
        if by_guardian.len() < quorum {
            return Err(Error::QuorumNotMet {
                needed: quorum,
                available: by_guardian.len(),
            });
        }

        let present_guardians: Vec<&GuardianKeyShare> = self
            .election
            .guardians
            .iter()
            .filter(|g| by_guardian.contains_key(g.guardian_id.as_str()))
            .collect();
        let xs: Vec<u32> = present_guardians.iter().map(|g| g.x_coordinate).collect();
        let present = present_guardians
            .iter()
            .map(|&g| {
                let weight = lagrange_coefficient(&self.group, g.x_coordinate, &xs)?;
                Ok((g, by_guardian[g.guardian_id.as_str()], weight))
            })
            .collect::<Result<Vec<_>>>()?;

        let missing = self
            .election
            .guardians
            .iter()
            .filter(|g| !by_guardian.contains_key(g.guardian_id.as_str()))
            .map(|g| {
                let recovery_keys = xs
                    .iter()
                    .map(|&x| commitment_at(&self.group, &g.coefficient_commitments, x))
                    .collect();
                (g, recovery_keys)
            })
            .collect();

        Ok(Participants { present, missing })
    }

    fn combine_selection(
        &self,
        participants: &Participants<'_>,
        target: &str,
        contest_id: &str,
        selection_id: &str,
        ciphertext: &Ciphertext,
        dlog: &DiscreteLog,
    ) -> Result<DecryptedValue> {
        let group = &self.group;
        let extended_base_hash = &self.election.extended_base_hash;
        let invalid = |guardian_id: &str| {
            warn!("invalid decryption share from guardian {} for {}", guardian_id, target);
            Error::InvalidShare {
                guardian_id: guardian_id.to_owned(),
                target: target.to_owned(),
            }
        };
        // `M = A^s` under public key `K`.
        let check = |public_key: &ElementModP, share: &ElementModP, proof: &chaum_pedersen::Proof| {
            group.is_valid_residue(share)
                && proof
                    .check_exp(group, public_key, &ciphertext.pad, share, |statement, commitment| {
                        share_challenge(group, extended_base_hash, ciphertext, statement, commitment)
                    })
                    .is_ok()
        };

        let selection_shares = participants
            .present
            .iter()
            .map(|(guardian, share, _)| {
                share
                    .contests
                    .get(contest_id)
                    .and_then(|c| c.get(selection_id))
                    .ok_or_else(|| invalid(&guardian.guardian_id))
            })
            .collect::<Result<Vec<&SelectionDecryptionShare>>>()?;

        let mut direct = BTreeMap::new();
        for ((guardian, _, _), selection) in participants.present.iter().zip(&selection_shares) {
            let partial = &selection.partial;
            if partial.guardian_id != guardian.guardian_id
                || !check(guardian.public_key()?, &partial.share, &partial.proof)
            {
                return Err(invalid(&guardian.guardian_id));
            }
            direct.insert(
                guardian.guardian_id.as_str(),
                Share {
                    guardian_id: guardian.guardian_id.clone(),
                    recovery: None,
                    proof: Some(partial.proof.clone()),
                    share: partial.share.clone(),
                },
            );
        }

        let mut recovered = BTreeMap::new();
        for (missing, recovery_keys) in &participants.missing {
            let mut fragments = Vec::with_capacity(participants.present.len());
            for (((helper, _, weight), selection), recovery_key) in participants
                .present
                .iter()
                .zip(&selection_shares)
                .zip(recovery_keys)
            {
                let fragment = selection
                    .compensated
                    .get(&missing.guardian_id)
                    .ok_or_else(|| invalid(&helper.guardian_id))?;
                if fragment.guardian_id != helper.guardian_id
                    || fragment.recovery_public_key != *recovery_key
                    || !check(recovery_key, &fragment.share, &fragment.proof)
                {
                    return Err(invalid(&helper.guardian_id));
                }
                fragments.push(Fragment {
                    guardian_id: helper.guardian_id.clone(),
                    x_coordinate: helper.x_coordinate,
                    fragment: fragment.share.clone(),
                    recovery_public_key: recovery_key.clone(),
                    lagrange_coefficient: weight.clone(),
                    proof: fragment.proof.clone(),
                });
            }
            let share = reconstruct_share(group, &fragments);
            recovered.insert(
                missing.guardian_id.as_str(),
                Share {
                    guardian_id: missing.guardian_id.clone(),
                    recovery: Some(ShareRecovery { fragments }),
                    proof: None,
                    share,
                },
            );
        }

        // Emit shares in election order, whether direct or recovered.
        let shares: Vec<Share> = self
            .election
            .guardians
            .iter()
            .filter_map(|g| {
                let id = g.guardian_id.as_str();
                direct.remove(id).or_else(|| recovered.remove(id))
            })
            .collect();

        let product = group.mult_p_all(shares.iter().map(|s| &s.share));
        let decrypted_value = ciphertext.blinding_removed(group, &product);
        let cleartext = dlog
            .solve(group, &decrypted_value)
            .map_err(|_| Error::PlaintextOutOfRange {
                context: target.to_owned(),
                bound: dlog.bound(),
            })?;

        Ok(DecryptedValue {
            cleartext,
            decrypted_value,
            encrypted_value: ciphertext.clone(),
            shares,
        })
    }
}

/// `M_ℓ = ∏_i M_{i,ℓ}^{w_i}`.
pub fn reconstruct_share(group: &Group, fragments: &[Fragment]) -> ElementModP {
    group.mult_p_all(
        fragments
            .iter()
            .map(|f| group.pow_p(&f.fragment, &f.lagrange_coefficient))
            .collect::<Vec<_>>()
            .iter(),
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::decrypt::trustee::DecryptingTrustee;
    use crate::encrypt::test::plaintext_ballot;
    use crate::encrypt::Encryptor;
    use crate::crypto::group::ElectionConstants;
    use crate::crypto::hash::hash;
    use crate::keyceremony::ceremony::KeyCeremony;
    use crate::schema::{BallotState, CiphertextTally, ElectionConfig};
    use crate::tally::TallyAccumulator;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn setup(rng: &mut StdRng) -> (Vec<DecryptingTrustee>, TallyResult) {
        let config =
            ElectionConfig::new(ElectionConstants::testing(), hash(&[&"manifest"]), 3, 2).unwrap();
        let ceremony = KeyCeremony::new(config).unwrap();
        let guardians = ceremony.announce_guardians(rng).unwrap();
        let result = ceremony.run(guardians, rng).unwrap();

        let encryptor = Encryptor::new(&result.election).unwrap();
        let ballots = [[1_u32, 0, 0], [0, 0, 1], [1, 0, 0], [1, 0, 0]]
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let ballot = plaintext_ballot(&format!("ballot-{}", i), v);
                encryptor.encrypt(&ballot, BallotState::Cast, rng).unwrap()
            })
            .collect::<Vec<_>>();
        let accumulator = TallyAccumulator::new(&result.election).unwrap();
        let tally = accumulator
            .accumulate(CiphertextTally::new("tally"), &ballots)
            .unwrap();
        (result.trustees, accumulator.tally_result(tally))
    }

    fn shares(
        trustees: &[DecryptingTrustee],
        tally_result: &TallyResult,
        rng: &mut StdRng,
    ) -> Vec<DecryptionShare> {
        let election = &tally_result.election;
        let group = election.group().unwrap();
        let missing = super::super::missing_guardians(election, trustees);
        trustees
            .iter()
            .map(|t| {
                t.compute_share(
                    &group,
                    election,
                    "tally",
                    &tally_result.tally.contests,
                    &missing,
                    rng,
                )
                .unwrap()
            })
            .collect()
    }

    fn counts(decrypted: &ContestMap<DecryptedValue>) -> Vec<u64> {
        decrypted["contest-1"].values().map(|v| v.cleartext).collect()
    }

    #[test]
    fn compensated_matches_full_decryption() {
        let mut rng = StdRng::seed_from_u64(70);
        let (trustees, tally_result) = setup(&mut rng);
        let combiner = DecryptionCombiner::new(&tally_result.election).unwrap();

        let all = shares(&trustees, &tally_result, &mut rng);
        let full = combiner.decrypt_tally(&tally_result, &all).unwrap();
        assert_eq!(counts(&full), vec![3, 0, 1]);

        let partial = shares(&trustees[1..], &tally_result, &mut rng);
        let compensated = combiner.decrypt_tally(&tally_result, &partial).unwrap();
        assert_eq!(counts(&compensated), vec![3, 0, 1]);

        // The reconstructed share of guardian-1 is exactly what guardian-1 would have sent.
        let direct = &full["contest-1"]["selection-1"].shares[0];
        let rebuilt = &compensated["contest-1"]["selection-1"].shares[0];
        assert_eq!(rebuilt.guardian_id, "guardian-1");
        assert!(rebuilt.proof.is_none());
        assert_eq!(rebuilt.recovery.as_ref().unwrap().fragments.len(), 2);
        assert_eq!(rebuilt.share, direct.share);
    }

    #[test]
    fn below_quorum() {
        let mut rng = StdRng::seed_from_u64(71);
        let (trustees, tally_result) = setup(&mut rng);
        let combiner = DecryptionCombiner::new(&tally_result.election).unwrap();
        let all = shares(&trustees, &tally_result, &mut rng);
        assert!(matches!(
            combiner.decrypt_tally(&tally_result, &all[..1]),
            Err(Error::QuorumNotMet { needed: 2, available: 1 })
        ));
    }

    #[test]
    fn forged_partial_names_guardian() {
        let mut rng = StdRng::seed_from_u64(72);
        let (trustees, tally_result) = setup(&mut rng);
        let group = tally_result.election.group().unwrap();
        let combiner = DecryptionCombiner::new(&tally_result.election).unwrap();
        let mut all = shares(&trustees, &tally_result, &mut rng);

        let forged = all[2]
            .contests
            .get_mut("contest-1")
            .and_then(|c| c.get_mut("selection-2"))
            .unwrap();
        forged.partial.share = group.mult_p(&forged.partial.share, group.generator());

        match combiner.decrypt_tally(&tally_result, &all) {
            Err(Error::InvalidShare { guardian_id, target }) => {
                assert_eq!(guardian_id, "guardian-3");
                assert_eq!(target, "tally/contest-1/selection-2");
            }
            other => panic!("expected InvalidShare, got {:?}", other),
        }
    }

    #[test]
    fn forged_fragment_names_helper() {
        let mut rng = StdRng::seed_from_u64(73);
        let (trustees, tally_result) = setup(&mut rng);
        let group = tally_result.election.group().unwrap();
        let combiner = DecryptionCombiner::new(&tally_result.election).unwrap();
        let mut partial = shares(&trustees[..2], &tally_result, &mut rng);

        let fragment = partial[0]
            .contests
            .get_mut("contest-1")
            .and_then(|c| c.get_mut("selection-1"))
            .and_then(|s| s.compensated.get_mut("guardian-3"))
            .unwrap();
        fragment.share = group.mult_p(&fragment.share, group.generator());

        assert!(matches!(
            combiner.decrypt_tally(&tally_result, &partial),
            Err(Error::InvalidShare { guardian_id, .. }) if guardian_id == "guardian-1"
        ));
    }

    #[test]
    fn share_set_errors() {
        let mut rng = StdRng::seed_from_u64(74);
        let (trustees, tally_result) = setup(&mut rng);
        let combiner = DecryptionCombiner::new(&tally_result.election).unwrap();
        let all = shares(&trustees, &tally_result, &mut rng);

        let twice = vec![all[0].clone(), all[0].clone(), all[1].clone()];
        assert!(matches!(
            combiner.decrypt_tally(&tally_result, &twice),
            Err(Error::InvalidShare { .. })
        ));

        let mut misdirected = all.clone();
        misdirected[1].target_id = "another tally".to_owned();
        assert!(matches!(
            combiner.decrypt_tally(&tally_result, &misdirected),
            Err(Error::InvalidShare { guardian_id, .. }) if guardian_id == "guardian-2"
        ));

        let mut incomplete = all;
        incomplete[0]
            .contests
            .get_mut("contest-1")
            .unwrap()
            .remove("selection-3");
        assert!(matches!(
            combiner.decrypt_tally(&tally_result, &incomplete),
            Err(Error::InvalidShare { guardian_id, .. }) if guardian_id == "guardian-1"
        ));
    }

    #[test]
    fn bound_too_small() {
        let mut rng = StdRng::seed_from_u64(75);
        let (trustees, tally_result) = setup(&mut rng);
        let combiner = DecryptionCombiner::new(&tally_result.election)
            .unwrap()
            .with_plaintext_bound(2);
        let all = shares(&trustees, &tally_result, &mut rng);
        assert!(matches!(
            combiner.decrypt_tally(&tally_result, &all),
            Err(Error::PlaintextOutOfRange { bound: 2, .. })
        ));
    }
}
