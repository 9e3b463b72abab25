use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::crypto::chaum_pedersen;
use crate::crypto::elgamal::Ciphertext;
use crate::crypto::group::{ElementModP, Group};
use crate::crypto::hash::hash;
use crate::decrypt::combiner::reconstruct_share;
use crate::decrypt::share_challenge;
use crate::election::{commitment_hash, joint_public_key, MAX_GUARDIANS};
use crate::errors::{ErrorContext, Result};
use crate::keyceremony::polynomial::{commitment_at, lagrange_coefficient};
use crate::schema::*;
use crate::serialize::Validate;
use crate::tally::{SpoiledBallotPolicy, TallyPolicy};

/// Everything published about one election: the initialized election, every submitted
/// ballot (cast and spoiled), and the decryption of the tally and the spoiled ballots.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ElectionRecord {
    pub election: ElectionInitialized,
    pub ballots: Vec<EncryptedBallot>,
    pub decryption: DecryptionResult,
}

impl Validate for ElectionRecord {
    fn validate(&self, group: &Group) -> Result<()> {
        self.election.validate(group)?;
        self.ballots.validate(group)?;
        self.decryption.validate(group)
    }
}

/// Re-verify a whole record.  Every failed check is reported, each prefixed with where in the
/// record it was found.
pub fn check(r: &ElectionRecord) -> Result<(), Vec<String>> {
    let mut errs = Vec::new();
    check_record(&mut ErrorContext::new(&mut errs), r);
    if errs.is_empty() {
        Ok(())
    } else {
        Err(errs)
    }
}

fn check_record(ctx: &mut ErrorContext, r: &ElectionRecord) {
    let election = &r.election;
    let config = &election.config;

    // Parameters

    ctx.check(config.quorum > 0, "quorum must be positive");
    ctx.check(
        config.quorum <= config.number_of_guardians,
        "quorum exceeds the number of guardians",
    );
    ctx.check(config.number_of_guardians <= MAX_GUARDIANS, "too many guardians");
    let group = match ctx.check_result(election.group()) {
        Some(group) => group,
        // Nothing else can be checked without a group.
        None => return,
    };

    // Guardian key shares

    ctx.check(
        election.guardians.len() == config.number_of_guardians(),
        "number of key shares differs from the number of guardians",
    );
    let mut ids = BTreeSet::new();
    let mut xs = BTreeSet::new();
    for g in &election.guardians {
        let mut ctx = ctx.scope(&format!("guardian {}", g.guardian_id));
        ctx.check(ids.insert(&g.guardian_id), "guardian id is used twice");
        ctx.check(xs.insert(g.x_coordinate), "x-coordinate is used twice");
        ctx.check(
            g.x_coordinate >= 1 && g.x_coordinate <= config.number_of_guardians,
            "x-coordinate out of range",
        );
        ctx.check_result(g.verify(&group, &election.base_hash, config.quorum()));
    }

    // Election hashes and joint key

    ctx.check(
        election.manifest_hash == config.manifest_hash,
        "manifest hash differs from the configuration",
    );
    ctx.check(election.base_hash == config.base_hash(), "wrong base hash");
    ctx.check(
        election.extended_base_hash
            == hash(&[&"extended", &election.base_hash, &commitment_hash(&election.guardians)]),
        "wrong extended base hash",
    );
    if let Some(K) = ctx.check_result(joint_public_key(&group, &election.guardians)) {
        ctx.check(K == election.joint_public_key, "wrong joint public key");
    }

    // Ballots

    let tally_result = &r.decryption.tally_result;
    ctx.check(
        tally_result.election == *election,
        "tally is bound to a different election",
    );
    let mut ballot_ids = BTreeSet::new();
    for ballot in &r.ballots {
        let mut ctx = ctx.scope(&format!("ballot {}", ballot.ballot_id));
        ctx.check(ballot_ids.insert(&ballot.ballot_id), "ballot id is used twice");
        ctx.check_result(ballot.verify(&group, election));
    }

    // Recomputed tally

    let tally = &tally_result.tally;
    {
        let mut ctx = ctx.scope(&format!("tally {}", tally.tally_id));
        let policy = TallyPolicy {
            verify_cast_proofs: false,
            spoiled: SpoiledBallotPolicy::Exclude,
        };
        let mut recomputed = CiphertextTally::new(&tally.tally_id);
        for ballot in &r.ballots {
            ctx.check_result(recomputed.accumulate(&group, election, ballot, &policy));
        }
        ctx.check(
            recomputed.cast_ballot_ids == tally.cast_ballot_ids,
            "cast ballot ids differ from the ballots",
        );
        ctx.check(
            recomputed.spoiled_ballot_ids == tally.spoiled_ballot_ids,
            "spoiled ballot ids differ from the ballots",
        );
        ctx.check(
            recomputed.contests == tally.contests,
            "encrypted tally is not the sum of the cast ballots",
        );
        ctx.check(
            recomputed.max_option_limit == tally.max_option_limit,
            "largest option limit differs from the ballots",
        );
    }

    // Decryption participants

    let decryption = &r.decryption;
    {
        let mut ctx = ctx.scope("decryption");
        let mut participants: Vec<&String> = decryption
            .decrypting_guardians
            .iter()
            .chain(&decryption.compensated_guardians)
            .collect();
        participants.sort();
        let mut expected: Vec<&String> =
            election.guardians.iter().map(|g| &g.guardian_id).collect();
        expected.sort();
        ctx.check(
            participants == expected,
            "decrypting and compensated guardians do not partition the guardians",
        );
        ctx.check(
            decryption.decrypting_guardians.len() >= config.quorum(),
            "fewer decrypting guardians than the quorum",
        );
    }

    // Decrypted tally

    check_decrypted_contests(
        &mut ctx.scope(&format!("decrypted tally {}", tally.tally_id)),
        &group,
        election,
        &tally.contests,
        &decryption.tally,
    );

    // Spoiled ballots

    let mut decrypted_ids = BTreeSet::new();
    for db in &decryption.spoiled_ballots {
        let mut ctx = ctx.scope(&format!("spoiled ballot {}", db.ballot_id));
        ctx.check(decrypted_ids.insert(&db.ballot_id), "decrypted twice");
        ctx.check(
            tally.spoiled_ballot_ids.contains(&db.ballot_id),
            "not a spoiled ballot",
        );
        match r.ballots.iter().find(|b| b.ballot_id == db.ballot_id) {
            Some(ballot) => check_decrypted_contests(
                &mut ctx,
                &group,
                election,
                &ballot.ciphertexts(),
                &db.contests,
            ),
            None => ctx.check(false, "no such ballot in the record"),
        }
    }
}

fn check_decrypted_contests(
    ctx: &mut ErrorContext,
    group: &Group,
    election: &ElectionInitialized,
    encrypted: &ContestMap<Ciphertext>,
    decrypted: &ContestMap<DecryptedValue>,
) {
    ctx.check(
        encrypted.keys().eq(decrypted.keys()),
        "decrypted contests differ from the encrypted contests",
    );
    for (contest_id, selections) in encrypted {
        let mut ctx = ctx.scope(&format!("contest {}", contest_id));
        let decrypted_selections = match ctx.check_get(decrypted, contest_id) {
            Some(x) => x,
            None => continue,
        };
        ctx.check(
            selections.keys().eq(decrypted_selections.keys()),
            "decrypted selections differ from the encrypted selections",
        );
        for (selection_id, ciphertext) in selections {
            let mut ctx = ctx.scope(&format!("selection {}", selection_id));
            if let Some(dv) = ctx.check_get(decrypted_selections, selection_id) {
                ctx.check(
                    dv.encrypted_value == *ciphertext,
                    "encrypted value differs from the ciphertext",
                );
                check_decrypted_value(&mut ctx, group, election, dv);
            }
        }
    }
}

fn check_decrypted_value(
    ctx: &mut ErrorContext,
    group: &Group,
    election: &ElectionInitialized,
    dv: &DecryptedValue,
) {
    let A = &dv.encrypted_value.pad;
    let M = &dv.decrypted_value;

    ctx.check(
        *M == group.g_pow_p(&group.q_from_u64(dv.cleartext)),
        "decrypted value is not g^cleartext",
    );

    let share_ids: Vec<&String> = dv.shares.iter().map(|s| &s.guardian_id).collect();
    let guardian_ids: Vec<&String> = election.guardians.iter().map(|g| &g.guardian_id).collect();
    ctx.check(
        share_ids == guardian_ids,
        "shares are not one per guardian in guardian order",
    );
    let product = group.mult_p_all(dv.shares.iter().map(|s| &s.share));
    ctx.check(
        dv.encrypted_value.blinding_removed(group, &product) == *M,
        "shares do not decrypt the encrypted value to the decrypted value",
    );

    let check_proof = |K: &ElementModP, Mi: &ElementModP, proof: &chaum_pedersen::Proof| {
        group.is_valid_residue(Mi)
            && proof
                .check_exp(group, K, A, Mi, |statement, commitment| {
                    share_challenge(
                        group,
                        &election.extended_base_hash,
                        &dv.encrypted_value,
                        statement,
                        commitment,
                    )
                })
                .is_ok()
    };

    for s in &dv.shares {
        let mut ctx = ctx.scope(&format!("share of {}", s.guardian_id));
        let guardian = match election.guardian(&s.guardian_id) {
            Some(g) => g,
            None => {
                ctx.check(false, "not a guardian of this election");
                continue;
            }
        };

        match (&s.proof, &s.recovery) {
            (Some(proof), None) => {
                if let Some(K) = ctx.check_result(guardian.public_key()) {
                    ctx.check(check_proof(K, &s.share, proof), "share proof failed");
                }
            }

            (None, Some(sr)) => {
                ctx.check(
                    sr.fragments.len() >= election.quorum(),
                    "fewer fragments than the quorum",
                );
                let helper_xs: Vec<u32> = sr.fragments.iter().map(|f| f.x_coordinate).collect();
                let mut helpers = BTreeSet::new();
                for f in &sr.fragments {
                    let mut ctx = ctx.scope(&format!("fragment from {}", f.guardian_id));
                    ctx.check(helpers.insert(&f.guardian_id), "guardian sent two fragments");
                    ctx.check(
                        f.guardian_id != s.guardian_id,
                        "guardian compensated for itself",
                    );
                    match election.guardian(&f.guardian_id) {
                        Some(helper) => ctx.check(
                            helper.x_coordinate == f.x_coordinate,
                            "wrong x-coordinate",
                        ),
                        None => ctx.check(false, "not a guardian of this election"),
                    }

                    let Kil =
                        commitment_at(group, &guardian.coefficient_commitments, f.x_coordinate);
                    ctx.check(f.recovery_public_key == Kil, "wrong recovery public key");
                    ctx.check(check_proof(&Kil, &f.fragment, &f.proof), "fragment proof failed");

                    if let Some(w) =
                        ctx.check_result(lagrange_coefficient(group, f.x_coordinate, &helper_xs))
                    {
                        ctx.check(f.lagrange_coefficient == w, "wrong Lagrange coefficient");
                    }
                }
                ctx.check(
                    reconstruct_share(group, &sr.fragments) == s.share,
                    "fragments do not combine to the share",
                );
            }

            _ => ctx.check(false, "share has neither exactly a proof nor a recovery record"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::group::ElectionConstants;
    use crate::decrypt::decrypt_with_trustees;
    use crate::encrypt::test::plaintext_ballot;
    use crate::encrypt::Encryptor;
    use crate::keyceremony::ceremony::KeyCeremony;
    use crate::tally::TallyAccumulator;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn record(seed: u64) -> ElectionRecord {
        let mut rng = StdRng::seed_from_u64(seed);
        let config =
            ElectionConfig::new(ElectionConstants::testing(), hash(&[&"manifest"]), 3, 2).unwrap();
        let ceremony = KeyCeremony::new(config).unwrap();
        let guardians = ceremony.announce_guardians(&mut rng).unwrap();
        let result = ceremony.run(guardians, &mut rng).unwrap();
        let election = result.election;

        let encryptor = Encryptor::new(&election).unwrap();
        let ballots: Vec<EncryptedBallot> = [
            (&[1_u32, 0][..], BallotState::Cast),
            (&[0, 1][..], BallotState::Cast),
            (&[1, 0][..], BallotState::Spoiled),
            (&[1, 0][..], BallotState::Cast),
        ]
        .iter()
        .enumerate()
        .map(|(i, (votes, state))| {
            let ballot = plaintext_ballot(&format!("ballot-{}", i), votes);
            encryptor.encrypt(&ballot, *state, &mut rng).unwrap()
        })
        .collect();

        let accumulator = TallyAccumulator::new(&election).unwrap();
        let tally = accumulator
            .accumulate(CiphertextTally::new("tally"), &ballots)
            .unwrap();
        let tally_result = accumulator.tally_result(tally);
        let spoiled: Vec<EncryptedBallot> = ballots
            .iter()
            .filter(|b| b.state == BallotState::Spoiled)
            .cloned()
            .collect();
        let decryption =
            decrypt_with_trustees(&tally_result, &spoiled, &result.trustees[1..], &mut rng)
                .unwrap();

        ElectionRecord {
            election,
            ballots,
            decryption,
        }
    }

    #[test]
    fn honest_record_passes() {
        let r = record(90);
        assert_eq!(r.decryption.compensated_guardians, vec!["guardian-1"]);
        assert_eq!(r.decryption.spoiled_ballots.len(), 1);
        check(&r).unwrap();
    }

    #[test]
    fn wrong_cleartext_reported() {
        let mut r = record(91);
        r.decryption
            .tally
            .get_mut("contest-1")
            .and_then(|c| c.get_mut("selection-1"))
            .unwrap()
            .cleartext += 1;
        let errs = check(&r).unwrap_err();
        dbg!(&errs);
        assert_eq!(errs.len(), 1);
        assert_eq!(
            errs[0],
            "in decrypted tally tally: in contest contest-1: in selection selection-1: \
             decrypted value is not g^cleartext"
        );
    }

    #[test]
    fn every_failure_reported() {
        let mut r = record(92);
        let group = r.election.group().unwrap();
        r.election.joint_public_key = group.generator().clone();
        r.ballots.pop();
        let fragment = &mut r
            .decryption
            .tally
            .get_mut("contest-1")
            .and_then(|c| c.get_mut("selection-2"))
            .unwrap()
            .shares[0]
            .recovery
            .as_mut()
            .unwrap()
            .fragments[1];
        fragment.lagrange_coefficient = group.one_q();

        let errs = check(&r).unwrap_err();
        dbg!(&errs);
        assert!(errs.iter().any(|e| e.contains("wrong joint public key")));
        assert!(errs.iter().any(|e| e.contains("tally is bound to a different election")));
        assert!(errs.iter().any(|e| e.contains("cast ballot ids differ")));
        assert!(errs.iter().any(|e| e.contains("not the sum of the cast ballots")));
        assert!(errs
            .iter()
            .any(|e| e.contains("fragment from guardian-3: wrong Lagrange coefficient")));
        assert!(errs
            .iter()
            .any(|e| e.contains("fragments do not combine to the share")));
    }
}
