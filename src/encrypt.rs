//! Ballot encryption.  Every selection is encrypted under the joint key with a range proof
//! over `0..=option_limit`, and every contest carries a range proof that its selections add up
//! to at most `votes_allowed`.

use log::{debug, warn};
use rand::Rng;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Mutex;

use crate::crypto::chaum_pedersen::range;
use crate::crypto::elgamal::Ciphertext;
use crate::crypto::group::{ElementModP, ElementModQ, Group};
use crate::crypto::hash::{challenge, hash, Digest256, Hashable};
use crate::crypto::nonce::Nonces;
use crate::errors::{Error, Result};
use crate::schema::{
    BallotState, ContestMap, ElectionInitialized, EncryptedBallot, EncryptedContest,
    EncryptedSelection, PlaintextBallot, PlaintextContest,
};
use crate::serialize::Validate;

/// Encrypts ballots for one election, remembering every pad it has produced so that a
/// repeated nonce is caught.
pub struct Encryptor<'a> {
    group: Group,
    election: &'a ElectionInitialized,
    seen_pads: Mutex<HashSet<ElementModP>>,
}

impl<'a> Encryptor<'a> {
    pub fn new(election: &'a ElectionInitialized) -> Result<Encryptor<'a>> {
        Ok(Encryptor {
            group: election.group()?,
            election,
            seen_pads: Mutex::new(HashSet::new()),
        })
    }

    /// Encrypt with a fresh master nonce.
    pub fn encrypt<R: Rng + ?Sized>(
        &self,
        ballot: &PlaintextBallot,
        state: BallotState,
        rng: &mut R,
    ) -> Result<EncryptedBallot> {
        let seed = self.group.rand_range_q(rng, 1);
        self.encrypt_with_seed(ballot, state, &seed)
    }

    /// Encrypt deterministically: every nonce is derived from `seed`, the election and the
    /// ballot id.  Encrypting the same ballot twice with the same seed is a nonce reuse.
    pub fn encrypt_with_seed(
        &self,
        ballot: &PlaintextBallot,
        state: BallotState,
        seed: &ElementModQ,
    ) -> Result<EncryptedBallot> {
        if seed.is_zero() {
            return Err(Error::InvalidGroupElement(
                "ballot nonce seed must not be zero".to_owned(),
            ));
        }
        check_unique(
            ballot.contests.iter().map(|c| &c.contest_id),
            &format!("ballot {}", ballot.ballot_id),
        )?;

        let nonces = Nonces::new(
            &self.group,
            seed,
            &[&self.election.extended_base_hash, &ballot.ballot_id],
        );
        let contests = ballot
            .contests
            .par_iter()
            .map(|contest| {
                self.encrypt_contest(
                    &ballot.ballot_id,
                    contest,
                    &nonces.child(&contest.contest_id),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let crypto_hash = ballot_hash(&ballot.ballot_id, &contests);
        debug!("encrypted ballot {} ({:?})", ballot.ballot_id, state);
        Ok(EncryptedBallot {
            ballot_id: ballot.ballot_id.clone(),
            state,
            contests,
            crypto_hash,
        })
    }

    fn encrypt_contest(
        &self,
        ballot_id: &str,
        contest: &PlaintextContest,
        nonces: &Nonces,
    ) -> Result<EncryptedContest> {
        let group = &self.group;
        let public_key = &self.election.joint_public_key;
        let extended_base_hash = &self.election.extended_base_hash;
        let location = format!("ballot {} contest {}", ballot_id, contest.contest_id);
        check_unique(contest.selections.iter().map(|s| &s.selection_id), &location)?;

        let mut selections = Vec::with_capacity(contest.selections.len());
        let mut secrets = Vec::with_capacity(contest.selections.len());
        let mut total = 0_u64;
        for selection in &contest.selections {
            let vote = u64::from(selection.vote);
            let limit = u64::from(selection.option_limit);
            let context = format!("{} selection {}", location, selection.selection_id);
            if vote > limit {
                return Err(Error::PlaintextOutOfRange {
                    context,
                    bound: limit,
                });
            }

            let own_nonces = selection_nonces(nonces, &selection.selection_id);
            let nonce = own_nonces.get(0);
            let ciphertext = Ciphertext::encrypt(group, public_key, vote, &nonce)?;
            self.record_pad(&ciphertext.pad, &context)?;

            let proof = range::Proof::prove(
                group,
                public_key,
                &ciphertext,
                &nonce,
                vote,
                limit,
                &own_nonces.child("proof"),
                |message, commitments| {
                    range_challenge(
                        group,
                        extended_base_hash,
                        "selection",
                        &selection.selection_id,
                        message,
                        commitments,
                    )
                },
            )?;

            selections.push(EncryptedSelection {
                selection_id: selection.selection_id.clone(),
                option_limit: selection.option_limit,
                crypto_hash: selection_hash(&selection.selection_id, &ciphertext),
                ciphertext,
                proof,
            });
            secrets.push(nonce);
            total += vote;
        }

        let votes_allowed = u64::from(contest.votes_allowed);
        if total > votes_allowed {
            return Err(Error::PlaintextOutOfRange {
                context: location,
                bound: votes_allowed,
            });
        }
        let sum = Ciphertext::sum(group, selections.iter().map(|s| &s.ciphertext));
        let proof = range::Proof::prove(
            group,
            public_key,
            &sum,
            &group.sum_q(&secrets),
            total,
            votes_allowed,
            &contest_proof_nonces(nonces),
            |message, commitments| {
                range_challenge(
                    group,
                    extended_base_hash,
                    "contest",
                    &contest.contest_id,
                    message,
                    commitments,
                )
            },
        )?;

        Ok(EncryptedContest {
            contest_id: contest.contest_id.clone(),
            votes_allowed: contest.votes_allowed,
            crypto_hash: contest_hash(&contest.contest_id, &selections),
            selections,
            proof,
        })
    }

    fn record_pad(&self, pad: &ElementModP, context: &str) -> Result<()> {
        let mut seen = self
            .seen_pads
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if seen.insert(pad.clone()) {
            Ok(())
        } else {
            warn!("nonce reused for {}", context);
            Err(Error::NonceReuse(context.to_owned()))
        }
    }
}

impl EncryptedBallot {
    /// Contest ids are unique within the ballot, and selection ids within each contest.  Proofs
    /// are bound to ids, not positions, so a repeated contest would otherwise count twice.
    pub fn check_ids(&self) -> Result<()> {
        let repeated = repeated_id(self.contests.iter().map(|c| &c.contest_id))
            .map(|id| format!("ballot {} repeats contest {}", self.ballot_id, id))
            .or_else(|| {
                self.contests.iter().find_map(|c| {
                    repeated_id(c.selections.iter().map(|s| &s.selection_id)).map(|id| {
                        format!(
                            "ballot {} contest {} repeats selection {}",
                            self.ballot_id, c.contest_id, id
                        )
                    })
                })
            });
        match repeated {
            Some(what) => {
                warn!("{}", what);
                Err(Error::InvalidProof(what))
            }
            None => Ok(()),
        }
    }

    /// Check the ids, every selection and contest proof, and every crypto hash.
    pub fn verify(&self, group: &Group, election: &ElectionInitialized) -> Result<()> {
        self.check_ids()?;
        let public_key = &election.joint_public_key;
        let extended_base_hash = &election.extended_base_hash;

        self.contests.par_iter().try_for_each(|contest| {
            let location = format!("ballot {} contest {}", self.ballot_id, contest.contest_id);
            for selection in &contest.selections {
                let what = format!("{} selection {}", location, selection.selection_id);
                selection
                    .proof
                    .check_range(
                        group,
                        public_key,
                        &selection.ciphertext,
                        u64::from(selection.option_limit),
                        |message, commitments| {
                            range_challenge(
                                group,
                                extended_base_hash,
                                "selection",
                                &selection.selection_id,
                                message,
                                commitments,
                            )
                        },
                    )
                    .verify(&what)?;
                if selection.crypto_hash
                    != selection_hash(&selection.selection_id, &selection.ciphertext)
                {
                    return Err(Error::InvalidProof(format!("crypto hash of {}", what)));
                }
            }

            let sum = Ciphertext::sum(group, contest.selections.iter().map(|s| &s.ciphertext));
            contest
                .proof
                .check_range(
                    group,
                    public_key,
                    &sum,
                    u64::from(contest.votes_allowed),
                    |message, commitments| {
                        range_challenge(
                            group,
                            extended_base_hash,
                            "contest",
                            &contest.contest_id,
                            message,
                            commitments,
                        )
                    },
                )
                .verify(&location)?;
            if contest.crypto_hash != contest_hash(&contest.contest_id, &contest.selections) {
                return Err(Error::InvalidProof(format!("crypto hash of {}", location)));
            }
            Ok(())
        })?;

        if self.crypto_hash != ballot_hash(&self.ballot_id, &self.contests) {
            return Err(Error::InvalidProof(format!(
                "crypto hash of ballot {}",
                self.ballot_id
            )));
        }
        Ok(())
    }

    /// The selection ciphertexts, keyed by contest id then selection id.
    pub fn ciphertexts(&self) -> ContestMap<Ciphertext> {
        self.contests
            .iter()
            .map(|contest| {
                let selections = contest
                    .selections
                    .iter()
                    .map(|s| (s.selection_id.clone(), s.ciphertext.clone()))
                    .collect::<BTreeMap<_, _>>();
                (contest.contest_id.clone(), selections)
            })
            .collect()
    }

    /// The largest value any one selection of this ballot may encrypt.
    pub fn max_option_limit(&self) -> u64 {
        self.contests
            .iter()
            .flat_map(|c| c.selections.iter())
            .map(|s| u64::from(s.option_limit))
            .max()
            .unwrap_or(0)
    }
}

impl Validate for EncryptedBallot {
    fn validate(&self, group: &Group) -> Result<()> {
        for contest in &self.contests {
            contest.proof.validate(group)?;
            for selection in &contest.selections {
                selection.ciphertext.validate(group)?;
                selection.proof.validate(group)?;
            }
        }
        Ok(())
    }
}

/// Challenge for a selection or contest range proof, bound to the election, the kind of
/// statement, its id, the ciphertext and every branch commitment.
pub fn range_challenge(
    group: &Group,
    extended_base_hash: &Digest256,
    kind: &str,
    id: &str,
    message: &Ciphertext,
    commitments: &[Ciphertext],
) -> ElementModQ {
    let mut parts: Vec<&dyn Hashable> = vec![extended_base_hash, &kind, &id, message];
    parts.extend(commitments.iter().map(|c| c as &dyn Hashable));
    challenge(group, &parts)
}

pub fn selection_hash(selection_id: &str, ciphertext: &Ciphertext) -> Digest256 {
    hash(&[&"selection", &selection_id, ciphertext])
}

pub fn contest_hash(contest_id: &str, selections: &[EncryptedSelection]) -> Digest256 {
    let mut parts: Vec<&dyn Hashable> = vec![&"contest", &contest_id];
    parts.extend(selections.iter().map(|s| &s.crypto_hash as &dyn Hashable));
    hash(&parts)
}

pub fn ballot_hash(ballot_id: &str, contests: &[EncryptedContest]) -> Digest256 {
    let mut parts: Vec<&dyn Hashable> = vec![&"ballot", &ballot_id];
    parts.extend(contests.iter().map(|c| &c.crypto_hash as &dyn Hashable));
    hash(&parts)
}

/// Selection nonces and contest-proof nonces live under different labels, so no selection id
/// can collide with the contest proof.
fn selection_nonces(contest_nonces: &Nonces, selection_id: &str) -> Nonces {
    contest_nonces.child("selection").child(selection_id)
}

fn contest_proof_nonces(contest_nonces: &Nonces) -> Nonces {
    contest_nonces.child("proof")
}

fn repeated_id<'b>(ids: impl Iterator<Item = &'b String>) -> Option<&'b String> {
    let mut seen = BTreeSet::new();
    ids.into_iter().find(|id| !seen.insert(*id))
}

fn check_unique<'b>(ids: impl Iterator<Item = &'b String>, location: &str) -> Result<()> {
    match repeated_id(ids) {
        Some(id) => Err(Error::InvalidConfig(format!("{} repeats id {}", location, id))),
        None => Ok(()),
    }
}

#[cfg(test)]
pub mod test {
    use super::*;
    use crate::crypto::elgamal::DiscreteLog;
    use crate::crypto::group::ElectionConstants;
    use crate::crypto::schnorr;
    use crate::election::coefficient_context;
    use crate::schema::{ElectionConfig, GuardianKeyShare, PlaintextSelection};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// A one-guardian election whose secret key is known, so tests can decrypt directly.
    pub fn single_guardian_election() -> (ElectionInitialized, ElementModQ) {
        let group = Group::testing();
        let config =
            ElectionConfig::new(ElectionConstants::testing(), hash(&[&"manifest"]), 1, 1).unwrap();
        let secret = group.q_from_u64(9_876_543_210);
        let public = group.g_pow_p(&secret);
        let context = coefficient_context(&config.base_hash(), "guardian-1", 0);
        let proof = schnorr::Proof::prove(&group, &public, &secret, &group.q_from_u64(77), &context);
        let share = GuardianKeyShare {
            guardian_id: "guardian-1".to_owned(),
            x_coordinate: 1,
            coefficient_commitments: vec![public],
            coefficient_proofs: vec![proof],
        };
        (ElectionInitialized::new(config, vec![share]).unwrap(), secret)
    }

    pub fn plaintext_ballot(ballot_id: &str, votes: &[u32]) -> PlaintextBallot {
        PlaintextBallot {
            ballot_id: ballot_id.to_owned(),
            contests: vec![PlaintextContest {
                contest_id: "contest-1".to_owned(),
                votes_allowed: 1,
                selections: votes
                    .iter()
                    .enumerate()
                    .map(|(i, v)| PlaintextSelection {
                        selection_id: format!("selection-{}", i + 1),
                        vote: *v,
                        option_limit: 1,
                    })
                    .collect(),
            }],
        }
    }

    #[test]
    fn encrypt_verify_decrypt() {
        let (election, secret) = single_guardian_election();
        let group = election.group().unwrap();
        let encryptor = Encryptor::new(&election).unwrap();
        let mut rng = StdRng::seed_from_u64(50);

        let ballot = plaintext_ballot("ballot-1", &[0, 1, 0]);
        let encrypted = encryptor.encrypt(&ballot, BallotState::Cast, &mut rng).unwrap();
        encrypted.verify(&group, &election).unwrap();

        let dlog = DiscreteLog::new(1);
        let votes: Vec<u64> = encrypted.contests[0]
            .selections
            .iter()
            .map(|s| s.ciphertext.decrypt(&group, &secret, &dlog).unwrap())
            .collect();
        assert_eq!(votes, vec![0, 1, 0]);
    }

    #[test]
    fn seeded_encryption_is_deterministic() {
        let (election, _) = single_guardian_election();
        let group = election.group().unwrap();
        let ballot = plaintext_ballot("ballot-1", &[1, 0]);
        let seed = group.q_from_u64(1234);

        let a = Encryptor::new(&election)
            .unwrap()
            .encrypt_with_seed(&ballot, BallotState::Cast, &seed)
            .unwrap();
        let b = Encryptor::new(&election)
            .unwrap()
            .encrypt_with_seed(&ballot, BallotState::Cast, &seed)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn repeated_seed_is_nonce_reuse() {
        let (election, _) = single_guardian_election();
        let group = election.group().unwrap();
        let encryptor = Encryptor::new(&election).unwrap();
        let ballot = plaintext_ballot("ballot-1", &[1, 0]);
        let seed = group.q_from_u64(1234);

        encryptor
            .encrypt_with_seed(&ballot, BallotState::Cast, &seed)
            .unwrap();
        assert!(matches!(
            encryptor.encrypt_with_seed(&ballot, BallotState::Cast, &seed),
            Err(Error::NonceReuse(_))
        ));
    }

    #[test]
    fn overvote_refused() {
        let (election, _) = single_guardian_election();
        let encryptor = Encryptor::new(&election).unwrap();
        let mut rng = StdRng::seed_from_u64(51);
        let ballot = plaintext_ballot("ballot-1", &[1, 1]);
        assert!(matches!(
            encryptor.encrypt(&ballot, BallotState::Cast, &mut rng),
            Err(Error::PlaintextOutOfRange { bound: 1, .. })
        ));
        let ballot = plaintext_ballot("ballot-2", &[2]);
        assert!(matches!(
            encryptor.encrypt(&ballot, BallotState::Cast, &mut rng),
            Err(Error::PlaintextOutOfRange { bound: 1, .. })
        ));
    }

    #[test]
    fn multi_vote_contest() {
        let (election, secret) = single_guardian_election();
        let group = election.group().unwrap();
        let encryptor = Encryptor::new(&election).unwrap();
        let mut rng = StdRng::seed_from_u64(52);
        let ballot = PlaintextBallot {
            ballot_id: "ballot-1".to_owned(),
            contests: vec![PlaintextContest {
                contest_id: "approval".to_owned(),
                votes_allowed: 4,
                selections: vec![
                    PlaintextSelection {
                        selection_id: "a".to_owned(),
                        vote: 3,
                        option_limit: 3,
                    },
                    PlaintextSelection {
                        selection_id: "b".to_owned(),
                        vote: 1,
                        option_limit: 3,
                    },
                ],
            }],
        };
        let encrypted = encryptor.encrypt(&ballot, BallotState::Cast, &mut rng).unwrap();
        encrypted.verify(&group, &election).unwrap();
        assert_eq!(encrypted.contests[0].proof.branches.len(), 5);
        assert_eq!(encrypted.max_option_limit(), 3);
        let a = &encrypted.contests[0].selections[0].ciphertext;
        assert_eq!(a.decrypt(&group, &secret, &DiscreteLog::new(3)).unwrap(), 3);
    }

    #[test]
    fn tampered_ciphertext_fails_verification() {
        let (election, _) = single_guardian_election();
        let group = election.group().unwrap();
        let encryptor = Encryptor::new(&election).unwrap();
        let mut rng = StdRng::seed_from_u64(53);
        let ballot = plaintext_ballot("ballot-1", &[1, 0]);
        let mut encrypted = encryptor.encrypt(&ballot, BallotState::Cast, &mut rng).unwrap();

        let selection = &mut encrypted.contests[0].selections[1];
        selection.ciphertext.data = group.mult_p(&selection.ciphertext.data, group.generator());
        assert!(matches!(
            encrypted.verify(&group, &election),
            Err(Error::InvalidProof(_))
        ));
    }

    #[test]
    fn ciphertext_map() {
        let (election, _) = single_guardian_election();
        let encryptor = Encryptor::new(&election).unwrap();
        let mut rng = StdRng::seed_from_u64(54);
        let encrypted = encryptor
            .encrypt(&plaintext_ballot("ballot-1", &[1, 0]), BallotState::Spoiled, &mut rng)
            .unwrap();
        let map = encrypted.ciphertexts();
        assert_eq!(map["contest-1"].len(), 2);
        assert_eq!(
            map["contest-1"]["selection-2"],
            encrypted.contests[0].selections[1].ciphertext
        );
    }

    #[test]
    fn selection_ids_cannot_alias_contest_proof_nonces() {
        let group = Group::testing();
        let contest = Nonces::new(&group, &group.q_from_u64(99), &[&"ballot-1"]).child("contest-1");
        let proof = contest_proof_nonces(&contest);
        for id in &["proof", "contest proof", "selection"] {
            let nonce = selection_nonces(&contest, id).get(0);
            for i in 0..4 {
                assert_ne!(nonce, proof.get(i));
            }
        }
    }
}
