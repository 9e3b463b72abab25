//! Homomorphic tally accumulation.
//!
//! Accumulation is a fold of `CiphertextTally::accumulate` over the cast ballots.  Because
//! ciphertext addition is associative and commutative, the fold can also run as a parallel
//! reduction with `CiphertextTally::merge`, and the result never depends on ballot order.

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::crypto::elgamal::Ciphertext;
use crate::crypto::group::Group;
use crate::errors::{Error, Result};
use crate::schema::{BallotState, CiphertextTally, ElectionInitialized, EncryptedBallot, TallyResult};
use crate::serialize::Validate;

/// What to do with spoiled ballots.  Either way they never enter the sum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpoiledBallotPolicy {
    /// Track the ballot id only.
    Exclude,
    /// Check the ballot's proofs first, and reject it if they fail.
    VerifyThenExclude,
}

impl Default for SpoiledBallotPolicy {
    fn default() -> Self {
        SpoiledBallotPolicy::VerifyThenExclude
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyPolicy {
    /// Check every cast ballot's proofs before adding it.
    pub verify_cast_proofs: bool,
    pub spoiled: SpoiledBallotPolicy,
}

impl Default for TallyPolicy {
    fn default() -> Self {
        TallyPolicy {
            verify_cast_proofs: true,
            spoiled: SpoiledBallotPolicy::default(),
        }
    }
}

impl CiphertextTally {
    pub fn new(tally_id: &str) -> CiphertextTally {
        CiphertextTally {
            tally_id: tally_id.to_owned(),
            contests: Default::default(),
            cast_ballot_ids: BTreeSet::new(),
            spoiled_ballot_ids: BTreeSet::new(),
            max_option_limit: 0,
        }
    }

    pub fn contains(&self, ballot_id: &str) -> bool {
        self.cast_ballot_ids.contains(ballot_id) || self.spoiled_ballot_ids.contains(ballot_id)
    }

    /// Fold one ballot into the tally.  A cast ballot's selections are added to the running
    /// sums, starting from the ballot's own ciphertext for a selection not seen before.  A
    /// spoiled ballot is only recorded.  Nothing changes if this fails.
    pub fn accumulate(
        &mut self,
        group: &Group,
        election: &ElectionInitialized,
        ballot: &EncryptedBallot,
        policy: &TallyPolicy,
    ) -> Result<()> {
        if self.contains(&ballot.ballot_id) {
            warn!("duplicate ballot {} in tally {}", ballot.ballot_id, self.tally_id);
            return Err(Error::DuplicateBallot(ballot.ballot_id.clone()));
        }
        ballot.check_ids()?;
        let verify = match ballot.state {
            BallotState::Cast => policy.verify_cast_proofs,
            BallotState::Spoiled => policy.spoiled == SpoiledBallotPolicy::VerifyThenExclude,
        };
        if verify {
            ballot.verify(group, election)?;
        }

        match ballot.state {
            BallotState::Cast => {
                for contest in &ballot.contests {
                    let sums = self.contests.entry(contest.contest_id.clone()).or_default();
                    for selection in &contest.selections {
                        sums.entry(selection.selection_id.clone())
                            .and_modify(|sum| *sum = sum.add(group, &selection.ciphertext))
                            .or_insert_with(|| selection.ciphertext.clone());
                    }
                }
                self.cast_ballot_ids.insert(ballot.ballot_id.clone());
                self.max_option_limit = self.max_option_limit.max(ballot.max_option_limit());
            }
            BallotState::Spoiled => {
                self.spoiled_ballot_ids.insert(ballot.ballot_id.clone());
            }
        }
        debug!("tally {}: added {:?} ballot {}", self.tally_id, ballot.state, ballot.ballot_id);
        Ok(())
    }

    /// Combine two partial tallies over disjoint ballot sets.
    pub fn merge(mut self, group: &Group, other: CiphertextTally) -> Result<CiphertextTally> {
        if let Some(id) = self
            .cast_ballot_ids
            .iter()
            .chain(&self.spoiled_ballot_ids)
            .find(|id| other.contains(id.as_str()))
        {
            warn!("duplicate ballot {} across partial tallies", id);
            return Err(Error::DuplicateBallot(id.clone()));
        }

        for (contest_id, selections) in other.contests {
            let sums = self.contests.entry(contest_id).or_default();
            for (selection_id, ciphertext) in selections {
                sums.entry(selection_id)
                    .and_modify(|sum| *sum = sum.add(group, &ciphertext))
                    .or_insert(ciphertext);
            }
        }
        self.cast_ballot_ids.extend(other.cast_ballot_ids);
        self.spoiled_ballot_ids.extend(other.spoiled_ballot_ids);
        self.max_option_limit = self.max_option_limit.max(other.max_option_limit);
        Ok(self)
    }

    /// The running sum for one selection; `(1, 1)` if no cast ballot had it.
    pub fn selection(&self, group: &Group, contest_id: &str, selection_id: &str) -> Ciphertext {
        self.contests
            .get(contest_id)
            .and_then(|c| c.get(selection_id))
            .cloned()
            .unwrap_or_else(|| Ciphertext::zero(group))
    }
}

impl Validate for CiphertextTally {
    fn validate(&self, group: &Group) -> Result<()> {
        self.contests.values().try_for_each(|c| c.validate(group))
    }
}

impl Validate for TallyResult {
    fn validate(&self, group: &Group) -> Result<()> {
        self.election.validate(group)?;
        self.tally.validate(group)
    }
}

/// Tallies a batch of ballots in parallel.
pub struct TallyAccumulator<'a> {
    group: Group,
    election: &'a ElectionInitialized,
    policy: TallyPolicy,
}

impl<'a> TallyAccumulator<'a> {
    pub fn new(election: &'a ElectionInitialized) -> Result<TallyAccumulator<'a>> {
        Ok(TallyAccumulator {
            group: election.group()?,
            election,
            policy: TallyPolicy::default(),
        })
    }

    pub fn with_policy(mut self, policy: TallyPolicy) -> TallyAccumulator<'a> {
        self.policy = policy;
        self
    }

    /// Add `ballots` to `tally`.  Each ballot becomes a one-ballot tally and the pieces are
    /// merged pairwise; a duplicate anywhere, within the batch or against `tally`, fails the
    /// whole batch with `DuplicateBallot`.
    pub fn accumulate(
        &self,
        tally: CiphertextTally,
        ballots: &[EncryptedBallot],
    ) -> Result<CiphertextTally> {
        let group = &self.group;
        let tally_id = tally.tally_id.clone();
        let batch = ballots
            .par_iter()
            .map(|ballot| {
                let mut single = CiphertextTally::new(&tally_id);
                single.accumulate(group, self.election, ballot, &self.policy)?;
                Ok(single)
            })
            .try_reduce(
                || CiphertextTally::new(&tally_id),
                |a, b| a.merge(group, b),
            )?;
        let tally = tally.merge(group, batch)?;
        info!(
            "tally {}: {} cast, {} spoiled",
            tally.tally_id,
            tally.cast_ballot_ids.len(),
            tally.spoiled_ballot_ids.len()
        );
        Ok(tally)
    }

    pub fn tally_result(&self, tally: CiphertextTally) -> TallyResult {
        TallyResult {
            election: self.election.clone(),
            tally,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::elgamal::DiscreteLog;
    use crate::encrypt::test::{plaintext_ballot, single_guardian_election};
    use crate::encrypt::{ballot_hash, Encryptor};
    use crate::crypto::group::ElementModQ;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    fn ballots(
        election: &ElectionInitialized,
        votes: &[&[u32]],
        rng: &mut StdRng,
    ) -> Vec<EncryptedBallot> {
        let encryptor = Encryptor::new(election).unwrap();
        votes
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let ballot = plaintext_ballot(&format!("ballot-{}", i), v);
                encryptor.encrypt(&ballot, BallotState::Cast, rng).unwrap()
            })
            .collect()
    }

    fn counts(group: &Group, tally: &CiphertextTally, secret: &ElementModQ) -> Vec<u64> {
        let dlog = DiscreteLog::new(100);
        tally.contests["contest-1"]
            .values()
            .map(|c| c.decrypt(group, secret, &dlog).unwrap())
            .collect()
    }

    #[test]
    fn sequential_fold_counts_votes() {
        let (election, secret) = single_guardian_election();
        let group = election.group().unwrap();
        let mut rng = StdRng::seed_from_u64(60);
        let cast = ballots(&election, &[&[1, 0, 0], &[0, 1, 0], &[1, 0, 0]], &mut rng);

        let mut tally = CiphertextTally::new("tally");
        for ballot in &cast {
            tally
                .accumulate(&group, &election, ballot, &TallyPolicy::default())
                .unwrap();
        }
        assert_eq!(counts(&group, &tally, &secret), vec![2, 1, 0]);
        assert_eq!(tally.cast_ballot_ids.len(), 3);
        assert_eq!(tally.max_option_limit, 1);
    }

    #[test]
    fn order_independent() {
        let (election, _) = single_guardian_election();
        let mut rng = StdRng::seed_from_u64(61);
        let mut cast = ballots(
            &election,
            &[&[1, 0], &[0, 1], &[1, 0], &[0, 0], &[0, 1]],
            &mut rng,
        );
        let accumulator = TallyAccumulator::new(&election).unwrap();
        let first = accumulator
            .accumulate(CiphertextTally::new("tally"), &cast)
            .unwrap();

        cast.shuffle(&mut rng);
        let second = accumulator
            .accumulate(CiphertextTally::new("tally"), &cast)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn duplicate_rejected() {
        let (election, _) = single_guardian_election();
        let group = election.group().unwrap();
        let mut rng = StdRng::seed_from_u64(62);
        let cast = ballots(&election, &[&[1, 0]], &mut rng);

        let mut tally = CiphertextTally::new("tally");
        let policy = TallyPolicy::default();
        tally.accumulate(&group, &election, &cast[0], &policy).unwrap();
        let before = tally.clone();
        assert!(matches!(
            tally.accumulate(&group, &election, &cast[0], &policy),
            Err(Error::DuplicateBallot(id)) if id == "ballot-0"
        ));
        assert_eq!(tally, before);

        let accumulator = TallyAccumulator::new(&election).unwrap();
        let twice = vec![cast[0].clone(), cast[0].clone()];
        assert!(matches!(
            accumulator.accumulate(CiphertextTally::new("tally"), &twice),
            Err(Error::DuplicateBallot(_))
        ));
    }

    #[test]
    fn spoiled_ballots_tracked_not_summed() {
        let (election, secret) = single_guardian_election();
        let group = election.group().unwrap();
        let mut rng = StdRng::seed_from_u64(63);
        let mut all = ballots(&election, &[&[1, 0], &[0, 1]], &mut rng);
        all[1].state = BallotState::Spoiled;

        let accumulator = TallyAccumulator::new(&election)
            .unwrap()
            .with_policy(TallyPolicy {
                verify_cast_proofs: true,
                spoiled: SpoiledBallotPolicy::Exclude,
            });
        let tally = accumulator
            .accumulate(CiphertextTally::new("tally"), &all)
            .unwrap();
        assert_eq!(counts(&group, &tally, &secret), vec![1, 0]);
        assert!(tally.spoiled_ballot_ids.contains("ballot-1"));
        assert!(!tally.cast_ballot_ids.contains("ballot-1"));
    }

    #[test]
    fn invalid_spoiled_ballot_rejected_when_verifying() {
        let (election, _) = single_guardian_election();
        let group = election.group().unwrap();
        let mut rng = StdRng::seed_from_u64(64);
        let mut spoiled = ballots(&election, &[&[1, 0]], &mut rng).remove(0);
        spoiled.state = BallotState::Spoiled;
        let c = &mut spoiled.contests[0].selections[0].ciphertext;
        c.data = group.mult_p(&c.data, group.generator());

        let mut tally = CiphertextTally::new("tally");
        assert!(matches!(
            tally.accumulate(&group, &election, &spoiled, &TallyPolicy::default()),
            Err(Error::InvalidProof(_))
        ));
        let lenient = TallyPolicy {
            verify_cast_proofs: true,
            spoiled: SpoiledBallotPolicy::Exclude,
        };
        assert!(tally.accumulate(&group, &election, &spoiled, &lenient).is_ok());
    }

    #[test]
    fn merge_disjoint_partials() {
        let (election, secret) = single_guardian_election();
        let group = election.group().unwrap();
        let mut rng = StdRng::seed_from_u64(65);
        let cast = ballots(&election, &[&[1, 0], &[0, 1], &[1, 0]], &mut rng);
        let accumulator = TallyAccumulator::new(&election).unwrap();

        let left = accumulator
            .accumulate(CiphertextTally::new("tally"), &cast[..1])
            .unwrap();
        let right = accumulator
            .accumulate(CiphertextTally::new("tally"), &cast[1..])
            .unwrap();
        let merged = left.clone().merge(&group, right).unwrap();
        assert_eq!(counts(&group, &merged, &secret), vec![2, 1]);
        assert!(matches!(
            merged.merge(&group, left),
            Err(Error::DuplicateBallot(_))
        ));
    }

    #[test]
    fn repeated_contest_or_selection_rejected() {
        let (election, _) = single_guardian_election();
        let group = election.group().unwrap();
        let mut rng = StdRng::seed_from_u64(66);
        let lenient = TallyPolicy {
            verify_cast_proofs: false,
            spoiled: SpoiledBallotPolicy::Exclude,
        };

        // Every proof in the copied contest still holds, and the ballot hash is recomputed.
        let mut ballot = ballots(&election, &[&[1, 0]], &mut rng).remove(0);
        let copy = ballot.contests[0].clone();
        ballot.contests.push(copy);
        ballot.crypto_hash = ballot_hash(&ballot.ballot_id, &ballot.contests);
        assert!(matches!(
            ballot.verify(&group, &election),
            Err(Error::InvalidProof(_))
        ));

        let mut tally = CiphertextTally::new("tally");
        for policy in &[TallyPolicy::default(), lenient] {
            assert!(matches!(
                tally.accumulate(&group, &election, &ballot, policy),
                Err(Error::InvalidProof(_))
            ));
        }
        assert_eq!(tally, CiphertextTally::new("tally"));

        let mut ballot = ballots(&election, &[&[1, 0]], &mut rng).remove(0);
        let copy = ballot.contests[0].selections[0].clone();
        ballot.contests[0].selections.push(copy);
        assert!(matches!(
            tally.accumulate(&group, &election, &ballot, &lenient),
            Err(Error::InvalidProof(_))
        ));
        assert_eq!(tally, CiphertextTally::new("tally"));
    }
}
