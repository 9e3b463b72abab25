use serde::{Deserialize, Serialize};

use crate::crypto::elgamal::Ciphertext;
use crate::crypto::group::{ElementModP, ElementModQ, Group};
use crate::crypto::nonce::Nonces;
use crate::errors::{Error, Result};

/// A disjunction of Chaum-Pedersen proof transcripts, one per candidate plaintext `0..=limit`,
/// proving that one of them is the value encrypted (without revealing which).  With `limit = 1`
/// this is the usual zero-or-one selection proof.
///
/// If every transcript is valid for its plaintext, and the sum of the branch challenges matches
/// the expected value, then the message encrypts a value in range.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Proof {
    pub branches: Vec<super::Proof>,
}

#[derive(Debug, Serialize)]
pub struct Status {
    pub challenge: bool,
    pub branches: Vec<super::TranscriptStatus>,
}

impl Proof {
    pub fn check_range(
        &self,
        group: &Group,
        public_key: &ElementModP,
        message: &Ciphertext,
        limit: u64,
        gen_challenge: impl FnOnce(&Ciphertext, &[Ciphertext]) -> ElementModQ,
    ) -> Status {
        let shape_ok = self.branches.len() as u64 == limit.saturating_add(1);
        let commitments = self.commitments();
        let combined_challenge = group.sum_q(self.branches.iter().map(|b| &b.challenge));
        let challenge_ok = shape_ok && combined_challenge == gen_challenge(message, &commitments);

        Status {
            challenge: challenge_ok,
            branches: self.transcript_range(group, public_key, message),
        }
    }

    pub fn transcript_range(
        &self,
        group: &Group,
        public_key: &ElementModP,
        message: &Ciphertext,
    ) -> Vec<super::TranscriptStatus> {
        self.branches
            .iter()
            .enumerate()
            .map(|(j, branch)| branch.transcript_plaintext(group, public_key, message, j as u64))
            .collect()
    }

    /// Given a `message` that encrypts `plaintext` under `one_time_secret`, prove it encrypts
    /// something in `0..=limit`.  Every branch but the real one is simulated from challenges
    /// and responses drawn from `nonces`; the real branch gets whatever challenge makes the sum
    /// come out right.
    pub fn prove(
        group: &Group,
        public_key: &ElementModP,
        message: &Ciphertext,
        one_time_secret: &ElementModQ,
        plaintext: u64,
        limit: u64,
        nonces: &Nonces,
        gen_challenge: impl FnOnce(&Ciphertext, &[Ciphertext]) -> ElementModQ,
    ) -> Result<Proof> {
        if plaintext > limit {
            return Err(Error::PlaintextOutOfRange {
                context: "range proof".to_owned(),
                bound: limit,
            });
        }

        let fakes: Vec<(u64, super::Proof)> = (0..=limit)
            .filter(|j| *j != plaintext)
            .map(|j| {
                let fake = super::Proof::simulate_plaintext(
                    group,
                    public_key,
                    message,
                    j,
                    &nonces.get(2 * j + 1),
                    &nonces.get(2 * j + 2),
                );
                (j, fake)
            })
            .collect();
        let fake_challenge_sum = group.sum_q(fakes.iter().map(|(_, p)| &p.challenge));

        let real = super::Proof::prove_plaintext(
            group,
            public_key,
            message,
            one_time_secret,
            plaintext,
            &nonces.get(0),
            |_, real_commitment| {
                // NB: the `message` used to compute the combined challenge is the message being
                // proven in range.  The message provided to the callback by `prove_plaintext` is
                // shifted by the plaintext value being compared against.
                let commitments = (0..=limit)
                    .map(|j| match fakes.iter().find(|(k, _)| *k == j) {
                        Some((_, fake)) => fake.commitment.clone(),
                        None => real_commitment.clone(),
                    })
                    .collect::<Vec<_>>();
                let combined_challenge = gen_challenge(message, &commitments);
                group.sub_q(&combined_challenge, &fake_challenge_sum)
            },
        );

        let mut branches = Vec::with_capacity(limit as usize + 1);
        let mut fakes = fakes.into_iter().map(|(_, p)| p);
        for j in 0..=limit {
            if j == plaintext {
                branches.push(real.clone());
            } else if let Some(fake) = fakes.next() {
                branches.push(fake);
            }
        }
        Ok(Proof { branches })
    }

    fn commitments(&self) -> Vec<Ciphertext> {
        self.branches.iter().map(|b| b.commitment.clone()).collect()
    }
}

impl Status {
    pub fn is_ok(&self) -> bool {
        self.challenge && !self.branches.is_empty() && self.branches.iter().all(|b| b.is_ok())
    }

    pub fn verify(&self, what: &str) -> Result<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(Error::InvalidProof(format!("range proof for {}: {:?}", what, self)))
        }
    }
}
