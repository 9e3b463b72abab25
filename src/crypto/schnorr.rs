use serde::{Deserialize, Serialize};
use std::iter;

use crate::crypto::group::{ElementModP, ElementModQ, Group};
use crate::crypto::hash::{challenge, Digest256};
use crate::errors::{Error, Result};

/// Schnorr proof of possession: the prover knows `s` with `K = gˢ`.
///
/// Each key-ceremony coefficient commitment carries one, with the challenge bound to the
/// guardian and the coefficient index through `context`.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Proof {
    /// `h = gᵘ` for a fresh `u`.
    pub commitment: ElementModP,

    /// `c = H(K, h, context)`
    pub challenge: ElementModQ,

    /// `v = u + c s mod q`
    pub response: ElementModQ,
}

/// One way a Schnorr proof can fail to verify.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Defect {
    PublicKey,
    Commitment,
    Challenge,
    Response,
}

impl Proof {
    pub fn prove(
        group: &Group,
        public_key: &ElementModP,
        secret_key: &ElementModQ,
        one_time_secret: &ElementModQ,
        context: &Digest256,
    ) -> Proof {
        let commitment = group.g_pow_p(one_time_secret);
        let c = challenge(group, &[public_key, &commitment, context]);
        let response = group.a_plus_bc_q(one_time_secret, &c, secret_key);
        Proof {
            commitment,
            challenge: c,
            response,
        }
    }

    /// Every reason this proof fails to show knowledge of the secret behind `public_key`.  An
    /// empty iterator means the proof is valid.
    pub fn check<'a>(
        &'a self,
        group: &'a Group,
        public_key: &'a ElementModP,
        context: &'a Digest256,
    ) -> impl Iterator<Item = Defect> + 'a {
        let public_key_error = if group.is_valid_residue(public_key) {
            None
        } else {
            Some(Defect::PublicKey)
        };

        let commitment_error = if group.is_valid_residue(&self.commitment) {
            None
        } else {
            Some(Defect::Commitment)
        };

        let challenge_error = if self.is_challenge_ok(group, public_key, context) {
            None
        } else {
            Some(Defect::Challenge)
        };

        let response_error = if self.is_response_ok(group, public_key) {
            None
        } else {
            Some(Defect::Response)
        };

        iter::empty()
            .chain(public_key_error)
            .chain(commitment_error)
            .chain(challenge_error)
            .chain(response_error)
    }

    /// `check`, folded into the crate's error type.  `what` names the proven key in the error.
    pub fn verify(
        &self,
        group: &Group,
        public_key: &ElementModP,
        context: &Digest256,
        what: &str,
    ) -> Result<()> {
        let defects: Vec<Defect> = self.check(group, public_key, context).collect();
        if defects.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidProof(format!(
                "Schnorr proof for {}: {:?}",
                what, defects
            )))
        }
    }

    #[allow(clippy::many_single_char_names)]
    fn is_response_ok(&self, group: &Group, public_key: &ElementModP) -> bool {
        let Proof {
            commitment: h,
            challenge: c,
            response: v,
        } = self;
        let k = public_key;

        group.is_in_bounds_q(v) && group.g_pow_p(v) == group.mult_p(h, &group.pow_p(k, c))
    }

    fn is_challenge_ok(&self, group: &Group, public_key: &ElementModP, context: &Digest256) -> bool {
        let expected = challenge(group, &[public_key, &self.commitment, context]);
        expected == self.challenge
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::hash::hash;

    fn setup() -> (Group, ElementModQ, ElementModP, Digest256, Proof) {
        let group = Group::testing();
        let secret_key = group.q_from_u64(22757);
        let public_key = group.g_pow_p(&secret_key);
        let context = hash(&[&"guardian-1", &0_u64]);
        let proof = Proof::prove(
            &group,
            &public_key,
            &secret_key,
            &group.q_from_u64(3048),
            &context,
        );
        (group, secret_key, public_key, context, proof)
    }

    #[test]
    fn prove_check() {
        let (group, _, public_key, context, proof) = setup();
        let defects: Vec<_> = proof.check(&group, &public_key, &context).collect();
        dbg!(&defects);
        assert!(defects.is_empty());
        assert!(proof.verify(&group, &public_key, &context, "coefficient 0").is_ok());
    }

    #[test]
    fn mutated_challenge_fails() {
        let (group, _, public_key, context, mut proof) = setup();
        proof.challenge = group.add_q(&proof.challenge, &group.one_q());
        let defects: Vec<_> = proof.check(&group, &public_key, &context).collect();
        assert!(defects.contains(&Defect::Challenge));
    }

    #[test]
    fn mutated_response_fails() {
        let (group, _, public_key, context, mut proof) = setup();
        proof.response = group.add_q(&proof.response, &group.one_q());
        let defects: Vec<_> = proof.check(&group, &public_key, &context).collect();
        assert_eq!(defects, vec![Defect::Response]);
    }

    #[test]
    fn mutated_commitment_fails() {
        let (group, _, public_key, context, mut proof) = setup();
        proof.commitment = group.mult_p(&proof.commitment, group.generator());
        assert!(proof.verify(&group, &public_key, &context, "coefficient 0").is_err());
    }

    #[test]
    fn mutated_public_key_fails() {
        let (group, secret_key, _, context, proof) = setup();
        let other_key = group.g_pow_p(&group.add_q(&secret_key, &group.one_q()));
        let defects: Vec<_> = proof.check(&group, &other_key, &context).collect();
        assert!(defects.contains(&Defect::Challenge));
        assert!(defects.contains(&Defect::Response));
    }

    #[test]
    fn wrong_context_fails() {
        let (group, _, public_key, _, proof) = setup();
        let other_context = hash(&[&"guardian-2", &0_u64]);
        assert!(matches!(
            proof.verify(&group, &public_key, &other_context, "coefficient 0"),
            Err(Error::InvalidProof(_))
        ));
    }
}
