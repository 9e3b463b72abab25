use serde::{Deserialize, Serialize};

use crate::crypto::elgamal::Ciphertext;
use crate::crypto::group::{ElementModP, ElementModQ, Group};
use crate::errors::{Error, Result};

pub mod range;

/// A Chaum-Pedersen transcript: commitment `(α, β)`, challenge `c` and response `u`.
///
/// Every statement proven here reduces to one shape: a pair `(a, b)` is `(g^r, h^r)` for some
/// `r` the prover knows.  Read with `h` as the election key, that says `(a, b)` encrypts zero.
/// The other statements are rewritten into it:
///
/// * `plaintext`: `(A, B)` encrypts `m` when `(A, B / gᵐ)` encrypts zero.
/// * `exp`: `M = Aˢ` for the `s` behind `K = gˢ` when `(K, M)` "encrypts zero" under base `A`.
///
/// `check_*` verifies the transcript and that the challenge is the one `gen_challenge`
/// derives.  `transcript_*` verifies the algebra alone, which is what a disjunctive proof needs
/// for its simulated branches.  `simulate_*` builds a transcript for a chosen challenge without
/// knowing `r`; it passes `transcript_*` and nothing more.
///
/// `gen_challenge` receives the statement and the commitment, and must also hash in whatever
/// binds the proof to its election and its position in the record.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Proof {
    pub commitment: Ciphertext,
    pub challenge: ElementModQ,
    pub response: ElementModQ,
}

#[derive(Debug, Serialize)]
pub struct Status {
    pub challenge: bool,
    pub response: TranscriptStatus,
}

/// Which of the two verification equations held.
#[derive(Debug, Serialize)]
pub struct TranscriptStatus {
    /// `g^u = α aᶜ`
    pub public_key: bool,
    /// `h^u = β bᶜ`
    pub ciphertext: bool,
}

impl Proof {
    fn check_zero(
        &self,
        group: &Group,
        base: &ElementModP,
        statement: &Ciphertext,
        gen_challenge: impl FnOnce(&Ciphertext, &Ciphertext) -> ElementModQ,
    ) -> Status {
        Status {
            challenge: self.challenge == gen_challenge(statement, &self.commitment),
            response: self.transcript_zero(group, base, statement),
        }
    }

    fn transcript_zero(
        &self,
        group: &Group,
        h: &ElementModP,
        statement: &Ciphertext,
    ) -> TranscriptStatus {
        let (a, b) = (&statement.pad, &statement.data);
        let (alpha, beta) = (&self.commitment.pad, &self.commitment.data);
        let (c, u) = (&self.challenge, &self.response);

        let in_bounds = group.is_in_bounds_q(c) && group.is_in_bounds_q(u);
        TranscriptStatus {
            public_key: in_bounds
                && group.g_pow_p(u) == group.mult_p(alpha, &group.pow_p(a, c)),
            ciphertext: in_bounds && group.pow_p(h, u) == group.mult_p(beta, &group.pow_p(b, c)),
        }
    }

    /// Commit to `t`, answer with `u = t + c r`.
    fn prove_zero(
        group: &Group,
        h: &ElementModP,
        statement: &Ciphertext,
        r: &ElementModQ,
        t: &ElementModQ,
        gen_challenge: impl FnOnce(&Ciphertext, &Ciphertext) -> ElementModQ,
    ) -> Proof {
        let commitment = Ciphertext {
            pad: group.g_pow_p(t),
            data: group.pow_p(h, t),
        };
        let challenge = gen_challenge(statement, &commitment);
        let response = group.a_plus_bc_q(t, &challenge, r);
        Proof {
            commitment,
            challenge,
            response,
        }
    }

    /// Solve the verification equations for the commitment: `α = g^u / aᶜ`, `β = h^u / bᶜ`.
    fn simulate_zero(
        group: &Group,
        h: &ElementModP,
        statement: &Ciphertext,
        c: &ElementModQ,
        u: &ElementModQ,
    ) -> Proof {
        let (a, b) = (&statement.pad, &statement.data);
        Proof {
            commitment: Ciphertext {
                pad: group.div_p(&group.g_pow_p(u), &group.pow_p(a, c)),
                data: group.div_p(&group.pow_p(h, u), &group.pow_p(b, c)),
            },
            challenge: c.clone(),
            response: u.clone(),
        }
    }

    /// Check a proof that `message` encrypts `plaintext` under `public_key`.
    pub fn check_plaintext(
        &self,
        group: &Group,
        public_key: &ElementModP,
        message: &Ciphertext,
        plaintext: u64,
        gen_challenge: impl FnOnce(&Ciphertext, &Ciphertext) -> ElementModQ,
    ) -> Status {
        let statement = plaintext_statement(group, public_key, message, plaintext);
        self.check_zero(group, public_key, &statement, gen_challenge)
    }

    pub fn transcript_plaintext(
        &self,
        group: &Group,
        public_key: &ElementModP,
        message: &Ciphertext,
        plaintext: u64,
    ) -> TranscriptStatus {
        let statement = plaintext_statement(group, public_key, message, plaintext);
        self.transcript_zero(group, public_key, &statement)
    }

    /// Prove that `message` encrypts `plaintext`.  `nonce` is the one `message` was encrypted
    /// with and `one_time_exponent` is fresh.  A false statement yields a proof that fails
    /// `check_plaintext`.
    pub fn prove_plaintext(
        group: &Group,
        public_key: &ElementModP,
        message: &Ciphertext,
        nonce: &ElementModQ,
        plaintext: u64,
        one_time_exponent: &ElementModQ,
        gen_challenge: impl FnOnce(&Ciphertext, &Ciphertext) -> ElementModQ,
    ) -> Proof {
        let statement = plaintext_statement(group, public_key, message, plaintext);
        Self::prove_zero(
            group,
            public_key,
            &statement,
            nonce,
            one_time_exponent,
            gen_challenge,
        )
    }

    pub fn simulate_plaintext(
        group: &Group,
        public_key: &ElementModP,
        message: &Ciphertext,
        plaintext: u64,
        challenge: &ElementModQ,
        response: &ElementModQ,
    ) -> Proof {
        let statement = plaintext_statement(group, public_key, message, plaintext);
        Self::simulate_zero(group, public_key, &statement, challenge, response)
    }

    /// Check a proof that `result = base^s`, where `s` is the secret behind `public_key`.
    pub fn check_exp(
        &self,
        group: &Group,
        public_key: &ElementModP,
        base: &ElementModP,
        result: &ElementModP,
        gen_challenge: impl FnOnce(&Ciphertext, &Ciphertext) -> ElementModQ,
    ) -> Status {
        self.check_zero(group, base, &exp_statement(public_key, result), gen_challenge)
    }

    /// Prove `result = base^secret_key`.  The commitment is `(g^t, base^t)`.
    pub fn prove_exp(
        group: &Group,
        public_key: &ElementModP,
        secret_key: &ElementModQ,
        base: &ElementModP,
        result: &ElementModP,
        one_time_exponent: &ElementModQ,
        gen_challenge: impl FnOnce(&Ciphertext, &Ciphertext) -> ElementModQ,
    ) -> Proof {
        Self::prove_zero(
            group,
            base,
            &exp_statement(public_key, result),
            secret_key,
            one_time_exponent,
            gen_challenge,
        )
    }
}

/// `(A, B / gᵐ)`, computed as `message` minus the zero-nonce encryption `(1, gᵐ)`.
fn plaintext_statement(
    group: &Group,
    public_key: &ElementModP,
    message: &Ciphertext,
    plaintext: u64,
) -> Ciphertext {
    let known = Ciphertext::encrypt_unchecked(
        group,
        public_key,
        &group.q_from_u64(plaintext),
        &group.zero_q(),
    );
    message.sub(group, &known)
}

fn exp_statement(public_key: &ElementModP, result: &ElementModP) -> Ciphertext {
    Ciphertext {
        pad: public_key.clone(),
        data: result.clone(),
    }
}

impl Status {
    pub fn is_ok(&self) -> bool {
        self.challenge && self.response.is_ok()
    }

    /// `Ok` if the proof holds, otherwise `InvalidProof` naming `what` was being proven.
    pub fn verify(&self, what: &str) -> Result<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(Error::InvalidProof(format!("Chaum-Pedersen proof for {}: {:?}", what, self)))
        }
    }
}

impl TranscriptStatus {
    pub fn is_ok(&self) -> bool {
        self.public_key && self.ciphertext
    }
}

#[cfg(test)]
mod test {
    use super::Proof;
    use crate::crypto::elgamal::{self, Ciphertext};
    use crate::crypto::group::{ElementModP, ElementModQ, Group};
    use crate::crypto::hash::{challenge, Digest256};

    fn encrypt(group: &Group, value: u64, nonce: u64) -> Ciphertext {
        Ciphertext::encrypt(group, &elgamal::test::public_key(), value, &group.q_from_u64(nonce))
            .unwrap()
    }

    fn gen_challenge<'a>(
        group: &'a Group,
        ebh: &'a Digest256,
    ) -> impl Fn(&Ciphertext, &Ciphertext) -> ElementModQ + 'a {
        move |statement: &Ciphertext, commitment: &Ciphertext| {
            challenge(group, &[ebh, statement, commitment])
        }
    }

    #[test]
    fn plaintext_proof() {
        let group = Group::testing();
        let public_key = elgamal::test::public_key();
        let ebh = elgamal::test::extended_base_hash();

        let message = encrypt(&group, 11935, 30612);
        let proof = Proof::prove_plaintext(
            &group,
            &public_key,
            &message,
            &group.q_from_u64(30612),
            11935,
            &group.q_from_u64(6104),
            gen_challenge(&group, &ebh),
        );
        let status =
            proof.check_plaintext(&group, &public_key, &message, 11935, gen_challenge(&group, &ebh));
        assert!(status.is_ok(), "{:?}", status);
        assert!(proof.transcript_plaintext(&group, &public_key, &message, 11935).is_ok());

        // Same proof, wrong claimed value.
        let status =
            proof.check_plaintext(&group, &public_key, &message, 11936, gen_challenge(&group, &ebh));
        assert!(!status.is_ok());
    }

    #[test]
    fn false_plaintext_claim_fails() {
        let group = Group::testing();
        let public_key = elgamal::test::public_key();
        let ebh = elgamal::test::extended_base_hash();

        let message = encrypt(&group, 1, 2140);
        let proof = Proof::prove_plaintext(
            &group,
            &public_key,
            &message,
            &group.q_from_u64(2140),
            0,
            &group.q_from_u64(3048),
            gen_challenge(&group, &ebh),
        );
        let status =
            proof.check_plaintext(&group, &public_key, &message, 0, gen_challenge(&group, &ebh));
        assert!(status.challenge);
        assert!(!status.response.is_ok());
        assert!(status.verify("selection").is_err());
    }

    /// `q - 1` as the nonce catches exponent arithmetic done mod `p` instead of mod `q`.
    #[test]
    fn plaintext_proof_with_largest_nonce() {
        let group = Group::testing();
        let public_key = elgamal::test::public_key();
        let ebh = elgamal::test::extended_base_hash();

        let nonce = ElementModQ::unchecked(group.q() - 1_u8);
        let message = Ciphertext::encrypt(&group, &public_key, 11935, &nonce).unwrap();
        let proof = Proof::prove_plaintext(
            &group,
            &public_key,
            &message,
            &nonce,
            11935,
            &group.q_from_u64(30612),
            gen_challenge(&group, &ebh),
        );
        let status =
            proof.check_plaintext(&group, &public_key, &message, 11935, gen_challenge(&group, &ebh));
        assert!(status.is_ok(), "{:?}", status);
    }

    #[test]
    fn simulated_plaintext_passes_transcript_only() {
        let group = Group::testing();
        let public_key = elgamal::test::public_key();
        let ebh = elgamal::test::extended_base_hash();

        let message = encrypt(&group, 15271, 482);
        let proof = Proof::simulate_plaintext(
            &group,
            &public_key,
            &message,
            8049,
            &group.q_from_u64(8508),
            &group.q_from_u64(23843),
        );
        assert!(proof.transcript_plaintext(&group, &public_key, &message, 8049).is_ok());
        let status =
            proof.check_plaintext(&group, &public_key, &message, 8049, gen_challenge(&group, &ebh));
        assert!(!status.challenge);
    }

    #[test]
    fn exp_proof() {
        let group = Group::testing();
        let ebh = elgamal::test::extended_base_hash();

        let secret_key = group.q_from_u64(22757);
        let public_key = group.g_pow_p(&secret_key);
        let base: ElementModP = group.g_pow_p(&group.q_from_u64(1033));
        let result = group.pow_p(&base, &secret_key);
        let proof = Proof::prove_exp(
            &group,
            &public_key,
            &secret_key,
            &base,
            &result,
            &group.q_from_u64(26480),
            gen_challenge(&group, &ebh),
        );
        let status = proof.check_exp(&group, &public_key, &base, &result, gen_challenge(&group, &ebh));
        assert!(status.verify("partial decryption").is_ok());
    }

    #[test]
    fn exp_proof_with_other_exponent_fails() {
        let group = Group::testing();
        let ebh = elgamal::test::extended_base_hash();

        let secret_key = group.q_from_u64(22757);
        let public_key = group.g_pow_p(&secret_key);
        let base: ElementModP = group.g_pow_p(&group.q_from_u64(1033));
        let result = group.pow_p(&base, &group.q_from_u64(19315));
        let proof = Proof::prove_exp(
            &group,
            &public_key,
            &secret_key,
            &base,
            &result,
            &group.q_from_u64(26480),
            gen_challenge(&group, &ebh),
        );
        let status = proof.check_exp(&group, &public_key, &base, &result, gen_challenge(&group, &ebh));
        assert!(!status.response.is_ok());
    }
}
