use num::BigUint;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::crypto::group::{ElementModP, ElementModQ, Group};
use crate::crypto::hash::Hashable;
use crate::errors::{Error, Result};

/// A message that has been encrypted using exponential ElGamal.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Ciphertext {
    /// The one-time public key `a = gʳ`, where `r` is the randomly generated one-time secret
    /// (the nonce).
    pub pad: ElementModP,

    /// The encoding `b = gᵐ Kʳ`, where `m` is the cleartext and `K` is the recipient public
    /// key being used for encryption.
    pub data: ElementModP,
}

impl Hashable for Ciphertext {
    fn feed(&self, hasher: &mut Sha256) {
        self.pad.feed(hasher);
        self.data.feed(hasher);
    }
}

impl Ciphertext {
    /// `(1, 1)`: a valid encryption of zero under any key, with zero as the one-time secret.
    /// The identity of the homomorphic sum.
    pub fn zero(group: &Group) -> Ciphertext {
        Ciphertext {
            pad: group.one_p(),
            data: group.one_p(),
        }
    }

    /// Encrypt `message` under `public_key` with one-time secret `nonce`.  A zero nonce would
    /// publish the message in the clear, so it is refused.
    pub fn encrypt(
        group: &Group,
        public_key: &ElementModP,
        message: u64,
        nonce: &ElementModQ,
    ) -> Result<Ciphertext> {
        if nonce.is_zero() {
            return Err(Error::InvalidGroupElement(
                "encryption nonce must not be zero".to_owned(),
            ));
        }
        Ok(Ciphertext::encrypt_unchecked(group, public_key, &group.q_from_u64(message), nonce))
    }

    /// Encrypt with a fresh random nonce, returning the nonce alongside the ciphertext.
    pub fn encrypt_random<R: Rng + ?Sized>(
        group: &Group,
        public_key: &ElementModP,
        message: u64,
        rng: &mut R,
    ) -> (Ciphertext, ElementModQ) {
        let nonce = group.rand_range_q(rng, 1);
        let ciphertext =
            Ciphertext::encrypt_unchecked(group, public_key, &group.q_from_u64(message), &nonce);
        (ciphertext, nonce)
    }

    /// Encryption without the zero-nonce check.  Proofs use this to build the public
    /// "encryption" `(1, gᵐ)` of a known plaintext.
    pub(crate) fn encrypt_unchecked(
        group: &Group,
        public_key: &ElementModP,
        message: &ElementModQ,
        nonce: &ElementModQ,
    ) -> Ciphertext {
        Ciphertext {
            pad: group.g_pow_p(nonce),
            data: group.mult_p(&group.g_pow_p(message), &group.pow_p(public_key, nonce)),
        }
    }

    /// Homomorphic addition: the result encrypts the sum of the two plaintexts, under the
    /// one-time secret `r1 + r2`.
    pub fn add(&self, group: &Group, other: &Ciphertext) -> Ciphertext {
        Ciphertext {
            pad: group.mult_p(&self.pad, &other.pad),
            data: group.mult_p(&self.data, &other.data),
        }
    }

    /// Homomorphic subtraction: the result encrypts the difference of the plaintexts, under the
    /// one-time secret `r1 - r2`.
    pub fn sub(&self, group: &Group, other: &Ciphertext) -> Ciphertext {
        Ciphertext {
            pad: group.div_p(&self.pad, &other.pad),
            data: group.div_p(&self.data, &other.data),
        }
    }

    pub fn sum<'a>(group: &Group, cs: impl IntoIterator<Item = &'a Ciphertext>) -> Ciphertext {
        cs.into_iter()
            .fold(Ciphertext::zero(group), |acc, c| acc.add(group, c))
    }

    /// One guardian's share of the decryption: `aˢ`.
    pub fn partial_decrypt(&self, group: &Group, secret_share: &ElementModQ) -> ElementModP {
        group.pow_p(&self.pad, secret_share)
    }

    /// Strip the product of every guardian's partial decryption from `data`, leaving `gᵐ`.
    pub fn blinding_removed(&self, group: &Group, partials_product: &ElementModP) -> ElementModP {
        group.div_p(&self.data, partials_product)
    }

    /// Decrypt with the whole secret key.
    pub fn decrypt(&self, group: &Group, secret_key: &ElementModQ, dlog: &DiscreteLog) -> Result<u64> {
        let m = self.blinding_removed(group, &self.partial_decrypt(group, secret_key));
        dlog.solve(group, &m)
    }

    pub fn validate(&self, group: &Group) -> Result<()> {
        group.validate_p(&self.pad, "ciphertext pad")?;
        group.validate_p(&self.data, "ciphertext data")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPair {
    pub secret_key: ElementModQ,
    pub public_key: ElementModP,
}

impl KeyPair {
    pub fn from_secret(group: &Group, secret_key: ElementModQ) -> KeyPair {
        let public_key = group.g_pow_p(&secret_key);
        KeyPair {
            secret_key,
            public_key,
        }
    }

    pub fn random<R: Rng + ?Sized>(group: &Group, rng: &mut R) -> KeyPair {
        KeyPair::from_secret(group, group.rand_range_q(rng, 2))
    }
}

/// Solves `gᵐ -> m` for `m` in `0..=bound` by walking `g⁰, g¹, ...` and remembering every
/// power seen so far.  Shared between threads: the walk is resumed by whichever caller first
/// needs a larger exponent.
pub struct DiscreteLog {
    bound: u64,
    cache: Mutex<Cache>,
}

struct Cache {
    table: HashMap<BigUint, u64>,
    next_exponent: u64,
    next_power: BigUint,
}

impl DiscreteLog {
    pub fn new(bound: u64) -> DiscreteLog {
        DiscreteLog {
            bound,
            cache: Mutex::new(Cache {
                table: HashMap::new(),
                next_exponent: 0,
                next_power: BigUint::from(1_u8),
            }),
        }
    }

    pub fn bound(&self) -> u64 {
        self.bound
    }

    pub fn solve(&self, group: &Group, element: &ElementModP) -> Result<u64> {
        let target = element.as_uint();
        // A poisoned lock only means another thread panicked mid-walk; the table entries it
        // left behind are still correct.
        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(m) = cache.table.get(target) {
            return Ok(*m);
        }

        while cache.next_exponent <= self.bound {
            let exponent = cache.next_exponent;
            let power = cache.next_power.clone();
            cache.next_power = &power * group.generator().as_uint() % group.p();
            cache.next_exponent += 1;
            let found = &power == target;
            cache.table.insert(power, exponent);
            if found {
                return Ok(exponent);
            }
        }

        Err(Error::PlaintextOutOfRange {
            context: "discrete log".to_owned(),
            bound: self.bound,
        })
    }
}

#[cfg(test)]
pub mod test {
    use super::*;
    use crate::crypto::hash::{hash, Digest256};

    pub fn secret_key() -> ElementModQ {
        Group::testing().q_from_u64(22757)
    }

    pub fn public_key() -> ElementModP {
        let group = Group::testing();
        group.g_pow_p(&secret_key())
    }

    pub fn extended_base_hash() -> Digest256 {
        hash(&[&"extended base hash for tests"])
    }

    #[test]
    fn encrypt_decrypt() {
        let group = Group::testing();
        let dlog = DiscreteLog::new(100);
        let nonce = group.q_from_u64(2140);
        let message = Ciphertext::encrypt(&group, &public_key(), 42, &nonce).unwrap();
        assert_eq!(message.decrypt(&group, &secret_key(), &dlog).unwrap(), 42);
    }

    #[test]
    fn homomorphic_sum() {
        let group = Group::testing();
        let dlog = DiscreteLog::new(100);
        let a = Ciphertext::encrypt(&group, &public_key(), 17, &group.q_from_u64(918)).unwrap();
        let b = Ciphertext::encrypt(&group, &public_key(), 25, &group.q_from_u64(3306)).unwrap();
        let sum = a.add(&group, &b);
        assert_eq!(sum.decrypt(&group, &secret_key(), &dlog).unwrap(), 42);
        assert_eq!(b.sub(&group, &a).decrypt(&group, &secret_key(), &dlog).unwrap(), 8);
        // The sum is an encryption of 42 under the nonce 918 + 3306.
        assert_eq!(
            sum,
            Ciphertext::encrypt(&group, &public_key(), 42, &group.q_from_u64(4224)).unwrap()
        );
    }

    #[test]
    fn zero_nonce_refused() {
        let group = Group::testing();
        assert!(Ciphertext::encrypt(&group, &public_key(), 1, &group.zero_q()).is_err());
    }

    #[test]
    fn out_of_range_plaintext() {
        let group = Group::testing();
        let dlog = DiscreteLog::new(10);
        let message = Ciphertext::encrypt(&group, &public_key(), 11, &group.q_from_u64(5)).unwrap();
        assert!(matches!(
            message.decrypt(&group, &secret_key(), &dlog),
            Err(Error::PlaintextOutOfRange { bound: 10, .. })
        ));
        // Smaller values are still found from the cached table.
        let small = Ciphertext::encrypt(&group, &public_key(), 3, &group.q_from_u64(5)).unwrap();
        assert_eq!(small.decrypt(&group, &secret_key(), &dlog).unwrap(), 3);
    }
}
