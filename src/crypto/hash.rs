use digest::Digest;
use num::BigUint;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;

use crate::crypto::group::{ElementModP, ElementModQ, Group};

/// Prefix fed to every hash, so that nothing this crate hashes can collide with a plain SHA-256
/// of the same bytes computed elsewhere.
pub const DOMAIN_SEPARATOR: &[u8] = b"electionguard-core/hash/v1";

/// A 256-bit digest, used as a commitment or identity value (manifest hash, base hash, ballot
/// hashes) and, reduced mod `Q`, as a Fiat-Shamir challenge.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest256(#[serde(with = "crate::serialize::digest")] pub [u8; 32]);

impl fmt::Debug for Digest256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest256({})", data_encoding::HEXUPPER.encode(&self.0))
    }
}

impl Digest256 {
    /// Interpret the digest as a big-endian integer reduced into the exponent group.
    pub fn to_q(&self, group: &Group) -> ElementModQ {
        group.reduce_q(BigUint::from_bytes_be(&self.0))
    }
}

/// Something that can be fed to `hash`.  Every encoding starts with a one-byte type tag and is
/// either fixed-width or length-prefixed, so a sequence of parts decodes unambiguously.
pub trait Hashable {
    fn feed(&self, hasher: &mut Sha256);
}

const TAG_P: u8 = 0x01;
const TAG_Q: u8 = 0x02;
const TAG_DIGEST: u8 = 0x03;
const TAG_BYTES: u8 = 0x04;
const TAG_STR: u8 = 0x05;
const TAG_U64: u8 = 0x06;
const TAG_LIST: u8 = 0x07;

impl Hashable for ElementModP {
    fn feed(&self, hasher: &mut Sha256) {
        hasher.update([TAG_P]);
        hasher.update(self.to_bytes());
    }
}

impl Hashable for ElementModQ {
    fn feed(&self, hasher: &mut Sha256) {
        hasher.update([TAG_Q]);
        hasher.update(self.to_bytes());
    }
}

impl Hashable for Digest256 {
    fn feed(&self, hasher: &mut Sha256) {
        hasher.update([TAG_DIGEST]);
        hasher.update(self.0);
    }
}

impl Hashable for [u8] {
    fn feed(&self, hasher: &mut Sha256) {
        hasher.update([TAG_BYTES]);
        hasher.update((self.len() as u64).to_be_bytes());
        hasher.update(self);
    }
}

impl Hashable for Vec<u8> {
    fn feed(&self, hasher: &mut Sha256) {
        self.as_slice().feed(hasher)
    }
}

impl Hashable for str {
    fn feed(&self, hasher: &mut Sha256) {
        hasher.update([TAG_STR]);
        hasher.update((self.len() as u64).to_be_bytes());
        hasher.update(self.as_bytes());
    }
}

impl Hashable for String {
    fn feed(&self, hasher: &mut Sha256) {
        self.as_str().feed(hasher)
    }
}

impl Hashable for u64 {
    fn feed(&self, hasher: &mut Sha256) {
        hasher.update([TAG_U64]);
        hasher.update(self.to_be_bytes());
    }
}

impl Hashable for [ElementModP] {
    fn feed(&self, hasher: &mut Sha256) {
        hasher.update([TAG_LIST]);
        hasher.update((self.len() as u64).to_be_bytes());
        for x in self {
            x.feed(hasher);
        }
    }
}

impl<T: Hashable + ?Sized> Hashable for &T {
    fn feed(&self, hasher: &mut Sha256) {
        (**self).feed(hasher)
    }
}

/// Fold `parts`, in order, into a single digest.
pub fn hash(parts: &[&dyn Hashable]) -> Digest256 {
    let mut hasher = Sha256::new();
    hasher.update(DOMAIN_SEPARATOR);
    for part in parts {
        part.feed(&mut hasher);
    }
    let mut out = [0_u8; 32];
    out.copy_from_slice(hasher.finalize().as_slice());
    Digest256(out)
}

/// A Fiat-Shamir challenge: `hash(parts) mod Q`.
pub fn challenge(group: &Group, parts: &[&dyn Hashable]) -> ElementModQ {
    hash(parts).to_q(group)
}
