use crate::crypto::group::{ElementModQ, Group};
use crate::crypto::hash::{hash, Digest256, Hashable};

/// A deterministic, indexable sequence of nonces derived from a secret seed and public headers.
/// Two sequences with the same seed but different headers are unrelated.
#[derive(Debug, Clone)]
pub struct Nonces {
    group: Group,
    seed: Digest256,
}

impl Nonces {
    pub fn new(group: &Group, seed: &ElementModQ, headers: &[&dyn Hashable]) -> Nonces {
        let mut parts: Vec<&dyn Hashable> = vec![&"nonces", seed];
        parts.extend_from_slice(headers);
        Nonces {
            group: group.clone(),
            seed: hash(&parts),
        }
    }

    /// The nonce at `index`; never zero.
    pub fn get(&self, index: u64) -> ElementModQ {
        let mut attempt = 0_u64;
        loop {
            let nonce = hash(&[&self.seed, &index, &attempt]).to_q(&self.group);
            if !nonce.is_zero() {
                return nonce;
            }
            attempt += 1;
        }
    }

    /// Derive a sub-sequence, e.g. per contest or per selection.
    pub fn child(&self, label: &str) -> Nonces {
        Nonces {
            group: self.group.clone(),
            seed: hash(&[&self.seed, &label]),
        }
    }
}
