use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::crypto::group::{ElementModP, ElementModQ, Group};
use crate::crypto::hash::{hash, Digest256};
use crate::errors::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

const BLOCK_BYTES: usize = 32;

/// A hashed-ElGamal ciphertext: an ElGamal key exchange (`c0 = gʳ`) that seeds a
/// counter-mode KDF, a keystream-encrypted payload `c1` and a MAC `c2` over both.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct HashedCiphertext {
    pub c0: ElementModP,
    #[serde(with = "crate::serialize::hex_bytes")]
    pub c1: Vec<u8>,
    pub c2: Digest256,
    pub num_bytes: usize,
}

impl HashedCiphertext {
    /// Encrypt `message` for the holder of the secret key behind `public_key`.  `label` and
    /// `context` are bound into every derived key.
    pub fn encrypt(
        group: &Group,
        message: &[u8],
        public_key: &ElementModP,
        nonce: &ElementModQ,
        label: &str,
        context: &Digest256,
    ) -> Result<HashedCiphertext> {
        if nonce.is_zero() {
            return Err(Error::InvalidGroupElement(
                "encryption nonce must not be zero".to_owned(),
            ));
        }
        let c0 = group.g_pow_p(nonce);
        let beta = group.pow_p(public_key, nonce);
        let session_key = hash(&[&c0, &beta]);
        let kdf = Kdf::new(&session_key, label, context, message.len());

        let mut c1 = Vec::with_capacity(message.len());
        for (i, block) in message.chunks(BLOCK_BYTES).enumerate() {
            let key = kdf.key(i as u32 + 1)?;
            c1.extend(block.iter().zip(key.iter()).map(|(m, k)| m ^ k));
        }
        let c2 = kdf.mac(&c0, &c1)?;

        Ok(HashedCiphertext {
            c0,
            c1,
            c2,
            num_bytes: message.len(),
        })
    }

    /// Check the MAC, then decrypt.  Fails with `Error::Authentication` if the ciphertext was
    /// tampered with or was not encrypted for `secret_key`.
    pub fn decrypt(
        &self,
        group: &Group,
        secret_key: &ElementModQ,
        label: &str,
        context: &Digest256,
    ) -> Result<Vec<u8>> {
        if self.c1.len() != self.num_bytes {
            return Err(Error::Authentication);
        }
        let beta = group.pow_p(&self.c0, secret_key);
        let session_key = hash(&[&self.c0, &beta]);
        let kdf = Kdf::new(&session_key, label, context, self.num_bytes);
        kdf.verify_mac(&self.c0, &self.c1, &self.c2)?;

        let mut message = Vec::with_capacity(self.num_bytes);
        for (i, block) in self.c1.chunks(BLOCK_BYTES).enumerate() {
            let key = kdf.key(i as u32 + 1)?;
            message.extend(block.iter().zip(key.iter()).map(|(c, k)| c ^ k));
        }
        Ok(message)
    }
}

/// NIST SP 800-108 counter-mode KDF over HMAC-SHA256:
/// `kᵢ = HMAC(k, [i]₄ ‖ label ‖ 0x00 ‖ context ‖ [bits]₄)`.  Key 0 authenticates, keys 1.. encrypt.
struct Kdf<'a> {
    session_key: &'a Digest256,
    label: &'a str,
    context: &'a Digest256,
    bits: u32,
}

impl<'a> Kdf<'a> {
    fn new(
        session_key: &'a Digest256,
        label: &'a str,
        context: &'a Digest256,
        num_bytes: usize,
    ) -> Kdf<'a> {
        let blocks = (num_bytes + BLOCK_BYTES - 1) / BLOCK_BYTES;
        let bits = ((blocks + 1) * BLOCK_BYTES * 8) as u32;
        Kdf {
            session_key,
            label,
            context,
            bits,
        }
    }

    fn hmac(&self, key: &[u8]) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(key).map_err(|_| Error::Authentication)
    }

    fn key(&self, index: u32) -> Result<[u8; BLOCK_BYTES]> {
        let mut mac = self.hmac(&self.session_key.0)?;
        mac.update(&index.to_be_bytes());
        mac.update(self.label.as_bytes());
        mac.update(&[0x00]);
        mac.update(&self.context.0);
        mac.update(&self.bits.to_be_bytes());
        let mut out = [0_u8; BLOCK_BYTES];
        out.copy_from_slice(&mac.finalize().into_bytes());
        Ok(out)
    }

    fn mac_over(&self, c0: &ElementModP, c1: &[u8]) -> Result<HmacSha256> {
        let mut mac = self.hmac(&self.key(0)?)?;
        mac.update(&c0.to_bytes());
        mac.update(c1);
        Ok(mac)
    }

    fn mac(&self, c0: &ElementModP, c1: &[u8]) -> Result<Digest256> {
        let mut out = [0_u8; 32];
        out.copy_from_slice(&self.mac_over(c0, c1)?.finalize().into_bytes());
        Ok(Digest256(out))
    }

    fn verify_mac(&self, c0: &ElementModP, c1: &[u8], tag: &Digest256) -> Result<()> {
        self.mac_over(c0, c1)?
            .verify_slice(&tag.0)
            .map_err(|_| Error::Authentication)
    }
}
