use thiserror::Error;

/// Every way a core operation can fail.  Each variant carries enough context (guardian id,
/// ballot id, selection id) for the caller to assign blame.
#[derive(Debug, Error)]
pub enum Error {
    /// A value is outside the prime-order subgroup, or outside `[0, modulus)`.
    #[error("invalid group element: {0}")]
    InvalidGroupElement(String),

    /// A Schnorr, Chaum-Pedersen or range proof equation does not hold.
    #[error("invalid proof: {0}")]
    InvalidProof(String),

    /// A key-ceremony share does not match the sender's published commitments.
    #[error("share sent by guardian {sender} to guardian {recipient} does not match the sender's commitments")]
    ShareMismatch { sender: String, recipient: String },

    #[error("ballot {0} has already been accumulated")]
    DuplicateBallot(String),

    #[error("quorum not met: {available} guardians available, {needed} required")]
    QuorumNotMet { needed: usize, available: usize },

    #[error("plaintext out of range for {context}: valid values are 0..={bound}")]
    PlaintextOutOfRange { context: String, bound: u64 },

    #[error("encryption nonce reused for {0}")]
    NonceReuse(String),

    /// A partial or compensated decryption share failed verification.
    #[error("invalid decryption share from guardian {guardian_id} for {target}")]
    InvalidShare { guardian_id: String, target: String },

    #[error("invalid election configuration: {0}")]
    InvalidConfig(String),

    #[error("key ceremony: {0}")]
    Ceremony(String),

    #[error("hashed ElGamal ciphertext failed authentication")]
    Authentication,

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Collects human-readable failures while walking a record, so a verifier can report every
/// problem instead of stopping at the first one.
pub struct ErrorContext<'a> {
    errs: &'a mut Vec<String>,
    prefix: String,
}

impl<'a> ErrorContext<'a> {
    pub fn new(errs: &'a mut Vec<String>) -> ErrorContext<'a> {
        ErrorContext {
            errs,
            prefix: String::new(),
        }
    }

    pub fn check(&mut self, cond: bool, msg: &str) {
        if !cond {
            self.errs.push(format!("{}{}", self.prefix, msg));
        }
    }

    /// Record `result` as a failure if it is an `Err`, and pass it back as an `Option`.
    pub fn check_result<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(x) => Some(x),
            Err(e) => {
                self.errs.push(format!("{}{}", self.prefix, e));
                None
            }
        }
    }

    pub fn check_get<'b, K, V>(
        &mut self,
        map: &'b std::collections::BTreeMap<K, V>,
        key: &K,
    ) -> Option<&'b V>
    where
        K: Ord + std::fmt::Display,
    {
        let val = map.get(key);
        if val.is_none() {
            self.check(false, &format!("missing entry {}", key));
        }
        val
    }

    pub fn scope<'b>(&'b mut self, desc: &str) -> ErrorContext<'b> {
        ErrorContext {
            errs: &mut *self.errs,
            prefix: format!("{}in {}: ", self.prefix, desc),
        }
    }
}
