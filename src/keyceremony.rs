//! The threshold key ceremony.
//!
//! Each guardian is a `guardian::Guardian<S>` whose state parameter moves through
//! `Announced → CoefficientsCommitted → SharesDistributed → SharesVerified → Combined`.  A
//! transition consumes the guardian, so a step can't be repeated or skipped.  Guardians never
//! see each other's state: they exchange the messages defined here, either directly or through
//! `ceremony::KeyCeremony`, which runs the whole exchange in-process.

use serde::{Deserialize, Serialize};

use crate::crypto::group::ElementModQ;
use crate::crypto::hashed_elgamal::HashedCiphertext;

pub mod ceremony;
pub mod guardian;
pub mod polynomial;

/// Label bound into the key derivation for share backups.
pub const SHARE_BACKUP_LABEL: &str = "share backup";

/// `P_i(x_ℓ)` from guardian `i` to guardian `ℓ`, encrypted to `ℓ`'s public key.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct EncryptedShare {
    pub sender_id: String,
    pub recipient_id: String,
    pub ciphertext: HashedCiphertext,
}

/// The sender's answer to a disputed share: the share value in the clear.  Anyone can check it
/// against the sender's commitments.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ShareChallengeResponse {
    pub sender_id: String,
    pub recipient_id: String,
    pub recipient_x_coordinate: u32,
    pub share: ElementModQ,
}
