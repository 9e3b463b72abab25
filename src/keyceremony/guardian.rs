use log::{debug, warn};
use rand::Rng;
use std::collections::BTreeMap;

use super::polynomial::{self, SecretPolynomial};
use super::{EncryptedShare, ShareChallengeResponse, SHARE_BACKUP_LABEL};
use crate::crypto::group::{ElementModQ, Group};
use crate::crypto::hash::{hash, Digest256};
use crate::crypto::hashed_elgamal::HashedCiphertext;
use crate::crypto::schnorr;
use crate::decrypt::trustee::DecryptingTrustee;
use crate::election::coefficient_context;
use crate::errors::{Error, Result};
use crate::schema::{ElectionConfig, ElectionInitialized, GuardianKeyShare};

/// Freshly created: the secret polynomial exists, nothing is published yet.
pub struct Announced;

/// Commitments and proofs are published.
pub struct CoefficientsCommitted;

/// Every peer's key share has been checked and a backup sent to each.
pub struct SharesDistributed {
    peers: BTreeMap<String, GuardianKeyShare>,
    received: BTreeMap<String, ElementModQ>,
    disputed: BTreeMap<String, EncryptedShare>,
}

/// A verified backup from every peer.
pub struct SharesVerified {
    peers: BTreeMap<String, GuardianKeyShare>,
    received: BTreeMap<String, ElementModQ>,
}

/// The guardian has checked the election record against what it saw in the ceremony.
pub struct Combined {
    received: BTreeMap<String, ElementModQ>,
    extended_base_hash: Digest256,
}

/// One guardian's side of the ceremony.  The secret polynomial never leaves this value except
/// as encrypted backups and, once combined, as a `DecryptingTrustee`.
pub struct Guardian<S> {
    group: Group,
    base_hash: Digest256,
    quorum: usize,
    number_of_guardians: usize,
    guardian_id: String,
    x_coordinate: u32,
    polynomial: SecretPolynomial,
    state: S,
}

impl<S> Guardian<S> {
    pub fn guardian_id(&self) -> &str {
        &self.guardian_id
    }

    pub fn x_coordinate(&self) -> u32 {
        self.x_coordinate
    }

    /// Commitments and proofs for every coefficient.  Proof nonces are derived from the
    /// coefficients, so calling this twice gives the same share.
    pub fn key_share(&self) -> GuardianKeyShare {
        let group = &self.group;
        let commitments = self.polynomial.commitments(group);
        let proofs = self
            .polynomial
            .coefficients()
            .iter()
            .zip(&commitments)
            .enumerate()
            .map(|(j, (coefficient, commitment))| {
                let context = coefficient_context(&self.base_hash, &self.guardian_id, j as u64);
                let nonce = hash(&[&"coefficient proof nonce", coefficient, &context]).to_q(group);
                schnorr::Proof::prove(group, commitment, coefficient, &nonce, &context)
            })
            .collect();
        GuardianKeyShare {
            guardian_id: self.guardian_id.clone(),
            x_coordinate: self.x_coordinate,
            coefficient_commitments: commitments,
            coefficient_proofs: proofs,
        }
    }

    fn transition<T>(self, state: T) -> Guardian<T> {
        Guardian {
            group: self.group,
            base_hash: self.base_hash,
            quorum: self.quorum,
            number_of_guardians: self.number_of_guardians,
            guardian_id: self.guardian_id,
            x_coordinate: self.x_coordinate,
            polynomial: self.polynomial,
            state,
        }
    }
}

impl Guardian<Announced> {
    pub fn new<R: Rng + ?Sized>(
        config: &ElectionConfig,
        guardian_id: &str,
        x_coordinate: u32,
        rng: &mut R,
    ) -> Result<Guardian<Announced>> {
        let group = config.group()?;
        let polynomial = SecretPolynomial::random(&group, config.quorum(), rng);
        Guardian::from_polynomial(config, guardian_id, x_coordinate, polynomial)
    }

    /// A guardian with a chosen polynomial.  Its length must be the quorum.
    pub fn from_polynomial(
        config: &ElectionConfig,
        guardian_id: &str,
        x_coordinate: u32,
        polynomial: SecretPolynomial,
    ) -> Result<Guardian<Announced>> {
        let group = config.group()?;
        if x_coordinate == 0 || x_coordinate > config.number_of_guardians {
            return Err(Error::Ceremony(format!(
                "guardian {} x-coordinate {} is not in 1..={}",
                guardian_id, x_coordinate, config.number_of_guardians
            )));
        }
        if polynomial.coefficients().len() != config.quorum() {
            return Err(Error::Ceremony(format!(
                "guardian {} polynomial has {} coefficients, quorum is {}",
                guardian_id,
                polynomial.coefficients().len(),
                config.quorum
            )));
        }
        debug!("guardian {} announced at x = {}", guardian_id, x_coordinate);
        Ok(Guardian {
            group,
            base_hash: config.base_hash(),
            quorum: config.quorum(),
            number_of_guardians: config.number_of_guardians(),
            guardian_id: guardian_id.to_owned(),
            x_coordinate,
            polynomial,
            state: Announced,
        })
    }

    /// Publish commitments to every coefficient, with proofs of knowledge.
    pub fn commit(self) -> (Guardian<CoefficientsCommitted>, GuardianKeyShare) {
        let share = self.key_share();
        debug!("guardian {} committed", self.guardian_id);
        (self.transition(CoefficientsCommitted), share)
    }
}

impl Guardian<CoefficientsCommitted> {
    /// Check every peer's published key share, then encrypt a backup `P_i(x_ℓ)` to each peer.
    /// `key_shares` must hold one entry per guardian; this guardian's own is ignored.
    pub fn distribute<R: Rng + ?Sized>(
        self,
        key_shares: &[GuardianKeyShare],
        rng: &mut R,
    ) -> Result<(Guardian<SharesDistributed>, Vec<EncryptedShare>)> {
        let mut peers = BTreeMap::new();
        for share in key_shares {
            if share.guardian_id == self.guardian_id {
                continue;
            }
            if share.x_coordinate == self.x_coordinate
                || peers
                    .values()
                    .any(|p: &GuardianKeyShare| p.x_coordinate == share.x_coordinate)
            {
                return Err(Error::Ceremony(format!(
                    "guardian {} reuses x-coordinate {}",
                    share.guardian_id, share.x_coordinate
                )));
            }
            share.verify(&self.group, &self.base_hash, self.quorum)?;
            if peers.insert(share.guardian_id.clone(), share.clone()).is_some() {
                return Err(Error::Ceremony(format!(
                    "guardian {} published twice",
                    share.guardian_id
                )));
            }
        }
        if peers.len() + 1 != self.number_of_guardians {
            return Err(Error::Ceremony(format!(
                "guardian {} has {} of {} peer key shares",
                self.guardian_id,
                peers.len(),
                self.number_of_guardians - 1
            )));
        }

        let mut backups = Vec::with_capacity(peers.len());
        for peer in peers.values() {
            let value = self.polynomial.evaluate(&self.group, peer.x_coordinate);
            let ciphertext = HashedCiphertext::encrypt(
                &self.group,
                &value.to_bytes(),
                peer.public_key()?,
                &self.group.rand_range_q(rng, 1),
                SHARE_BACKUP_LABEL,
                &backup_context(&self.base_hash, &self.guardian_id, &peer.guardian_id),
            )?;
            backups.push(EncryptedShare {
                sender_id: self.guardian_id.clone(),
                recipient_id: peer.guardian_id.clone(),
                ciphertext,
            });
        }
        debug!(
            "guardian {} distributed {} backups",
            self.guardian_id,
            backups.len()
        );

        let state = SharesDistributed {
            peers,
            received: BTreeMap::new(),
            disputed: BTreeMap::new(),
        };
        Ok((self.transition(state), backups))
    }
}

impl Guardian<SharesDistributed> {
    /// Decrypt a backup and check it against the sender's commitments.  A backup that fails
    /// is held as disputed and reported as `ShareMismatch`; the sender can answer with
    /// `respond_to_challenge`.
    pub fn receive_share(&mut self, share: &EncryptedShare) -> Result<()> {
        if share.recipient_id != self.guardian_id {
            return Err(Error::Ceremony(format!(
                "share for {} delivered to {}",
                share.recipient_id, self.guardian_id
            )));
        }
        let sender = self.state.peers.get(&share.sender_id).ok_or_else(|| {
            Error::Ceremony(format!("share from unknown guardian {}", share.sender_id))
        })?;

        let context = backup_context(&self.base_hash, &share.sender_id, &self.guardian_id);
        let value = share
            .ciphertext
            .decrypt(
                &self.group,
                self.polynomial.secret(),
                SHARE_BACKUP_LABEL,
                &context,
            )
            .and_then(|bytes| polynomial::share_from_bytes(&self.group, &bytes));

        match value {
            Ok(value) if share_matches(&self.group, sender, self.x_coordinate, &value) => {
                debug!(
                    "guardian {} verified share from {}",
                    self.guardian_id, share.sender_id
                );
                self.state.disputed.remove(&share.sender_id);
                self.state.received.insert(share.sender_id.clone(), value);
                Ok(())
            }
            _ => {
                warn!(
                    "guardian {} rejects share from {}",
                    self.guardian_id, share.sender_id
                );
                self.state
                    .disputed
                    .insert(share.sender_id.clone(), share.clone());
                Err(Error::ShareMismatch {
                    sender: share.sender_id.clone(),
                    recipient: self.guardian_id.clone(),
                })
            }
        }
    }

    /// Answer a recipient's dispute by revealing the share sent to it.
    pub fn respond_to_challenge(&self, recipient_id: &str) -> Result<ShareChallengeResponse> {
        let recipient = self.state.peers.get(recipient_id).ok_or_else(|| {
            Error::Ceremony(format!("challenge from unknown guardian {}", recipient_id))
        })?;
        Ok(ShareChallengeResponse {
            sender_id: self.guardian_id.clone(),
            recipient_id: recipient_id.to_owned(),
            recipient_x_coordinate: recipient.x_coordinate,
            share: self.polynomial.evaluate(&self.group, recipient.x_coordinate),
        })
    }

    /// Adopt a revealed share if it matches the sender's commitments.  If it doesn't, the
    /// sender is at fault and the ceremony can't complete.
    pub fn resolve_challenge(&mut self, response: &ShareChallengeResponse) -> Result<()> {
        let sender = self.state.peers.get(&response.sender_id).ok_or_else(|| {
            Error::Ceremony(format!("response from unknown guardian {}", response.sender_id))
        })?;
        let valid = response.recipient_id == self.guardian_id
            && response.recipient_x_coordinate == self.x_coordinate
            && verify_challenge_response(&self.group, sender, response);
        if !valid {
            warn!(
                "guardian {} rejects challenge response from {}",
                self.guardian_id, response.sender_id
            );
            return Err(Error::ShareMismatch {
                sender: response.sender_id.clone(),
                recipient: self.guardian_id.clone(),
            });
        }
        self.state.disputed.remove(&response.sender_id);
        self.state
            .received
            .insert(response.sender_id.clone(), response.share.clone());
        Ok(())
    }

    /// Every peer's share has arrived and verified.
    pub fn verify(mut self) -> Result<Guardian<SharesVerified>> {
        if let Some(sender) = self.state.disputed.keys().next() {
            return Err(Error::ShareMismatch {
                sender: sender.clone(),
                recipient: self.guardian_id.clone(),
            });
        }
        if let Some(missing) = self
            .state
            .peers
            .keys()
            .find(|id| !self.state.received.contains_key(*id))
        {
            return Err(Error::Ceremony(format!(
                "guardian {} has no share from {}",
                self.guardian_id, missing
            )));
        }
        let peers = std::mem::take(&mut self.state.peers);
        let received = std::mem::take(&mut self.state.received);
        Ok(self.transition(SharesVerified { peers, received }))
    }
}

impl Guardian<SharesVerified> {
    /// Check the election record carries exactly the key shares this guardian verified, and
    /// the joint key is their product.
    pub fn combine(mut self, election: &ElectionInitialized) -> Result<Guardian<Combined>> {
        if election.base_hash != self.base_hash {
            return Err(Error::Ceremony("election base hash differs".to_owned()));
        }
        let own = self.key_share();
        for share in &election.guardians {
            let expected = if share.guardian_id == self.guardian_id {
                Some(&own)
            } else {
                self.state.peers.get(&share.guardian_id)
            };
            if expected != Some(share) {
                return Err(Error::Ceremony(format!(
                    "election record key share for {} differs from the ceremony",
                    share.guardian_id
                )));
            }
        }
        if election.guardians.len() != self.state.peers.len() + 1 {
            return Err(Error::Ceremony(
                "election record has the wrong number of guardians".to_owned(),
            ));
        }
        let joint = crate::election::joint_public_key(&self.group, &election.guardians)?;
        if joint != election.joint_public_key {
            return Err(Error::Ceremony("joint public key is not ∏ K_i0".to_owned()));
        }

        debug!("guardian {} combined", self.guardian_id);
        let received = std::mem::take(&mut self.state.received);
        Ok(self.transition(Combined {
            received,
            extended_base_hash: election.extended_base_hash,
        }))
    }
}

impl Guardian<Combined> {
    pub fn extended_base_hash(&self) -> &Digest256 {
        &self.state.extended_base_hash
    }

    /// The guardian's secret material for decryption: its secret key and the backups it holds
    /// for every peer.
    pub fn decrypting_trustee(&self) -> DecryptingTrustee {
        DecryptingTrustee {
            guardian_id: self.guardian_id.clone(),
            x_coordinate: self.x_coordinate,
            secret_key: self.polynomial.secret().clone(),
            public_key: self.group.g_pow_p(self.polynomial.secret()),
            backups: self.state.received.clone(),
        }
    }
}

/// `g^{P_i(x_ℓ)} == ∏_j K_ij^{x_ℓ^j}`.
fn share_matches(
    group: &Group,
    sender: &GuardianKeyShare,
    x_coordinate: u32,
    value: &ElementModQ,
) -> bool {
    group.g_pow_p(value) == polynomial::commitment_at(group, &sender.coefficient_commitments, x_coordinate)
}

/// Check a revealed share against the sender's commitments.  Needs nothing secret.
pub fn verify_challenge_response(
    group: &Group,
    sender: &GuardianKeyShare,
    response: &ShareChallengeResponse,
) -> bool {
    response.sender_id == sender.guardian_id
        && group.is_in_bounds_q(&response.share)
        && share_matches(group, sender, response.recipient_x_coordinate, &response.share)
}

fn backup_context(base_hash: &Digest256, sender: &str, recipient: &str) -> Digest256 {
    hash(&[&"share backup", base_hash, &sender, &recipient])
}
