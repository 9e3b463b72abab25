use log::{debug, info, warn};
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;

use super::guardian::{Announced, Guardian, SharesDistributed};
use crate::decrypt::trustee::DecryptingTrustee;
use crate::errors::{Error, Result};
use crate::schema::{ElectionConfig, ElectionInitialized};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ShareOutcome {
    Delivered,
    Verified,
    /// The recipient rejected the backup and challenged the sender.
    Disputed,
    /// The sender's revealed share checked out.
    Resolved,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub sender_id: String,
    pub recipient_id: String,
    pub outcome: ShareOutcome,
}

/// Append-only record of every share exchange, in the order things happened.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ShareLedger {
    entries: Vec<LedgerEntry>,
}

impl ShareLedger {
    fn record(&mut self, sender_id: &str, recipient_id: &str, outcome: ShareOutcome) {
        self.entries.push(LedgerEntry {
            sender_id: sender_id.to_owned(),
            recipient_id: recipient_id.to_owned(),
            outcome,
        });
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// The latest outcome for the share `sender_id` sent to `recipient_id`.
    pub fn outcome(&self, sender_id: &str, recipient_id: &str) -> Option<ShareOutcome> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.sender_id == sender_id && e.recipient_id == recipient_id)
            .map(|e| e.outcome)
    }
}

pub struct CeremonyResult {
    pub election: ElectionInitialized,
    pub trustees: Vec<DecryptingTrustee>,
    pub ledger: ShareLedger,
}

/// Runs every guardian's side of the ceremony in one process, with a barrier between each
/// step: all commit, then all distribute, then all shares are delivered and verified, then
/// the joint key is formed.
pub struct KeyCeremony {
    config: ElectionConfig,
}

impl KeyCeremony {
    pub fn new(config: ElectionConfig) -> Result<KeyCeremony> {
        config.group()?;
        Ok(KeyCeremony { config })
    }

    /// Fresh guardians `guardian-1` .. `guardian-n` at x-coordinates `1..=n`.
    pub fn announce_guardians<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<Guardian<Announced>>> {
        (1..=self.config.number_of_guardians)
            .map(|x| Guardian::new(&self.config, &format!("guardian-{}", x), x, rng))
            .collect()
    }

    pub fn run<R: Rng + ?Sized>(
        &self,
        guardians: Vec<Guardian<Announced>>,
        rng: &mut R,
    ) -> Result<CeremonyResult> {
        if guardians.len() != self.config.number_of_guardians() {
            return Err(Error::Ceremony(format!(
                "{} guardians for a {}-guardian election",
                guardians.len(),
                self.config.number_of_guardians
            )));
        }
        info!(
            "key ceremony: {} guardians, quorum {}",
            self.config.number_of_guardians, self.config.quorum
        );

        let (committed, key_shares): (Vec<_>, Vec<_>) =
            guardians.into_iter().map(|g| g.commit()).unzip();

        let mut distributed = Vec::with_capacity(committed.len());
        let mut backups = Vec::new();
        for guardian in committed {
            let (guardian, sent) = guardian.distribute(&key_shares, rng)?;
            distributed.push(guardian);
            backups.extend(sent);
        }

        let index: BTreeMap<String, usize> = distributed
            .iter()
            .enumerate()
            .map(|(i, g)| (g.guardian_id().to_owned(), i))
            .collect();
        let lookup = |id: &str| {
            index
                .get(id)
                .copied()
                .ok_or_else(|| Error::Ceremony(format!("no guardian {}", id)))
        };

        let mut ledger = ShareLedger::default();
        for backup in &backups {
            let (sender, recipient) = (&backup.sender_id, &backup.recipient_id);
            ledger.record(sender, recipient, ShareOutcome::Delivered);
            let r = lookup(recipient)?;
            match distributed[r].receive_share(backup) {
                Ok(()) => ledger.record(sender, recipient, ShareOutcome::Verified),
                Err(Error::ShareMismatch { .. }) => {
                    ledger.record(sender, recipient, ShareOutcome::Disputed);
                    let s = lookup(sender)?;
                    let response = distributed[s].respond_to_challenge(recipient)?;
                    resolve(&mut distributed[r], &response)?;
                    ledger.record(sender, recipient, ShareOutcome::Resolved);
                }
                Err(e) => return Err(e),
            }
        }

        let verified = distributed
            .into_iter()
            .map(|g| g.verify())
            .collect::<Result<Vec<_>>>()?;
        debug!("key ceremony: all shares verified");

        let election = ElectionInitialized::new(self.config.clone(), key_shares)?;
        let trustees = verified
            .into_iter()
            .map(|g| g.combine(&election).map(|g| g.decrypting_trustee()))
            .collect::<Result<Vec<_>>>()?;
        info!("key ceremony complete");

        Ok(CeremonyResult {
            election,
            trustees,
            ledger,
        })
    }
}

fn resolve(
    recipient: &mut Guardian<SharesDistributed>,
    response: &super::ShareChallengeResponse,
) -> Result<()> {
    recipient.resolve_challenge(response).map_err(|e| {
        warn!(
            "key ceremony halted: guardian {} sent a bad share to {}",
            response.sender_id, response.recipient_id
        );
        e
    })
}
