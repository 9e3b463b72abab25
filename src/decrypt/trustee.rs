use log::debug;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::crypto::chaum_pedersen;
use crate::crypto::elgamal::Ciphertext;
use crate::crypto::group::{ElementModP, ElementModQ, Group};
use crate::crypto::nonce::Nonces;
use crate::errors::{Error, Result};
use crate::keyceremony::polynomial::commitment_at;
use crate::schema::{
    CompensatedDecryption, ContestMap, DecryptionShare, ElectionInitialized, GuardianKeyShare,
    PartialDecryption, SelectionDecryptionShare,
};
use crate::serialize::Validate;

/// A guardian's secret material after the key ceremony.  This is the only record that holds
/// secrets; it belongs to the guardian alone and is never part of the public election record.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct DecryptingTrustee {
    pub guardian_id: String,
    pub x_coordinate: u32,

    /// `s_i = a_i0`.
    pub secret_key: ElementModQ,

    /// `K_i0 = g^{s_i}`.
    pub public_key: ElementModP,

    /// `P_ℓ(x_i)` from every other guardian `ℓ`, keyed by `ℓ`'s id.
    pub backups: BTreeMap<String, ElementModQ>,
}

impl Validate for DecryptingTrustee {
    fn validate(&self, group: &Group) -> Result<()> {
        group.validate_q(&self.secret_key, "trustee secret key")?;
        group.validate_p(&self.public_key, "trustee public key")?;
        if group.g_pow_p(&self.secret_key) != self.public_key {
            return Err(Error::InvalidGroupElement(format!(
                "trustee {} public key does not match its secret key",
                self.guardian_id
            )));
        }
        self.backups.validate(group)
    }
}

/// What this trustee needs to compensate for one absent guardian.
struct Compensation<'a> {
    missing: &'a GuardianKeyShare,
    secret: &'a ElementModQ,
    recovery_public_key: ElementModP,
}

impl DecryptingTrustee {
    /// Partially decrypt every ciphertext in `ciphertexts`, and compute a fragment for each
    /// guardian in `missing`.  `target_id` names the tally or ballot being decrypted.
    pub fn compute_share<R: Rng + ?Sized>(
        &self,
        group: &Group,
        election: &ElectionInitialized,
        target_id: &str,
        ciphertexts: &ContestMap<Ciphertext>,
        missing: &[String],
        rng: &mut R,
    ) -> Result<DecryptionShare> {
        let own = election.guardian(&self.guardian_id).ok_or_else(|| {
            Error::InvalidConfig(format!(
                "trustee {} is not a guardian of this election",
                self.guardian_id
            ))
        })?;
        if own.public_key()? != &self.public_key || own.x_coordinate != self.x_coordinate {
            return Err(Error::InvalidConfig(format!(
                "trustee {} does not match its published key share",
                self.guardian_id
            )));
        }
        let compensations = missing
            .iter()
            .map(|id| self.compensation(group, election, id))
            .collect::<Result<Vec<_>>>()?;

        let seed = group.rand_range_q(rng, 1);
        let nonces = Nonces::new(group, &seed, &[&target_id, &self.guardian_id]);

        let selections: Vec<(&String, &String, &Ciphertext)> = ciphertexts
            .iter()
            .flat_map(|(c, sels)| sels.iter().map(move |(s, ct)| (c, s, ct)))
            .collect();
        let computed = selections
            .par_iter()
            .map(|&(contest_id, selection_id, ciphertext)| {
                let nonces = nonces.child(contest_id).child(selection_id);
                let share = self.selection_share(
                    group,
                    election,
                    ciphertext,
                    &compensations,
                    &nonces,
                );
                (contest_id, selection_id, share)
            })
            .collect::<Vec<_>>();

        let mut contests: ContestMap<SelectionDecryptionShare> = BTreeMap::new();
        for (contest_id, selection_id, share) in computed {
            contests
                .entry(contest_id.clone())
                .or_default()
                .insert(selection_id.clone(), share);
        }
        debug!(
            "guardian {} computed decryption share of {} ({} selections, {} compensated)",
            self.guardian_id,
            target_id,
            selections.len(),
            compensations.len()
        );

        Ok(DecryptionShare {
            guardian_id: self.guardian_id.clone(),
            target_id: target_id.to_owned(),
            contests,
        })
    }

    fn compensation<'a>(
        &'a self,
        group: &Group,
        election: &'a ElectionInitialized,
        missing_id: &str,
    ) -> Result<Compensation<'a>> {
        let missing = election.guardian(missing_id).ok_or_else(|| {
            Error::InvalidConfig(format!("{} is not a guardian of this election", missing_id))
        })?;
        let secret = self.backups.get(missing_id).ok_or_else(|| {
            Error::InvalidConfig(format!(
                "trustee {} holds no backup from {}",
                self.guardian_id, missing_id
            ))
        })?;
        let recovery_public_key =
            commitment_at(group, &missing.coefficient_commitments, self.x_coordinate);
        if group.g_pow_p(secret) != recovery_public_key {
            return Err(Error::InvalidShare {
                guardian_id: self.guardian_id.clone(),
                target: format!("backup from {}", missing_id),
            });
        }
        Ok(Compensation {
            missing,
            secret,
            recovery_public_key,
        })
    }

    fn selection_share(
        &self,
        group: &Group,
        election: &ElectionInitialized,
        ciphertext: &Ciphertext,
        compensations: &[Compensation<'_>],
        nonces: &Nonces,
    ) -> SelectionDecryptionShare {
        let extended_base_hash = &election.extended_base_hash;
        let gen_challenge = |statement: &Ciphertext, commitment: &Ciphertext| {
            super::share_challenge(group, extended_base_hash, ciphertext, statement, commitment)
        };

        let share = ciphertext.partial_decrypt(group, &self.secret_key);
        let proof = chaum_pedersen::Proof::prove_exp(
            group,
            &self.public_key,
            &self.secret_key,
            &ciphertext.pad,
            &share,
            &nonces.get(0),
            gen_challenge,
        );
        let partial = PartialDecryption {
            guardian_id: self.guardian_id.clone(),
            share,
            proof,
        };

        let compensated = compensations
            .iter()
            .enumerate()
            .map(|(k, c)| {
                let share = ciphertext.partial_decrypt(group, c.secret);
                let proof = chaum_pedersen::Proof::prove_exp(
                    group,
                    &c.recovery_public_key,
                    c.secret,
                    &ciphertext.pad,
                    &share,
                    &nonces.get(k as u64 + 1),
                    gen_challenge,
                );
                let fragment = CompensatedDecryption {
                    guardian_id: self.guardian_id.clone(),
                    missing_guardian_id: c.missing.guardian_id.clone(),
                    share,
                    recovery_public_key: c.recovery_public_key.clone(),
                    proof,
                };
                (c.missing.guardian_id.clone(), fragment)
            })
            .collect();

        SelectionDecryptionShare {
            partial,
            compensated,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::group::ElectionConstants;
    use crate::crypto::hash::hash;
    use crate::keyceremony::ceremony::{CeremonyResult, KeyCeremony};
    use crate::schema::ElectionConfig;
    use crate::serialize::{from_json, to_json};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ceremony(rng: &mut StdRng) -> CeremonyResult {
        let config =
            ElectionConfig::new(ElectionConstants::testing(), hash(&[&"manifest"]), 3, 2).unwrap();
        let ceremony = KeyCeremony::new(config).unwrap();
        let guardians = ceremony.announce_guardians(rng).unwrap();
        ceremony.run(guardians, rng).unwrap()
    }

    fn ciphertexts(
        group: &Group,
        election: &ElectionInitialized,
        rng: &mut StdRng,
    ) -> ContestMap<Ciphertext> {
        let (ct, _) = Ciphertext::encrypt_random(group, &election.joint_public_key, 1, rng);
        let mut selections = BTreeMap::new();
        selections.insert("selection-1".to_owned(), ct);
        let mut contests = BTreeMap::new();
        contests.insert("contest-1".to_owned(), selections);
        contests
    }

    #[test]
    fn share_covers_every_selection() {
        let mut rng = StdRng::seed_from_u64(80);
        let result = ceremony(&mut rng);
        let group = result.election.group().unwrap();
        let cts = ciphertexts(&group, &result.election, &mut rng);

        let trustee = &result.trustees[0];
        let missing = vec!["guardian-3".to_owned()];
        let share = trustee
            .compute_share(&group, &result.election, "t", &cts, &missing, &mut rng)
            .unwrap();
        assert_eq!(share.guardian_id, "guardian-1");
        assert_eq!(share.target_id, "t");
        let selection = &share.contests["contest-1"]["selection-1"];
        assert_eq!(
            selection.partial.share,
            cts["contest-1"]["selection-1"].partial_decrypt(&group, &trustee.secret_key)
        );
        let fragment = &selection.compensated["guardian-3"];
        assert_eq!(fragment.missing_guardian_id, "guardian-3");
        assert_eq!(
            fragment.recovery_public_key,
            group.g_pow_p(&trustee.backups["guardian-3"])
        );
    }

    #[test]
    fn corrupted_backup_refused() {
        let mut rng = StdRng::seed_from_u64(81);
        let result = ceremony(&mut rng);
        let group = result.election.group().unwrap();
        let cts = ciphertexts(&group, &result.election, &mut rng);

        let mut trustee = result.trustees[1].clone();
        let backup = trustee.backups.get_mut("guardian-1").unwrap();
        *backup = group.add_q(backup, &group.one_q());
        let missing = vec!["guardian-1".to_owned()];
        assert!(matches!(
            trustee.compute_share(&group, &result.election, "t", &cts, &missing, &mut rng),
            Err(Error::InvalidShare { guardian_id, .. }) if guardian_id == "guardian-2"
        ));
    }

    #[test]
    fn foreign_trustee_refused() {
        let mut rng = StdRng::seed_from_u64(82);
        let result = ceremony(&mut rng);
        let group = result.election.group().unwrap();
        let cts = ciphertexts(&group, &result.election, &mut rng);

        let mut trustee = result.trustees[0].clone();
        trustee.secret_key = group.q_from_u64(5);
        trustee.public_key = group.g_pow_p(&trustee.secret_key);
        assert!(matches!(
            trustee.compute_share(&group, &result.election, "t", &cts, &[], &mut rng),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn trustee_json() {
        let mut rng = StdRng::seed_from_u64(83);
        let result = ceremony(&mut rng);
        let group = result.election.group().unwrap();
        let trustee = &result.trustees[2];

        let json = to_json(trustee).unwrap();
        let parsed: DecryptingTrustee = from_json(&group, &json).unwrap();
        assert_eq!(&parsed, trustee);

        let mut mismatched = trustee.clone();
        mismatched.public_key = group.generator().clone();
        let json = to_json(&mismatched).unwrap();
        assert!(matches!(
            from_json::<DecryptingTrustee>(&group, &json),
            Err(Error::InvalidGroupElement(_))
        ));
    }
}
