//! Election setup: the validated configuration, and the record that binds a completed key
//! ceremony to it.

use log::info;
use std::collections::BTreeSet;

use crate::crypto::group::{ElectionConstants, ElementModP, Group};
use crate::crypto::hash::{hash, Digest256};
use crate::errors::{Error, Result};
use crate::schema::{ElectionConfig, ElectionInitialized, GuardianKeyShare};
use crate::serialize::Validate;

/// x-coordinates are `u32`, but a ceremony is all-pairs, so keep `n` to something sensible.
pub const MAX_GUARDIANS: u32 = 255;

impl ElectionConfig {
    pub fn new(
        constants: ElectionConstants,
        manifest_hash: Digest256,
        number_of_guardians: u32,
        quorum: u32,
    ) -> Result<ElectionConfig> {
        let config = ElectionConfig {
            constants,
            manifest_hash,
            number_of_guardians,
            quorum,
            metadata: Default::default(),
        };
        config.group()?;
        Ok(config)
    }

    /// Parse a configuration and check it describes a usable election.
    pub fn from_json(json: &str) -> Result<ElectionConfig> {
        let config: ElectionConfig = serde_json::from_str(json)?;
        config.group()?;
        Ok(config)
    }

    /// Check `0 < k ≤ n` and build the group the constants describe.
    pub fn group(&self) -> Result<Group> {
        if self.quorum == 0 || self.quorum > self.number_of_guardians {
            return Err(Error::InvalidConfig(format!(
                "quorum {} must be in 1..={}",
                self.quorum, self.number_of_guardians
            )));
        }
        if self.number_of_guardians > MAX_GUARDIANS {
            return Err(Error::InvalidConfig(format!(
                "{} guardians is more than the supported {}",
                self.number_of_guardians, MAX_GUARDIANS
            )));
        }
        Group::new(self.constants.clone())
    }

    pub fn quorum(&self) -> usize {
        self.quorum as usize
    }

    pub fn number_of_guardians(&self) -> usize {
        self.number_of_guardians as usize
    }

    /// `H("base", P, Q, G, n, k, manifest_hash)`.
    pub fn base_hash(&self) -> Digest256 {
        let c = &self.constants;
        hash(&[
            &"base",
            &c.large_prime,
            &c.small_prime,
            &c.generator,
            &u64::from(self.number_of_guardians),
            &u64::from(self.quorum),
            &self.manifest_hash,
        ])
    }
}

/// Context hash for the Schnorr proof of guardian `guardian_id`'s coefficient `j`.
pub fn coefficient_context(base_hash: &Digest256, guardian_id: &str, j: u64) -> Digest256 {
    hash(&[base_hash, &guardian_id, &j])
}

/// Hash of every coefficient commitment, in the order the guardians are listed.
pub fn commitment_hash(guardians: &[GuardianKeyShare]) -> Digest256 {
    let commitments: Vec<ElementModP> = guardians
        .iter()
        .flat_map(|g| g.coefficient_commitments.iter().cloned())
        .collect();
    hash(&[&"commitments", &commitments.as_slice()])
}

impl GuardianKeyShare {
    /// `K_i0`, the guardian's public key.
    pub fn public_key(&self) -> Result<&ElementModP> {
        self.coefficient_commitments.first().ok_or_else(|| {
            Error::InvalidConfig(format!("guardian {} has no commitments", self.guardian_id))
        })
    }

    /// Check the shape of this key share against the quorum, and every coefficient proof.
    pub fn verify(&self, group: &Group, base_hash: &Digest256, quorum: usize) -> Result<()> {
        if self.x_coordinate == 0 {
            return Err(Error::Ceremony(format!(
                "guardian {} has x-coordinate zero",
                self.guardian_id
            )));
        }
        if self.coefficient_commitments.len() != quorum
            || self.coefficient_proofs.len() != quorum
        {
            return Err(Error::Ceremony(format!(
                "guardian {} published {} commitments and {} proofs, expected {}",
                self.guardian_id,
                self.coefficient_commitments.len(),
                self.coefficient_proofs.len(),
                quorum
            )));
        }
        for (j, (commitment, proof)) in self
            .coefficient_commitments
            .iter()
            .zip(&self.coefficient_proofs)
            .enumerate()
        {
            let context = coefficient_context(base_hash, &self.guardian_id, j as u64);
            proof.verify(
                group,
                commitment,
                &context,
                &format!("guardian {} coefficient {}", self.guardian_id, j),
            )?;
        }
        Ok(())
    }
}

impl Validate for GuardianKeyShare {
    fn validate(&self, group: &Group) -> Result<()> {
        self.coefficient_commitments.validate(group)?;
        self.coefficient_proofs.validate(group)
    }
}

impl ElectionInitialized {
    /// Bind the configuration to every guardian's published key share.  Every share is
    /// verified; the guardians are stored in x-coordinate order.
    pub fn new(
        config: ElectionConfig,
        mut guardians: Vec<GuardianKeyShare>,
    ) -> Result<ElectionInitialized> {
        let group = config.group()?;
        let base_hash = config.base_hash();

        if guardians.len() != config.number_of_guardians() {
            return Err(Error::Ceremony(format!(
                "{} key shares for {} guardians",
                guardians.len(),
                config.number_of_guardians
            )));
        }
        for guardian in &guardians {
            if guardian.x_coordinate == 0 || guardian.x_coordinate > config.number_of_guardians {
                return Err(Error::InvalidConfig(format!(
                    "guardian {} has x-coordinate {} outside 1..={}",
                    guardian.guardian_id, guardian.x_coordinate, config.number_of_guardians
                )));
            }
        }
        check_distinct(&guardians)?;
        for guardian in &guardians {
            guardian.verify(&group, &base_hash, config.quorum())?;
        }
        guardians.sort_by_key(|g| g.x_coordinate);

        let joint_public_key = joint_public_key(&group, &guardians)?;
        let extended_base_hash = hash(&[&"extended", &base_hash, &commitment_hash(&guardians)]);
        info!(
            "election initialized: {} guardians, quorum {}, extended base hash {:?}",
            config.number_of_guardians, config.quorum, extended_base_hash
        );

        Ok(ElectionInitialized {
            manifest_hash: config.manifest_hash,
            config,
            joint_public_key,
            base_hash,
            extended_base_hash,
            guardians,
            metadata: Default::default(),
        })
    }

    pub fn group(&self) -> Result<Group> {
        self.config.group()
    }

    pub fn quorum(&self) -> usize {
        self.config.quorum()
    }

    pub fn guardian(&self, guardian_id: &str) -> Option<&GuardianKeyShare> {
        self.guardians.iter().find(|g| g.guardian_id == guardian_id)
    }
}

impl Validate for ElectionInitialized {
    fn validate(&self, group: &Group) -> Result<()> {
        if self.config.constants != *group.constants() {
            return Err(Error::InvalidConfig(
                "record constants differ from the group".to_owned(),
            ));
        }
        self.joint_public_key.validate(group)?;
        self.guardians.validate(group)
    }
}

/// `K = ∏ K_i0`.
pub fn joint_public_key(group: &Group, guardians: &[GuardianKeyShare]) -> Result<ElementModP> {
    let keys = guardians
        .iter()
        .map(|g| g.public_key())
        .collect::<Result<Vec<_>>>()?;
    Ok(group.mult_p_all(keys))
}

fn check_distinct(guardians: &[GuardianKeyShare]) -> Result<()> {
    let mut ids = BTreeSet::new();
    let mut xs = BTreeSet::new();
    for g in guardians {
        if !ids.insert(&g.guardian_id) {
            return Err(Error::Ceremony(format!(
                "guardian id {} is used twice",
                g.guardian_id
            )));
        }
        if !xs.insert(g.x_coordinate) {
            return Err(Error::Ceremony(format!(
                "x-coordinate {} is used twice",
                g.x_coordinate
            )));
        }
    }
    Ok(())
}
