//! Serde helpers for the record types, and validating JSON import.
//!
//! Deserialization cannot see the group, so parsing only checks the shape of each value.
//! Membership in the group is checked afterwards by `Validate`, which `from_json` runs for
//! every record it loads.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::crypto::chaum_pedersen;
use crate::crypto::chaum_pedersen::range;
use crate::crypto::elgamal::Ciphertext;
use crate::crypto::group::{ElementModP, ElementModQ, Group};
use crate::crypto::schnorr;
use crate::errors::Result;

pub mod digest;
pub mod element;
pub mod hex_bytes;

/// Check that every group element reachable from a deserialized value lies in its space.
pub trait Validate {
    fn validate(&self, group: &Group) -> Result<()>;
}

/// Parse `json` and check every element in it against `group`.
pub fn from_json<T: DeserializeOwned + Validate>(group: &Group, json: &str) -> Result<T> {
    let value: T = serde_json::from_str(json)?;
    value.validate(group)?;
    Ok(value)
}

pub fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

impl Validate for ElementModP {
    fn validate(&self, group: &Group) -> Result<()> {
        group.validate_p(self, "element mod P")
    }
}

impl Validate for ElementModQ {
    fn validate(&self, group: &Group) -> Result<()> {
        group.validate_q(self, "element mod Q")
    }
}

impl Validate for Ciphertext {
    fn validate(&self, group: &Group) -> Result<()> {
        Ciphertext::validate(self, group)
    }
}

impl Validate for schnorr::Proof {
    fn validate(&self, group: &Group) -> Result<()> {
        group.validate_p(&self.commitment, "Schnorr commitment")?;
        group.validate_q(&self.challenge, "Schnorr challenge")?;
        group.validate_q(&self.response, "Schnorr response")
    }
}

impl Validate for chaum_pedersen::Proof {
    fn validate(&self, group: &Group) -> Result<()> {
        self.commitment.validate(group)?;
        group.validate_q(&self.challenge, "Chaum-Pedersen challenge")?;
        group.validate_q(&self.response, "Chaum-Pedersen response")
    }
}

impl Validate for range::Proof {
    fn validate(&self, group: &Group) -> Result<()> {
        self.branches.validate(group)
    }
}

impl<T: Validate> Validate for Vec<T> {
    fn validate(&self, group: &Group) -> Result<()> {
        self.iter().try_for_each(|x| x.validate(group))
    }
}

impl<T: Validate> Validate for Option<T> {
    fn validate(&self, group: &Group) -> Result<()> {
        match self {
            Some(x) => x.validate(group),
            None => Ok(()),
        }
    }
}

impl<K, T: Validate> Validate for BTreeMap<K, T> {
    fn validate(&self, group: &Group) -> Result<()> {
        self.values().try_for_each(|x| x.validate(group))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::errors::Error;
    use num::BigUint;

    #[test]
    fn non_residue_rejected_after_parse() {
        let group = Group::testing();
        // `g` generates the subgroup, so `p - 1` (which has order 2) cannot be in it.
        let outside = ElementModP::unchecked(group.p() - BigUint::from(1_u8));
        let json = to_json(&outside).unwrap();
        assert!(matches!(
            from_json::<ElementModP>(&group, &json),
            Err(Error::InvalidGroupElement(_))
        ));
    }

    #[test]
    fn exponent_out_of_range_rejected() {
        let group = Group::testing();
        let too_big = ElementModQ::unchecked(group.q().clone());
        let json = to_json(&vec![group.one_q(), too_big]).unwrap();
        assert!(from_json::<Vec<ElementModQ>>(&group, &json).is_err());
    }

    #[test]
    fn malformed_json_is_a_json_error() {
        let group = Group::testing();
        assert!(matches!(
            from_json::<ElementModP>(&group, "{\"element\": 3"),
            Err(Error::Json(_))
        ));
    }
}
