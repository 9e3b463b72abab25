use data_encoding::{HEXUPPER, HEXUPPER_PERMISSIVE};
use num::BigUint;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::crypto::group::ELEMENT_BYTES;

/// Big-endian bytes of `value`, left-padded with zeros to `ELEMENT_BYTES`.
pub fn fixed_width(value: &BigUint) -> Vec<u8> {
    let raw = value.to_bytes_be();
    let mut out = vec![0_u8; ELEMENT_BYTES.saturating_sub(raw.len())];
    out.extend_from_slice(&raw);
    out
}

/// Serialize as fixed-width uppercase hex.
pub fn serialize<S>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    HEXUPPER.encode(&fixed_width(value)).serialize(serializer)
}

/// Accept hex of either case.  Shorter encodings are tolerated; longer ones are not, since no
/// group we accept has values that wide.
pub fn deserialize<'de, D>(deserializer: D) -> Result<BigUint, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    let bytes = HEXUPPER_PERMISSIVE
        .decode(s.as_bytes())
        .map_err(de::Error::custom)?;
    if bytes.len() > ELEMENT_BYTES {
        return Err(de::Error::custom(format!(
            "group value is {} bytes, at most {} allowed",
            bytes.len(),
            ELEMENT_BYTES
        )));
    }
    Ok(BigUint::from_bytes_be(&bytes))
}
