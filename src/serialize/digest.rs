use data_encoding::{HEXUPPER, HEXUPPER_PERMISSIVE};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    HEXUPPER.encode(value).serialize(serializer)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    let bytes = HEXUPPER_PERMISSIVE
        .decode(s.as_bytes())
        .map_err(de::Error::custom)?;
    let mut out = [0_u8; 32];
    if bytes.len() != out.len() {
        return Err(de::Error::invalid_length(bytes.len(), &"32 bytes"));
    }
    out.copy_from_slice(&bytes);
    Ok(out)
}
