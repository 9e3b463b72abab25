use data_encoding::{HEXUPPER, HEXUPPER_PERMISSIVE};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

pub fn serialize<S>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    HEXUPPER.encode(value).serialize(serializer)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    HEXUPPER_PERMISSIVE
        .decode(s.as_bytes())
        .map_err(de::Error::custom)
}
