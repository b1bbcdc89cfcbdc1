//! Serde support for the wire tokens.

use serde::{
    de, Deserialize as SerdeDeserialize, Deserializer as SerdeDeserializer,
    Serialize as SerdeSerialize, Serializer as SerdeSerializer,
};

use crate::token::{SearchToken, UpdateToken};

impl SerdeSerialize for SearchToken {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: SerdeSerializer,
    {
        serializer.serialize_bytes(self.as_bytes())
    }
}

impl<'de> SerdeDeserialize<'de> for SearchToken {
    fn deserialize<D>(deserializer: D) -> Result<SearchToken, D::Error>
    where
        D: SerdeDeserializer<'de>,
    {
        // Going through serde_bytes accepts whatever shape the format uses
        // for byte strings, rather than only a literal byte buffer.
        let v: Vec<u8> = serde_bytes::deserialize(deserializer)?;
        SearchToken::from_slice(&v).map_err(|e| de::Error::custom(e.to_string()))
    }
}

impl SerdeSerialize for UpdateToken {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: SerdeSerializer,
    {
        serializer.serialize_bytes(self.as_bytes())
    }
}

impl<'de> SerdeDeserialize<'de> for UpdateToken {
    fn deserialize<D>(deserializer: D) -> Result<UpdateToken, D::Error>
    where
        D: SerdeDeserializer<'de>,
    {
        let v: Vec<u8> = serde_bytes::deserialize(deserializer)?;
        UpdateToken::from_slice(&v).map_err(|e| de::Error::custom(e.to_string()))
    }
}
