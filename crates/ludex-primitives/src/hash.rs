use std::{fmt, str, str::FromStr};

use borsh::{BorshDeserialize, BorshSerialize};
use const_hex as hex;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::CodecError;

/// Identifier of an upstream block, the hash of its header.
///
/// Fixed 32 bytes with bytewise equality and ordering.  The hex codec is
/// big-endian lowercase, always 64 characters.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, BorshSerialize, BorshDeserialize,
)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn zero() -> Self {
        Self([0; 32])
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parses the 64-char lowercase hex form.  Reported to the caller on
    /// malformed input, never panicked.
    pub fn from_hex(s: &str) -> Result<Self, CodecError> {
        if s.len() != 64 {
            return Err(CodecError::InvalidHashLength(s.len()));
        }
        hex::decode_to_array(s)
            .map(Self)
            .map_err(|e| CodecError::InvalidHex(e.to_string()))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; 32]> for BlockHash {
    fn from(value: [u8; 32]) -> Self {
        Self(value)
    }
}

impl From<BlockHash> for [u8; 32] {
    fn from(value: BlockHash) -> Self {
        value.0
    }
}

impl AsRef<[u8]> for BlockHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buf = [0u8; 64];
        hex::encode_to_slice(self.0, &mut buf).expect("hash: enc hex");
        // hex encoding always produces valid UTF-8
        f.write_str(str::from_utf8(&buf).expect("hash: hex utf8"))
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for BlockHash {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for BlockHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for BlockHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as Deserialize>::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "37ad61cff1367467a98cf7c54c4ac99e989f1fbb1bc1e646235e90c065c565ba";

    #[test]
    fn test_hex_roundtrip() {
        let hash = BlockHash::from_hex(SAMPLE).unwrap();
        assert_eq!(hash.to_hex(), SAMPLE);
        assert_eq!(hash.to_string(), SAMPLE);
    }

    #[test]
    fn test_bad_length() {
        assert!(matches!(
            BlockHash::from_hex("abcd"),
            Err(CodecError::InvalidHashLength(4))
        ));
    }

    #[test]
    fn test_bad_chars() {
        let s = "zz".repeat(32);
        assert!(matches!(
            BlockHash::from_hex(&s),
            Err(CodecError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_ordering_is_bytewise() {
        let a = BlockHash::new([0; 32]);
        let mut high = [0; 32];
        high[0] = 1;
        let b = BlockHash::new(high);
        assert!(a < b);
    }

    #[test]
    fn test_serde_hex_string() {
        let hash = BlockHash::from_hex(SAMPLE).unwrap();
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{SAMPLE}\""));
        let back: BlockHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }
}
