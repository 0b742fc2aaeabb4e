use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PatternError;

const KEY_ID_LEN: usize = 16;
const V4_FINGERPRINT_LEN: usize = 40;
const V5_FINGERPRINT_LEN: usize = 64;

/// A long key ID or a full fingerprint, normalized to uppercase hex.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyHandle {
    KeyId(String),
    Fingerprint(String),
}

impl KeyHandle {
    /// Parse `0x`-prefixed or bare hex. Whitespace between groups is ignored.
    pub fn parse(input: &str) -> Result<Self, PatternError> {
        let trimmed = input.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let normalized: String = digits
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_uppercase();

        if hex::decode(&normalized).is_err() {
            return Err(PatternError::InvalidKey {
                input: input.to_string(),
                reason: "not a hexadecimal key identifier".into(),
            });
        }

        match normalized.len() {
            KEY_ID_LEN => Ok(Self::KeyId(normalized)),
            V4_FINGERPRINT_LEN | V5_FINGERPRINT_LEN => Ok(Self::Fingerprint(normalized)),
            len => Err(PatternError::InvalidKey {
                input: input.to_string(),
                reason: format!(
                    "expected a 16 digit key ID or a full fingerprint, got {len} hex digits"
                ),
            }),
        }
    }

    pub fn hex(&self) -> &str {
        match self {
            Self::KeyId(hex) | Self::Fingerprint(hex) => hex,
        }
    }

    pub fn is_fingerprint(&self) -> bool {
        matches!(self, Self::Fingerprint(_))
    }

    /// The long key ID. For v4 fingerprints these are the trailing 16 digits,
    /// for v5 the leading 16.
    pub fn key_id(&self) -> KeyHandle {
        match self {
            Self::KeyId(_) => self.clone(),
            Self::Fingerprint(hex) if hex.len() == V5_FINGERPRINT_LEN => {
                Self::KeyId(hex[..KEY_ID_LEN].to_string())
            }
            Self::Fingerprint(hex) => {
                Self::KeyId(hex[hex.len().saturating_sub(KEY_ID_LEN)..].to_string())
            }
        }
    }

    /// Whether both handles can name the same key.
    pub fn aliases(&self, other: &KeyHandle) -> bool {
        match (self, other) {
            (Self::KeyId(a), Self::KeyId(b)) | (Self::Fingerprint(a), Self::Fingerprint(b)) => {
                a == b
            }
            _ => self.key_id() == other.key_id(),
        }
    }
}

impl fmt::Display for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.hex())
    }
}

impl Serialize for KeyHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for KeyHandle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        KeyHandle::parse(&raw).map_err(serde::de::Error::custom)
    }
}
