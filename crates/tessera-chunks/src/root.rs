//! Root identifiers: 32-byte content addresses, displayed as 0x-prefixed hex

use anyhow::Result;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Content address of a fragment, produced by [`crate::compute_root`]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RootId([u8; 32]);

impl RootId {
    pub const LEN: usize = 32;

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex with a `0x` prefix (66 chars)
    pub fn to_hex(&self) -> String {
        format!("0x{}", blake3::Hash::from(self.0).to_hex())
    }

    /// Parse 64 hex chars, with or without a `0x` prefix
    pub fn from_hex(hex: &str) -> Result<Self> {
        let digits = hex
            .strip_prefix("0x")
            .or_else(|| hex.strip_prefix("0X"))
            .unwrap_or(hex);
        let hash = blake3::Hash::from_hex(digits)
            .map_err(|e| anyhow::anyhow!("invalid root '{}': {}", hex, e))?;
        Ok(Self(*hash.as_bytes()))
    }

    /// Short form for log lines and progress messages
    pub fn short(&self) -> String {
        let hex = self.to_hex();
        hex[..18].to_string()
    }
}

impl From<blake3::Hash> for RootId {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

impl fmt::Display for RootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for RootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RootId({})", self.to_hex())
    }
}

impl FromStr for RootId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for RootId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for RootId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
