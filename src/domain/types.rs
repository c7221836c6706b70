//! Core identifier types for the analytics service.
//!
//! Site identifiers double as partition names on disk, so they are validated
//! once at the boundary and carried around as [`SiteId`] afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 32-byte SHA-256 hash
pub type Hash256 = [u8; 32];

/// 64-byte Ed25519 signature
pub type Signature64 = [u8; 64];

/// 32-byte Ed25519 public key
pub type PublicKey32 = [u8; 32];

/// Site used when a tracking request does not name one.
pub const DEFAULT_SITE_ID: &str = "default";

/// Maximum length of a site identifier.
pub const MAX_SITE_ID_LEN: usize = 64;

/// Error returned when a site identifier fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SiteIdError {
    #[error("site id must not be empty")]
    Empty,

    #[error("site id exceeds {MAX_SITE_ID_LEN} characters")]
    TooLong,

    #[error("site id contains invalid character {0:?} (allowed: A-Z a-z 0-9 _ -)")]
    InvalidCharacter(char),
}

/// Validated site identifier.
///
/// Restricted to `[A-Za-z0-9_-]{1,64}` so it can be used verbatim as a file
/// stem without path or identifier injection. Stored lowercased: ids that
/// differ only in case name the same site on every filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SiteId(String);

impl SiteId {
    /// Validate and wrap a site identifier, folding it to lowercase.
    pub fn parse(raw: impl Into<String>) -> Result<Self, SiteIdError> {
        let mut raw = raw.into();
        if raw.is_empty() {
            return Err(SiteIdError::Empty);
        }
        if raw.chars().count() > MAX_SITE_ID_LEN {
            return Err(SiteIdError::TooLong);
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(SiteIdError::InvalidCharacter(bad));
        }
        raw.make_ascii_lowercase();
        Ok(Self(raw))
    }

    /// Parse an optional identifier, falling back to [`DEFAULT_SITE_ID`].
    pub fn parse_or_default(raw: Option<&str>) -> Result<Self, SiteIdError> {
        match raw {
            Some(s) if !s.is_empty() => Self::parse(s),
            _ => Ok(Self::default()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SiteId {
    fn default() -> Self {
        Self(DEFAULT_SITE_ID.to_string())
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SiteId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for SiteId {
    type Err = SiteIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SiteId {
    type Error = SiteIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<SiteId> for String {
    fn from(id: SiteId) -> Self {
        id.0
    }
}

/// Anonymized visitor identifier: hex-encoded salted hash of the client address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VisitorId(String);

impl VisitorId {
    pub fn from_hash(hash: &Hash256) -> Self {
        Self(hex::encode(hash))
    }

    /// Wrap an already hex-encoded identifier (as stored in a partition).
    pub fn from_hex(hex_str: impl Into<String>) -> Self {
        Self(hex_str.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VisitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether reads of a site require a signature from its registered key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockState {
    /// No key registered; reads are open.
    Public,
    /// Exactly one key registered; reads must be signed by it.
    Locked,
}

impl LockState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockState::Public => "public",
            LockState::Locked => "locked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(LockState::Public),
            "locked" => Some(LockState::Locked),
            _ => None,
        }
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serde module for serializing 32-byte keys as hex strings
pub mod public_key_hex {
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}
