//! Content fingerprints.
//!
//! A fingerprint is the blake3 digest of a snapshot's serialized form. Two
//! snapshots are considered equal iff their fingerprints match; no deep
//! comparison is ever performed. Clients echo the hex form back to express
//! "what I already have".

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{BroadcastResult, ValidationError};
use crate::serializer::Serializer;

/// Digest of a serialized content snapshot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint of raw serialized bytes.
    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    /// Serializes `content` with `serializer` and fingerprints the result.
    ///
    /// # Errors
    ///
    /// Propagates the serializer's `SerializationFailed`.
    pub fn of<C, S>(serializer: &S, content: &C) -> BroadcastResult<Self>
    where
        C: ?Sized,
        S: Serializer<C> + ?Sized,
    {
        let serialized = serializer.serialize(content)?;
        Ok(Self::of_bytes(serialized.as_bytes()))
    }

    /// Raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex form (64 chars).
    #[must_use]
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        blake3::Hash::from_hex(trimmed)
            .map(|h| Self(*h.as_bytes()))
            .map_err(|e| ValidationError::InvalidFingerprint {
                value: trimmed.to_string(),
                reason: e.to_string(),
            })
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.to_hex()
    }
}
