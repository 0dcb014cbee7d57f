use crate::error::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const ALGORITHM: &str = "sha512";
const DIGEST_LEN: usize = 128;

/// Content hash of an image's canonical (decompressed) packaged form,
/// rendered as `sha512-<128 hex digits>`. The primary key of a sealed
/// image.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageHash(String);

impl ImageHash {
    pub fn from_digest_hex(hex_digest: &str) -> Result<Self, SchemaError> {
        Self::parse(&format!("{}-{}", ALGORITHM, hex_digest))
    }

    pub fn parse(s: &str) -> Result<Self, SchemaError> {
        let digest = s
            .strip_prefix(ALGORITHM)
            .and_then(|rest| rest.strip_prefix('-'))
            .ok_or_else(|| SchemaError::InvalidHash(s.to_string()))?;
        if digest.len() != DIGEST_LEN || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(SchemaError::InvalidHash(s.to_string()));
        }
        if digest.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(SchemaError::InvalidHash(s.to_string()));
        }
        Ok(ImageHash(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for listings.
    pub fn short(&self) -> &str {
        &self.0[..ALGORITHM.len() + 1 + 16]
    }
}

impl FromStr for ImageHash {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageHash::parse(s)
    }
}

impl TryFrom<String> for ImageHash {
    type Error = SchemaError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        ImageHash::parse(&s)
    }
}

impl From<ImageHash> for String {
    fn from(h: ImageHash) -> String {
        h.0
    }
}

impl fmt::Display for ImageHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex128() -> String {
        "0123456789abcdef".repeat(8)
    }

    #[test]
    fn test_parse() {
        let full = format!("sha512-{}", hex128());
        let h = ImageHash::parse(&full).unwrap();
        assert_eq!(h.as_str(), full);
        assert_eq!(h.short(), &full[..7 + 16]);

        assert!(ImageHash::parse("sha512-abc").is_err());
        assert!(ImageHash::parse(&format!("sha256-{}", hex128())).is_err());
        assert!(ImageHash::parse(&hex128()).is_err());
        assert!(ImageHash::parse(&format!("sha512-{}", hex128().to_uppercase())).is_err());
    }

    #[test]
    fn test_from_digest_hex() {
        let h = ImageHash::from_digest_hex(&hex128()).unwrap();
        assert_eq!(h.as_str(), format!("sha512-{}", hex128()));
    }
}
