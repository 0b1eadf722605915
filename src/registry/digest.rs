//! SHA-256 content digests for manifests and layer blobs.
//!
//! OCI descriptors address content as `sha256:<64 lowercase hex>`. The
//! [`Sha256Digest`] newtype validates that form on construction, and
//! [`compute_sha256`] hashes downloaded blobs so they can be checked against
//! the descriptor before extraction.

use serde::{Deserialize, Deserializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Algorithm prefix of every supported digest.
const ALGORITHM_PREFIX: &str = "sha256:";

/// Expected length of a hex-encoded SHA-256 digest.
const DIGEST_HEX_LEN: usize = 64;

/// A digest string failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid digest \"{value}\": {reason}")]
pub struct InvalidDigest {
    /// The rejected digest string.
    pub value: String,
    /// Description of the validation failure.
    pub reason: String,
}

/// A validated `sha256:<hex>` content digest.
///
/// # Examples
///
/// ```
/// use modpull::registry::digest::Sha256Digest;
///
/// let value = format!("sha256:{}", "a".repeat(64));
/// let digest = Sha256Digest::parse(&value).expect("valid digest");
/// assert_eq!(digest.hex().len(), 64);
/// assert_eq!(digest.to_string(), value);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sha256Digest(String);

impl Sha256Digest {
    /// Parse a prefixed `sha256:<hex>` digest.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidDigest`] for any other algorithm, a wrong length,
    /// non-hex characters, or uppercase hex.
    pub fn parse(value: &str) -> Result<Self, InvalidDigest> {
        let invalid = |reason: String| InvalidDigest {
            value: value.to_owned(),
            reason,
        };
        let hex = value
            .strip_prefix(ALGORITHM_PREFIX)
            .ok_or_else(|| invalid("only sha256 digests are supported".to_owned()))?;
        validate_hex(hex).map_err(invalid)?;
        Ok(Self(hex.to_owned()))
    }

    /// Compute the digest of an in-memory byte slice.
    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(format!("{:x}", Sha256::digest(bytes)))
    }

    /// Return the bare hex portion of the digest.
    #[must_use]
    pub fn hex(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{ALGORITHM_PREFIX}{}", self.0)
    }
}

impl<'de> Deserialize<'de> for Sha256Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Compute the SHA-256 digest of the file at `path`.
///
/// # Errors
///
/// Returns any I/O error raised while reading the file.
pub fn compute_sha256(path: &Path) -> std::io::Result<Sha256Digest> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(buffer.get(..bytes_read).unwrap_or_default());
    }
    Ok(Sha256Digest(format!("{:x}", hasher.finalize())))
}

fn validate_hex(hex: &str) -> Result<(), String> {
    if hex.len() != DIGEST_HEX_LEN {
        return Err(format!(
            "expected {DIGEST_HEX_LEN} hex characters, got {}",
            hex.len()
        ));
    }
    if let Some(bad) = hex.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(format!("non-hex character '{bad}'"));
    }
    if hex.chars().any(|c| c.is_ascii_uppercase()) {
        return Err("digest must be lowercase".to_owned());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn prefixed(hex: &str) -> String {
        format!("{ALGORITHM_PREFIX}{hex}")
    }

    #[test]
    fn accepts_valid_digest() {
        let digest = Sha256Digest::parse(&prefixed(&"0".repeat(64))).expect("valid");
        assert_eq!(digest.hex(), "0".repeat(64));
    }

    #[rstest]
    #[case::no_prefix("a".repeat(64))]
    #[case::other_algorithm(format!("sha512:{}", "a".repeat(64)))]
    #[case::too_short(prefixed("abcdef"))]
    #[case::too_long(prefixed(&"a".repeat(65)))]
    #[case::non_hex(prefixed(&format!("{}g", "a".repeat(63))))]
    #[case::uppercase(prefixed(&"A".repeat(64)))]
    fn rejects_invalid_digests(#[case] value: String) {
        assert!(Sha256Digest::parse(&value).is_err(), "{value}");
    }

    #[test]
    fn file_digest_matches_byte_digest() {
        let temp = tempfile::tempdir().expect("temp dir");
        let path = temp.path().join("blob");
        std::fs::write(&path, b"hello world").expect("write blob");

        let from_file = compute_sha256(&path).expect("hash file");
        assert_eq!(from_file, Sha256Digest::of_bytes(b"hello world"));
        assert_eq!(
            from_file.hex(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn deserializes_from_json_string() {
        let json = format!("\"{}\"", prefixed(&"b".repeat(64)));
        let digest: Sha256Digest = serde_json::from_str(&json).expect("valid digest");
        assert_eq!(digest.hex(), "b".repeat(64));

        let bad: Result<Sha256Digest, _> = serde_json::from_str("\"sha256:nope\"");
        assert!(bad.is_err());
    }
}
