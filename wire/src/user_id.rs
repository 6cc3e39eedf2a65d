use crate::error::WireError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A 16-uppercase-hex-character user id, derived from a signing public key.
///
/// Derivation hashes the 32-byte signing public key with SHA-256 and keeps
/// the first 16 hex characters, uppercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Derive the user id from a 32-byte Ed25519 signing public key.
    pub fn derive(signing_pub: &[u8; 32]) -> Self {
        let digest = Sha256::digest(signing_pub);
        let hex = hex_encode(&digest);
        UserId(hex[..16].to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_valid(s: &str) -> bool {
        s.len() == 16 && s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_lowercase())
    }
}

impl TryFrom<String> for UserId {
    type Error = WireError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if Self::is_valid(&value) {
            Ok(UserId(value))
        } else {
            Err(WireError::InvalidUserId(value))
        }
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_deterministic_and_well_formed() {
        let pk = [7u8; 32];
        let a = UserId::derive(&pk);
        let b = UserId::derive(&pk);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 16);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a.as_str(), a.as_str().to_ascii_uppercase());
    }

    #[test]
    fn derive_differs_across_keys() {
        let a = UserId::derive(&[1u8; 32]);
        let b = UserId::derive(&[2u8; 32]);
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_lowercase_and_wrong_length() {
        assert!(UserId::try_from("abcd1234abcd1234".to_string()).is_err());
        assert!(UserId::try_from("ABCD1234".to_string()).is_err());
        assert!(UserId::try_from("ABCD1234ABCD123Z".to_string()).is_err());
    }
}
