//! Lightweight worker authentication token.
//!
//! A fingerprint is a short digest of the trusted worker code. The controller
//! knows the expected value at deploy time and compares it against the
//! `worker_hash` field carried by worker messages. It keeps honest workers from
//! stale builds out of the pool; it is not a security boundary.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::DispatchError;

/// Number of hex characters kept from the digest.
pub const FINGERPRINT_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let digest = format!("{:x}", Sha256::digest(bytes));
        Self(digest[..FINGERPRINT_LEN].to_string())
    }

    /// Fingerprint of a file on disk, typically the worker executable.
    pub fn of_file(path: impl AsRef<Path>) -> Result<Self, DispatchError> {
        let bytes = std::fs::read(path.as_ref())?;
        Ok(Self::of_bytes(&bytes))
    }

    /// Fingerprint of the running executable. Workers ship in the same binary
    /// as the controller, so both sides agree without extra configuration.
    pub fn of_current_exe() -> Result<Self, DispatchError> {
        let exe = std::env::current_exe()?;
        Self::of_file(exe)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when `presented` is exactly this fingerprint.
    pub fn matches(&self, presented: Option<&str>) -> bool {
        presented == Some(self.0.as_str())
    }
}

impl FromStr for Fingerprint {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = s.len() == FINGERPRINT_LEN
            && s.bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(DispatchError::Config(format!(
                "fingerprint must be {} lowercase hex characters, got {:?}",
                FINGERPRINT_LEN, s
            )))
        }
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = DispatchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
