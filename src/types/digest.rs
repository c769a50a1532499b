use std::fmt;
use std::str::FromStr;

use data_encoding::HEXLOWER;
use ring::digest;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DigestError {
    #[error("Not a sha256 digest: {0}")]
    WrongAlgorithm(String),

    #[error("Expected 64 hex characters, got {0:?}")]
    InvalidHex(String),
}

/// Lowercase hex SHA-256 digest of a component's content.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Digest {
    hash: String,
}

impl Digest {
    pub fn from_sha256(digest: &digest::Digest) -> Digest {
        Digest {
            hash: HEXLOWER.encode(digest.as_ref()),
        }
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Compare against a producer-supplied checksum string. Malformed input never matches.
    pub fn matches(&self, checksum: &str) -> bool {
        checksum
            .parse::<Digest>()
            .map(|expected| expected == *self)
            .unwrap_or(false)
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hash = match s.split_once(':') {
            Some(("sha256", hash)) => hash,
            Some((algo, _)) => return Err(DigestError::WrongAlgorithm(algo.to_string())),
            None => s,
        };

        let hash = hash.trim().to_ascii_lowercase();
        if hash.len() != 64 || HEXLOWER.decode(hash.as_bytes()).is_err() {
            return Err(DigestError::InvalidHex(s.to_string()));
        }

        Ok(Digest { hash })
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hash)
    }
}
