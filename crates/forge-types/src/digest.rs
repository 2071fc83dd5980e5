use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use thiserror::Error;

/// A content address of the form `sha256:<64 hex chars>`.
///
/// Also parses the filesystem encoding `sha256-<hex>` used for blob file
/// names, but always renders back to the colon form via [`Display`].
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    hex: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DigestError {
    #[error("digest {0:?} is missing the \"sha256\" algorithm prefix")]
    MissingPrefix(String),
    #[error("digest {0:?} has {1} hex characters, expected 64")]
    BadLength(String, usize),
    #[error("digest {0:?} contains non-hex characters")]
    NotHex(String),
}

impl Digest {
    /// Compute the digest of `bytes`.
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let out = hasher.finalize();
        Self {
            hex: hex_encode(&out),
        }
    }

    /// The bare lowercase hex payload, without the `sha256:` prefix.
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Render as the filesystem-safe `sha256-<hex>` form used for blob file
    /// names under `blobs/`.
    pub fn to_path_component(&self) -> String {
        format!("sha256-{}", self.hex)
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = if let Some(rest) = s.strip_prefix("sha256:") {
            rest
        } else if let Some(rest) = s.strip_prefix("sha256-") {
            rest
        } else {
            return Err(DigestError::MissingPrefix(s.to_string()));
        };

        if hex.len() != 64 {
            return Err(DigestError::BadLength(s.to_string(), hex.len()));
        }
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(DigestError::NotHex(s.to_string()));
        }
        Ok(Self {
            hex: hex.to_ascii_lowercase(),
        })
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.hex)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({self})")
    }
}

impl Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Digest::from_str(&s).map_err(serde::de::Error::custom)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(&mut out, "{b:02x}").unwrap();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_known_digest() {
        let d = Digest::of(b"");
        assert_eq!(
            d.to_string(),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn round_trips_colon_form() {
        let s = format!("sha256:{}", "a".repeat(64));
        let d: Digest = s.parse().unwrap();
        assert_eq!(d.to_string(), s);
    }

    #[test]
    fn parses_dash_form_as_colon() {
        let s = format!("sha256-{}", "b".repeat(64));
        let d: Digest = s.parse().unwrap();
        assert_eq!(d.to_string(), format!("sha256:{}", "b".repeat(64)));
        assert_eq!(d.to_path_component(), s);
    }

    #[test]
    fn rejects_wrong_length() {
        let err = "sha256:abc".parse::<Digest>().unwrap_err();
        assert!(matches!(err, DigestError::BadLength(_, 3)));
    }

    #[test]
    fn rejects_non_hex() {
        let s = format!("sha256:{}", "z".repeat(64));
        let err = s.parse::<Digest>().unwrap_err();
        assert!(matches!(err, DigestError::NotHex(_)));
    }

    #[test]
    fn rejects_missing_prefix() {
        let err = "abcdef".parse::<Digest>().unwrap_err();
        assert!(matches!(err, DigestError::MissingPrefix(_)));
    }
}
