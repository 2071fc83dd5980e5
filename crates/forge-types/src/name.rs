use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::digest::Digest;

/// Transport scheme for a registry host, per spec: `{http, https, https+insecure}`,
/// defaulting to `https`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
    HttpsInsecure,
}

impl Scheme {
    pub fn is_tls(self) -> bool {
        matches!(self, Scheme::Https | Scheme::HttpsInsecure)
    }

    pub fn verifies_cert(self) -> bool {
        matches!(self, Scheme::Https)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
            Scheme::HttpsInsecure => "https+insecure",
        };
        f.write_str(s)
    }
}

impl FromStr for Scheme {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            "https+insecure" => Ok(Scheme::HttpsInsecure),
            other => Err(NameError::UnknownScheme(other.to_string())),
        }
    }
}

/// A canonical model name: `<scheme>://<host>/<namespace>/<model>:<tag>@<digest>`.
///
/// Only the fully-qualified form (host, namespace, model, tag all present)
/// is addressable for `copy`/`push`, per spec §6.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Name {
    #[serde(skip, default)]
    scheme: Scheme,
    pub host: String,
    pub namespace: String,
    pub model: String,
    pub tag: String,
    pub digest: Option<Digest>,
}

impl Default for Scheme {
    fn default() -> Self {
        Scheme::Https
    }
}

pub const DEFAULT_HOST: &str = "registry.forge.local";
pub const DEFAULT_NAMESPACE: &str = "library";
pub const DEFAULT_TAG: &str = "latest";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("unknown scheme {0:?}, expected http, https, or https+insecure")]
    UnknownScheme(String),
    #[error("name {0:?} has no model component")]
    MissingModel(String),
    #[error("name {0:?} has an invalid digest suffix")]
    InvalidDigest(String),
    #[error("name {0:?} is empty")]
    Empty(String),
}

impl Name {
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// True iff every addressable component (host, namespace, model, tag) is
    /// present and non-empty — the "fully-qualified" predicate from spec §3.
    pub fn is_fully_qualified(&self) -> bool {
        !self.host.is_empty()
            && !self.namespace.is_empty()
            && !self.model.is_empty()
            && !self.tag.is_empty()
    }

    /// Fill in missing host/namespace/tag with the documented defaults.
    pub fn with_defaults(mut self) -> Self {
        if self.host.is_empty() {
            self.host = DEFAULT_HOST.to_string();
        }
        if self.namespace.is_empty() {
            self.namespace = DEFAULT_NAMESPACE.to_string();
        }
        if self.tag.is_empty() {
            self.tag = DEFAULT_TAG.to_string();
        }
        self
    }

    /// Filesystem path fragment under `manifests/`: `<host>/<ns>/<model>/<tag>`.
    pub fn manifest_path(&self) -> std::path::PathBuf {
        [&self.host, &self.namespace, &self.model, &self.tag]
            .iter()
            .collect()
    }

    /// The `<ns>/<model>` repository path used in registry URLs.
    pub fn repository(&self) -> String {
        format!("{}/{}", self.namespace, self.model)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}/{}/{}:{}",
            self.scheme, self.host, self.namespace, self.model, self.tag
        )?;
        if let Some(d) = &self.digest {
            write!(f, "@{d}")?;
        }
        Ok(())
    }
}

impl FromStr for Name {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(NameError::Empty(s.to_string()));
        }

        let (scheme, rest) = match s.split_once("://") {
            Some((scheme_str, rest)) => (scheme_str.parse()?, rest),
            None => (Scheme::Https, s),
        };

        let (rest, digest) = match rest.split_once('@') {
            Some((rest, digest_str)) => {
                let digest = digest_str
                    .parse::<Digest>()
                    .map_err(|_| NameError::InvalidDigest(s.to_string()))?;
                (rest, Some(digest))
            }
            None => (rest, None),
        };

        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return Err(NameError::MissingModel(s.to_string()));
        }

        // Last segment is "model:tag"; everything before is host/namespace,
        // disambiguated the way Docker does: a segment containing a dot, a
        // colon (port), or equal to "localhost" is the host.
        let (host, namespace, model_tag) = match segments.len() {
            1 => (String::new(), String::new(), segments[0]),
            2 => {
                if looks_like_host(segments[0]) {
                    (segments[0].to_string(), String::new(), segments[1])
                } else {
                    (String::new(), segments[0].to_string(), segments[1])
                }
            }
            _ => {
                let host = segments[0].to_string();
                let namespace = segments[1..segments.len() - 1].join("/");
                (host, namespace, segments[segments.len() - 1])
            }
        };

        let (model, tag) = match model_tag.split_once(':') {
            Some((m, t)) => (m.to_string(), t.to_string()),
            None => (model_tag.to_string(), String::new()),
        };

        if model.is_empty() {
            return Err(NameError::MissingModel(s.to_string()));
        }

        Ok(Name {
            scheme,
            host,
            namespace,
            model,
            tag,
            digest,
        }
        .with_defaults())
    }
}

/// Host-vs-tag disambiguation: a bare `host:port` segment is recognized by
/// containing a dot (a registered domain) or being `localhost`, mirroring
/// the convention used by Docker Hub shorthand resolution.
fn looks_like_host(segment: &str) -> bool {
    let host_part = segment.split(':').next().unwrap_or(segment);
    host_part.contains('.') || host_part == "localhost"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_model_name() {
        let n: Name = "llama3".parse().unwrap();
        assert_eq!(n.host, DEFAULT_HOST);
        assert_eq!(n.namespace, DEFAULT_NAMESPACE);
        assert_eq!(n.model, "llama3");
        assert_eq!(n.tag, DEFAULT_TAG);
    }

    #[test]
    fn parses_namespace_model_tag() {
        let n: Name = "myorg/llama3:8b".parse().unwrap();
        assert_eq!(n.host, DEFAULT_HOST);
        assert_eq!(n.namespace, "myorg");
        assert_eq!(n.model, "llama3");
        assert_eq!(n.tag, "8b");
    }

    #[test]
    fn parses_fully_qualified_with_scheme_and_digest() {
        let digest_str = format!("sha256:{}", "c".repeat(64));
        let s = format!("https://example.com/myorg/llama3:8b@{digest_str}");
        let n: Name = s.parse().unwrap();
        assert_eq!(n.scheme(), Scheme::Https);
        assert_eq!(n.host, "example.com");
        assert_eq!(n.namespace, "myorg");
        assert_eq!(n.model, "llama3");
        assert_eq!(n.tag, "8b");
        assert_eq!(n.digest.clone().unwrap().to_string(), digest_str);
        assert!(n.is_fully_qualified());
    }

    #[test]
    fn disambiguates_localhost_port_from_tag() {
        let n: Name = "localhost:5000/llama3:8b".parse().unwrap();
        assert_eq!(n.host, "localhost:5000");
        assert_eq!(n.model, "llama3");
        assert_eq!(n.tag, "8b");
    }

    #[test]
    fn treats_non_host_two_segments_as_namespace_model() {
        let n: Name = "myorg/llama3".parse().unwrap();
        assert_eq!(n.host, DEFAULT_HOST);
        assert_eq!(n.namespace, "myorg");
        assert_eq!(n.model, "llama3");
    }

    #[test]
    fn display_round_trips() {
        let n: Name = "myorg/llama3:8b".parse().unwrap();
        let s = n.to_string();
        let n2: Name = s.parse().unwrap();
        assert_eq!(n, n2);
    }

    #[test]
    fn rejects_empty() {
        assert!("".parse::<Name>().is_err());
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!("ftp://host/ns/model:tag".parse::<Name>().is_err());
    }
}
