use forge_types::{DigestError, NameError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Name(#[from] NameError),
    #[error(transparent)]
    Digest(#[from] DigestError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("registry returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("manifest json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("digest mismatch: expected {expected}, computed {computed}")]
    DigestMismatch { expected: String, computed: String },
    #[error("manifest not found for {0}")]
    ManifestNotFound(String),
    #[error("blob not found for digest {0}")]
    BlobNotFound(String),
    #[error("local layer {digest} has size {local}, manifest declares {declared}")]
    SizeMismatch {
        digest: String,
        local: u64,
        declared: u64,
    },
    #[error("transfer was cancelled")]
    Cancelled,
    #[error("out of disk space")]
    NoSpace,
    #[error("registry requires authentication and no credentials were available")]
    AuthRequired,
    #[error("malformed www-authenticate challenge: {0}")]
    BadChallenge(String),
    #[error("name {0} is not fully qualified; cannot push or copy")]
    NotFullyQualified(String),
    #[error("stall: no bytes received for {elapsed:?} on part {part}")]
    Stall { part: u32, elapsed: std::time::Duration },
}
