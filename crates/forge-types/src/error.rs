use thiserror::Error;

use crate::digest::DigestError;
use crate::name::NameError;

/// Errors shared by every layer that handles names, digests, or manifests.
#[derive(Debug, Error)]
pub enum TypesError {
    #[error(transparent)]
    Digest(#[from] DigestError),
    #[error(transparent)]
    Name(#[from] NameError),
    #[error("manifest is not valid JSON: {0}")]
    ManifestJson(#[from] serde_json::Error),
}
