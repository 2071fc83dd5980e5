//! Resolves an OpenAI-style `model` field to an on-disk model blob path.
//!
//! GGUF/safetensors parsing is out of scope; a resolved path is handed to
//! the scheduler opaquely and the worker process is responsible for
//! understanding its contents.

use std::path::PathBuf;

use forge_registry::Registry;
use forge_types::{MediaType, Name};

use crate::error::ServerError;

/// Look up the manifest for `model`, find its model-weight layer, and
/// return the local blob path the scheduler should load.
pub async fn resolve_model_path(registry: &Registry, model: &str) -> Result<PathBuf, ServerError> {
    let name: Name = model
        .parse()
        .map_err(|e| ServerError::BadRequest(format!("invalid model name {model:?}: {e}")))?;
    let name = name.with_defaults();

    let manifest = registry
        .manifests()
        .read(&name)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("model {model:?} not found")))?;

    let layer = manifest
        .layers
        .iter()
        .find(|l| l.media_type == MediaType::Model)
        .ok_or_else(|| ServerError::Internal(format!("manifest for {model:?} has no model layer")))?;

    Ok(registry.blobs().path_for(&layer.digest))
}
