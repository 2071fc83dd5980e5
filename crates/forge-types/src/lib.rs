//! Shared data model for forge: digests, names, manifests, layers, model
//! config, and the GGML metadata oracle interface.

mod config;
mod digest;
mod error;
mod manifest;
mod media_type;
mod name;

pub use config::{Capability, GgmlMetadata, ModelConfig, RootFs, StaticGgmlMetadata};
pub use digest::{Digest, DigestError};
pub use error::TypesError;
pub use manifest::{Layer, Manifest, MANIFEST_MEDIA_TYPE};
pub use media_type::{MediaType, MediaTypeError};
pub use name::{Name, NameError, Scheme, DEFAULT_HOST, DEFAULT_NAMESPACE, DEFAULT_TAG};
