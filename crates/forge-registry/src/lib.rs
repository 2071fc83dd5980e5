pub mod blob_store;
pub mod downloader;
pub mod error;
pub mod manifest_store;
pub mod progress;
pub mod pull;
pub mod push;
pub mod transport;
pub mod uploader;

pub use blob_store::BlobStore;
pub use downloader::ChunkedDownloader;
pub use error::RegistryError;
pub use manifest_store::ManifestStore;
pub use progress::{ProgressEvent, ProgressSender};
pub use pull::PullOrchestrator;
pub use push::PushOrchestrator;
pub use transport::{Credentials, RegistryTransport};
pub use uploader::ChunkedUploader;

/// Bundles the local store and transport a caller needs to pull or push
/// against one registry, per spec §2 "Pull orchestrator" / "Push orchestrator".
#[derive(Clone)]
pub struct Registry {
    blobs: BlobStore,
    transport: RegistryTransport,
}

impl Registry {
    pub fn new(root: impl Into<std::path::PathBuf>, credentials: Credentials) -> Self {
        Self {
            blobs: BlobStore::new(root),
            transport: RegistryTransport::new(credentials),
        }
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn manifests(&self) -> ManifestStore {
        ManifestStore::new(self.blobs.clone())
    }

    pub async fn pull(
        &self,
        name: &forge_types::Name,
        noprune: bool,
        progress: Option<ProgressSender>,
    ) -> Result<forge_types::Manifest, RegistryError> {
        PullOrchestrator::new(self.transport.clone(), self.blobs.clone())
            .pull(name, noprune, progress)
            .await
    }

    pub async fn push(
        &self,
        name: &forge_types::Name,
        manifest: &forge_types::Manifest,
        from: Option<&forge_types::Name>,
        progress: Option<ProgressSender>,
    ) -> Result<(), RegistryError> {
        PushOrchestrator::new(self.transport.clone(), self.blobs.clone())
            .push(name, manifest, from, progress)
            .await
    }
}
