//! Pull orchestration: fetch manifest, download layers, verify, persist,
//! prune (spec §4.4 "Pull").

use std::sync::Arc;

use forge_types::{Manifest, Name};
use tokio::sync::Semaphore;

use crate::blob_store::BlobStore;
use crate::downloader::ChunkedDownloader;
use crate::error::RegistryError;
use crate::manifest_store::ManifestStore;
use crate::progress::{emit, ProgressEvent, ProgressSender};
use crate::transport::RegistryTransport;

/// Caps the number of layer downloads running at once, independent of each
/// download's own internal per-part concurrency (spec §4.4 step 3 "aggregate
/// stream cap").
const MAX_CONCURRENT_LAYER_DOWNLOADS: usize = 4;

pub struct PullOrchestrator {
    transport: RegistryTransport,
    blobs: BlobStore,
    manifests: ManifestStore,
}

impl PullOrchestrator {
    pub fn new(transport: RegistryTransport, blobs: BlobStore) -> Self {
        let manifests = ManifestStore::new(blobs.clone());
        Self { transport, blobs, manifests }
    }

    pub async fn pull(&self, name: &Name, noprune: bool, progress: Option<ProgressSender>) -> Result<Manifest, RegistryError> {
        let Some(host) = host_for(name) else {
            return Err(RegistryError::NotFullyQualified(name.to_string()));
        };

        emit(progress.as_ref(), ProgressEvent::progress(0, 0, "pulling manifest", None)).await;
        let manifest = self.fetch_manifest(&host, name).await?;
        let previous = self.manifests.read(name).await?;

        let layers: Vec<_> = std::iter::once(manifest.config.clone())
            .chain(manifest.layers.iter().cloned())
            .collect();
        let total: u64 = layers.iter().map(|l| l.size).sum();

        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_LAYER_DOWNLOADS));
        let mut handles = Vec::with_capacity(layers.len());
        for layer in layers {
            if self.blobs.exists(&layer.digest).await {
                continue;
            }
            let transport = self.transport.clone();
            let blobs = self.blobs.clone();
            let semaphore = semaphore.clone();
            let progress = progress.clone();
            let host = host.clone();
            let ns = name.namespace.clone();
            let model = name.model.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                let url = format!("{host}/v2/{ns}/{model}/blobs/{}", layer.digest);
                let downloader = ChunkedDownloader::new(transport, blobs);
                downloader.download(&url, &layer.digest, layer.size, progress).await
            }));
        }

        for handle in handles {
            handle.await.map_err(|_| RegistryError::Cancelled)??;
        }

        self.verify_layers(&manifest).await?;

        self.manifests.write(name, &manifest).await?;
        self.manifests.prune_orphans(&manifest, previous.as_ref(), noprune).await?;

        emit(
            progress.as_ref(),
            ProgressEvent::progress(total, total, "success", None),
        )
        .await;
        Ok(manifest)
    }

    async fn fetch_manifest(&self, host: &str, name: &Name) -> Result<Manifest, RegistryError> {
        let url = format!("{host}/v2/{}/{}/manifests/{}", name.namespace, name.model, name.tag);
        let resp = self
            .transport
            .request_with_headers(
                reqwest::Method::GET,
                &url,
                &[("accept", forge_types::MANIFEST_MEDIA_TYPE)],
            )
            .await?;
        if resp.status().as_u16() == 404 {
            return Err(RegistryError::ManifestNotFound(name.to_string()));
        }
        if !resp.status().is_success() {
            return Err(RegistryError::Status {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(resp.json().await?)
    }

    /// Recompute sha256 on every downloaded layer file; a mismatch deletes
    /// the file and fails the pull (spec §4.4 step 4).
    async fn verify_layers(&self, manifest: &Manifest) -> Result<(), RegistryError> {
        for digest in manifest.digests() {
            match self.blobs.verify(digest).await {
                Ok(true) => {}
                Ok(false) => {
                    self.blobs.delete(digest).await?;
                    return Err(RegistryError::DigestMismatch {
                        expected: digest.to_string(),
                        computed: "corrupt".to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

fn host_for(name: &Name) -> Option<String> {
    if name.host.is_empty() {
        return None;
    }
    Some(format!("{}://{}", name.scheme(), name.host))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_for_builds_scheme_prefixed_url() {
        let name: Name = "myorg/model:tag".parse().unwrap();
        assert_eq!(host_for(&name).unwrap(), "https://registry.forge.local");
    }
}
