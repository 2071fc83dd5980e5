//! Push orchestration: validate local layers, upload (with cross-repo mount
//! attempted), commit manifest (spec §4.4 "Push").

use forge_types::{Manifest, Name};

use crate::blob_store::BlobStore;
use crate::error::RegistryError;
use crate::progress::{emit, ProgressEvent, ProgressSender};
use crate::transport::RegistryTransport;
use crate::uploader::ChunkedUploader;

pub struct PushOrchestrator {
    transport: RegistryTransport,
    blobs: BlobStore,
}

impl PushOrchestrator {
    pub fn new(transport: RegistryTransport, blobs: BlobStore) -> Self {
        Self { transport, blobs }
    }

    pub async fn push(
        &self,
        name: &Name,
        manifest: &Manifest,
        from: Option<&Name>,
        progress: Option<ProgressSender>,
    ) -> Result<(), RegistryError> {
        if !name.is_fully_qualified() {
            return Err(RegistryError::NotFullyQualified(name.to_string()));
        }

        self.validate_local_layers(manifest).await?;

        let host = format!("{}://{}", name.scheme(), name.host);
        let repository = name.repository();
        let uploader = ChunkedUploader::new(self.transport.clone());

        let layers: Vec<_> = std::iter::once(manifest.config.clone())
            .chain(manifest.layers.iter().cloned())
            .collect();
        let total: u64 = layers.iter().map(|l| l.size).sum();
        let mut uploaded = 0u64;

        for layer in layers {
            let base_url = format!("{host}/v2/{repository}/blobs/uploads/");
            let from_repo = layer.from.as_ref().or(from).map(|n| n.repository());

            let (outcome, start_url) = uploader
                .try_mount(&base_url, &layer.digest, from_repo.as_deref())
                .await?;

            if !outcome.mounted {
                let start_url = start_url.ok_or_else(|| RegistryError::Status {
                    status: 0,
                    body: "registry did not return an upload URL".to_string(),
                })?;
                let path = self.blobs.get_file_path(&layer.digest)?;
                uploader
                    .upload(&start_url, &path, &layer.digest, layer.size, progress.clone())
                    .await?;
            }

            uploaded += layer.size;
            emit(
                progress.as_ref(),
                ProgressEvent::progress(total, uploaded, "pushing", Some(layer.digest.to_string())),
            )
            .await;
        }

        self.commit_manifest(&host, &repository, name, manifest).await?;
        emit(progress.as_ref(), ProgressEvent::progress(total, total, "success", None)).await;
        Ok(())
    }

    /// Every referenced layer must exist locally with the size the manifest
    /// declares before any network I/O begins (spec §4.4 "Push").
    async fn validate_local_layers(&self, manifest: &Manifest) -> Result<(), RegistryError> {
        for digest in manifest.digests() {
            let actual = self.blobs.size(digest).await?;
            let declared = manifest
                .layers
                .iter()
                .chain(std::iter::once(&manifest.config))
                .find(|l| &l.digest == digest)
                .map(|l| l.size)
                .unwrap_or(actual);
            if actual != declared {
                return Err(RegistryError::SizeMismatch {
                    digest: digest.to_string(),
                    local: actual,
                    declared,
                });
            }
        }
        Ok(())
    }

    async fn commit_manifest(&self, host: &str, repository: &str, name: &Name, manifest: &Manifest) -> Result<(), RegistryError> {
        let url = format!("{host}/v2/{repository}/manifests/{}", name.tag);
        let resp = self
            .transport
            .client()
            .put(&url)
            .header("content-type", forge_types::MANIFEST_MEDIA_TYPE)
            .json(manifest)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(RegistryError::Status {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Credentials;
    use forge_types::{Digest, Layer, MediaType};

    fn temp_store() -> BlobStore {
        let mut dir = std::env::temp_dir();
        dir.push(format!("forge-push-test-{}-{}", std::process::id(), std::ptr::from_ref(&dir) as usize));
        BlobStore::new(dir)
    }

    #[tokio::test]
    async fn validate_local_layers_rejects_size_mismatch() {
        let transport = RegistryTransport::new(Credentials::default());
        let blobs = temp_store();
        let orchestrator = PushOrchestrator::new(transport, blobs.clone());

        let bytes = b"hello world";
        let digest = blobs.put_bytes(bytes).await.unwrap();
        let config = Layer::new(MediaType::Config, digest, bytes.len() as u64 + 5);
        let manifest = Manifest::new(config, vec![]);

        let err = orchestrator.validate_local_layers(&manifest).await.unwrap_err();
        assert!(matches!(err, RegistryError::SizeMismatch { .. }));

        let _ = tokio::fs::remove_dir_all(blobs.root()).await;
    }

    #[tokio::test]
    async fn validate_local_layers_accepts_matching_size() {
        let transport = RegistryTransport::new(Credentials::default());
        let blobs = temp_store();
        let orchestrator = PushOrchestrator::new(transport, blobs.clone());

        let bytes = b"hello world";
        let digest = blobs.put_bytes(bytes).await.unwrap();
        let config = Layer::new(MediaType::Config, digest, bytes.len() as u64);
        let manifest = Manifest::new(config, vec![]);

        orchestrator.validate_local_layers(&manifest).await.unwrap();

        let _ = tokio::fs::remove_dir_all(blobs.root()).await;
    }
}
