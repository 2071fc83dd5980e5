//! Per-name manifest persistence (spec §2 "Manifest store", §6 "Local layout").

use std::path::PathBuf;

use forge_types::{Manifest, Name};

use crate::blob_store::BlobStore;
use crate::error::RegistryError;

#[derive(Clone, Debug)]
pub struct ManifestStore {
    blobs: BlobStore,
}

impl ManifestStore {
    pub fn new(blobs: BlobStore) -> Self {
        Self { blobs }
    }

    fn path(&self, name: &Name) -> PathBuf {
        self.blobs.manifests_dir().join(name.manifest_path())
    }

    pub async fn read(&self, name: &Name) -> Result<Option<Manifest>, RegistryError> {
        let path = self.path(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically write a manifest: write to a temp file, `fsync`, then
    /// rename over the final path (spec §4.4 step 5 "atomically write").
    pub async fn write(&self, name: &Name, manifest: &Manifest) -> Result<(), RegistryError> {
        let path = self.path(name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(manifest)?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    pub async fn delete(&self, name: &Name) -> Result<(), RegistryError> {
        match tokio::fs::remove_file(self.path(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Walk every stored manifest, returning `(host/ns/model/tag, Manifest)`.
    pub async fn enumerate(&self) -> Result<Vec<(PathBuf, Manifest)>, RegistryError> {
        let root = self.blobs.manifests_dir();
        let mut out = Vec::new();
        let mut stack = vec![root.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(e) => e,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let meta = entry.metadata().await?;
                if meta.is_dir() {
                    stack.push(path);
                } else {
                    let bytes = tokio::fs::read(&path).await?;
                    let manifest: Manifest = serde_json::from_slice(&bytes)?;
                    let rel = path.strip_prefix(&root).unwrap_or(&path).to_path_buf();
                    out.push((rel, manifest));
                }
            }
        }
        Ok(out)
    }

    /// Prune blobs in `superseded` that no surviving manifest still
    /// references (spec §4.4 step 5). Skipped entirely when `noprune` is set.
    pub async fn prune_orphans(&self, manifest: &Manifest, previous: Option<&Manifest>, noprune: bool) -> Result<(), RegistryError> {
        if noprune {
            return Ok(());
        }
        let Some(previous) = previous else {
            return Ok(());
        };
        let all = self.enumerate().await?;
        for digest in previous.superseded_by(manifest) {
            let still_referenced = all.iter().any(|(_, m)| m.digests().any(|d| d == digest));
            if !still_referenced {
                self.blobs.delete(digest).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_types::{Digest, Layer, MediaType};

    fn manifest(seed: u8) -> Manifest {
        let config = Layer::new(MediaType::Config, Digest::of(&[seed]), 10);
        let layer = Layer::new(MediaType::Model, Digest::of(&[seed, 1]), 20);
        Manifest::new(config, vec![layer])
    }

    fn store() -> (ManifestStore, TempDir) {
        let dir = TempDir::new();
        (ManifestStore::new(BlobStore::new(dir.path())), dir)
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let (store, _dir) = store();
        let name: Name = "myorg/llama3:8b".parse().unwrap();
        let m = manifest(1);
        store.write(&name, &m).await.unwrap();
        let read_back = store.read(&name).await.unwrap().unwrap();
        assert_eq!(read_back, m);
    }

    #[tokio::test]
    async fn missing_manifest_reads_as_none() {
        let (store, _dir) = store();
        let name: Name = "myorg/missing:latest".parse().unwrap();
        assert!(store.read(&name).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn prune_orphans_deletes_only_unreferenced_digests() {
        let (store, _dir) = store();
        let old = manifest(1);
        let new = manifest(2);
        let orphan_digest = old.layers[0].digest.clone();
        store.blobs.put_bytes(&[9, 9, 9]).await.unwrap();
        // Pretend the orphan digest's blob exists on disk.
        let path = store.blobs.path_for(&orphan_digest);
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, b"orphaned").await.unwrap();

        let name: Name = "myorg/llama3:8b".parse().unwrap();
        store.write(&name, &new).await.unwrap();

        store.prune_orphans(&new, Some(&old), false).await.unwrap();
        assert!(!store.blobs.exists(&orphan_digest).await);
    }

    #[tokio::test]
    async fn noprune_keeps_superseded_blobs() {
        let (store, _dir) = store();
        let old = manifest(1);
        let new = manifest(2);
        let orphan_digest = old.layers[0].digest.clone();
        let path = store.blobs.path_for(&orphan_digest);
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, b"orphaned").await.unwrap();

        store.prune_orphans(&new, Some(&old), true).await.unwrap();
        assert!(store.blobs.exists(&orphan_digest).await);
    }

    struct TempDir(PathBuf);
    impl TempDir {
        fn new() -> Self {
            let mut p = std::env::temp_dir();
            p.push(format!(
                "forge-manifest-test-{}-{}",
                std::process::id(),
                std::ptr::from_ref(&p) as usize
            ));
            std::fs::create_dir_all(&p).unwrap();
            Self(p)
        }
        fn path(&self) -> &std::path::Path {
            &self.0
        }
    }
    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }
}
