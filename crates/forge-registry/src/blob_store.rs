//! Content-addressed local blob store (spec §4.2, §6 "Local layout").

use std::path::{Path, PathBuf};

use forge_types::Digest;
use tokio::io::AsyncWriteExt;

use crate::error::RegistryError;

#[derive(Clone, Debug)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.root.join("blobs")
    }

    pub fn manifests_dir(&self) -> PathBuf {
        self.root.join("manifests")
    }

    /// Final, immutable path for a blob: `blobs/sha256-<hex>`.
    pub fn path_for(&self, digest: &Digest) -> PathBuf {
        self.blobs_dir().join(digest.to_path_component())
    }

    /// Sparse working file during a chunked download: `<blob>-partial`.
    pub fn partial_path(&self, digest: &Digest) -> PathBuf {
        self.blobs_dir()
            .join(format!("{}-partial", digest.to_path_component()))
    }

    /// Per-part JSON state file: `<blob>-partial-<N>`.
    pub fn part_state_path(&self, digest: &Digest, part: u32) -> PathBuf {
        self.blobs_dir()
            .join(format!("{}-partial-{part}", digest.to_path_component()))
    }

    pub async fn ensure_dirs(&self) -> Result<(), RegistryError> {
        tokio::fs::create_dir_all(self.blobs_dir()).await?;
        tokio::fs::create_dir_all(self.manifests_dir()).await?;
        Ok(())
    }

    pub async fn exists(&self, digest: &Digest) -> bool {
        tokio::fs::metadata(self.path_for(digest)).await.is_ok()
    }

    pub async fn size(&self, digest: &Digest) -> Result<u64, RegistryError> {
        let meta = tokio::fs::metadata(self.path_for(digest))
            .await
            .map_err(|_| RegistryError::BlobNotFound(digest.to_string()))?;
        Ok(meta.len())
    }

    /// Write `bytes` as a new immutable blob keyed by its own digest.
    /// Never overwrites an existing blob (spec §3: "never overwritten").
    pub async fn put_bytes(&self, bytes: &[u8]) -> Result<Digest, RegistryError> {
        let digest = Digest::of(bytes);
        let path = self.path_for(&digest);
        if tokio::fs::metadata(&path).await.is_ok() {
            return Ok(digest);
        }
        self.ensure_dirs().await?;
        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(digest)
    }

    pub async fn get(&self, digest: &Digest) -> Result<Vec<u8>, RegistryError> {
        tokio::fs::read(self.path_for(digest))
            .await
            .map_err(|_| RegistryError::BlobNotFound(digest.to_string()))
    }

    pub fn get_file_path(&self, digest: &Digest) -> Result<PathBuf, RegistryError> {
        let path = self.path_for(digest);
        if path.exists() {
            Ok(path)
        } else {
            Err(RegistryError::BlobNotFound(digest.to_string()))
        }
    }

    /// Hardlink (falling back to copy across filesystems) an existing blob
    /// into a client-visible location without duplicating storage.
    pub async fn link(&self, digest: &Digest, dest: &Path) -> Result<(), RegistryError> {
        let src = self.get_file_path(digest)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match tokio::fs::hard_link(&src, dest).await {
            Ok(()) => Ok(()),
            Err(_) => {
                tokio::fs::copy(&src, dest).await?;
                Ok(())
            }
        }
    }

    /// Recompute the digest of an on-disk blob and compare to the expected
    /// value (spec §4.4 step 4 post-download verification).
    pub async fn verify(&self, expected: &Digest) -> Result<bool, RegistryError> {
        let bytes = self.get(expected).await?;
        Ok(&Digest::of(&bytes) == expected)
    }

    pub async fn delete(&self, digest: &Digest) -> Result<(), RegistryError> {
        let path = self.path_for(digest);
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_bytes_is_content_addressed_and_idempotent() {
        let dir = tempdir();
        let store = BlobStore::new(dir.path());
        let d1 = store.put_bytes(b"hello").await.unwrap();
        let d2 = store.put_bytes(b"hello").await.unwrap();
        assert_eq!(d1, d2);
        assert!(store.exists(&d1).await);
        assert_eq!(store.get(&d1).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn verify_detects_corruption() {
        let dir = tempdir();
        let store = BlobStore::new(dir.path());
        let d = store.put_bytes(b"data").await.unwrap();
        assert!(store.verify(&d).await.unwrap());
        tokio::fs::write(store.path_for(&d), b"corrupted").await.unwrap();
        assert!(!store.verify(&d).await.unwrap());
    }

    #[tokio::test]
    async fn missing_blob_reports_not_found() {
        let dir = tempdir();
        let store = BlobStore::new(dir.path());
        let digest = forge_types::Digest::of(b"nope");
        let err = store.get(&digest).await.unwrap_err();
        assert!(matches!(err, RegistryError::BlobNotFound(_)));
    }

    fn tempdir() -> TempDir {
        TempDir::new()
    }

    /// Minimal scoped-temp-dir helper (avoids pulling in the `tempfile`
    /// crate for test-only code).
    struct TempDir(PathBuf);
    impl TempDir {
        fn new() -> Self {
            let mut p = std::env::temp_dir();
            let unique = format!(
                "forge-registry-test-{}-{}",
                std::process::id(),
                std::ptr::from_ref(&p) as usize
            );
            p.push(unique);
            std::fs::create_dir_all(&p).unwrap();
            Self(p)
        }
        fn path(&self) -> &Path {
            &self.0
        }
    }
    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }
}
