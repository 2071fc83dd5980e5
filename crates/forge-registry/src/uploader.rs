//! Chunked, cross-repo-mount-aware blob uploader (spec §4.3 "Chunked uploader").
//!
//! Grounded on `slab_libfetch::downloader::Downloader`'s retry idiom,
//! inverted for PATCH-chained uploads, and on the transport's challenge
//! handling in [`crate::transport`].

use std::path::Path;
use std::sync::Arc;

use forge_types::Digest;
use md5::{Digest as Md5DigestTrait, Md5};
use reqwest::Method;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::oneshot;
use tracing::warn;

use crate::error::RegistryError;
use crate::progress::{emit, ProgressEvent, ProgressSender};
use crate::transport::{exponential_backoff, RegistryTransport};

const MIN_PART_SIZE: u64 = 100 * 1024 * 1024;
const MAX_PART_SIZE: u64 = 1000 * 1024 * 1024;
const MAX_PARTS: u64 = 16;
const MAX_ATTEMPTS: u32 = 6;

fn part_size_for(total: u64) -> u64 {
    (total / MAX_PARTS).clamp(MIN_PART_SIZE, MAX_PART_SIZE)
}

struct PartSpec {
    index: u32,
    offset: u64,
    size: u64,
}

fn split_parts(total: u64) -> Vec<PartSpec> {
    if total == 0 {
        return vec![PartSpec { index: 0, offset: 0, size: 0 }];
    }
    let part_size = part_size_for(total);
    let mut parts = Vec::new();
    let mut offset = 0u64;
    let mut index = 0u32;
    while offset < total {
        let size = part_size.min(total - offset);
        parts.push(PartSpec { index, offset, size });
        offset += size;
        index += 1;
    }
    parts
}

pub struct MountOutcome {
    pub mounted: bool,
}

pub struct ChunkedUploader {
    transport: RegistryTransport,
}

impl ChunkedUploader {
    pub fn new(transport: RegistryTransport) -> Self {
        Self { transport }
    }

    /// Attempt a cross-repo mount. Returns `mounted: true` on `201 Created`
    /// (zero bytes transferred, spec §8 "cross-repo mount path produces
    /// zero bytes transferred on the wire"); otherwise the caller must fall
    /// through to a full chunked upload using the returned start URL.
    pub async fn try_mount(
        &self,
        blobs_upload_base_url: &str,
        digest: &Digest,
        from_repository: Option<&str>,
    ) -> Result<(MountOutcome, Option<String>), RegistryError> {
        let mut url = format!("{blobs_upload_base_url}?mount={digest}");
        if let Some(from) = from_repository {
            url.push_str(&format!("&from={from}"));
        }
        let resp = self.transport.request(Method::POST, &url).await?;
        match resp.status().as_u16() {
            201 => Ok((MountOutcome { mounted: true }, None)),
            202 => {
                let next = location_header(&resp)?;
                Ok((MountOutcome { mounted: false }, Some(next)))
            }
            status => Err(RegistryError::Status {
                status,
                body: resp.text().await.unwrap_or_default(),
            }),
        }
    }

    /// Upload `path` (known to equal `digest`, `total_size` bytes) via the
    /// PATCH chain started at `first_upload_url`, then commit.
    pub async fn upload(
        &self,
        first_upload_url: &str,
        path: &Path,
        digest: &Digest,
        total_size: u64,
        progress: Option<ProgressSender>,
    ) -> Result<(), RegistryError> {
        let parts = split_parts(total_size);
        let n = parts.len();

        // A chain of single-buffered channels: part i's task receives its
        // submission URL on `urls[i]` and publishes the next part's URL on
        // `urls[i+1]` once its own PATCH response arrives. I/O (reading and
        // hashing the part body) can overlap across parts; only the actual
        // request submission is serialized by the handoff.
        let mut senders: Vec<Option<oneshot::Sender<String>>> = Vec::with_capacity(n);
        let mut receivers: Vec<Option<oneshot::Receiver<String>>> = Vec::with_capacity(n);
        for _ in 0..n {
            let (tx, rx) = oneshot::channel();
            senders.push(Some(tx));
            receivers.push(Some(rx));
        }
        senders[0]
            .take()
            .expect("first sender present")
            .send(first_upload_url.to_string())
            .ok();

        let completed = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let mut handles = Vec::with_capacity(n);
        let mut md5_sums: Vec<Option<[u8; 16]>> = vec![None; n];
        // The PATCH chain's own next-URL per part; the last part's entry is
        // where the commit PUT must be issued, not the session's start URL.
        let mut next_urls: Vec<Option<String>> = vec![None; n];

        for (i, part) in parts.into_iter().enumerate() {
            let transport = self.transport.clone();
            let path = path.to_path_buf();
            let rx = receivers[i].take().expect("receiver present");
            let next_tx = if i + 1 < n { senders[i + 1].take() } else { None };
            let completed = completed.clone();
            let progress = progress.clone();
            let digest = digest.clone();

            handles.push(tokio::spawn(async move {
                let url = rx.await.map_err(|_| RegistryError::Cancelled)?;
                let (md5_sum, next_url) = upload_part_with_retry(&transport, &url, &path, &part).await?;
                if let Some(next_tx) = next_tx {
                    if let Some(next_url) = next_url.clone() {
                        let _ = next_tx.send(next_url);
                    }
                }
                let done = completed.fetch_add(part.size, std::sync::atomic::Ordering::SeqCst) + part.size;
                emit(
                    progress.as_ref(),
                    ProgressEvent::progress(total_size, done, "pushing", Some(digest.to_string())),
                )
                .await;
                Ok::<(u32, [u8; 16], Option<String>), RegistryError>((part.index, md5_sum, next_url))
            }));
        }

        for handle in handles {
            let (index, sum, next_url) = handle.await.map_err(|_| RegistryError::Cancelled)??;
            md5_sums[index as usize] = Some(sum);
            next_urls[index as usize] = next_url;
        }

        let rollup = rollup_md5(&md5_sums.into_iter().map(|s| s.expect("every part completed")).collect::<Vec<_>>());
        // The final PATCH's returned URL is where the session now lives;
        // fall back to the start URL only if the registry never returned one.
        let commit_url = next_urls[n - 1].clone().unwrap_or_else(|| first_upload_url.to_string());
        self.commit(&commit_url, digest, &rollup, n as u32).await
    }

    async fn commit(&self, base_url: &str, digest: &Digest, rollup_hex: &str, part_count: u32) -> Result<(), RegistryError> {
        let url = format!("{base_url}&digest={digest}&etag={rollup_hex}-{part_count}");
        let resp = self.transport.request(Method::PUT, &url).await?;
        if !resp.status().is_success() {
            return Err(RegistryError::Status {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

/// Concatenate per-part MD5 digests and hash the result, matching the
/// registry's rollup scheme for multi-part commits.
fn rollup_md5(parts: &[[u8; 16]]) -> String {
    let mut hasher = Md5::new();
    for part in parts {
        hasher.update(part);
    }
    let out = hasher.finalize();
    out.iter().map(|b| format!("{b:02x}")).collect()
}

async fn upload_part_with_retry(
    transport: &RegistryTransport,
    url: &str,
    path: &Path,
    part: &PartSpec,
) -> Result<([u8; 16], Option<String>), RegistryError> {
    let mut attempt = 0u32;
    let mut url = url.to_string();
    loop {
        match try_upload_part(transport, &url, path, part).await {
            Ok(result) => return Ok(result),
            Err(UploadAttemptError::Redirect(target)) => {
                url = target;
            }
            Err(UploadAttemptError::Reauth(target)) => {
                url = target;
            }
            Err(UploadAttemptError::Other(e)) if attempt + 1 >= MAX_ATTEMPTS => return Err(e),
            Err(UploadAttemptError::Other(e)) => {
                attempt += 1;
                warn!(part = part.index, attempt, error = %e, "retrying part upload");
                tokio::time::sleep(exponential_backoff(attempt)).await;
            }
        }
    }
}

enum UploadAttemptError {
    Redirect(String),
    Reauth(String),
    Other(RegistryError),
}

impl From<RegistryError> for UploadAttemptError {
    fn from(e: RegistryError) -> Self {
        UploadAttemptError::Other(e)
    }
}

async fn try_upload_part(
    transport: &RegistryTransport,
    url: &str,
    path: &Path,
    part: &PartSpec,
) -> Result<([u8; 16], Option<String>), UploadAttemptError> {
    let mut file = tokio::fs::File::open(path).await.map_err(RegistryError::from)?;
    file.seek(std::io::SeekFrom::Start(part.offset)).await.map_err(RegistryError::from)?;
    let mut buf = vec![0u8; part.size as usize];
    file.read_exact(&mut buf).await.map_err(RegistryError::from)?;

    let mut hasher = Md5::new();
    hasher.update(&buf);
    let sum: [u8; 16] = hasher.finalize().into();

    let content_range = format!("{}-{}", part.offset, part.offset + part.size - 1);
    let resp = transport
        .client()
        .patch(url)
        .header("content-range", content_range)
        .header("content-length", part.size.to_string())
        .body(buf.clone())
        .send()
        .await
        .map_err(RegistryError::from)?;

    match resp.status().as_u16() {
        307 => {
            let target = location_header(&resp).map_err(UploadAttemptError::from)?;
            let retry = transport
                .client()
                .put(&target)
                .body(buf)
                .send()
                .await
                .map_err(RegistryError::from)?;
            if !retry.status().is_success() {
                return Err(UploadAttemptError::Other(RegistryError::Status {
                    status: retry.status().as_u16(),
                    body: retry.text().await.unwrap_or_default(),
                }));
            }
            Ok((sum, location_header(&retry).ok()))
        }
        401 => {
            let retried = transport.request(Method::PATCH, url).await.map_err(RegistryError::from)?;
            if !retried.status().is_success() {
                return Err(UploadAttemptError::Other(RegistryError::Status {
                    status: retried.status().as_u16(),
                    body: retried.text().await.unwrap_or_default(),
                }));
            }
            Ok((sum, location_header(&retried).ok()))
        }
        200..=299 => Ok((sum, location_header(&resp).ok())),
        status => Err(UploadAttemptError::Other(RegistryError::Status {
            status,
            body: resp.text().await.unwrap_or_default(),
        })),
    }
}

fn location_header(resp: &reqwest::Response) -> Result<String, RegistryError> {
    resp.headers()
        .get("location")
        .or_else(|| resp.headers().get("docker-upload-location"))
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .ok_or_else(|| RegistryError::Status {
            status: resp.status().as_u16(),
            body: "missing Location/Docker-Upload-Location header".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_size_clamps_like_downloader() {
        assert_eq!(part_size_for(1024), MIN_PART_SIZE);
        assert_eq!(part_size_for(u64::MAX / 2), MAX_PART_SIZE);
    }

    #[test]
    fn split_parts_covers_whole_range() {
        let parts = split_parts(MIN_PART_SIZE * 2 + 5);
        let total: u64 = parts.iter().map(|p| p.size).sum();
        assert_eq!(total, MIN_PART_SIZE * 2 + 5);
    }

    #[test]
    fn rollup_md5_is_deterministic() {
        let a = rollup_md5(&[[1u8; 16], [2u8; 16]]);
        let b = rollup_md5(&[[1u8; 16], [2u8; 16]]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn rollup_md5_differs_on_part_order() {
        let a = rollup_md5(&[[1u8; 16], [2u8; 16]]);
        let b = rollup_md5(&[[2u8; 16], [1u8; 16]]);
        assert_ne!(a, b);
    }
}
