//! Chunked, resumable blob downloader (spec §4.2 "Layer download").
//!
//! Grounded on `slab_libfetch::downloader::Downloader`'s part-splitting and
//! retry-loop idiom, generalized from a single GitHub release asset to an
//! arbitrary-length registry blob fetched with HTTP Range requests.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use forge_types::Digest;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::blob_store::BlobStore;
use crate::error::RegistryError;
use crate::progress::{emit, ProgressEvent, ProgressSender};
use crate::transport::{exponential_backoff, RegistryTransport};

const MIN_PART_SIZE: u64 = 100 * 1024 * 1024;
const MAX_PART_SIZE: u64 = 1000 * 1024 * 1024;
const MAX_PARTS: u64 = 16;
const MAX_CONCURRENCY: usize = 16;
const STALL_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u32 = 6;

fn part_size_for(total: u64) -> u64 {
    (total / MAX_PARTS).clamp(MIN_PART_SIZE, MAX_PART_SIZE)
}

#[derive(Debug, Clone, Copy)]
struct PartRange {
    index: u32,
    start: u64,
    end_inclusive: u64,
}

impl PartRange {
    fn len(&self) -> u64 {
        self.end_inclusive - self.start + 1
    }
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct PartState {
    completed: bool,
}

pub struct ChunkedDownloader {
    transport: RegistryTransport,
    blobs: BlobStore,
}

impl ChunkedDownloader {
    pub fn new(transport: RegistryTransport, blobs: BlobStore) -> Self {
        Self { transport, blobs }
    }

    /// Download `url` (expected to resolve to `digest`, `total_size` bytes)
    /// into the blob store, resuming any previously-written parts. Returns
    /// immediately if the blob is already present (spec §4.2 "skip blobs
    /// already verified on disk").
    pub async fn download(
        &self,
        url: &str,
        digest: &Digest,
        total_size: u64,
        progress: Option<ProgressSender>,
    ) -> Result<(), RegistryError> {
        if self.blobs.exists(digest).await {
            emit(
                progress.as_ref(),
                ProgressEvent::progress(total_size, total_size, "already exists", Some(digest.to_string())),
            )
            .await;
            return Ok(());
        }

        self.blobs.ensure_dirs().await?;
        let partial = self.blobs.partial_path(digest);
        preallocate(&partial, total_size).await?;

        let parts = split_parts(total_size);
        let completed = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENCY));
        let mut handles = Vec::with_capacity(parts.len());

        for part in parts {
            let transport = self.transport.clone();
            let url = url.to_string();
            let partial = partial.clone();
            let state_path = self.blobs.part_state_path(digest, part.index);
            let semaphore = semaphore.clone();
            let completed = completed.clone();
            let progress = progress.clone();
            let digest = digest.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                if part_already_done(&state_path).await {
                    let done = completed.fetch_add(part.len(), std::sync::atomic::Ordering::SeqCst) + part.len();
                    emit(
                        progress.as_ref(),
                        ProgressEvent::progress(total_size, done, "pulling", Some(digest.to_string())),
                    )
                    .await;
                    return Ok(());
                }

                download_part(&transport, &url, &partial, &state_path, part).await?;
                let done = completed.fetch_add(part.len(), std::sync::atomic::Ordering::SeqCst) + part.len();
                emit(
                    progress.as_ref(),
                    ProgressEvent::progress(total_size, done, "pulling", Some(digest.to_string())),
                )
                .await;
                Ok::<(), RegistryError>(())
            }));
        }

        for handle in handles {
            handle.await.map_err(|_| RegistryError::Cancelled)??;
        }

        self.finalize(&partial, digest, total_size, progress.as_ref()).await
    }

    async fn finalize(
        &self,
        partial: &PathBuf,
        digest: &Digest,
        total_size: u64,
        progress: Option<&ProgressSender>,
    ) -> Result<(), RegistryError> {
        let bytes = tokio::fs::read(partial).await?;
        let computed = Digest::of(&bytes);
        if &computed != digest {
            return Err(RegistryError::DigestMismatch {
                expected: digest.to_string(),
                computed: computed.to_string(),
            });
        }

        let file = tokio::fs::File::open(partial).await?;
        file.sync_all().await?;
        drop(file);

        let dest = self.blobs.path_for(digest);
        tokio::fs::rename(partial, &dest).await?;
        cleanup_part_states(&self.blobs, digest, total_size).await;

        emit(
            progress,
            ProgressEvent::progress(total_size, total_size, "success", Some(digest.to_string())),
        )
        .await;
        Ok(())
    }
}

fn split_parts(total_size: u64) -> Vec<PartRange> {
    if total_size == 0 {
        return vec![PartRange {
            index: 0,
            start: 0,
            end_inclusive: 0,
        }];
    }
    let part_size = part_size_for(total_size);
    let mut parts = Vec::new();
    let mut start = 0u64;
    let mut index = 0u32;
    while start < total_size {
        let end_inclusive = (start + part_size - 1).min(total_size - 1);
        parts.push(PartRange { index, start, end_inclusive });
        start = end_inclusive + 1;
        index += 1;
    }
    parts
}

async fn preallocate(path: &PathBuf, size: u64) -> Result<(), RegistryError> {
    if tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0) == size {
        return Ok(());
    }
    let file = tokio::fs::File::create(path).await?;
    file.set_len(size).await?;
    Ok(())
}

async fn part_already_done(state_path: &PathBuf) -> bool {
    match tokio::fs::read(state_path).await {
        Ok(bytes) => serde_json::from_slice::<PartState>(&bytes)
            .map(|s| s.completed)
            .unwrap_or(false),
        Err(_) => false,
    }
}

async fn mark_part_done(state_path: &PathBuf) -> Result<(), RegistryError> {
    let bytes = serde_json::to_vec(&PartState { completed: true })?;
    tokio::fs::write(state_path, bytes).await?;
    Ok(())
}

async fn cleanup_part_states(blobs: &BlobStore, digest: &Digest, total_size: u64) {
    for part in split_parts(total_size) {
        let _ = tokio::fs::remove_file(blobs.part_state_path(digest, part.index)).await;
    }
}

async fn download_part(
    transport: &RegistryTransport,
    url: &str,
    partial: &PathBuf,
    state_path: &PathBuf,
    part: PartRange,
) -> Result<(), RegistryError> {
    let mut attempt = 0u32;
    loop {
        match try_download_part(transport, url, partial, part).await {
            Ok(()) => {
                mark_part_done(state_path).await?;
                return Ok(());
            }
            // A stall is a live connection that stopped producing bytes, not
            // a failed request; retry it without touching the attempt budget.
            Err(RegistryError::Stall { elapsed, .. }) => {
                warn!(part = part.index, ?elapsed, "stall detected, retrying part download");
            }
            Err(e) if attempt + 1 >= MAX_ATTEMPTS => return Err(e),
            Err(e) => {
                attempt += 1;
                warn!(part = part.index, attempt, error = %e, "retrying part download");
                tokio::time::sleep(exponential_backoff(attempt)).await;
            }
        }
    }
}

async fn try_download_part(
    transport: &RegistryTransport,
    url: &str,
    partial: &PathBuf,
    part: PartRange,
) -> Result<(), RegistryError> {
    let range = format!("bytes={}-{}", part.start, part.end_inclusive);
    let resp = transport
        .client()
        .get(url)
        .header("range", range)
        .send()
        .await?;
    let resp = if resp.status().as_u16() == 401 {
        transport.request(Method::GET, url).await?
    } else {
        resp
    };
    if !resp.status().is_success() {
        return Err(RegistryError::Status {
            status: resp.status().as_u16(),
            body: resp.text().await.unwrap_or_default(),
        });
    }

    let mut file = tokio::fs::File::options().write(true).open(partial).await?;
    file.seek(std::io::SeekFrom::Start(part.start)).await?;

    let mut stream = resp.bytes_stream();
    use futures::StreamExt;
    let mut written = 0u64;
    loop {
        let next = tokio::time::timeout(STALL_TIMEOUT, stream.next()).await;
        match next {
            Ok(Some(chunk)) => {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            Ok(None) => break,
            Err(_) => {
                return Err(RegistryError::Stall {
                    part: part.index,
                    elapsed: STALL_TIMEOUT,
                })
            }
        }
    }

    if written != part.len() {
        return Err(RegistryError::SizeMismatch {
            digest: format!("part-{}", part.index),
            local: written,
            declared: part.len(),
        });
    }
    debug!(part = part.index, written, "part downloaded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_size_clamps_to_minimum_for_small_blobs() {
        assert_eq!(part_size_for(1024), MIN_PART_SIZE);
    }

    #[test]
    fn part_size_clamps_to_maximum_for_huge_blobs() {
        assert_eq!(part_size_for(u64::MAX / 2), MAX_PART_SIZE);
    }

    #[test]
    fn split_parts_covers_whole_range_without_gaps() {
        let total = MIN_PART_SIZE * 3 + 17;
        let parts = split_parts(total);
        assert_eq!(parts[0].start, 0);
        for window in parts.windows(2) {
            assert_eq!(window[1].start, window[0].end_inclusive + 1);
        }
        assert_eq!(parts.last().unwrap().end_inclusive, total - 1);
    }

    #[test]
    fn empty_blob_yields_single_zero_length_part() {
        let parts = split_parts(0);
        assert_eq!(parts.len(), 1);
    }
}
