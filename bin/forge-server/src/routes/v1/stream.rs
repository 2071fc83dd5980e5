//! Completion-stream wrapper that releases the runner's refcount once the
//! stream is exhausted or the caller disconnects (spec §4.1 "release").

use std::pin::Pin;
use std::task::{Context, Poll};

use forge_runner::{CompletionChunk, RunnerError};
use forge_runtime_core::{RunnerRef, Scheduler};
use futures::Stream;

pub struct ReleaseOnDrop {
    inner: Pin<Box<dyn Stream<Item = Result<CompletionChunk, RunnerError>> + Send>>,
    scheduler: Scheduler,
    runner: Option<RunnerRef>,
}

impl ReleaseOnDrop {
    pub fn new(
        inner: Pin<Box<dyn Stream<Item = Result<CompletionChunk, RunnerError>> + Send>>,
        scheduler: Scheduler,
        runner: RunnerRef,
    ) -> Self {
        Self {
            inner,
            scheduler,
            runner: Some(runner),
        }
    }
}

impl Stream for ReleaseOnDrop {
    type Item = Result<CompletionChunk, RunnerError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        this.inner.as_mut().poll_next(cx)
    }
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        if let Some(runner) = self.runner.take() {
            let scheduler = self.scheduler.clone();
            tokio::spawn(async move {
                scheduler.release(&runner).await;
            });
        }
    }
}
