#![allow(dead_code)]

use convq::blob::FileBlob;
use convq::completion::CompletionHandler;
use convq::deadline::Deadline;
use convq::memory::{MemoryBlobStore, MemoryStore};
use convq::queue::ChannelQueue;
use convq::submit::RequestSubmitter;
use convq::ConversionParams;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Wires both orchestrators to in-memory collaborators.
pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub blobs: Arc<MemoryBlobStore>,
    pub queue: ChannelQueue,
    pub cancel: CancellationToken,
}

impl TestHarness {
    pub fn new() -> Self {
        TestHarness {
            store: Arc::new(MemoryStore::new()),
            blobs: Arc::new(MemoryBlobStore::new()),
            queue: ChannelQueue::new(16),
            cancel: CancellationToken::new(),
        }
    }

    pub fn deadline() -> Deadline {
        Deadline::new(Duration::from_secs(5))
    }

    pub fn submitter(&self) -> RequestSubmitter {
        RequestSubmitter::new(
            self.store.clone(),
            self.store.clone(),
            self.blobs.clone(),
            Arc::new(self.queue.clone()),
            Self::deadline(),
        )
    }

    pub fn handler(&self) -> CompletionHandler {
        CompletionHandler::new(self.store.clone(), self.store.clone(), Self::deadline())
    }

    /// Submits `clip.mkv` for owner 1 with the usual 64k / 800x600 / 4:3 target.
    pub async fn submit_clip(&self) -> convq::ConversionRequest {
        self.submitter()
            .submit(&self.cancel, 1, params(), clip())
            .await
            .expect("submission should succeed")
    }
}

pub fn params() -> ConversionParams {
    ConversionParams {
        bitrate: 64000,
        resolution_width: 800,
        resolution_height: 600,
        ratio_x: 4,
        ratio_y: 3,
    }
}

pub fn clip() -> FileBlob {
    FileBlob::from_bytes("clip.mkv", b"matroska bytes".to_vec())
}
