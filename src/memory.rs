//! In-memory collaborators with switchable failures. They back the test
//! suite and let the orchestration run without PostgreSQL.

use crate::blob::{BlobStore, FileBlob};
use crate::store::{NewRequest, NewVideo, RequestPatch, RequestStore, VideoPatch, VideoStore};
use crate::{ConversionRequest, Error, Result, Status, VideoAsset};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use tokio::io::AsyncReadExt;

/// Store operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    CreateRequest,
    RetrieveRequest,
    UpdateRequest,
    CreateVideo,
    RetrieveVideo,
    UpdateVideo,
}

#[derive(Default)]
struct Tables {
    requests: BTreeMap<i64, ConversionRequest>,
    videos: BTreeMap<i64, VideoAsset>,
    next_request_id: i64,
    next_video_id: i64,
    failing: HashSet<StoreOp>,
    failing_once: HashSet<StoreOp>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, op: StoreOp) {
        self.lock().failing.insert(op);
    }

    /// Fails only the next call of `op`.
    pub fn fail_once(&self, op: StoreOp) {
        self.lock().failing_once.insert(op);
    }

    pub fn recover(&self, op: StoreOp) {
        self.lock().failing.remove(&op);
    }

    pub fn request(&self, id: i64) -> Option<ConversionRequest> {
        self.lock().requests.get(&id).cloned()
    }

    pub fn video(&self, id: i64) -> Option<VideoAsset> {
        self.lock().videos.get(&id).cloned()
    }

    pub fn videos(&self) -> Vec<VideoAsset> {
        self.lock().videos.values().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        // A panic while holding the lock leaves the maps consistent.
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(tables: &mut Tables, op: StoreOp) -> Result<()> {
        if tables.failing_once.remove(&op) || tables.failing.contains(&op) {
            return Err(Error::persistence(format!("{op:?} failed")));
        }
        Ok(())
    }
}

#[async_trait]
impl RequestStore for MemoryStore {
    async fn create(&self, request: NewRequest) -> Result<ConversionRequest> {
        let mut tables = self.lock();
        Self::check(&mut tables, StoreOp::CreateRequest)?;
        tables.next_request_id += 1;
        let now = Utc::now();
        let params = request.params;
        let row = ConversionRequest {
            id: tables.next_request_id,
            owner_id: request.owner_id,
            status: Status::InReview,
            details: String::new(),
            bitrate: params.bitrate,
            resolution_width: params.resolution_width,
            resolution_height: params.resolution_height,
            ratio_x: params.ratio_x,
            ratio_y: params.ratio_y,
            video_name: request.video_name,
            original_video_id: None,
            converted_video_id: None,
            created_at: now,
            updated_at: now,
            original_video: None,
            converted_video: None,
        };
        tables.requests.insert(row.id, row.clone());
        Ok(row)
    }

    async fn retrieve(&self, id: i64) -> Result<ConversionRequest> {
        let mut tables = self.lock();
        Self::check(&mut tables, StoreOp::RetrieveRequest)?;
        tables.requests.get(&id).cloned().ok_or(Error::NotFound {
            entity: "conversion request",
            id,
        })
    }

    async fn update(&self, id: i64, patch: RequestPatch) -> Result<ConversionRequest> {
        let mut tables = self.lock();
        Self::check(&mut tables, StoreOp::UpdateRequest)?;
        let row = tables.requests.get_mut(&id).ok_or(Error::NotFound {
            entity: "conversion request",
            id,
        })?;
        patch.apply(row);
        row.updated_at = Utc::now();
        Ok(row.clone())
    }
}

#[async_trait]
impl VideoStore for MemoryStore {
    async fn create(&self, video: NewVideo) -> Result<VideoAsset> {
        let mut tables = self.lock();
        Self::check(&mut tables, StoreOp::CreateVideo)?;
        tables.next_video_id += 1;
        let row = VideoAsset {
            id: tables.next_video_id,
            owner_id: video.owner_id,
            name: video.name,
            size_bytes: video.size_bytes,
            bitrate: video.bitrate,
            resolution_width: video.resolution_width,
            resolution_height: video.resolution_height,
            ratio_x: video.ratio_x,
            ratio_y: video.ratio_y,
            storage_key: video.storage_key,
            created_at: Utc::now(),
        };
        tables.videos.insert(row.id, row.clone());
        Ok(row)
    }

    async fn retrieve(&self, id: i64) -> Result<VideoAsset> {
        let mut tables = self.lock();
        Self::check(&mut tables, StoreOp::RetrieveVideo)?;
        tables
            .videos
            .get(&id)
            .cloned()
            .ok_or(Error::NotFound { entity: "video", id })
    }

    async fn update(&self, id: i64, patch: VideoPatch) -> Result<VideoAsset> {
        let mut tables = self.lock();
        Self::check(&mut tables, StoreOp::UpdateVideo)?;
        let row = tables
            .videos
            .get_mut(&id)
            .ok_or(Error::NotFound { entity: "video", id })?;
        patch.apply(row);
        Ok(row.clone())
    }
}

/// Blob store keeping uploads in a map; keys are `blob-<n>`.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    failing: Mutex<bool>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap_or_else(|p| p.into_inner()) = failing;
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, file: FileBlob) -> Result<String> {
        if *self.failing.lock().unwrap_or_else(|p| p.into_inner()) {
            return Err(Error::upload("blob store unavailable"));
        }
        let mut content = Vec::new();
        file.into_reader()
            .read_to_end(&mut content)
            .await
            .map_err(Error::upload)?;

        let mut blobs = self.blobs.lock().unwrap_or_else(|p| p.into_inner());
        let key = format!("blob-{}", blobs.len() + 1);
        blobs.insert(key.clone(), content);
        Ok(key)
    }
}
