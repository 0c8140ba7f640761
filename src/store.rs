//! Persistence contracts for conversion requests and video assets.

use crate::{ConversionParams, ConversionRequest, Result, Status, VideoAsset};
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRequest {
    pub owner_id: i64,
    pub params: ConversionParams,
    pub video_name: String,
}

/// Partial update of a request row. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestPatch {
    pub status: Option<Status>,
    pub details: Option<String>,
    pub original_video_id: Option<i64>,
    pub converted_video_id: Option<i64>,
}

impl RequestPatch {
    pub fn failed(details: impl Into<String>) -> Self {
        RequestPatch {
            status: Some(Status::Failed),
            details: Some(details.into()),
            ..Default::default()
        }
    }

    pub fn completed(converted_video_id: i64) -> Self {
        RequestPatch {
            status: Some(Status::Completed),
            converted_video_id: Some(converted_video_id),
            ..Default::default()
        }
    }

    pub fn link_original(original_video_id: i64) -> Self {
        RequestPatch {
            original_video_id: Some(original_video_id),
            ..Default::default()
        }
    }

    pub fn with_original(mut self, original_video_id: i64) -> Self {
        self.original_video_id = Some(original_video_id);
        self
    }

    pub fn apply(&self, request: &mut ConversionRequest) {
        if let Some(status) = self.status {
            request.status = status;
        }
        if let Some(details) = &self.details {
            request.details = details.clone();
        }
        if let Some(id) = self.original_video_id {
            request.original_video_id = Some(id);
        }
        if let Some(id) = self.converted_video_id {
            request.converted_video_id = Some(id);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewVideo {
    pub owner_id: i64,
    pub name: String,
    pub size_bytes: i64,
    pub bitrate: i64,
    pub resolution_width: i32,
    pub resolution_height: i32,
    pub ratio_x: i32,
    pub ratio_y: i32,
    pub storage_key: String,
}

/// Partial update of a video row. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoPatch {
    pub name: Option<String>,
    pub size_bytes: Option<i64>,
    pub bitrate: Option<i64>,
    pub resolution_width: Option<i32>,
    pub resolution_height: Option<i32>,
    pub ratio_x: Option<i32>,
    pub ratio_y: Option<i32>,
    pub storage_key: Option<String>,
}

impl VideoPatch {
    pub fn apply(&self, video: &mut VideoAsset) {
        if let Some(name) = &self.name {
            video.name = name.clone();
        }
        if let Some(size) = self.size_bytes {
            video.size_bytes = size;
        }
        if let Some(bitrate) = self.bitrate {
            video.bitrate = bitrate;
        }
        if let Some(width) = self.resolution_width {
            video.resolution_width = width;
        }
        if let Some(height) = self.resolution_height {
            video.resolution_height = height;
        }
        if let Some(x) = self.ratio_x {
            video.ratio_x = x;
        }
        if let Some(y) = self.ratio_y {
            video.ratio_y = y;
        }
        if let Some(key) = &self.storage_key {
            video.storage_key = key.clone();
        }
    }
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Inserts a request in the InReview state.
    async fn create(&self, request: NewRequest) -> Result<ConversionRequest>;

    async fn retrieve(&self, id: i64) -> Result<ConversionRequest>;

    async fn update(&self, id: i64, patch: RequestPatch) -> Result<ConversionRequest>;
}

#[async_trait]
pub trait VideoStore: Send + Sync {
    async fn create(&self, video: NewVideo) -> Result<VideoAsset>;

    async fn retrieve(&self, id: i64) -> Result<VideoAsset>;

    async fn update(&self, id: i64, patch: VideoPatch) -> Result<VideoAsset>;
}

/// Loads a request with its original and converted videos attached.
pub async fn fetch_with_videos(
    requests: &dyn RequestStore,
    videos: &dyn VideoStore,
    id: i64,
) -> Result<ConversionRequest> {
    let mut request = requests.retrieve(id).await?;
    if let Some(video_id) = request.original_video_id {
        request.original_video = Some(videos.retrieve(video_id).await?);
    }
    if let Some(video_id) = request.converted_video_id {
        request.converted_video = Some(videos.retrieve(video_id).await?);
    }
    Ok(request)
}
