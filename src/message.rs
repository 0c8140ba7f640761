//! Wire messages exchanged with the conversion workers.
//!
//! Field names are fixed by the worker protocol and must not change.

use crate::store::{NewVideo, VideoPatch};
use crate::{ConversionRequest, Error, Result, VideoAsset};
use serde::{Deserialize, Serialize};

/// Work item published for a worker once a request and its original video are persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionJobMessage {
    pub request_id: i64,
    pub bitrate: i64,
    /// `"W:H"`, omitted when both sides are zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    /// `"X:Y"`, omitted when both sides are zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ratio: Option<String>,
    pub video_id: i64,
    pub video_service_id: String,
}

impl ConversionJobMessage {
    pub fn new(request: &ConversionRequest, original: &VideoAsset) -> Self {
        ConversionJobMessage {
            request_id: request.id,
            bitrate: request.bitrate,
            resolution: pair(request.resolution_width, request.resolution_height),
            ratio: pair(request.ratio_x, request.ratio_y),
            video_id: original.id,
            video_service_id: original.storage_key.clone(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(Error::Encode)
    }
}

fn pair(a: i32, b: i32) -> Option<String> {
    (a != 0 || b != 0).then(|| format!("{a}:{b}"))
}

/// Result reported by a worker for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionResultMessage {
    pub request_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_video: Option<OriginalVideoPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converted_video: Option<ConvertedVideo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConversionResultMessage {
    pub fn decode(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw).map_err(Error::InvalidResponse)
    }

    /// The worker-reported error, if any. An empty string counts as no error.
    pub fn worker_error(&self) -> Option<&str> {
        self.error.as_deref().filter(|err| !err.is_empty())
    }
}

/// Full descriptor of the asset produced by the worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertedVideo {
    pub name: String,
    pub size: i64,
    pub bitrate: i64,
    pub resolution_x: i32,
    pub resolution_y: i32,
    pub ratio_x: i32,
    pub ratio_y: i32,
    pub service_id: String,
}

impl ConvertedVideo {
    /// The converted asset inherits the owner of its request.
    pub fn into_new_video(self, owner_id: i64) -> NewVideo {
        NewVideo {
            owner_id,
            name: self.name,
            size_bytes: self.size,
            bitrate: self.bitrate,
            resolution_width: self.resolution_x,
            resolution_height: self.resolution_y,
            ratio_x: self.ratio_x,
            ratio_y: self.ratio_y,
            storage_key: self.service_id,
        }
    }
}

/// Technical metadata the worker discovered about the original file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OriginalVideoPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_x: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_y: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ratio_x: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ratio_y: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
}

impl From<OriginalVideoPatch> for VideoPatch {
    fn from(patch: OriginalVideoPatch) -> Self {
        VideoPatch {
            name: patch.name,
            size_bytes: patch.size,
            bitrate: patch.bitrate,
            resolution_width: patch.resolution_x,
            resolution_height: patch.resolution_y,
            ratio_x: patch.ratio_x,
            ratio_y: patch.ratio_y,
            storage_key: patch.service_id,
        }
    }
}
