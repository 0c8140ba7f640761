use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod blob;
pub mod completion;
pub mod config;
pub mod db;
pub mod deadline;
pub mod error;
pub mod memory;
pub mod message;
pub mod queue;
pub mod server;
pub mod store;
pub mod submit;
pub mod telemetry;
pub mod worker;

pub use error::{Error, Result};

/// Target parameters of a conversion, validated before they reach this crate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionParams {
    pub bitrate: i64,
    pub resolution_width: i32,
    pub resolution_height: i32,
    pub ratio_x: i32,
    pub ratio_y: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ConversionRequest {
    pub id: i64,
    pub owner_id: i64,
    pub status: Status,
    pub details: String,
    pub bitrate: i64,
    pub resolution_width: i32,
    pub resolution_height: i32,
    pub ratio_x: i32,
    pub ratio_y: i32,
    pub video_name: String,
    pub original_video_id: Option<i64>,
    pub converted_video_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_video: Option<VideoAsset>,
    #[sqlx(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converted_video: Option<VideoAsset>,
}

/// Metadata and storage handle of a video file, original or converted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct VideoAsset {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub size_bytes: i64,
    pub bitrate: i64,
    pub resolution_width: i32,
    pub resolution_height: i32,
    pub ratio_x: i32,
    pub ratio_y: i32,
    pub storage_key: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "conversion_status_enum", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    InReview,
    Completed,
    Failed,
}
