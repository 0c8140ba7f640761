use crate::store::{NewRequest, NewVideo, RequestPatch, RequestStore, VideoPatch, VideoStore};
use crate::{ConversionRequest, Error, Result, Status, VideoAsset};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Executor;
use std::sync::Arc;
use tracing::{debug, instrument};

const REQUEST_COLUMNS: &str = "id, owner_id, status, details, bitrate, \
    resolution_width, resolution_height, ratio_x, ratio_y, video_name, \
    original_video_id, converted_video_id, created_at, updated_at";

const VIDEO_COLUMNS: &str = "id, owner_id, name, size_bytes, bitrate, \
    resolution_width, resolution_height, ratio_x, ratio_y, storage_key, created_at";

#[derive(Clone)]
pub struct DbHandle {
    pool: Arc<PgPool>,
}

impl DbHandle {
    #[instrument(name = "db.connect", skip(url))]
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        (&pool).execute(include_str!("setup.sql")).await?;

        Ok(DbHandle {
            pool: Arc::new(pool),
        })
    }

    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }
}

#[async_trait]
impl RequestStore for DbHandle {
    #[instrument(name = "db.create_request", skip_all, fields(owner_id = request.owner_id))]
    async fn create(&self, request: NewRequest) -> Result<ConversionRequest> {
        debug!("Creating request {:?}", request);
        let params = request.params;
        let sql = format!(
            "INSERT INTO conversion_requests \
            (owner_id, status, bitrate, resolution_width, resolution_height, ratio_x, ratio_y, video_name) \
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
            RETURNING {REQUEST_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, ConversionRequest>(&sql)
            .bind(request.owner_id)
            .bind(Status::InReview)
            .bind(params.bitrate)
            .bind(params.resolution_width)
            .bind(params.resolution_height)
            .bind(params.ratio_x)
            .bind(params.ratio_y)
            .bind(&request.video_name)
            .fetch_one(&*self.pool)
            .await?)
    }

    async fn retrieve(&self, id: i64) -> Result<ConversionRequest> {
        let sql = format!("SELECT {REQUEST_COLUMNS} FROM conversion_requests WHERE id = $1");
        sqlx::query_as::<_, ConversionRequest>(&sql)
            .bind(id)
            .fetch_optional(&*self.pool)
            .await?
            .ok_or(Error::NotFound {
                entity: "conversion request",
                id,
            })
    }

    #[instrument(name = "db.update_request", skip_all, fields(request_id = id))]
    async fn update(&self, id: i64, patch: RequestPatch) -> Result<ConversionRequest> {
        debug!("Updating request {:?}", patch);
        let sql = format!(
            "UPDATE conversion_requests \
                SET status = COALESCE($2, status), \
                details = COALESCE($3, details), \
                original_video_id = COALESCE($4, original_video_id), \
                converted_video_id = COALESCE($5, converted_video_id), \
                updated_at = now() \
            WHERE id = $1 \
            RETURNING {REQUEST_COLUMNS}"
        );
        sqlx::query_as::<_, ConversionRequest>(&sql)
            .bind(id)
            .bind(patch.status)
            .bind(patch.details)
            .bind(patch.original_video_id)
            .bind(patch.converted_video_id)
            .fetch_optional(&*self.pool)
            .await?
            .ok_or(Error::NotFound {
                entity: "conversion request",
                id,
            })
    }
}

#[async_trait]
impl VideoStore for DbHandle {
    #[instrument(name = "db.create_video", skip_all, fields(owner_id = video.owner_id))]
    async fn create(&self, video: NewVideo) -> Result<VideoAsset> {
        debug!("Creating video {:?}", video);
        let sql = format!(
            "INSERT INTO videos \
            (owner_id, name, size_bytes, bitrate, resolution_width, resolution_height, ratio_x, ratio_y, storage_key) \
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
            RETURNING {VIDEO_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, VideoAsset>(&sql)
            .bind(video.owner_id)
            .bind(&video.name)
            .bind(video.size_bytes)
            .bind(video.bitrate)
            .bind(video.resolution_width)
            .bind(video.resolution_height)
            .bind(video.ratio_x)
            .bind(video.ratio_y)
            .bind(&video.storage_key)
            .fetch_one(&*self.pool)
            .await?)
    }

    async fn retrieve(&self, id: i64) -> Result<VideoAsset> {
        let sql = format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE id = $1");
        sqlx::query_as::<_, VideoAsset>(&sql)
            .bind(id)
            .fetch_optional(&*self.pool)
            .await?
            .ok_or(Error::NotFound { entity: "video", id })
    }

    #[instrument(name = "db.update_video", skip_all, fields(video_id = id))]
    async fn update(&self, id: i64, patch: VideoPatch) -> Result<VideoAsset> {
        debug!("Updating video {:?}", patch);
        let sql = format!(
            "UPDATE videos \
                SET name = COALESCE($2, name), \
                size_bytes = COALESCE($3, size_bytes), \
                bitrate = COALESCE($4, bitrate), \
                resolution_width = COALESCE($5, resolution_width), \
                resolution_height = COALESCE($6, resolution_height), \
                ratio_x = COALESCE($7, ratio_x), \
                ratio_y = COALESCE($8, ratio_y), \
                storage_key = COALESCE($9, storage_key) \
            WHERE id = $1 \
            RETURNING {VIDEO_COLUMNS}"
        );
        sqlx::query_as::<_, VideoAsset>(&sql)
            .bind(id)
            .bind(patch.name)
            .bind(patch.size_bytes)
            .bind(patch.bitrate)
            .bind(patch.resolution_width)
            .bind(patch.resolution_height)
            .bind(patch.ratio_x)
            .bind(patch.ratio_y)
            .bind(patch.storage_key)
            .fetch_optional(&*self.pool)
            .await?
            .ok_or(Error::NotFound { entity: "video", id })
    }
}
