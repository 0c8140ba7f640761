use crate::deadline::Deadline;
use crate::message::{ConversionResultMessage, ConvertedVideo};
use crate::store::{RequestPatch, RequestStore, VideoPatch, VideoStore};
use crate::{ConversionRequest, Error, Result, Status};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

pub const MISSING_CONVERTED_VIDEO: &str = "Converted video does not present";

pub fn converted_video_save_failed(storage_key: &str) -> String {
    format!("Can't add converted video to db, id: {storage_key}")
}

/// Reconciles worker results into request and video state.
#[derive(Clone)]
pub struct CompletionHandler {
    requests: Arc<dyn RequestStore>,
    videos: Arc<dyn VideoStore>,
    deadline: Deadline,
}

impl CompletionHandler {
    pub fn new(
        requests: Arc<dyn RequestStore>,
        videos: Arc<dyn VideoStore>,
        deadline: Deadline,
    ) -> Self {
        CompletionHandler {
            requests,
            videos,
            deadline,
        }
    }

    /// Applies one raw worker result.
    ///
    /// Returns [`Error::CompressWorker`] when the worker reported that the job
    /// failed, and [`Error::InvalidResponse`] for undecodable payloads. A
    /// converted video that can't be saved, or a result with neither error nor
    /// video, is recorded on the request and reported as handled. Errors from
    /// loading the request or patching the original video are returned, since
    /// redelivering the message is safe for both.
    ///
    /// `cancel` only aborts loading the request. Once state starts changing
    /// the writes run to the end, bounded by the deadline alone.
    #[instrument(skip_all, fields(request_id))]
    pub async fn handle_completion(&self, cancel: &CancellationToken, raw: &[u8]) -> Result<()> {
        let message = ConversionResultMessage::decode(raw)?;
        tracing::Span::current().record("request_id", message.request_id);

        let request = self
            .deadline
            .run(
                "retrieve request",
                cancel,
                self.requests.retrieve(message.request_id),
            )
            .await?;

        let outcome = if let Some(worker_error) = message.worker_error() {
            if request.status == Status::Completed {
                info!(
                    request_id = request.id,
                    error = %worker_error,
                    "Request already completed, not recording late failure"
                );
            } else {
                self.mark(request.id, RequestPatch::failed(worker_error))
                    .await;
            }
            Err(Error::CompressWorker(worker_error.to_string()))
        } else if let Some(converted) = message.converted_video.clone() {
            match request.converted_video_id {
                Some(video_id) => info!(
                    request_id = request.id,
                    video_id,
                    "Converted video already saved, ignoring repeated result"
                ),
                None => self.save_converted(&request, converted).await,
            }
            Ok(())
        } else {
            warn!(request_id = request.id, "Worker result has no converted video");
            if request.status != Status::Completed {
                self.mark(request.id, RequestPatch::failed(MISSING_CONVERTED_VIDEO))
                    .await;
            }
            Ok(())
        };

        if let Some(patch) = message.original_video {
            match patch.id.or(request.original_video_id) {
                Some(video_id) => {
                    debug!(video_id, "Patching original video metadata");
                    self.deadline
                        .run_uncancellable(
                            "update original video",
                            self.videos.update(video_id, VideoPatch::from(patch)),
                        )
                        .await?;
                }
                None => warn!(
                    request_id = request.id,
                    "Original video metadata without a video to patch"
                ),
            }
        }

        outcome
    }

    async fn save_converted(&self, request: &ConversionRequest, converted: ConvertedVideo) {
        let storage_key = converted.service_id.clone();
        let new_video = converted.into_new_video(request.owner_id);
        match self
            .deadline
            .run_uncancellable("create converted video", self.videos.create(new_video))
            .await
        {
            Ok(video) => {
                info!(request_id = request.id, video_id = video.id, "Conversion completed");
                self.mark(request.id, RequestPatch::completed(video.id))
                    .await;
            }
            Err(err) => {
                error!(
                    request_id = request.id,
                    storage_key = %storage_key,
                    error = %err,
                    "Can't save converted video"
                );
                self.mark(
                    request.id,
                    RequestPatch::failed(converted_video_save_failed(&storage_key)),
                )
                .await;
            }
        }
    }

    /// Updates the request, logging instead of failing. A failed update after
    /// the converted video was saved leaves that video unlinked; the log line
    /// carries the ids needed to link it by hand.
    async fn mark(&self, request_id: i64, patch: RequestPatch) {
        let status = patch.status;
        let converted_video_id = patch.converted_video_id;
        if let Err(err) = self
            .deadline
            .run_uncancellable("update request", self.requests.update(request_id, patch))
            .await
        {
            error!(
                request_id,
                status = ?status,
                converted_video_id = ?converted_video_id,
                error = %err,
                "Can't update conversion request"
            );
        }
    }
}
