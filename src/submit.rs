use crate::blob::{BlobStore, FileBlob};
use crate::deadline::Deadline;
use crate::message::ConversionJobMessage;
use crate::queue::JobQueue;
use crate::store::{NewRequest, NewVideo, RequestPatch, RequestStore, VideoStore};
use crate::{ConversionParams, ConversionRequest, Error, VideoAsset};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

pub const UPLOAD_FAILED: &str = "Can't upload video to cloud";
pub const SAVE_VIDEO_FAILED: &str = "Can't add video to database";
pub const PUBLISH_FAILED: &str = "Failed connection to worker";

/// A submission that did not go through. `request` holds the recorded
/// request (normally Failed with details) unless the initial insert failed.
#[derive(Debug, thiserror::Error)]
#[error("conversion request submission failed: {source}")]
pub struct SubmitError {
    pub request: Option<ConversionRequest>,
    #[source]
    pub source: Error,
}

impl SubmitError {
    fn without_request(source: Error) -> Self {
        SubmitError {
            request: None,
            source,
        }
    }
}

#[derive(Clone)]
pub struct RequestSubmitter {
    requests: Arc<dyn RequestStore>,
    videos: Arc<dyn VideoStore>,
    blobs: Arc<dyn BlobStore>,
    queue: Arc<dyn JobQueue>,
    deadline: Deadline,
}

impl RequestSubmitter {
    pub fn new(
        requests: Arc<dyn RequestStore>,
        videos: Arc<dyn VideoStore>,
        blobs: Arc<dyn BlobStore>,
        queue: Arc<dyn JobQueue>,
        deadline: Deadline,
    ) -> Self {
        RequestSubmitter {
            requests,
            videos,
            blobs,
            queue,
            deadline,
        }
    }

    /// Records a conversion request, stores the file, and hands the job to the workers.
    ///
    /// Every failure after the request row exists is written back to the row
    /// as Failed with a readable reason before the error is returned. On
    /// success the request stays InReview with the original video attached.
    #[instrument(skip(self, cancel, params, file), fields(video_name = %file.name, request_id))]
    pub async fn submit(
        &self,
        cancel: &CancellationToken,
        owner_id: i64,
        params: ConversionParams,
        file: FileBlob,
    ) -> Result<ConversionRequest, SubmitError> {
        let new_request = NewRequest {
            owner_id,
            params,
            video_name: file.name.clone(),
        };
        let request = self
            .deadline
            .run("create request", cancel, self.requests.create(new_request))
            .await
            .map_err(SubmitError::without_request)?;
        tracing::Span::current().record("request_id", request.id);

        let (name, size) = (file.name.clone(), file.size);
        let storage_key = match self
            .deadline
            .run("upload video", cancel, self.blobs.upload(file))
            .await
        {
            Ok(key) => key,
            Err(err) => {
                return Err(self
                    .record_failure(request, RequestPatch::failed(UPLOAD_FAILED), err)
                    .await)
            }
        };

        let new_video = NewVideo {
            owner_id,
            name,
            size_bytes: size,
            storage_key,
            ..Default::default()
        };
        let original = match self
            .deadline
            .run("create video", cancel, self.videos.create(new_video))
            .await
        {
            Ok(video) => video,
            Err(err) => {
                return Err(self
                    .record_failure(request, RequestPatch::failed(SAVE_VIDEO_FAILED), err)
                    .await)
            }
        };

        let mut request = match self
            .deadline
            .run(
                "link original video",
                cancel,
                self.requests
                    .update(request.id, RequestPatch::link_original(original.id)),
            )
            .await
        {
            Ok(request) => request,
            Err(err) => {
                let patch = RequestPatch::failed(SAVE_VIDEO_FAILED).with_original(original.id);
                return Err(self.record_failure(request, patch, err).await);
            }
        };

        if let Err(err) = self.publish(cancel, &request, &original).await {
            return Err(self
                .record_failure(request, RequestPatch::failed(PUBLISH_FAILED), err)
                .await);
        }

        info!(
            request_id = request.id,
            video_id = original.id,
            "Conversion job published"
        );
        request.original_video = Some(original);
        Ok(request)
    }

    async fn publish(
        &self,
        cancel: &CancellationToken,
        request: &ConversionRequest,
        original: &VideoAsset,
    ) -> Result<(), Error> {
        let payload = ConversionJobMessage::new(request, original).encode()?;
        self.deadline
            .run("publish job", cancel, self.queue.publish(payload))
            .await
    }

    /// Marks the request Failed. The update runs even if the caller has
    /// cancelled, so the failure is recorded either way.
    async fn record_failure(
        &self,
        request: ConversionRequest,
        patch: RequestPatch,
        cause: Error,
    ) -> SubmitError {
        warn!(
            request_id = request.id,
            details = ?patch.details,
            error = %cause,
            "Conversion request submission failed"
        );
        match self
            .deadline
            .run_uncancellable("record failure", self.requests.update(request.id, patch))
            .await
        {
            Ok(failed) => SubmitError {
                request: Some(failed),
                source: cause,
            },
            Err(compensation) => {
                error!(
                    request_id = request.id,
                    error = %compensation,
                    "Can't record submission failure"
                );
                SubmitError {
                    request: Some(request),
                    source: Error::Compensation {
                        cause: Box::new(cause),
                        compensation: Box::new(compensation),
                    },
                }
            }
        }
    }
}
