//! Submission path: request row, upload, original video, published job,
//! and the Failed record left behind by each failing step.

mod common;

use common::{clip, params, TestHarness};
use convq::blob::{BlobStore, FileBlob};
use convq::deadline::Deadline;
use convq::memory::StoreOp;
use convq::message::ConversionJobMessage;
use convq::submit::{RequestSubmitter, PUBLISH_FAILED, SAVE_VIDEO_FAILED, UPLOAD_FAILED};
use convq::{Error, Status};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn successful_submission_publishes_job() {
    let harness = TestHarness::new();

    let request = harness.submit_clip().await;

    assert_eq!(request.id, 1);
    assert_eq!(request.status, Status::InReview);
    assert_eq!(request.bitrate, 64000);
    assert_eq!(request.original_video_id, Some(1));
    assert_eq!(request.video_name, "clip.mkv");

    let original = request.original_video.as_ref().unwrap();
    assert_eq!(original.id, 1);
    assert_eq!(original.owner_id, 1);
    assert_eq!(original.name, "clip.mkv");
    assert_eq!(original.size_bytes, 14);
    assert_eq!(
        harness.blobs.get(&original.storage_key).unwrap(),
        b"matroska bytes"
    );

    let stored = harness.store.request(1).unwrap();
    assert_eq!(stored.status, Status::InReview);
    assert_eq!(stored.original_video_id, Some(1));

    let job: ConversionJobMessage =
        serde_json::from_slice(&harness.queue.try_next_job().unwrap()).unwrap();
    assert_eq!(
        job,
        ConversionJobMessage {
            request_id: 1,
            bitrate: 64000,
            resolution: Some("800:600".into()),
            ratio: Some("4:3".into()),
            video_id: 1,
            video_service_id: original.storage_key.clone(),
        }
    );
    assert!(harness.queue.try_next_job().is_none());
}

#[tokio::test]
async fn request_insert_failure_creates_nothing() {
    let harness = TestHarness::new();
    harness.store.fail(StoreOp::CreateRequest);

    let err = harness
        .submitter()
        .submit(&harness.cancel, 1, params(), clip())
        .await
        .unwrap_err();

    assert!(err.request.is_none());
    assert!(matches!(err.source, Error::Persistence(_)));
    assert!(harness.blobs.is_empty());
    assert!(harness.store.videos().is_empty());
    assert!(harness.queue.try_next_job().is_none());
}

#[tokio::test]
async fn upload_failure_marks_request_failed() {
    let harness = TestHarness::new();
    harness.blobs.set_failing(true);

    let err = harness
        .submitter()
        .submit(&harness.cancel, 1, params(), clip())
        .await
        .unwrap_err();

    assert!(matches!(err.source, Error::Upload(_)));
    let request = err.request.unwrap();
    assert_eq!(request.status, Status::Failed);
    assert_eq!(request.details, UPLOAD_FAILED);
    assert_eq!(request.original_video_id, None);

    let stored = harness.store.request(request.id).unwrap();
    assert_eq!(stored.status, Status::Failed);
    assert_eq!(stored.details, "Can't upload video to cloud");
    assert!(harness.store.videos().is_empty());
    assert!(harness.queue.try_next_job().is_none());
}

#[tokio::test]
async fn video_insert_failure_marks_request_failed() {
    let harness = TestHarness::new();
    harness.store.fail(StoreOp::CreateVideo);

    let err = harness
        .submitter()
        .submit(&harness.cancel, 1, params(), clip())
        .await
        .unwrap_err();

    assert!(matches!(err.source, Error::Persistence(_)));
    let request = err.request.unwrap();
    assert_eq!(request.status, Status::Failed);
    assert_eq!(request.details, SAVE_VIDEO_FAILED);
    assert_eq!(request.original_video_id, None);
    assert_eq!(harness.blobs.len(), 1);
    assert!(harness.queue.try_next_job().is_none());
}

#[tokio::test]
async fn link_failure_keeps_original_video_on_failed_request() {
    let harness = TestHarness::new();
    harness.store.fail_once(StoreOp::UpdateRequest);

    let err = harness
        .submitter()
        .submit(&harness.cancel, 1, params(), clip())
        .await
        .unwrap_err();

    assert!(matches!(err.source, Error::Persistence(_)));
    let request = err.request.unwrap();
    assert_eq!(request.status, Status::Failed);
    assert_eq!(request.details, SAVE_VIDEO_FAILED);
    assert_eq!(request.original_video_id, Some(1));
    assert_eq!(harness.store.request(request.id).unwrap(), request);
    assert_eq!(harness.store.videos().len(), 1);
    assert!(harness.queue.try_next_job().is_none());
}

#[tokio::test]
async fn publish_failure_marks_request_failed() {
    let harness = TestHarness::new();
    harness.queue.close_jobs();

    let err = harness
        .submitter()
        .submit(&harness.cancel, 1, params(), clip())
        .await
        .unwrap_err();

    assert!(matches!(err.source, Error::Publish(_)));
    let request = err.request.unwrap();
    assert_eq!(request.status, Status::Failed);
    assert_eq!(request.details, PUBLISH_FAILED);
    // The original video was stored and stays linked.
    assert_eq!(request.original_video_id, Some(1));
    assert_eq!(harness.store.videos().len(), 1);
}

#[tokio::test]
async fn failed_compensation_reports_both_errors() {
    let harness = TestHarness::new();
    harness.blobs.set_failing(true);
    harness.store.fail(StoreOp::UpdateRequest);

    let err = harness
        .submitter()
        .submit(&harness.cancel, 1, params(), clip())
        .await
        .unwrap_err();

    match &err.source {
        Error::Compensation {
            cause,
            compensation,
        } => {
            assert!(matches!(**cause, Error::Upload(_)));
            assert!(matches!(**compensation, Error::Persistence(_)));
        }
        other => panic!("expected a combined error, got {other:?}"),
    }
    let request = err.request.unwrap();
    assert_eq!(request.status, Status::InReview);
    assert_eq!(harness.store.request(request.id).unwrap().status, Status::InReview);
}

struct StalledBlobStore;

#[async_trait::async_trait]
impl BlobStore for StalledBlobStore {
    async fn upload(&self, _file: FileBlob) -> convq::Result<String> {
        futures::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn upload_timeout_is_recorded_like_any_failure() {
    let harness = TestHarness::new();
    let submitter = RequestSubmitter::new(
        harness.store.clone(),
        harness.store.clone(),
        Arc::new(StalledBlobStore),
        Arc::new(harness.queue.clone()),
        Deadline::new(Duration::from_millis(100)),
    );

    let err = submitter
        .submit(&harness.cancel, 1, params(), clip())
        .await
        .unwrap_err();

    assert!(matches!(
        err.source,
        Error::Timeout {
            op: "upload video",
            ..
        }
    ));
    assert_eq!(err.request.unwrap().details, UPLOAD_FAILED);
}

#[tokio::test]
async fn cancelled_submission_still_records_failure() {
    let harness = TestHarness::new();
    let submitter = RequestSubmitter::new(
        harness.store.clone(),
        harness.store.clone(),
        Arc::new(StalledBlobStore),
        Arc::new(harness.queue.clone()),
        TestHarness::deadline(),
    );

    let cancel = harness.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });

    let err = submitter
        .submit(&harness.cancel, 1, params(), clip())
        .await
        .unwrap_err();

    assert!(matches!(err.source, Error::Cancelled { .. }));
    let stored = harness.store.request(1).unwrap();
    assert_eq!(stored.status, Status::Failed);
    assert_eq!(stored.details, UPLOAD_FAILED);
}

#[tokio::test]
async fn each_submission_gets_its_own_rows() {
    let harness = TestHarness::new();

    let first = harness.submit_clip().await;
    let second = harness
        .submitter()
        .submit(
            &harness.cancel,
            2,
            params(),
            FileBlob::from_bytes("other.mp4", vec![1, 2, 3]),
        )
        .await
        .unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(second.owner_id, 2);
    assert_eq!(second.original_video.as_ref().unwrap().owner_id, 2);
    assert_eq!(harness.store.videos().len(), 2);
}
