//! Endpoints of the HTTP server.
//!
use std::sync::Arc;

use async_stream::try_stream;
use axum::{
    body::StreamBody,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Extension,
};
use bytes::Bytes;
use cam_source::{CameraProcess, JpegFrameSource};
use futures_core::Stream;
use tokio::{process::ChildStdout, sync::OwnedSemaphorePermit};

use crate::{
    nn::InferModel,
    pipeline::{FramePipeline, PipelineError},
    AppState,
};

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
<title>Live Cat Tracker</title>
<style>
body { margin: 0; background: #000; display: flex; justify-content: center; align-items: center; height: 100vh; }
img { max-width: 95vw; max-height: 95vh; border: 3px solid #0f0; }
</style>
</head>
<body><img src="/video"/></body>
</html>
"#;

/// Landing page embedding the video stream.
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

/// The annotated camera feed as a multipart replace stream.
///
/// The camera subprocess lives exactly as long as this response; a
/// second concurrent viewer is rejected instead of racing a second
/// camera and inference pass.
pub async fn video_stream(Extension(state): Extension<Arc<AppState>>) -> Response {
    let permit = match state.stream_slot.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            log::warn!("video stream requested while another viewer is active");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                "video stream already in use",
            )
                .into_response();
        }
    };

    let mut camera = match CameraProcess::spawn(&state.camera) {
        Ok(camera) => camera,
        Err(err) => {
            log::error!("failed to start camera: {err:#}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "failed to start camera").into_response();
        }
    };
    let stdout = match camera.take_stdout() {
        Ok(stdout) => stdout,
        Err(err) => {
            log::error!("failed to attach to camera: {err:#}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "failed to start camera").into_response();
        }
    };

    let pipeline = FramePipeline::new(JpegFrameSource::new(stdout), Arc::clone(&state.model));

    let body = StreamBody::new(annotated_stream(pipeline, camera, permit));
    let headers = [(
        header::CONTENT_TYPE,
        "multipart/x-mixed-replace; boundary=frame",
    )];

    (headers, body).into_response()
}

/// Response stream over the pipeline. The camera handle and the stream
/// slot permit are owned by the stream itself, so the subprocess is
/// terminated and the slot freed on every exit path, including the
/// viewer dropping the connection.
fn annotated_stream(
    mut pipeline: FramePipeline<ChildStdout, Arc<dyn InferModel + Send + Sync>>,
    camera: CameraProcess,
    permit: OwnedSemaphorePermit,
) -> impl Stream<Item = Result<Bytes, PipelineError>> {
    try_stream! {
        let _permit = permit;
        while let Some(payload) = pipeline.next_payload().await? {
            yield payload;
        }
        log::info!("camera stream ended");
        camera.terminate().await?;
    }
}
