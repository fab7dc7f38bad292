//! Live camera object tracker: spawns a motion-JPEG camera subprocess,
//! runs a detection pass per frame, draws the results and republishes
//! the annotated feed as a multipart HTTP stream.
pub mod endpoints;
pub mod meter;
pub mod nn;
pub mod pipeline;
pub mod utils;

use std::sync::Arc;

use bytes::Bytes;
use cam_source::CameraConfig;
use tokio::sync::Semaphore;

use crate::nn::InferModel;

/// Shared server state, constructed once at bootstrap.
pub struct AppState {
    pub model: Arc<dyn InferModel + Send + Sync>,
    pub camera: CameraConfig,
    /// One-permit slot guarding the single supported stream consumer.
    pub stream_slot: Arc<Semaphore>,
}

impl AppState {
    pub fn new(model: Arc<dyn InferModel + Send + Sync>, camera: CameraConfig) -> Self {
        Self {
            model,
            camera,
            stream_slot: Arc::new(Semaphore::new(1)),
        }
    }
}

/// Wrap one encoded JPEG image as a part of a multipart replace stream.
pub fn as_jpeg_stream_item(jpeg: &[u8]) -> Bytes {
    Bytes::from(
        [
            "--frame\r\nContent-Type: image/jpeg\r\n\r\n".as_bytes(),
            jpeg,
            "\r\n".as_bytes(),
        ]
        .concat(),
    )
}
