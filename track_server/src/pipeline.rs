//! Frame pipeline: decode, infer, draw, re-encode.
//!
use std::io::Cursor;

use bytes::Bytes;
use cam_source::{CameraError, JpegFrameSource};
use image::{codecs::jpeg::JpegEncoder, ImageFormat, Rgb, RgbImage};
use imageproc::{
    drawing::{draw_hollow_rect, draw_text},
    rect::Rect,
};
use lazy_static::lazy_static;
use tokio::io::AsyncRead;

use crate::{
    as_jpeg_stream_item,
    meter::METER,
    nn::{Detection, InferModel},
};

/// A detection is drawn only if its confidence is strictly above this.
pub const CONFIDENCE_THRESHOLD: f32 = 0.4;

/// COCO class id highlighted as the tracking target (cat).
pub const TARGET_CLASS_ID: usize = 15;

/// JPEG quality of re-encoded frames.
const JPEG_QUALITY: u8 = 85;

/// Consecutive failed frames tolerated before the stream is failed.
const MAX_CONSECUTIVE_SKIPS: u32 = 30;

const TARGET_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const OTHER_COLOR: Rgb<u8> = Rgb([255, 100, 100]);

/// Per-frame failure, transient by policy.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("failed to decode frame")]
    Decode(#[source] image::ImageError),
    #[error("inference failed")]
    Infer(#[source] anyhow::Error),
    #[error("failed to re-encode frame")]
    Encode(#[source] image::ImageError),
}

/// Failure of the whole stream.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to read from camera")]
    Read(#[from] std::io::Error),
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error("{count} consecutive frames failed")]
    TooManyFailures {
        count: u32,
        #[source]
        last: FrameError,
    },
}

/// Pulls JPEG frames from a byte source, runs one inference pass per
/// frame, draws the results and wraps each re-encoded frame as one
/// multipart payload. Frames come out in the exact order the camera
/// produced them.
pub struct FramePipeline<R, M> {
    source: JpegFrameSource<R>,
    model: M,
    consecutive_failures: u32,
}

impl<R, M> FramePipeline<R, M>
where
    R: AsyncRead + Unpin,
    M: InferModel,
{
    pub fn new(source: JpegFrameSource<R>, model: M) -> Self {
        Self {
            source,
            model,
            consecutive_failures: 0,
        }
    }

    /// Next multipart payload, or `Ok(None)` once the byte source ends.
    ///
    /// A frame that fails to decode, infer or re-encode is logged and
    /// skipped; after `MAX_CONSECUTIVE_SKIPS` failures in a row the
    /// stream fails instead. A good frame resets the counter.
    pub async fn next_payload(&mut self) -> Result<Option<Bytes>, PipelineError> {
        loop {
            let jpeg = match self.source.next_frame().await? {
                Some(jpeg) => jpeg,
                None => return Ok(None),
            };

            match annotate_frame(&self.model, &jpeg) {
                Ok(annotated) => {
                    self.consecutive_failures = 0;
                    METER.tick_streamed();
                    return Ok(Some(as_jpeg_stream_item(&annotated)));
                }
                Err(err) => {
                    self.consecutive_failures += 1;
                    METER.tick_skipped();
                    log::warn!(
                        "skipping frame ({} consecutive): {err}",
                        self.consecutive_failures
                    );
                    if self.consecutive_failures >= MAX_CONSECUTIVE_SKIPS {
                        return Err(PipelineError::TooManyFailures {
                            count: self.consecutive_failures,
                            last: err,
                        });
                    }
                }
            }
        }
    }
}

/// Run one frame through the detector and return it re-encoded with
/// overlays drawn.
pub fn annotate_frame<M: InferModel>(model: &M, jpeg: &[u8]) -> Result<Vec<u8>, FrameError> {
    let frame = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)
        .map_err(FrameError::Decode)?
        .to_rgb8();

    let detections = model.run(&frame).map_err(FrameError::Infer)?;
    let frame = draw_detections(frame, &detections);

    encode_jpeg(&frame).map_err(FrameError::Encode)
}

/// Draw bounding boxes with confidence labels on the frame.
///
/// Normalized coordinates are scaled to the frame resolution. The target
/// class draws in green with a `CAT` label, everything else in the
/// alternate color with an `obj` label.
pub fn draw_detections(mut frame: RgbImage, detections: &[Detection]) -> RgbImage {
    let (width, height) = (frame.width() as f32, frame.height() as f32);

    for detection in detections {
        if detection.confidence <= CONFIDENCE_THRESHOLD {
            continue;
        }

        let [x1, y1, x2, y2] = detection.bbox;
        let (x_tl, y_tl) = (x1 * width, y1 * height);
        let (x_br, y_br) = (x2 * width, y2 * height);
        let rect_width = (x_br - x_tl).max(1.0);
        let rect_height = (y_br - y_tl).max(1.0);

        let (color, label) = match detection.class_id {
            TARGET_CLASS_ID => (TARGET_COLOR, "CAT"),
            _ => (OTHER_COLOR, "obj"),
        };

        let rect = Rect::at(x_tl as i32, y_tl as i32)
            .of_size(rect_width as u32, rect_height as u32);
        frame = draw_hollow_rect(&frame, rect, color);
        frame = draw_text(
            &frame,
            color,
            x_tl as i32,
            (y_tl as i32 - 14).max(0),
            rusttype::Scale { x: 16.0, y: 16.0 },
            &DEJAVU_MONO,
            &format!("{} {:.0}%", label, detection.confidence * 100.0),
        );
    }

    frame
}

fn encode_jpeg(frame: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY).encode(
        frame.as_raw(),
        frame.width(),
        frame.height(),
        image::ColorType::Rgb8,
    )?;
    Ok(buf.into_inner())
}

lazy_static! {
    static ref DEJAVU_MONO: rusttype::Font<'static> = {
        let font_data: &[u8] = include_bytes!("../resources/DejaVuSansMono.ttf");
        rusttype::Font::try_from_bytes(font_data).expect("failed to load font")
    };
}
