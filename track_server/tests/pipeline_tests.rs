use std::{
    io::Cursor,
    sync::atomic::{AtomicUsize, Ordering},
};

use anyhow::anyhow;
use cam_source::JpegFrameSource;
use image::{codecs::jpeg::JpegEncoder, ImageFormat, Rgb, RgbImage};
use track_server::{
    nn::{Detection, InferModel},
    pipeline::{FramePipeline, PipelineError, TARGET_CLASS_ID},
};

const PAYLOAD_PREFIX: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";

/// Mock detector with a fixed result.
struct MockModel(Vec<Detection>);

impl InferModel for MockModel {
    fn run(&self, _input: &RgbImage) -> anyhow::Result<Vec<Detection>> {
        Ok(self.0.clone())
    }
}

/// Mock detector that fails a number of times before recovering.
struct FlakyModel {
    failures_left: AtomicUsize,
}

impl InferModel for FlakyModel {
    fn run(&self, _input: &RgbImage) -> anyhow::Result<Vec<Detection>> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                left.checked_sub(1)
            })
            .is_ok()
        {
            Err(anyhow!("inference backend hiccup"))
        } else {
            Ok(vec![])
        }
    }
}

fn jpeg_frame(color: Rgb<u8>) -> Vec<u8> {
    let frame = RgbImage::from_pixel(640, 640, color);
    let mut buf = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buf, 90)
        .encode(frame.as_raw(), 640, 640, image::ColorType::Rgb8)
        .expect("encode test frame");
    buf.into_inner()
}

/// A frame the extractor accepts but the decoder rejects.
fn undecodable_frame() -> Vec<u8> {
    [&[0xff, 0xd8][..], &[0x00; 64], &[0xff, 0xd9][..]].concat()
}

fn unwrap_payload(payload: &[u8]) -> &[u8] {
    assert!(payload.starts_with(PAYLOAD_PREFIX), "multipart prefix");
    assert!(payload.ends_with(b"\r\n"), "trailing delimiter");
    &payload[PAYLOAD_PREFIX.len()..payload.len() - 2]
}

#[tokio::test]
async fn frames_come_out_framed_in_order_and_decodable() {
    let stream = [
        b"leading garbage".to_vec(),
        jpeg_frame(Rgb([10, 10, 10])),
        jpeg_frame(Rgb([120, 120, 120])),
        jpeg_frame(Rgb([240, 240, 240])),
    ]
    .concat();

    let mut pipeline = FramePipeline::new(JpegFrameSource::new(&stream[..]), MockModel(vec![]));

    let mut luma = vec![];
    while let Some(payload) = pipeline.next_payload().await.unwrap() {
        let jpeg = unwrap_payload(&payload).to_vec();
        let decoded = image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg)
            .expect("streamed payload decodes")
            .to_rgb8();
        assert_eq!(decoded.dimensions(), (640, 640));
        luma.push(decoded.get_pixel(320, 320)[0]);
    }

    assert_eq!(luma.len(), 3);
    assert!(luma[0] < luma[1] && luma[1] < luma[2], "camera order kept");
}

#[tokio::test]
async fn detections_are_drawn_on_the_streamed_frame() {
    let stream = jpeg_frame(Rgb([120, 120, 120]));
    let model = MockModel(vec![Detection {
        class_id: TARGET_CLASS_ID,
        bbox: [0.1, 0.1, 0.2, 0.2],
        confidence: 0.9,
    }]);

    let mut pipeline = FramePipeline::new(JpegFrameSource::new(&stream[..]), model);
    let payload = pipeline.next_payload().await.unwrap().unwrap();

    let decoded = image::load_from_memory_with_format(unwrap_payload(&payload), ImageFormat::Jpeg)
        .expect("annotated payload decodes")
        .to_rgb8();

    // The box left edge runs down column 64; re-encoding is lossy, so
    // check dominance over the gray background instead of exact color.
    let edge = decoded.get_pixel(64, 100);
    let (r, g, b) = (edge[0] as i32, edge[1] as i32, edge[2] as i32);
    assert!(g > r + 40 && g > b + 40, "green edge: {edge:?}");

    let interior = decoded.get_pixel(320, 320);
    assert!(interior[0].abs_diff(120) < 20, "interior untouched: {interior:?}");
}

#[tokio::test]
async fn undecodable_frames_are_skipped() {
    let stream = [
        undecodable_frame(),
        jpeg_frame(Rgb([50, 50, 50])),
        undecodable_frame(),
        jpeg_frame(Rgb([200, 200, 200])),
    ]
    .concat();

    let mut pipeline = FramePipeline::new(JpegFrameSource::new(&stream[..]), MockModel(vec![]));

    let mut payloads = 0;
    while pipeline.next_payload().await.unwrap().is_some() {
        payloads += 1;
    }
    assert_eq!(payloads, 2);
}

#[tokio::test]
async fn inference_failures_are_skipped_until_recovery() {
    let stream = [
        jpeg_frame(Rgb([50, 50, 50])),
        jpeg_frame(Rgb([100, 100, 100])),
        jpeg_frame(Rgb([150, 150, 150])),
    ]
    .concat();
    let model = FlakyModel {
        failures_left: AtomicUsize::new(2),
    };

    let mut pipeline = FramePipeline::new(JpegFrameSource::new(&stream[..]), model);

    let mut payloads = 0;
    while pipeline.next_payload().await.unwrap().is_some() {
        payloads += 1;
    }
    assert_eq!(payloads, 1, "two failed frames skipped, third streamed");
}

#[tokio::test]
async fn stream_fails_after_too_many_consecutive_failures() {
    let stream: Vec<u8> = (0..30).flat_map(|_| undecodable_frame()).collect();

    let mut pipeline = FramePipeline::new(JpegFrameSource::new(&stream[..]), MockModel(vec![]));

    match pipeline.next_payload().await {
        Err(PipelineError::TooManyFailures { count: 30, .. }) => {}
        other => panic!("expected TooManyFailures, got {other:?}"),
    }
}
