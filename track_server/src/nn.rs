//! Neural-network detection model.
//!
use std::path::PathBuf;

use anyhow::{anyhow, bail, ensure, Result};
use image::RgbImage;
use smallvec::SmallVec;
use tract_onnx::prelude::*;

use crate::utils::ensure_model_file;

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;
type NnOut = SmallVec<[TValue; 4]>;

/// Model input resolution; the camera captures at the same size.
pub const MODEL_INPUT_WIDTH: u32 = 640;
pub const MODEL_INPUT_HEIGHT: u32 = 640;

/// One candidate object instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub class_id: usize,
    /// Corner points `[x1, y1, x2, y2]`, normalized to `[0, 1]`.
    pub bbox: [f32; 4],
    pub confidence: f32,
}

/// Seam between the frame pipeline and the detector backend.
pub trait InferModel {
    fn run(&self, input: &RgbImage) -> Result<Vec<Detection>>;
}

impl<M: InferModel + ?Sized> InferModel for std::sync::Arc<M> {
    fn run(&self, input: &RgbImage) -> Result<Vec<Detection>> {
        (**self).run(input)
    }
}

/// YOLOv8 detection model with the NMS postprocessing baked into the
/// graph: the single output holds, per class, a fixed-size list of
/// `(x1, y1, x2, y2, confidence)` records with zero-confidence padding.
pub struct YoloV8Model {
    model: NnModel,
    width: u32,
    height: u32,
}

impl YoloV8Model {
    /// Load the model, downloading it into the cache directory first if
    /// no explicit path is given. Constructed once at bootstrap and kept
    /// warm for the process lifetime.
    pub async fn new(model_path: Option<PathBuf>) -> Result<Self> {
        let path = ensure_model_file(model_path).await?;

        let input_fact = InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, 640, 640));
        let model = tract_onnx::onnx()
            .model_for_path(&path)?
            .with_input_fact(0, input_fact)?
            .into_optimized()?
            .into_runnable()?;

        log::info!("detection model loaded from {}", path.display());

        Ok(Self {
            model,
            width: MODEL_INPUT_WIDTH,
            height: MODEL_INPUT_HEIGHT,
        })
    }

    fn preproc(&self, input: &RgbImage) -> Tensor {
        let resized: RgbImage = image::imageops::resize(
            input,
            self.width,
            self.height,
            image::imageops::FilterType::Triangle,
        );

        tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, c, y, x)| resized[(x as _, y as _)][c] as f32 / 255.0,
        )
        .into()
    }
}

impl InferModel for YoloV8Model {
    fn run(&self, input: &RgbImage) -> Result<Vec<Detection>> {
        let raw_nn_out = self.model.run(tvec!(self.preproc(input).into()))?;
        parse_detections(raw_nn_out)
    }
}

/// Interpret the detection output: outer index is the class id, inner
/// rows are `(x1, y1, x2, y2, confidence)` with coordinates normalized to
/// the input resolution. Zero-confidence rows pad the fixed-size output
/// and are dropped.
fn parse_detections(raw_nn_out: NnOut) -> Result<Vec<Detection>> {
    let output = raw_nn_out
        .first()
        .ok_or_else(|| anyhow!("model produced no output tensors"))?;
    let view = output.to_array_view::<f32>()?;

    // Accept the per-class detection grid with or without the leading
    // batch-of-1 axis.
    let view = match view.ndim() {
        4 => view.index_axis_move(tract_ndarray::Axis(0), 0),
        3 => view,
        rank => bail!("unexpected detection output of rank {rank}"),
    };
    ensure!(
        view.shape()[2] == 5,
        "expected (x1, y1, x2, y2, confidence) records, got row length {}",
        view.shape()[2]
    );

    let mut detections = vec![];
    for (class_id, class_records) in view.outer_iter().enumerate() {
        for record in class_records.outer_iter() {
            let confidence = record[[4]];
            if confidence <= 0.0 {
                continue;
            }
            detections.push(Detection {
                class_id,
                bbox: [record[[0]], record[[1]], record[[2]], record[[3]]],
                confidence,
            });
        }
    }

    Ok(detections)
}
