//! Camera byte source and motion-JPEG frame extraction.
pub mod camera;
pub mod extract;
pub mod source;

pub use camera::{CameraConfig, CameraError, CameraProcess};
pub use extract::FrameExtractor;
pub use source::JpegFrameSource;
