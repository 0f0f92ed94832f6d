//! rollcall-core — Face detection, recognition and matching.
//!
//! SCRFD finds faces, ArcFace turns each aligned face into a 512-dim
//! embedding, and a cosine matcher compares it with registered students.
//! Both models run on the CPU via ONNX Runtime.

pub mod alignment;
pub mod detector;
pub mod overlay;
pub mod recognizer;
pub mod types;

use std::path::PathBuf;

pub use detector::FaceDetector;
pub use recognizer::FaceRecognizer;
pub use types::{
    BoundingBox, CosineMatcher, Embedding, EnrolledFace, MatchResult, Matcher, RecognitionStatus,
    DEFAULT_MATCH_THRESHOLD, EMBEDDING_DIM,
};

/// File name of the SCRFD detection model.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// File name of the ArcFace recognition model.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

/// Model directory used when none is configured.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/rollcall/models")
}
