use serde::{Deserialize, Serialize};

/// Length of an ArcFace embedding.
pub const EMBEDDING_DIM: usize = 512;

/// Cosine similarity a probe must exceed to be accepted as a student.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Integer pixel rectangle `(x0, y0, x1, y1)` clipped to a `width`×`height` frame.
    ///
    /// Returns `None` when the box lies entirely outside the frame.
    pub fn pixel_rect(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        if width == 0 || height == 0 {
            return None;
        }
        let max_x = (width - 1) as f32;
        let max_y = (height - 1) as f32;

        let x0 = self.x.max(0.0);
        let y0 = self.y.max(0.0);
        let x1 = (self.x + self.width).min(max_x);
        let y1 = (self.y + self.height).min(max_y);

        if x0 > max_x || y0 > max_y || x1 < x0 || y1 < y0 {
            return None;
        }
        Some((x0 as u32, y0 as u32, x1 as u32, y1 as u32))
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// A zero-magnitude vector on either side yields 0.0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }
}

/// A registered student's face, as held in the recognition cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrolledFace {
    pub student_id: String,
    pub name: String,
    pub embedding: Embedding,
}

/// Result of matching a probe embedding against the enrolled students.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Cosine similarity of the best candidate [-1, 1].
    pub similarity: f32,
    pub student_id: Option<String>,
    pub name: Option<String>,
}

impl MatchResult {
    fn no_match(similarity: f32) -> Self {
        Self {
            matched: false,
            similarity,
            student_id: None,
            name: None,
        }
    }
}

/// How a face in the live view relates to the current attendance session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionStatus {
    /// Recognized and not yet written for this session.
    New,
    /// Recognized and already written for this session.
    AlreadyMarked,
    /// No enrolled student above threshold.
    Unknown,
}

/// Strategy for comparing a probe embedding against enrolled faces.
pub trait Matcher {
    fn best_match(&self, probe: &Embedding, gallery: &[EnrolledFace], threshold: f32)
        -> MatchResult;
}

/// Linear cosine-similarity scan.
///
/// Every entry is compared; the highest similarity wins and is accepted only
/// when it is strictly greater than the threshold.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn best_match(
        &self,
        probe: &Embedding,
        gallery: &[EnrolledFace],
        threshold: f32,
    ) -> MatchResult {
        let mut best_sim = f32::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, face) in gallery.iter().enumerate() {
            let sim = probe.similarity(&face.embedding);
            if sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_sim > threshold => MatchResult {
                matched: true,
                similarity: best_sim,
                student_id: Some(gallery[idx].student_id.clone()),
                name: Some(gallery[idx].name.clone()),
            },
            Some(_) => MatchResult::no_match(best_sim),
            None => MatchResult::no_match(0.0),
        }
    }
}
