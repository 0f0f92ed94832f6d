use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Local;
use rollcall_core::overlay::{self, Annotation};
use rollcall_core::{CosineMatcher, Embedding, FaceDetector, FaceRecognizer, Matcher, RecognitionStatus};
use rollcall_hw::{Camera, CaptureSettings, Frame};
use rollcall_store::Store;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::cache::{self, StudentCache};
use crate::lock;
use crate::session::AttendanceSession;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] rollcall_hw::CameraError),
    #[error("detector error: {0}")]
    Detector(#[from] rollcall_core::detector::DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] rollcall_core::recognizer::RecognizerError),
    #[error("overlay error: {0}")]
    Overlay(#[from] rollcall_core::overlay::OverlayError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("camera is not running")]
    NotRunning,
    #[error("No face detected. Please look at the camera and try again.")]
    NoFaceDetected,
    #[error("engine thread exited")]
    ChannelClosed,
}

/// What the live view is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraMode {
    /// Draw detections only; used while enrolling students.
    Registration,
    /// Recognize every face and colour it by attendance status.
    Attendance,
}

/// Messages sent from web handlers to the engine thread.
enum EngineRequest {
    Start {
        mode: CameraMode,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Frame {
        reply: oneshot::Sender<Option<Vec<u8>>>,
    },
    Capture {
        reply: oneshot::Sender<Result<Embedding, EngineError>>,
    },
}

/// Everything the engine thread needs besides the models.
pub struct EngineSettings {
    pub camera_device: String,
    pub capture: CaptureSettings,
    pub similarity_threshold: f32,
    pub frame_skip: u32,
    pub jpeg_quality: u8,
}

/// State shared between the engine thread and the web handlers.
#[derive(Clone)]
pub struct SharedState {
    pub store: Arc<dyn Store>,
    pub cache: Arc<Mutex<StudentCache>>,
    pub session: Arc<Mutex<AttendanceSession>>,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Open the camera if needed and switch to `mode`.
    pub async fn start(&self, mode: CameraMode) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Start { mode, reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Release the camera. A no-op if it is not open.
    pub async fn stop(&self) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Stop { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Next annotated JPEG frame, or `None` if the camera is stopped or the read failed.
    pub async fn frame(&self) -> Option<Vec<u8>> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Frame { reply }).await.ok()?;
        rx.await.ok().flatten()
    }

    /// Capture one frame and return the embedding of its most confident face.
    pub async fn capture(&self) -> Result<Embedding, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Capture { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    async fn send(&self, req: EngineRequest) -> Result<(), EngineError> {
        self.tx.send(req).await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads both ONNX models up front and fails fast if either is missing. The
/// camera is opened lazily by the first `start` and released by `stop`.
/// `runtime` is used to reach the async store from the blocking thread.
pub fn spawn_engine(
    detector_path: &str,
    recognizer_path: &str,
    settings: EngineSettings,
    shared: SharedState,
    runtime: tokio::runtime::Handle,
) -> Result<EngineHandle, EngineError> {
    let detector = FaceDetector::load(detector_path, rollcall_core::detector::DEFAULT_MIN_CONFIDENCE)?;
    tracing::info!(path = detector_path, "SCRFD detector loaded");

    let recognizer = FaceRecognizer::load(recognizer_path)?;
    tracing::info!(path = recognizer_path, "ArcFace recognizer loaded");

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            // the camera is only ever opened on this thread
            let gate = FrameGate::new(settings.frame_skip);
            let mut engine = Engine {
                detector,
                recognizer,
                settings,
                shared,
                runtime,
                camera: None,
                mode: CameraMode::Registration,
                gate,
            };
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Start { mode, reply } => {
                        let _ = reply.send(engine.start(mode));
                    }
                    EngineRequest::Stop { reply } => {
                        engine.stop();
                        let _ = reply.send(());
                    }
                    EngineRequest::Frame { reply } => {
                        let _ = reply.send(engine.next_frame());
                    }
                    EngineRequest::Capture { reply } => {
                        let _ = reply.send(engine.capture());
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

/// Decides which frames get the full detect and recognize pass.
///
/// Only every `skip`-th frame is processed; the others reuse the last
/// processed JPEG. Until something has been processed, every frame is.
#[derive(Debug)]
struct FrameGate {
    count: u64,
    skip: u64,
    last: Option<Vec<u8>>,
}

impl FrameGate {
    fn new(frame_skip: u32) -> Self {
        Self {
            count: 0,
            skip: u64::from(frame_skip.max(1)),
            last: None,
        }
    }

    /// Count one frame; `Some` holds the JPEG to send instead of processing it.
    fn reuse(&mut self) -> Option<Vec<u8>> {
        self.count += 1;
        if self.count % self.skip == 0 {
            return None;
        }
        self.last.clone()
    }

    fn remember(&mut self, jpeg: &[u8]) {
        self.last = Some(jpeg.to_vec());
    }

    fn reset(&mut self) {
        self.count = 0;
        self.last = None;
    }
}

struct Engine {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    settings: EngineSettings,
    shared: SharedState,
    runtime: tokio::runtime::Handle,
    camera: Option<Camera>,
    mode: CameraMode,
    gate: FrameGate,
}

impl Engine {
    fn start(&mut self, mode: CameraMode) -> Result<(), EngineError> {
        if self.camera.is_none() {
            let camera = Camera::open(&self.settings.camera_device, self.settings.capture)?;
            tracing::info!(
                device = %camera.device_path,
                width = camera.width,
                height = camera.height,
                fourcc = ?camera.fourcc,
                "camera opened"
            );
            self.camera = Some(camera);
        }
        if self.mode != mode {
            // a stale overlay from the other mode must not leak into this one
            self.gate.reset();
        }
        self.mode = mode;
        tracing::info!(?mode, "camera started");

        if mode == CameraMode::Attendance {
            self.refresh_cache();
        }
        Ok(())
    }

    fn stop(&mut self) {
        if self.camera.take().is_some() {
            tracing::info!("camera released");
        }
        self.gate.reset();
    }

    fn refresh_cache(&self) {
        let store = self.shared.store.as_ref();
        self.runtime
            .block_on(cache::refresh_if_stale(&self.shared.cache, store, Instant::now()));
    }

    fn read_frame(&mut self) -> Result<Frame, EngineError> {
        let camera = self.camera.as_mut().ok_or(EngineError::NotRunning)?;
        Ok(camera.capture_frame()?)
    }

    fn next_frame(&mut self) -> Option<Vec<u8>> {
        if self.camera.is_none() {
            return None;
        }
        let frame = match self.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "frame read failed");
                return None;
            }
        };

        if let Some(jpeg) = self.gate.reuse() {
            return Some(jpeg);
        }

        match self.render(frame) {
            Ok(jpeg) => {
                self.gate.remember(&jpeg);
                Some(jpeg)
            }
            Err(e) => {
                tracing::warn!(error = %e, "frame processing failed");
                None
            }
        }
    }

    /// Detect, optionally recognize, draw and encode one frame.
    fn render(&mut self, frame: Frame) -> Result<Vec<u8>, EngineError> {
        let faces = if frame.is_dark {
            tracing::trace!(sequence = frame.sequence, "dark frame; skipping detection");
            Vec::new()
        } else {
            self.detector.detect(&frame.luma, frame.width, frame.height)?
        };

        let mut annotations = Vec::with_capacity(faces.len());
        for face in faces {
            let status = match self.mode {
                CameraMode::Registration => None,
                CameraMode::Attendance => Some(self.recognize(&frame, &face)),
            };
            annotations.push(Annotation { face, status });
        }

        let Frame {
            rgb, width, height, ..
        } = frame;
        let image = overlay::annotate(rgb, width, height, &annotations)?;
        Ok(overlay::encode_jpeg(&image, self.settings.jpeg_quality)?)
    }

    fn recognize(&mut self, frame: &Frame, face: &rollcall_core::BoundingBox) -> RecognitionStatus {
        let embedding = match self
            .recognizer
            .extract(&frame.rgb, frame.width, frame.height, face)
        {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(error = %e, "embedding extraction failed");
                return RecognitionStatus::Unknown;
            }
        };

        self.refresh_cache();
        let result = {
            let cache = lock(&self.shared.cache);
            CosineMatcher.best_match(&embedding, cache.faces(), self.settings.similarity_threshold)
        };

        match (result.matched, result.student_id, result.name) {
            (true, Some(student_id), Some(name)) => {
                tracing::debug!(student_id = %student_id, similarity = result.similarity, "face recognized");
                lock(&self.shared.session).observe(&student_id, &name, Local::now())
            }
            _ => RecognitionStatus::Unknown,
        }
    }

    fn capture(&mut self) -> Result<Embedding, EngineError> {
        let frame = self.read_frame()?;
        let faces = self.detector.detect(&frame.luma, frame.width, frame.height)?;
        let face = faces.first().ok_or(EngineError::NoFaceDetected)?;
        tracing::info!(confidence = face.confidence, "capture: face selected");
        Ok(self
            .recognizer
            .extract(&frame.rgb, frame.width, frame.height, face)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_gate_processes_every_frame_without_skip() {
        let mut gate = FrameGate::new(1);
        for i in 0..5u8 {
            assert_eq!(gate.reuse(), None);
            gate.remember(&[i]);
        }
    }

    #[test]
    fn test_frame_gate_zero_skip_behaves_like_one() {
        let mut gate = FrameGate::new(0);
        gate.remember(&[1]);
        assert_eq!(gate.reuse(), None);
    }

    #[test]
    fn test_frame_gate_skip_two_alternates() {
        let mut gate = FrameGate::new(2);
        // nothing cached yet, so frame 1 is processed anyway
        assert_eq!(gate.reuse(), None);
        gate.remember(b"a");

        assert_eq!(gate.reuse(), None);
        gate.remember(b"b");
        assert_eq!(gate.reuse(), Some(b"b".to_vec()));
        assert_eq!(gate.reuse(), None);
        gate.remember(b"c");
        assert_eq!(gate.reuse(), Some(b"c".to_vec()));
    }

    #[test]
    fn test_frame_gate_reset_drops_cached_frame() {
        let mut gate = FrameGate::new(3);
        gate.reuse();
        gate.remember(b"registration");
        assert_eq!(gate.reuse(), Some(b"registration".to_vec()));

        gate.reset();
        assert_eq!(gate.reuse(), None);
        gate.remember(b"attendance");
        assert_eq!(gate.reuse(), Some(b"attendance".to_vec()));
        assert_eq!(gate.reuse(), None);
    }
}
