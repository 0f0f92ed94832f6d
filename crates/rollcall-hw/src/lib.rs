//! rollcall-hw — Webcam capture for the attendance camera.
//!
//! Provides V4L2 streaming capture and conversion of raw buffers into
//! luma (for the models) and RGB (for the live view).

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CaptureSettings, DeviceInfo, PixelFormat};
pub use frame::Frame;
