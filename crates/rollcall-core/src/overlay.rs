//! Live-view annotation: face boxes with corner brackets, and JPEG encoding.

use crate::types::{BoundingBox, RecognitionStatus};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, Rgb, RgbImage};
use thiserror::Error;

const BOX_THICKNESS: u32 = 2;
const CORNER_THICKNESS: u32 = 3;
const CORNER_LENGTH: u32 = 20;

pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const GOLD: Rgb<u8> = Rgb([255, 215, 0]);
pub const CYAN: Rgb<u8> = Rgb([0, 255, 255]);

#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("RGB buffer is {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },
    #[error("jpeg encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// A face to draw. `status` is `None` outside attendance mode.
#[derive(Debug, Clone)]
pub struct Annotation {
    pub face: BoundingBox,
    pub status: Option<RecognitionStatus>,
}

impl Annotation {
    pub fn color(&self) -> Rgb<u8> {
        match self.status {
            None | Some(RecognitionStatus::New) => GREEN,
            Some(RecognitionStatus::AlreadyMarked) => GOLD,
            Some(RecognitionStatus::Unknown) => CYAN,
        }
    }
}

/// Draw every annotation onto a packed RGB8 frame.
pub fn annotate(
    rgb: Vec<u8>,
    width: u32,
    height: u32,
    annotations: &[Annotation],
) -> Result<RgbImage, OverlayError> {
    let expected = width as usize * height as usize * 3;
    let actual = rgb.len();
    let mut image =
        RgbImage::from_raw(width, height, rgb).ok_or(OverlayError::BufferSize { expected, actual })?;

    for annotation in annotations {
        if let Some(rect) = annotation.face.pixel_rect(width, height) {
            draw_face_box(&mut image, rect, annotation.color());
        }
    }
    Ok(image)
}

/// Encode an RGB image as baseline JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, OverlayError> {
    let mut out = Vec::with_capacity(image.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode(
        image.as_raw(),
        image.width(),
        image.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(out)
}

/// Rectangle outline plus heavier brackets on each corner.
fn draw_face_box(image: &mut RgbImage, (x0, y0, x1, y1): (u32, u32, u32, u32), color: Rgb<u8>) {
    fill(image, x0, y0, x1, y0 + BOX_THICKNESS - 1, color);
    fill(image, x0, y1.saturating_sub(BOX_THICKNESS - 1), x1, y1, color);
    fill(image, x0, y0, x0 + BOX_THICKNESS - 1, y1, color);
    fill(image, x1.saturating_sub(BOX_THICKNESS - 1), y0, x1, y1, color);

    let len = CORNER_LENGTH.min(x1 - x0).min(y1 - y0);
    let t = CORNER_THICKNESS - 1;
    // top-left, top-right, bottom-left, bottom-right
    fill(image, x0, y0, x0 + len, y0 + t, color);
    fill(image, x0, y0, x0 + t, y0 + len, color);
    fill(image, x1.saturating_sub(len), y0, x1, y0 + t, color);
    fill(image, x1.saturating_sub(t), y0, x1, y0 + len, color);
    fill(image, x0, y1.saturating_sub(t), x0 + len, y1, color);
    fill(image, x0, y1.saturating_sub(len), x0 + t, y1, color);
    fill(image, x1.saturating_sub(len), y1.saturating_sub(t), x1, y1, color);
    fill(image, x1.saturating_sub(t), y1.saturating_sub(len), x1, y1, color);
}

/// Fill the inclusive rectangle, clipped to the image.
fn fill(image: &mut RgbImage, x0: u32, y0: u32, x1: u32, y1: u32, color: Rgb<u8>) {
    let x1 = x1.min(image.width().saturating_sub(1));
    let y1 = y1.min(image.height().saturating_sub(1));
    for y in y0..=y1 {
        for x in x0..=x1 {
            image.put_pixel(x, y, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: 0.9,
            landmarks: None,
        }
    }

    #[test]
    fn test_colors_follow_status() {
        let mut a = Annotation {
            face: face(0.0, 0.0, 1.0, 1.0),
            status: None,
        };
        assert_eq!(a.color(), GREEN);
        a.status = Some(RecognitionStatus::New);
        assert_eq!(a.color(), GREEN);
        a.status = Some(RecognitionStatus::AlreadyMarked);
        assert_eq!(a.color(), GOLD);
        a.status = Some(RecognitionStatus::Unknown);
        assert_eq!(a.color(), CYAN);
    }

    #[test]
    fn test_annotate_draws_outline_not_interior() {
        let (w, h) = (100u32, 80u32);
        let annotations = [Annotation {
            face: face(10.0, 10.0, 60.0, 50.0),
            status: Some(RecognitionStatus::AlreadyMarked),
        }];
        let image = annotate(vec![0; (w * h * 3) as usize], w, h, &annotations).unwrap();

        assert_eq!(*image.get_pixel(10, 10), GOLD);
        assert_eq!(*image.get_pixel(70, 60), GOLD);
        assert_eq!(*image.get_pixel(40, 11), GOLD);
        assert_eq!(*image.get_pixel(40, 35), Rgb([0, 0, 0]));
        assert_eq!(*image.get_pixel(5, 5), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_annotate_clips_partial_box() {
        let (w, h) = (40u32, 30u32);
        let annotations = [Annotation {
            face: face(-20.0, 20.0, 100.0, 100.0),
            status: None,
        }];
        let image = annotate(vec![0; (w * h * 3) as usize], w, h, &annotations).unwrap();
        assert_eq!(*image.get_pixel(0, 29), GREEN);
        assert_eq!(*image.get_pixel(39, 20), GREEN);
    }

    #[test]
    fn test_annotate_rejects_short_buffer() {
        let err = annotate(vec![0; 10], 4, 4, &[]).unwrap_err();
        assert!(matches!(err, OverlayError::BufferSize { expected: 48, actual: 10 }));
    }

    #[test]
    fn test_encode_jpeg_has_soi_and_eoi() {
        let image = RgbImage::from_pixel(16, 16, Rgb([120, 30, 200]));
        let jpeg = encode_jpeg(&image, 85).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    }
}
