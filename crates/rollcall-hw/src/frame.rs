//! Frame type and pixel conversion: YUYV and GREY to luma + RGB, dark detection.

/// Fraction of near-black pixels above which a frame counts as dark.
pub const DARK_FRAME_RATIO: f32 = 0.95;

/// A captured camera frame in both the form the models want (luma) and the
/// form the live view wants (RGB).
#[derive(Clone)]
pub struct Frame {
    /// 8-bit luma, `width * height` bytes.
    pub luma: Vec<u8>,
    /// Packed RGB8, `width * height * 3` bytes.
    pub rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    /// Build a frame from packed YUYV 4:2:2.
    pub fn from_yuyv(
        yuyv: &[u8],
        width: u32,
        height: u32,
        sequence: u32,
    ) -> Result<Self, FrameError> {
        let (luma, rgb) = yuyv_split(yuyv, width, height)?;
        Ok(Self::assemble(luma, rgb, width, height, sequence))
    }

    /// Build a frame from 8-bit greyscale.
    pub fn from_grey(grey: &[u8], width: u32, height: u32, sequence: u32) -> Result<Self, FrameError> {
        let pixels = width as usize * height as usize;
        if grey.len() < pixels {
            return Err(FrameError::InvalidLength {
                expected: pixels,
                actual: grey.len(),
            });
        }
        let luma = grey[..pixels].to_vec();
        let rgb = luma.iter().flat_map(|&y| [y, y, y]).collect();
        Ok(Self::assemble(luma, rgb, width, height, sequence))
    }

    fn assemble(luma: Vec<u8>, rgb: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        let is_dark = is_dark_frame(&luma, DARK_FRAME_RATIO);
        Self {
            luma,
            rgb,
            width,
            height,
            sequence,
            is_dark,
        }
    }

    /// Average luma (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.luma.is_empty() {
            return 0.0;
        }
        self.luma.iter().map(|&b| b as f32).sum::<f32>() / self.luma.len() as f32
    }
}

/// Split packed YUYV into a luma plane and BT.601 RGB.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
fn yuyv_split(yuyv: &[u8], width: u32, height: u32) -> Result<(Vec<u8>, Vec<u8>), FrameError> {
    let pixels = width as usize * height as usize;
    let expected = pixels * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut luma = Vec::with_capacity(pixels);
    let mut rgb = Vec::with_capacity(pixels * 3);

    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        for y in [y0, y1] {
            luma.push(y);
            rgb.extend_from_slice(&yuv_to_rgb(y, u, v));
        }
    }

    Ok((luma, rgb))
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as f32 - 16.0;
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    let clamp = |x: f32| x.round().clamp(0.0, 255.0) as u8;
    [
        clamp(1.164 * c + 1.596 * e),
        clamp(1.164 * c - 0.392 * d - 0.813 * e),
        clamp(1.164 * c + 2.017 * d),
    ]
}

/// True if more than `threshold_pct` of pixels are below 32.
pub fn is_dark_frame(luma: &[u8], threshold_pct: f32) -> bool {
    if luma.is_empty() {
        return true;
    }
    let dark = luma.iter().filter(|&&p| p < 32).count();
    (dark as f32 / luma.len() as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
