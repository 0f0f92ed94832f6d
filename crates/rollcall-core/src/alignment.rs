//! Face alignment to the canonical ArcFace crop.
//!
//! A 4-DOF similarity transform (scale, rotation, translation) is fitted by
//! least squares from the five detected landmarks to the InsightFace
//! reference positions, then the frame is warped into a 112×112 crop.
//! Frames are interleaved 8-bit pixels with any number of channels.

/// Side length of the aligned crop.
pub const ALIGNED_SIZE: usize = 112;

/// Reference landmarks for a 112×112 crop:
/// left eye, right eye, nose, left mouth corner, right mouth corner.
const REFERENCE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// Maps `(x, y)` to `(a·x − b·y + tx, b·x + a·y + ty)`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct SimilarityTransform {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl SimilarityTransform {
    const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        tx: 0.0,
        ty: 0.0,
    };

    /// Least-squares fit of the transform taking `src` onto `dst`.
    ///
    /// Each point pair contributes two rows to the normal equations
    /// `AᵀA · [a, b, tx, ty]ᵀ = Aᵀd`. A degenerate system yields the identity.
    fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        let mut ata = [[0.0f32; 4]; 4];
        let mut atd = [0.0f32; 4];

        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            for (row, rhs) in [([sx, -sy, 1.0, 0.0], dx), ([sy, sx, 0.0, 1.0], dy)] {
                for j in 0..4 {
                    for k in 0..4 {
                        ata[j][k] += row[j] * row[k];
                    }
                    atd[j] += row[j] * rhs;
                }
            }
        }

        match solve4(ata, atd) {
            Some([a, b, tx, ty]) => Self { a, b, tx, ty },
            None => Self::IDENTITY,
        }
    }

    fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Inverse transform, or `None` when the scale is zero.
    fn inverse(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let a = self.a / det;
        let b = -self.b / det;
        // The inverse of x ↦ Mx + t is x ↦ M⁻¹x − M⁻¹t.
        let (tx, ty) = Self {
            a,
            b,
            tx: 0.0,
            ty: 0.0,
        }
        .apply(-self.tx, -self.ty);
        Some(Self { a, b, tx, ty })
    }
}

/// Solve a 4×4 system by Gaussian elimination with partial pivoting.
fn solve4(mut m: [[f32; 4]; 4], mut rhs: [f32; 4]) -> Option<[f32; 4]> {
    for col in 0..4 {
        let pivot_row = (col..4).max_by(|&i, &j| m[i][col].abs().total_cmp(&m[j][col].abs()))?;
        m.swap(col, pivot_row);
        rhs.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return None;
        }
        for row in col + 1..4 {
            let factor = m[row][col] / pivot;
            for k in col..4 {
                m[row][k] -= factor * m[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        let tail: f32 = (i + 1..4).map(|j| m[i][j] * x[j]).sum();
        x[i] = (rhs[i] - tail) / m[i][i];
    }
    Some(x)
}

/// Pixel layout of an interleaved 8-bit frame.
#[derive(Debug, Clone, Copy)]
struct Layout {
    width: usize,
    height: usize,
    channels: usize,
}

/// Bilinear sample of channel `c`; outside pixels read as black.
fn sample(frame: &[u8], layout: Layout, c: usize, x: f32, y: f32) -> f32 {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;

    let at = |px: f32, py: f32| -> f32 {
        if px < 0.0 || py < 0.0 || px >= layout.width as f32 || py >= layout.height as f32 {
            return 0.0;
        }
        let idx = (py as usize * layout.width + px as usize) * layout.channels + c;
        frame.get(idx).copied().unwrap_or(0) as f32
    };

    at(x0, y0) * (1.0 - fx) * (1.0 - fy)
        + at(x0 + 1.0, y0) * fx * (1.0 - fy)
        + at(x0, y0 + 1.0) * (1.0 - fx) * fy
        + at(x0 + 1.0, y0 + 1.0) * fx * fy
}

/// Align a detected face into a 112×112 crop with the frame's `channels`
/// interleaved, for embedding extraction.
pub fn align_face(
    frame: &[u8],
    width: u32,
    height: u32,
    channels: usize,
    landmarks: &[(f32, f32); 5],
) -> Vec<u8> {
    let mut crop = vec![0u8; ALIGNED_SIZE * ALIGNED_SIZE * channels];
    let Some(to_frame) = SimilarityTransform::estimate(landmarks, &REFERENCE_LANDMARKS).inverse()
    else {
        return crop;
    };
    let layout = Layout {
        width: width as usize,
        height: height as usize,
        channels,
    };

    for oy in 0..ALIGNED_SIZE {
        for ox in 0..ALIGNED_SIZE {
            let (sx, sy) = to_frame.apply(ox as f32, oy as f32);
            let base = (oy * ALIGNED_SIZE + ox) * channels;
            for c in 0..channels {
                let value = sample(frame, layout, c, sx, sy);
                crop[base + c] = value.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    crop
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32, tol: f32) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn test_estimate_identity() {
        let t = SimilarityTransform::estimate(&REFERENCE_LANDMARKS, &REFERENCE_LANDMARKS);
        assert!(close(t.a, 1.0, 1e-3), "a = {}", t.a);
        assert!(close(t.b, 0.0, 1e-3), "b = {}", t.b);
        assert!(close(t.tx, 0.0, 1e-2), "tx = {}", t.tx);
        assert!(close(t.ty, 0.0, 1e-2), "ty = {}", t.ty);
    }

    #[test]
    fn test_estimate_half_scale() {
        let src = REFERENCE_LANDMARKS.map(|(x, y)| (x * 2.0, y * 2.0));
        let t = SimilarityTransform::estimate(&src, &REFERENCE_LANDMARKS);
        assert!(close(t.a, 0.5, 1e-2), "a = {}", t.a);
        assert!(close(t.b, 0.0, 1e-2), "b = {}", t.b);
    }

    #[test]
    fn test_inverse_round_trips_a_point() {
        let t = SimilarityTransform {
            a: 0.8,
            b: 0.3,
            tx: 12.0,
            ty: -4.0,
        };
        let inv = t.inverse().expect("invertible");
        let (x, y) = t.apply(40.0, 25.0);
        let (bx, by) = inv.apply(x, y);
        assert!(close(bx, 40.0, 1e-3) && close(by, 25.0, 1e-3), "({bx}, {by})");
    }

    #[test]
    fn test_zero_scale_has_no_inverse() {
        let t = SimilarityTransform {
            a: 0.0,
            b: 0.0,
            tx: 1.0,
            ty: 1.0,
        };
        assert!(t.inverse().is_none());
    }

    #[test]
    fn test_align_face_output_size() {
        let frame = vec![128u8; 640 * 480];
        let aligned = align_face(&frame, 640, 480, 1, &REFERENCE_LANDMARKS);
        assert_eq!(aligned.len(), ALIGNED_SIZE * ALIGNED_SIZE);

        let rgb = vec![128u8; 640 * 480 * 3];
        let aligned = align_face(&rgb, 640, 480, 3, &REFERENCE_LANDMARKS);
        assert_eq!(aligned.len(), ALIGNED_SIZE * ALIGNED_SIZE * 3);
    }

    #[test]
    fn test_align_face_moves_eye_to_reference() {
        let (w, h) = (200usize, 200usize);
        let mut frame = vec![0u8; w * h];
        let landmarks: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];

        // bright 5x5 patch centred on the left eye
        for y in 58..63 {
            for x in 78..83 {
                frame[y * w + x] = 255;
            }
        }

        let aligned = align_face(&frame, w as u32, h as u32, 1, &landmarks);
        let (rx, ry) = (
            REFERENCE_LANDMARKS[0].0.round() as usize,
            REFERENCE_LANDMARKS[0].1.round() as usize,
        );
        let brightest = (ry - 1..=ry + 1)
            .flat_map(|y| (rx - 1..=rx + 1).map(move |x| (x, y)))
            .map(|(x, y)| aligned[y * ALIGNED_SIZE + x])
            .max()
            .unwrap_or(0);
        assert!(brightest > 100, "left eye not near reference: max {brightest}");
    }

    #[test]
    fn test_align_face_keeps_channels_apart() {
        let (w, h) = (200usize, 200usize);
        let frame: Vec<u8> = (0..w * h).flat_map(|_| [200u8, 100, 0]).collect();
        let landmarks = REFERENCE_LANDMARKS.map(|(x, y)| (x + 40.0, y + 40.0));

        let aligned = align_face(&frame, w as u32, h as u32, 3, &landmarks);
        let centre = (56 * ALIGNED_SIZE + 56) * 3;
        assert_eq!(&aligned[centre..centre + 3], &[200, 100, 0]);
    }
}
