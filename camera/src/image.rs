//! Frame data and focus metrics

use crate::error::{CameraError, CameraResult};

/// Monochrome frame in row-major order
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFrame {
    width: usize,
    height: usize,
    pixels: Vec<f64>,
}

/// Direction along which neighbouring pixels are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharpnessAxis {
    /// Neighbours within a row
    X,
    /// Neighbours within a column; insensitive to column-wise bias banding
    Y,
    /// Mean of both directions
    Both,
}

impl ImageFrame {
    pub fn new(width: usize, height: usize, pixels: Vec<f64>) -> CameraResult<Self> {
        if pixels.len() != width * height {
            return Err(CameraError::HardwareError(format!(
                "Frame of {}x{} needs {} pixels, got {}",
                width,
                height,
                width * height,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> f64) -> Self {
        let mut pixels = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                pixels.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[f64] {
        &self.pixels
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f64 {
        self.pixels[y * self.width + x]
    }

    /// Centered square of side `size`, shrunk to fit the frame
    pub fn crop_centered(&self, size: usize) -> ImageFrame {
        let side = size.min(self.width).min(self.height);
        let x0 = (self.width - side) / 2;
        let y0 = (self.height - side) / 2;
        ImageFrame::from_fn(side, side, |x, y| self.get(x0 + x, y0 + y))
    }

    /// Vollath F4 autocorrelation focus measure
    ///
    /// Mean product of pixels one apart minus mean product of pixels two
    /// apart. Larger is sharper. Returns 0 for frames too small to measure.
    pub fn vollath_f4(&self, axis: SharpnessAxis) -> f64 {
        match axis {
            SharpnessAxis::X => self.f4_along(1, 0),
            SharpnessAxis::Y => self.f4_along(0, 1),
            SharpnessAxis::Both => (self.f4_along(1, 0) + self.f4_along(0, 1)) / 2.0,
        }
    }

    fn f4_along(&self, dx: usize, dy: usize) -> f64 {
        let lag_mean = |lag: usize| -> Option<f64> {
            let (sx, sy) = (dx * lag, dy * lag);
            if sx >= self.width || sy >= self.height {
                return None;
            }
            let mut sum = 0.0;
            let mut count = 0usize;
            for y in 0..self.height - sy {
                for x in 0..self.width - sx {
                    sum += self.get(x, y) * self.get(x + sx, y + sy);
                    count += 1;
                }
            }
            Some(sum / count as f64)
        };

        match (lag_mean(1), lag_mean(2)) {
            (Some(a1), Some(a2)) => a1 - a2,
            _ => 0.0,
        }
    }
}
