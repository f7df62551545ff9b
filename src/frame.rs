//! Calibration frame: pixel values, bad-pixel mask and detector coordinate grid.
//!
//! Frames arrive already bias/dark subtracted from the frame-preparation stage.
//! Pixel `(col, row)` is stored row-major at `row * width + col`; its centre
//! sits at detector coordinate
//!
//! ```text
//! x = origin_x + step_x · col
//! y = origin_y + step_y · row
//! ```
//!
//! which is the identity for the default [`PixelGrid`].

use anyhow::Result;
#[cfg(feature = "image")]
use anyhow::Context;

/// Axis-aligned affine map between pixel indices and detector coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelGrid {
    pub origin_x: f64,
    pub origin_y: f64,
    pub step_x: f64,
    pub step_y: f64,
}

impl Default for PixelGrid {
    fn default() -> Self {
        Self {
            origin_x: 0.0,
            origin_y: 0.0,
            step_x: 1.0,
            step_y: 1.0,
        }
    }
}

impl PixelGrid {
    /// Detector coordinate of a (fractional) pixel index.
    pub fn to_detector(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.origin_x + self.step_x * col,
            self.origin_y + self.step_y * row,
        )
    }

    /// Fractional pixel index of a detector coordinate.
    pub fn to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        ((x - self.origin_x) / self.step_x, (y - self.origin_y) / self.step_y)
    }
}

/// A read-only calibration frame.
#[derive(Debug, Clone)]
pub struct CalibrationFrame {
    width: u32,
    height: u32,
    data: Vec<f32>,
    /// `true` marks a bad pixel.
    mask: Vec<bool>,
    grid: PixelGrid,
}

impl CalibrationFrame {
    /// Wrap a row-major pixel buffer. A missing mask means every pixel is good.
    pub fn from_raw(width: u32, height: u32, data: Vec<f32>, mask: Option<Vec<bool>>) -> Result<Self> {
        let n = width as usize * height as usize;
        anyhow::ensure!(width > 0 && height > 0, "frame must not be empty");
        anyhow::ensure!(
            data.len() == n,
            "pixel buffer has {} values, expected {}x{} = {}",
            data.len(),
            width,
            height,
            n
        );
        let mask = match mask {
            Some(m) => {
                anyhow::ensure!(
                    m.len() == n,
                    "bad-pixel mask has {} values, expected {}",
                    m.len(),
                    n
                );
                m
            }
            None => vec![false; n],
        };
        Ok(Self {
            width,
            height,
            data,
            mask,
            grid: PixelGrid::default(),
        })
    }

    /// Replace the detector coordinate grid.
    pub fn with_grid(mut self, grid: PixelGrid) -> Result<Self> {
        anyhow::ensure!(
            grid.step_x.is_finite()
                && grid.step_y.is_finite()
                && grid.step_x != 0.0
                && grid.step_y != 0.0,
            "pixel grid steps must be finite and non-zero"
        );
        self.grid = grid;
        Ok(self)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn grid(&self) -> &PixelGrid {
        &self.grid
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Number of pixels flagged bad.
    pub fn bad_pixel_count(&self) -> usize {
        self.mask.iter().filter(|&&b| b).count()
    }

    /// Value of a good pixel, or `None` for masked, non-finite or
    /// out-of-frame pixels.
    pub fn value(&self, col: i64, row: i64) -> Option<f32> {
        if col < 0 || row < 0 || col >= self.width as i64 || row >= self.height as i64 {
            return None;
        }
        let idx = row as usize * self.width as usize + col as usize;
        let v = self.data[idx];
        (!self.mask[idx] && v.is_finite()).then_some(v)
    }
}

#[cfg(feature = "image")]
impl CalibrationFrame {
    /// Load a frame from an image file (PNG, TIFF, ...), converted to grayscale.
    pub fn open<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let img = image::open(path)
            .with_context(|| format!("Failed to open calibration frame: {}", path.display()))?;
        Self::from_image(&img)
    }

    /// Build a frame from a decoded image. All pixels are considered good.
    pub fn from_image(img: &image::DynamicImage) -> Result<Self> {
        use image::GenericImageView;
        let (width, height) = img.dimensions();
        Self::from_raw(width, height, to_grayscale_f32(img), None)
    }
}

/// Grayscale `f32` pixels, keeping the full range of 16-bit and float images.
#[cfg(feature = "image")]
fn to_grayscale_f32(img: &image::DynamicImage) -> Vec<f32> {
    use image::DynamicImage;
    let luma = |r: f32, g: f32, b: f32| 0.2126 * r + 0.7152 * g + 0.0722 * b;
    match img {
        DynamicImage::ImageLuma16(g) => g.as_raw().iter().map(|&v| v as f32).collect(),
        DynamicImage::ImageLumaA16(g) => g.pixels().map(|p| p.0[0] as f32).collect(),
        DynamicImage::ImageRgb16(rgb) => rgb
            .pixels()
            .map(|p| luma(p.0[0] as f32, p.0[1] as f32, p.0[2] as f32))
            .collect(),
        DynamicImage::ImageRgba16(rgba) => rgba
            .pixels()
            .map(|p| luma(p.0[0] as f32, p.0[1] as f32, p.0[2] as f32))
            .collect(),
        DynamicImage::ImageRgb32F(rgb) => rgb.pixels().map(|p| luma(p.0[0], p.0[1], p.0[2])).collect(),
        DynamicImage::ImageRgba32F(rgba) => {
            rgba.pixels().map(|p| luma(p.0[0], p.0[1], p.0[2])).collect()
        }
        _ => img.to_luma8().as_raw().iter().map(|&v| v as f32).collect(),
    }
}
