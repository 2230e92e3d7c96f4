//! Brightness analysis for illuminated signage
//!
//! Downsamples the photo into a coarse luminance grid so lit and neon signs
//! can be favored during scoring.

use image::RgbaImage;

use crate::vision::NormalizedRect;

/// Pixel stride of the grid in both axes
pub const SAMPLE_STRIDE: u32 = 20;

/// Score returned when there is no grid to sample
const NEUTRAL_BRIGHTNESS: f32 = 0.5;

/// Row-major luminance samples in [0, 1]; every row has the same length
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrightnessGrid {
    rows: Vec<Vec<f32>>,
}

impl BrightnessGrid {
    /// Sample perceived luminance on every [`SAMPLE_STRIDE`]th pixel
    pub fn analyze(image: &RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        let rows = (0..height)
            .step_by(SAMPLE_STRIDE as usize)
            .map(|y| {
                (0..width)
                    .step_by(SAMPLE_STRIDE as usize)
                    .map(|x| {
                        let [r, g, b, _] = image.get_pixel(x, y).0;
                        (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32) / 255.0
                    })
                    .collect::<Vec<f32>>()
            })
            .filter(|row| !row.is_empty())
            .collect();

        Self { rows }
    }

    /// Build a grid from precomputed rows. Returns `None` if rows differ in length.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Option<Self> {
        let width = rows.first().map(Vec::len)?;
        if rows.iter().any(|row| row.len() != width) {
            return None;
        }
        Some(Self { rows })
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.rows[0].is_empty()
    }

    /// (columns, rows)
    pub fn dimensions(&self) -> (usize, usize) {
        (self.rows.first().map_or(0, Vec::len), self.rows.len())
    }

    /// Mean of all samples, 0.0 for an empty grid
    pub fn average(&self) -> f32 {
        let (sum, count) = self
            .rows
            .iter()
            .flatten()
            .fold((0.0f32, 0usize), |(sum, count), v| (sum + v, count + 1));
        if count == 0 {
            0.0
        } else {
            sum / count as f32
        }
    }

    /// Average the 3x3 neighborhood around the center of `bounding_box`.
    ///
    /// Detection boxes are bottom-left-origin, the grid is top-left-origin, so
    /// the vertical axis is flipped. Centers outside [0, 1] are pulled back to
    /// the edge and neighbor indices are clamped to the grid.
    pub fn sample_at(&self, bounding_box: &NormalizedRect) -> f32 {
        if self.is_empty() {
            return NEUTRAL_BRIGHTNESS;
        }

        let (cols, rows) = self.dimensions();
        let mid_x = bounding_box.mid_x().clamp(0.0, 1.0);
        let mid_y = bounding_box.mid_y().clamp(0.0, 1.0);
        let center_x = (mid_x * cols as f32) as i64;
        let center_y = ((1.0 - mid_y) * rows as f32) as i64;

        let mut sum = 0.0;
        for dy in -1..=1 {
            for dx in -1..=1 {
                let y = (center_y + dy).clamp(0, rows as i64 - 1) as usize;
                let x = (center_x + dx).clamp(0, cols as i64 - 1) as usize;
                sum += self.rows[y][x];
            }
        }
        sum / 9.0
    }
}
