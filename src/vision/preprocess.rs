//! Image preprocessing filters for OCR
//!
//! Three fixed filter programs that make storefront signage easier to read.
//! Each mode is an ordered list of [`FilterOp`]s with fixed parameters; none
//! of them is tunable from outside.

use image::RgbaImage;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

/// Preprocessing program applied before an enhanced recognition pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreprocessMode {
    /// Low-contrast, neon and night-time signage
    Aggressive,
    /// Script and cursive fonts, where hard sharpening breaks letterforms
    Gentle,
    /// Colored lettering on neutral backgrounds
    ColorBoost,
}

impl PreprocessMode {
    pub const ALL: [PreprocessMode; 3] = [
        PreprocessMode::Aggressive,
        PreprocessMode::Gentle,
        PreprocessMode::ColorBoost,
    ];

    /// The ordered filter program for this mode
    pub fn program(self) -> &'static [FilterOp] {
        match self {
            PreprocessMode::Aggressive => &[
                FilterOp::ColorControls { contrast: 1.5, brightness: 1.2, saturation: 1.0 },
                FilterOp::SharpenLuminance { amount: 0.7 },
                FilterOp::NoiseReduction { level: 0.02 },
            ],
            PreprocessMode::Gentle => &[
                FilterOp::ColorControls { contrast: 1.15, brightness: 1.05, saturation: 0.8 },
                FilterOp::UnsharpMask { intensity: 0.3, radius: 2.5 },
            ],
            PreprocessMode::ColorBoost => &[
                FilterOp::ColorControls { contrast: 1.3, brightness: 1.1, saturation: 1.4 },
                FilterOp::Vibrance { amount: 0.5 },
                FilterOp::SharpenLuminance { amount: 0.4 },
            ],
        }
    }
}

/// A single filter stage
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterOp {
    /// Saturation, then brightness (multiplier), then contrast around mid-gray
    ColorControls { contrast: f32, brightness: f32, saturation: f32 },
    /// 3x3 sharpen applied to luminance only
    SharpenLuminance { amount: f32 },
    /// Edge-preserving 3x3 smoothing; neighbors further than `level` (0-1) are ignored
    NoiseReduction { level: f32 },
    /// Gaussian unsharp mask
    UnsharpMask { intensity: f32, radius: f32 },
    /// Saturation boost weighted towards weakly saturated pixels
    Vibrance { amount: f32 },
}

impl FilterOp {
    fn name(&self) -> &'static str {
        match self {
            FilterOp::ColorControls { .. } => "color_controls",
            FilterOp::SharpenLuminance { .. } => "sharpen_luminance",
            FilterOp::NoiseReduction { .. } => "noise_reduction",
            FilterOp::UnsharpMask { .. } => "unsharp_mask",
            FilterOp::Vibrance { .. } => "vibrance",
        }
    }

    fn apply(&self, image: RgbaImage) -> PipelineResult<RgbaImage> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(PipelineError::PreprocessingFailed { stage: self.name() });
        }

        match *self {
            FilterOp::ColorControls { contrast, brightness, saturation } => {
                let mut image = image;
                apply_color_controls(&mut image, contrast, brightness, saturation);
                Ok(image)
            }
            FilterOp::SharpenLuminance { amount } => Ok(apply_sharpen_luminance(&image, amount)),
            FilterOp::NoiseReduction { level } => Ok(apply_noise_reduction(&image, level)),
            FilterOp::UnsharpMask { intensity, radius } => {
                if radius <= 0.0 {
                    return Err(PipelineError::PreprocessingFailed { stage: self.name() });
                }
                Ok(apply_unsharp_mask(&image, intensity, radius))
            }
            FilterOp::Vibrance { amount } => {
                let mut image = image;
                apply_vibrance(&mut image, amount);
                Ok(image)
            }
        }
    }
}

/// Run the filter program for `mode` over `image`.
///
/// Returns `None` when any stage cannot produce output; callers skip the pass.
pub fn preprocess(image: &RgbaImage, mode: PreprocessMode) -> Option<RgbaImage> {
    match run_program(image, mode.program()) {
        Ok(processed) => Some(processed),
        Err(e) => {
            debug!("Preprocessing {:?} produced no output: {}", mode, e);
            None
        }
    }
}

fn run_program(image: &RgbaImage, program: &[FilterOp]) -> PipelineResult<RgbaImage> {
    program
        .iter()
        .try_fold(image.clone(), |current, op| op.apply(current))
}

#[inline]
fn luminance(r: f32, g: f32, b: f32) -> f32 {
    0.299 * r + 0.587 * g + 0.114 * b
}

fn apply_color_controls(image: &mut RgbaImage, contrast: f32, brightness: f32, saturation: f32) {
    for pixel in image.pixels_mut() {
        let [r, g, b, _] = pixel.0;
        let (r, g, b) = (r as f32, g as f32, b as f32);
        let lum = luminance(r, g, b);

        for (i, value) in [r, g, b].into_iter().enumerate() {
            let saturated = lum + (value - lum) * saturation;
            let brightened = saturated * brightness;
            // Contrast around midpoint (128)
            let adjusted = (brightened - 128.0) * contrast + 128.0;
            pixel.0[i] = adjusted.round().clamp(0.0, 255.0) as u8;
        }
        // Alpha channel unchanged
    }
}

/// Sharpen luminance with a 3x3 kernel and add the luminance delta to each channel.
/// Center weight is 1 + 4*amount, neighbors are -amount. Border pixels are left as is.
fn apply_sharpen_luminance(image: &RgbaImage, amount: f32) -> RgbaImage {
    let (width, height) = image.dimensions();
    let mut result = image.clone();
    if width < 3 || height < 3 {
        return result;
    }

    let w = width as usize;
    let luma: Vec<f32> = image
        .pixels()
        .map(|p| luminance(p.0[0] as f32, p.0[1] as f32, p.0[2] as f32))
        .collect();

    let center_weight = 1.0 + 4.0 * amount;
    for y in 1..(height as usize - 1) {
        for x in 1..(w - 1) {
            let idx = y * w + x;
            let sharpened = luma[idx] * center_weight
                - amount * (luma[idx - w] + luma[idx + w] + luma[idx - 1] + luma[idx + 1]);
            let delta = sharpened - luma[idx];

            let pixel = result.get_pixel_mut(x as u32, y as u32);
            for c in 0..3 {
                pixel.0[c] = (pixel.0[c] as f32 + delta).round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    result
}

fn apply_noise_reduction(image: &RgbaImage, level: f32) -> RgbaImage {
    let (width, height) = image.dimensions();
    let mut result = image.clone();
    if width < 3 || height < 3 {
        return result;
    }

    let threshold = level * 255.0;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let center = image.get_pixel(x, y).0;
            let mut out = center;
            for c in 0..3 {
                let center_value = center[c] as f32;
                let mut sum = 0.0;
                let mut count = 0.0;
                for ny in y - 1..=y + 1 {
                    for nx in x - 1..=x + 1 {
                        let value = image.get_pixel(nx, ny).0[c] as f32;
                        if (value - center_value).abs() <= threshold {
                            sum += value;
                            count += 1.0;
                        }
                    }
                }
                // The center always qualifies, so count >= 1
                out[c] = (sum / count).round().clamp(0.0, 255.0) as u8;
            }
            result.put_pixel(x, y, image::Rgba(out));
        }
    }

    result
}

fn apply_unsharp_mask(image: &RgbaImage, intensity: f32, radius: f32) -> RgbaImage {
    let blurred = imageproc::filter::gaussian_blur_f32(image, radius);
    let mut result = image.clone();

    for (pixel, soft) in result.pixels_mut().zip(blurred.pixels()) {
        for c in 0..3 {
            let value = pixel.0[c] as f32;
            let detail = value - soft.0[c] as f32;
            pixel.0[c] = (value + intensity * detail).round().clamp(0.0, 255.0) as u8;
        }
    }

    result
}

fn apply_vibrance(image: &mut RgbaImage, amount: f32) {
    for pixel in image.pixels_mut() {
        let [r, g, b, _] = pixel.0;
        let max = r.max(g).max(b) as f32;
        let min = r.min(g).min(b) as f32;
        let current_saturation = if max > 0.0 { (max - min) / max } else { 0.0 };
        let factor = 1.0 + amount * (1.0 - current_saturation);

        let (r, g, b) = (r as f32, g as f32, b as f32);
        let lum = luminance(r, g, b);
        for (i, value) in [r, g, b].into_iter().enumerate() {
            pixel.0[i] = (lum + (value - lum) * factor).round().clamp(0.0, 255.0) as u8;
        }
    }
}
