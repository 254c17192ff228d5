use image::{imageops, RgbImage};
use serde::Serialize;

/// Every Nth pixel is sampled for the brightness estimate.
const SAMPLE_STRIDE: usize = 4;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum LightingQuality {
    TooDark,
    Adequate,
    TooBright,
}

/// Average perceptual brightness (0.299R + 0.587G + 0.114B) scaled to 0-100.
pub fn lighting_score(image: &RgbImage) -> f32 {
    let mut total = 0.0f64;
    let mut samples = 0u64;

    for pixel in image.pixels().step_by(SAMPLE_STRIDE) {
        let [r, g, b] = pixel.0;
        total += 0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b);
        samples += 1;
    }

    if samples == 0 {
        return 0.0;
    }
    ((total / samples as f64) / 255.0 * 100.0) as f32
}

pub fn classify_lighting(score: f32, low_light: f32, high_light: f32) -> LightingQuality {
    if score < low_light {
        LightingQuality::TooDark
    } else if score > high_light {
        LightingQuality::TooBright
    } else {
        LightingQuality::Adequate
    }
}

/// Brightness and contrast adjustment for a dark frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Enhancement {
    pub brighten: i32,
    pub contrast: f32,
}

/// The darker the frame relative to `low_light`, the stronger the correction.
pub fn enhancement_for(score: f32, low_light: f32) -> Enhancement {
    let darkness = if low_light <= 0.0 {
        0.0
    } else {
        ((low_light - score) / low_light).clamp(0.0, 1.0)
    };

    Enhancement {
        brighten: (20.0 + darkness * 60.0).round() as i32,
        contrast: 10.0 + darkness * 30.0,
    }
}

pub fn enhance(image: &RgbImage, enhancement: Enhancement) -> RgbImage {
    let brightened = imageops::brighten(image, enhancement.brighten);
    imageops::contrast(&brightened, enhancement.contrast)
}
