use image::{imageops, DynamicImage, RgbImage};
use image_hasher::{HashAlg, HasherConfig};

use crate::models::Embedding;

use super::analyzer::FaceRegion;

/// Perceptual-hash descriptor of a face crop, for detection models that
/// report regions without their own embedding.
///
/// Each hash bit becomes +1.0 or -1.0, so cosine similarity between two
/// descriptors is `1 - 2 * hamming / bits`.
pub fn crop_descriptor(image: &RgbImage, region: &FaceRegion) -> Embedding {
    let (width, height) = image.dimensions();
    let x = region.x.min(width.saturating_sub(1));
    let y = region.y.min(height.saturating_sub(1));
    let w = region.width.min(width - x).max(1);
    let h = region.height.min(height - y).max(1);

    let crop = imageops::crop_imm(image, x, y, w, h).to_image();
    hash_descriptor(&DynamicImage::ImageRgb8(crop))
}

fn hash_descriptor(image: &DynamicImage) -> Embedding {
    let hasher = HasherConfig::new()
        .hash_alg(HashAlg::DoubleGradient)
        .hash_size(8, 8)
        .to_hasher();

    let hash = hasher.hash_image(image);
    let values = hash
        .as_bytes()
        .iter()
        .flat_map(|byte| (0..8).map(move |bit| if byte >> bit & 1 == 1 { 1.0 } else { -1.0 }))
        .collect();

    Embedding::new(values)
}
