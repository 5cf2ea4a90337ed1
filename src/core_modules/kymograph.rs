// THEORY:
// A kymograph stacks one line per frame into a time-by-position picture: row `t` is the
// column-darkness profile of the region at frame `t`. A steady stream draws a clean vertical
// ridge, a wandering stream a wavy one, and dropouts show as gaps.
//
// Each row is min-max normalized on its own so that exposure changes between frames do not
// wash the ridge out. It is a visual aid only; nothing downstream reads it.

use image::{GrayImage, ImageEncoder, Luma};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Side length of the placeholder image returned for an empty input.
const EMPTY_SIDE: u32 = 10;
const MIN_RANGE: f64 = 1e-6;

/// Stacks per-frame column vectors into a `frames x width` 8-bit image.
/// Rows are assumed to share the width of the first one.
pub fn build(columns: &[Vec<f64>]) -> GrayImage {
    let Some(first) = columns.first() else {
        return GrayImage::new(EMPTY_SIDE, EMPTY_SIDE);
    };
    let width = first.len() as u32;
    let mut image = GrayImage::new(width, columns.len() as u32);

    for (y, row) in columns.iter().enumerate() {
        let min = row.iter().copied().fold(f64::INFINITY, f64::min);
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let range = (max - min).max(MIN_RANGE);
        for x in 0..width {
            let sample = row.get(x as usize).copied().unwrap_or(min);
            let normalized = ((sample - min) / range * 255.0).clamp(0.0, 255.0);
            image.put_pixel(x, y as u32, Luma([normalized as u8]));
        }
    }

    image
}

/// Writes a kymograph as an 8-bit grayscale PNG.
pub fn save_png(kymograph: &GrayImage, path: impl AsRef<Path>) -> Result<(), image::error::ImageError> {
    let output = BufWriter::new(File::create(path)?);
    let encoder = image::codecs::png::PngEncoder::new(output);
    encoder.write_image(
        kymograph.as_raw(),
        kymograph.width(),
        kymograph.height(),
        image::ExtendedColorType::L8,
    )?;
    Ok(())
}
