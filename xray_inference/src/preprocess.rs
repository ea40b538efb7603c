use crate::error::InferenceError;
use image::{imageops::FilterType, RgbImage};
use ndarray::{Array, Ix4};
use std::io::Cursor;

pub const CLIP_IMAGE_SIZE: u32 = 224;

const CLIP_MEAN: [f32; 3] = [0.48145466, 0.4578275, 0.40821073];
const CLIP_STD: [f32; 3] = [0.26862954, 0.26130258, 0.27577711];

pub fn decode_image(image_data: &[u8]) -> Result<RgbImage, InferenceError> {
    let image_reader = image::ImageReader::new(Cursor::new(image_data)).with_guessed_format()?;
    let image = image_reader.decode()?;

    Ok(image.to_rgb8())
}

/// Center-crops the largest square, resizes it to 224x224 and normalizes with
/// the CLIP statistics. Output is `(1, 3, 224, 224)`.
pub fn clip_pixel_values(image: &RgbImage) -> Array<f32, Ix4> {
    let (width, height) = image.dimensions();
    let side = width.min(height).max(1);
    let left = width.saturating_sub(side) / 2;
    let top = height.saturating_sub(side) / 2;

    let square = image::imageops::crop_imm(image, left, top, side, side).to_image();
    let resized = image::imageops::resize(
        &square,
        CLIP_IMAGE_SIZE,
        CLIP_IMAGE_SIZE,
        FilterType::CatmullRom,
    );

    let size = CLIP_IMAGE_SIZE as usize;
    let mut input = Array::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            input[[0, c, y, x]] = (pixel[c] as f32 / 255. - CLIP_MEAN[c]) / CLIP_STD[c];
        }
    }

    input
}
