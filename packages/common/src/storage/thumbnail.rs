use std::io::Cursor;

use image::ImageFormat;
use image::imageops::FilterType;

use super::error::StorageError;

/// Deterministic key for a thumbnail of `key` at the given box size.
///
/// `3f2a/cover.jpg` at 256x256 becomes `thumbs/3f2a/cover_256x256.png`.
pub fn thumbnail_key(key: &str, max_width: u32, max_height: u32) -> String {
    let (dir, name) = match key.rsplit_once('/') {
        Some((dir, name)) => (Some(dir), name),
        None => (None, key),
    };
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    };
    match dir {
        Some(dir) => format!("thumbs/{dir}/{stem}_{max_width}x{max_height}.png"),
        None => format!("thumbs/{stem}_{max_width}x{max_height}.png"),
    }
}

/// Fast downscale for previews.
pub fn render_thumbnail(
    data: &[u8],
    max_width: u32,
    max_height: u32,
) -> Result<Vec<u8>, StorageError> {
    let img = image::load_from_memory(data)?;
    encode_png(&img.thumbnail(max_width, max_height))
}

/// High-quality resize that keeps the aspect ratio.
pub fn resize_to_png(data: &[u8], max_width: u32, max_height: u32) -> Result<Vec<u8>, StorageError> {
    let img = image::load_from_memory(data)?;
    encode_png(&img.resize(max_width, max_height, FilterType::Lanczos3))
}

fn encode_png(img: &image::DynamicImage) -> Result<Vec<u8>, StorageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}

#[cfg(test)]
pub(crate) fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 30, 30]));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}
