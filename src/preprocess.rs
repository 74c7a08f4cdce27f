//! Downscales sampled frames in place and flags the dark or blurry ones.

use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};
use tracing::warn;

use crate::config::PreprocessSettings;
use crate::schema::FrameRecord;

/// Processes every frame image; frames whose image cannot be read or written
/// are dropped with a warning.
pub(crate) fn preprocess_frames(
    frames: Vec<FrameRecord>,
    settings: &PreprocessSettings,
) -> Vec<FrameRecord> {
    frames
        .into_iter()
        .filter_map(|frame| match preprocess_frame(&frame, settings) {
            Ok((is_too_dark, is_blurry)) => Some(FrameRecord {
                is_too_dark,
                is_blurry,
                ..frame
            }),
            Err(e) => {
                warn!(frame = %frame.frame_path, "dropping frame: {e}");
                None
            }
        })
        .collect()
}

fn preprocess_frame(
    frame: &FrameRecord,
    settings: &PreprocessSettings,
) -> Result<(bool, bool), image::ImageError> {
    let path = Path::new(&frame.frame_path);
    let img = image::open(path)?;
    let img = match downscale(&img, settings.resize_long_side) {
        Some(smaller) => {
            smaller.save(path)?;
            smaller
        }
        None => img,
    };

    let gray = img.to_luma8();
    Ok((
        mean_luma(&gray) < settings.dark_threshold,
        laplacian_variance(&gray) < settings.blur_threshold,
    ))
}

/// A copy whose long side is `long_side`, or `None` if the image already
/// fits.
fn downscale(img: &DynamicImage, long_side: u32) -> Option<DynamicImage> {
    let (w, h) = (img.width(), img.height());
    let longest = w.max(h);
    if long_side == 0 || longest <= long_side {
        return None;
    }
    let scale = long_side as f64 / longest as f64;
    let nw = ((w as f64 * scale) as u32).max(1);
    let nh = ((h as f64 * scale) as u32).max(1);
    Some(img.resize_exact(nw, nh, FilterType::Triangle))
}

pub(crate) fn mean_luma(gray: &GrayImage) -> f64 {
    let pixels = gray.as_raw();
    if pixels.is_empty() {
        return 0.0;
    }
    pixels.iter().map(|&p| p as f64).sum::<f64>() / pixels.len() as f64
}

/// Variance of the 4-neighbour Laplacian over interior pixels. Sharp images
/// have strong edges and so a high variance.
pub(crate) fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }
    let at = |x: u32, y: u32| gray.get_pixel(x, y)[0] as f64;

    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut n = 0.0;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let lap = at(x - 1, y) + at(x + 1, y) + at(x, y - 1) + at(x, y + 1) - 4.0 * at(x, y);
            sum += lap;
            sum_sq += lap * lap;
            n += 1.0;
        }
    }
    let mean = sum / n;
    sum_sq / n - mean * mean
}

#[cfg(test)]
mod tests {
    use image::{ImageBuffer, Luma, Rgb, RgbImage};

    use super::*;
    use crate::schema::tests::frame;

    fn checkerboard(size: u32) -> GrayImage {
        ImageBuffer::from_fn(size, size, |x, y| {
            Luma([if (x + y) % 2 == 0 { 0 } else { 255 }])
        })
    }

    #[test]
    fn flat_image_has_no_edges() {
        let flat = GrayImage::from_pixel(16, 16, Luma([128]));
        assert_eq!(laplacian_variance(&flat), 0.0);
        assert_eq!(mean_luma(&flat), 128.0);
    }

    #[test]
    fn checkerboard_is_sharp() {
        assert!(laplacian_variance(&checkerboard(16)) > 100.0);
    }

    #[test]
    fn flags_and_resizes_on_disk() {
        let dir = tempfile::tempdir().unwrap();

        let dark_path = dir.path().join("dark.png");
        RgbImage::from_pixel(1280, 720, Rgb([5, 5, 5]))
            .save(&dark_path)
            .unwrap();

        let sharp_path = dir.path().join("sharp.png");
        DynamicImage::ImageLuma8(checkerboard(64))
            .to_rgb8()
            .save(&sharp_path)
            .unwrap();

        let frames = vec![
            frame(0, dark_path.to_str().unwrap()),
            frame(1, sharp_path.to_str().unwrap()),
            frame(2, dir.path().join("missing.png").to_str().unwrap()),
        ];
        let out = preprocess_frames(frames, &PreprocessSettings::default());

        assert_eq!(out.len(), 2);
        assert!(out[0].is_too_dark);
        assert!(out[0].is_blurry);
        assert!(!out[1].is_too_dark);
        assert!(!out[1].is_blurry);

        let resized = image::open(&dark_path).unwrap();
        assert_eq!((resized.width(), resized.height()), (640, 360));
    }
}
