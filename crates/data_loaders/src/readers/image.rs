use crate::sample::ImageBuffer;
use anyhow::{bail, Context, Result};
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Depth PNGs store millimetres.
pub const DEPTH_MM_TO_M: f32 = 1.0 / 1000.0;

const READ_BUFFER_SIZE: usize = 8192;

// ============================================================================
// Decoding
// ============================================================================

/// Opens and decodes an image, guessing the format from its content.
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    let file =
        File::open(path).with_context(|| format!("Failed to open image: {}", path.display()))?;
    let reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);
    let image = ImageReader::new(reader)
        .with_guessed_format()
        .with_context(|| format!("Failed to read image: {}", path.display()))?
        .decode()
        .with_context(|| format!("Failed to decode image: {}", path.display()))?;
    Ok(image)
}

/// Loads an 8-bit colour image as RGB; normalized values are in `[0, 1]`.
pub fn load_color(path: &Path) -> Result<ImageBuffer> {
    load_color_downscaled(path, 1)
}

/// Like [`load_color`], shrinking both sides by `factor` first.
pub fn load_color_downscaled(path: &Path, factor: u32) -> Result<ImageBuffer> {
    let image = load_image(path)?;
    let image = if factor > 1 {
        let (w, h) = (image.width() / factor, image.height() / factor);
        if w == 0 || h == 0 {
            bail!(
                "Cannot downscale {}x{} image by {}: {}",
                image.width(),
                image.height(),
                factor,
                path.display()
            );
        }
        DynamicImage::ImageRgb8(imageops::resize(
            &image.to_rgb8(),
            w,
            h,
            FilterType::Triangle,
        ))
    } else {
        image
    };
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    ImageBuffer::from_rgb8(width, height, rgb.into_raw())
        .with_context(|| format!("Invalid colour image: {}", path.display()))
}

/// Loads a single-channel depth image in millimetres; normalized values are
/// metres.
///
/// 16-bit PNGs are the expected format. 8-bit greyscale is accepted and read
/// as raw millimetre values. Anything else is rejected.
pub fn load_depth_mm(path: &Path) -> Result<ImageBuffer> {
    let (width, height, pixels) = match load_image(path)? {
        DynamicImage::ImageLuma16(img) => {
            let (w, h) = img.dimensions();
            (w, h, img.into_raw())
        }
        DynamicImage::ImageLuma8(img) => {
            let (w, h) = img.dimensions();
            (w, h, img.into_raw().into_iter().map(u16::from).collect())
        }
        other => bail!(
            "Depth image must be single-channel, got {:?}: {}",
            other.color(),
            path.display()
        ),
    };
    ImageBuffer::from_depth16(width, height, pixels, DEPTH_MM_TO_M)
        .with_context(|| format!("Invalid depth image: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::PixelData;
    use image::{GrayImage, ImageBuffer as RawImage, Luma, Rgb, RgbImage};
    use tempfile::tempdir;

    #[test]
    fn test_load_color_normalizes() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("color.png");
        let mut img = RgbImage::new(4, 2);
        img.put_pixel(1, 0, Rgb([255, 0, 51]));
        img.save(&path)?;

        let buffer = load_color(&path)?;
        assert_eq!((buffer.width, buffer.height, buffer.channels), (4, 2, 3));
        assert_eq!(buffer.value(1, 0, 0), Some(1.0));
        assert_eq!(buffer.value(1, 0, 1), Some(0.0));
        assert!((buffer.value(1, 0, 2).unwrap_or_default() - 0.2).abs() < 1e-6);
        assert!(matches!(buffer.raw, PixelData::U8(_)));
        Ok(())
    }

    #[test]
    fn test_load_color_downscaled() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("color.png");
        RgbImage::from_pixel(8, 6, Rgb([10, 20, 30])).save(&path)?;

        let buffer = load_color_downscaled(&path, 2)?;
        assert_eq!((buffer.width, buffer.height), (4, 3));
        assert!(load_color_downscaled(&path, 16).is_err());
        Ok(())
    }

    #[test]
    fn test_load_depth_converts_to_metres() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("depth.png");
        let mut img: RawImage<Luma<u16>, Vec<u16>> = RawImage::new(3, 3);
        img.put_pixel(2, 1, Luma([1500]));
        img.save(&path)?;

        let buffer = load_depth_mm(&path)?;
        assert_eq!(buffer.channels, 1);
        assert!((buffer.value(2, 1, 0).unwrap_or_default() - 1.5).abs() < 1e-6);
        assert_eq!(buffer.value(0, 0, 0), Some(0.0));
        Ok(())
    }

    #[test]
    fn test_load_depth_rejects_color() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("depth.png");
        RgbImage::new(2, 2).save(&path)?;
        assert!(load_depth_mm(&path).is_err());

        let gray = dir.path().join("gray.png");
        GrayImage::from_pixel(2, 2, Luma([7])).save(&gray)?;
        assert_eq!(load_depth_mm(&gray)?.raw, PixelData::U16(vec![7; 4]));
        Ok(())
    }

    #[test]
    fn test_missing_file_has_path_in_error() {
        let err = load_color(Path::new("/nonexistent/frame.png")).unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/frame.png"));
    }
}
