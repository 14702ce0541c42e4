//! Raster bitmaps produced by capture
//!
//! A `RasterBitmap` always has non-zero dimensions. Whether it actually
//! shows anything is a separate question answered by `has_content`.

use crate::error::{ExportError, Result, ValidationError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::png::PngEncoder;
use image::{imageops, ColorType, ImageEncoder, Rgb, RgbImage, Rgba, RgbaImage};

/// What a zero-sized canvas serializes to
pub const BLANK_DATA_URL: &str = "data:,";

/// Anything shorter cannot hold a real PNG
pub const MIN_DATA_URL_LEN: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct RasterBitmap {
    image: RgbaImage,
}

impl RasterBitmap {
    pub fn new(image: RgbaImage) -> std::result::Result<Self, ValidationError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(ValidationError::EmptyBitmap {
                width: image.width(),
                height: image.height(),
            });
        }
        Ok(Self { image })
    }

    /// Bitmap filled with a single RGBA color
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> std::result::Result<Self, ValidationError> {
        Self::new(RgbaImage::from_pixel(width, height, Rgba(rgba)))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    /// True when at least one pixel of the top-left `sample`×`sample` block
    /// is not fully transparent.
    pub fn has_content(&self, sample: u32) -> bool {
        let w = sample.min(self.width());
        let h = sample.min(self.height());
        (0..h).any(|y| (0..w).any(|x| self.image.get_pixel(x, y).0[3] > 0))
    }

    /// Rows `y..y + height` of the source, clamped to the bitmap
    pub fn crop_band(&self, y: u32, height: u32) -> std::result::Result<Self, ValidationError> {
        let y = y.min(self.height());
        let height = height.min(self.height() - y);
        Self::new(imageops::crop_imm(&self.image, 0, y, self.width(), height).to_image())
    }

    /// Composite onto white and drop the alpha channel
    pub fn flatten_onto_white(&self) -> RgbImage {
        RgbImage::from_fn(self.width(), self.height(), |x, y| {
            let [r, g, b, a] = self.image.get_pixel(x, y).0;
            let alpha = a as u32;
            let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha)) / 255) as u8;
            Rgb([blend(r), blend(g), blend(b)])
        })
    }

    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        PngEncoder::new(&mut buf)
            .write_image(self.image.as_raw(), self.width(), self.height(), ColorType::Rgba8)
            .map_err(|e| ExportError::Encoding(format!("PNG encoding failed: {}", e)))?;
        Ok(buf)
    }

    pub fn to_data_url(&self) -> Result<String> {
        Ok(format!("data:image/png;base64,{}", STANDARD.encode(self.to_png()?)))
    }
}

/// Reject the blank-canvas signature and implausibly short data URLs
pub fn validate_data_url(data_url: &str) -> Result<()> {
    if data_url == BLANK_DATA_URL {
        return Err(ExportError::Encoding("blank canvas data URL".to_string()));
    }
    if data_url.len() < MIN_DATA_URL_LEN {
        return Err(ExportError::Encoding(format!(
            "data URL too short ({} chars)",
            data_url.len()
        )));
    }
    Ok(())
}
