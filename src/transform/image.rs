use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder, ImageFormat};
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::error::TransformError;
use crate::output::{Asset, AssetData};
use crate::transform::Transform;

/// Lossless-where-possible recompression of raster images.
///
/// PNG files are re-encoded at the highest compression level and JPEG files
/// at the configured quality. The re-encoded bytes only replace the original
/// when they are smaller. Every other file passes through untouched.
#[derive(Debug, Clone, Copy)]
pub struct OptimizeImages {
    jpeg_quality: u8,
}

impl OptimizeImages {
    pub fn new(jpeg_quality: u8) -> Self {
        Self {
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    fn optimize(&self, asset: Asset) -> Result<Asset, TransformError> {
        let format = match asset.path.extension().map(str::to_ascii_lowercase).as_deref() {
            Some("png") => ImageFormat::Png,
            Some("jpg" | "jpeg") => ImageFormat::Jpeg,
            _ => return Ok(asset),
        };

        let original = asset.data.as_ref();
        let encoded = encode(original, format, self.jpeg_quality)
            .map_err(|e| TransformError::new(self.name(), e).on(asset.origin()))?;

        if encoded.len() >= original.len() {
            return Ok(asset);
        }

        tracing::debug!(
            "optimized {} ({} -> {} bytes)",
            asset.path,
            original.len(),
            encoded.len()
        );

        Ok(Asset {
            data: AssetData::Binary(encoded),
            ..asset
        })
    }
}

impl Default for OptimizeImages {
    fn default() -> Self {
        Self::new(80)
    }
}

fn encode(buffer: &[u8], format: ImageFormat, jpeg_quality: u8) -> image::ImageResult<Vec<u8>> {
    let img = image::load_from_memory_with_format(buffer, format)?;
    let (w, h) = (img.width(), img.height());
    let mut out = Vec::new();

    match format {
        ImageFormat::Jpeg => {
            let rgb = img.to_rgb8();
            JpegEncoder::new_with_quality(Cursor::new(&mut out), jpeg_quality).write_image(
                rgb.as_raw(),
                w,
                h,
                ExtendedColorType::Rgb8,
            )?;
        }
        _ => {
            PngEncoder::new_with_quality(&mut out, CompressionType::Best, FilterType::Adaptive)
                .write_image(img.as_bytes(), w, h, img.color().into())?;
        }
    }

    Ok(out)
}

impl Transform for OptimizeImages {
    fn name(&self) -> &'static str {
        "optimize"
    }

    fn apply(&self, assets: Vec<Asset>) -> Result<Vec<Asset>, TransformError> {
        assets
            .into_par_iter()
            .map(|asset| self.optimize(asset))
            .collect()
    }
}
