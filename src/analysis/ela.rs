use std::borrow::Cow;

use image::{ColorType, DynamicImage, GenericImageView, GrayImage, ImageFormat};
use log::debug;

use crate::{
    ElaResult, Region,
    error::{ForensicsError, Result},
    image_utils::{clamp_unit, gray_to_array, mean_and_std},
};

const REGION_BLOCK: u32 = 16;
const REGION_GAP: u32 = 8;

pub struct ElaAnalyzer {
    quality: u8,
    amplification: f64,
    hot_pixel_threshold: u8,
    saturation: f64,
}

impl ElaAnalyzer {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            amplification: 10.0,
            hot_pixel_threshold: 40,
            saturation: 0.05,
        }
    }

    pub fn with_amplification(mut self, amp: f64) -> Self {
        self.amplification = amp;
        self
    }

    pub fn with_hot_pixel_threshold(mut self, threshold: u8) -> Self {
        self.hot_pixel_threshold = threshold;
        self
    }

    pub fn with_saturation(mut self, saturation: f64) -> Self {
        self.saturation = saturation;
        self
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Re-encodes the image as JPEG and measures how far each pixel moved.
    ///
    /// The per-pixel difference is the maximum over channels, scaled by the
    /// amplification factor into the heatmap. The score is the
    /// magnitude-weighted share of hot pixels divided by the saturation ratio.
    pub fn analyze(&self, image: &DynamicImage) -> Result<ElaResult> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(ForensicsError::Decode(format!(
                "raster is {width}x{height}, nothing to analyze"
            )));
        }

        let source = Self::encodable_view(image)?;
        let channels = source.color().channel_count() as usize;

        let recompressed = self.recompress_jpeg(&source)?;
        let recompressed = if channels == 1 {
            DynamicImage::ImageLuma8(recompressed.to_luma8())
        } else {
            DynamicImage::ImageRgb8(recompressed.to_rgb8())
        };

        let original_px = source.as_bytes();
        let recompressed_px = recompressed.as_bytes();
        if original_px.len() != recompressed_px.len() {
            return Err(ForensicsError::Decode(format!(
                "re-encoded raster holds {} samples, expected {}",
                recompressed_px.len(),
                original_px.len()
            )));
        }

        let pixel_count = (width as usize) * (height as usize);
        let mut heat = Vec::with_capacity(pixel_count);
        let mut max_difference = 0u8;
        let mut difference_sum = 0u64;
        let mut hot_pixels = 0usize;
        let mut hot_weight = 0.0;

        for (orig, recomp) in original_px
            .chunks_exact(channels)
            .zip(recompressed_px.chunks_exact(channels))
        {
            // a forged region may only disturb one channel
            let diff = orig
                .iter()
                .zip(recomp)
                .map(|(&a, &b)| a.abs_diff(b))
                .max()
                .unwrap_or(0);

            let scaled = (diff as f64 * self.amplification).min(255.0) as u8;
            if scaled > self.hot_pixel_threshold {
                hot_pixels += 1;
                hot_weight += scaled as f64 / 255.0;
            }

            max_difference = max_difference.max(diff);
            difference_sum += diff as u64;
            heat.push(scaled);
        }

        let heatmap = GrayImage::from_raw(width, height, heat)
            .ok_or_else(|| ForensicsError::Decode("heatmap buffer size mismatch".into()))?;

        let hot_pixel_ratio = hot_pixels as f64 / pixel_count as f64;
        let score = if max_difference == 0 {
            debug!("re-encoding at quality {} left no residual", self.quality);
            0.0
        } else {
            clamp_unit(hot_weight / pixel_count as f64 / self.saturation)
        };

        let (heat_mean, heat_std) = mean_and_std(&gray_to_array(&heatmap));
        let suspicious_regions = if max_difference == 0 {
            Vec::new()
        } else {
            self.find_suspicious_regions(&heatmap, heat_mean + 2.0 * heat_std)
        };

        debug!(
            "ELA q{}: score {:.3}, hot ratio {:.4}, {} suspicious regions",
            self.quality,
            score,
            hot_pixel_ratio,
            suspicious_regions.len()
        );

        Ok(ElaResult {
            heatmap,
            score,
            hot_pixel_ratio,
            max_difference: max_difference as f64,
            mean_difference: difference_sum as f64 / pixel_count as f64,
            suspicious_regions,
        })
    }

    /// 8-bit gray or RGB view of the input; alpha is dropped since JPEG has none.
    fn encodable_view(image: &DynamicImage) -> Result<Cow<'_, DynamicImage>> {
        match image.color() {
            ColorType::L8 | ColorType::Rgb8 => Ok(Cow::Borrowed(image)),
            ColorType::La8 => Ok(Cow::Owned(DynamicImage::ImageLuma8(image.to_luma8()))),
            ColorType::Rgba8 => Ok(Cow::Owned(DynamicImage::ImageRgb8(image.to_rgb8()))),
            other => Err(ForensicsError::UnsupportedFormat(format!(
                "{other:?} rasters cannot be re-encoded for error level analysis"
            ))),
        }
    }

    fn recompress_jpeg(&self, image: &DynamicImage) -> Result<DynamicImage> {
        let mut buffer = Vec::new();

        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, self.quality);
        image
            .write_with_encoder(encoder)
            .map_err(|e| ForensicsError::UnsupportedFormat(e.to_string()))?;

        let recompressed = image::load_from_memory_with_format(&buffer, ImageFormat::Jpeg)
            .map_err(|e| ForensicsError::Decode(e.to_string()))?;

        Ok(recompressed)
    }

    fn find_suspicious_regions(&self, heatmap: &GrayImage, threshold: f64) -> Vec<Region> {
        let (width, height) = heatmap.dimensions();
        let mut regions = Vec::new();

        for by in (0..height).step_by(REGION_BLOCK as usize) {
            for bx in (0..width).step_by(REGION_BLOCK as usize) {
                let mut block_sum = 0.0;
                let mut count = 0;

                for y in by..((by + REGION_BLOCK).min(height)) {
                    for x in bx..((bx + REGION_BLOCK).min(width)) {
                        block_sum += heatmap.get_pixel(x, y)[0] as f64;
                        count += 1;
                    }
                }

                let block_mean = block_sum / count as f64;

                if block_mean > threshold {
                    regions.push(Region {
                        x: bx,
                        y: by,
                        width: REGION_BLOCK.min(width - bx),
                        height: REGION_BLOCK.min(height - by),
                    });
                }
            }
        }

        merge_adjacent_regions(regions)
    }
}

fn merge_adjacent_regions(regions: Vec<Region>) -> Vec<Region> {
    let mut merged = Vec::new();
    let mut used = vec![false; regions.len()];

    for i in 0..regions.len() {
        if used[i] {
            continue;
        }

        let mut current = regions[i];
        used[i] = true;

        loop {
            let mut found = false;
            for j in 0..regions.len() {
                if !used[j] && current.is_near(&regions[j], REGION_GAP) {
                    current = current.union(&regions[j]);
                    used[j] = true;
                    found = true;
                }
            }

            if !found {
                break;
            }
        }

        merged.push(current);
    }

    merged
}
