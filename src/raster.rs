use std::borrow::Cow;

use image::{
    DynamicImage, GenericImageView, GrayAlphaImage, GrayImage, ImageFormat, RgbImage, RgbaImage,
};
use serde::Serialize;

use crate::{
    error::{ForensicsError, Result},
    metadata::{
        exif::ExifExtractor,
        png_text::{PngTextExtractor, merge_prefixed},
    },
};

/// A metadata value as found in the source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagValue {
    Text(String),
    Binary(Vec<u8>),
}

impl TagValue {
    /// Textual form used for marker matching. Binary payloads are decoded
    /// lossily so ASCII signatures inside XMP or ICC blobs stay searchable.
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            TagValue::Text(text) => Cow::Borrowed(text.as_str()),
            TagValue::Binary(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                if text.contains('\0') {
                    Cow::Owned(text.replace('\0', ""))
                } else {
                    text
                }
            }
        }
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::Text(value.to_string())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        TagValue::Text(value)
    }
}

impl From<Vec<u8>> for TagValue {
    fn from(value: Vec<u8>) -> Self {
        TagValue::Binary(value)
    }
}

/// Metadata tags in the order they were read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    entries: Vec<(String, TagValue)>,
}

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a tag, replacing the value in place if the key already exists.
    pub fn insert<K: Into<String>, V: Into<TagValue>>(&mut self, key: K, value: V) {
        let key = key.into();
        let value = value.into();

        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&TagValue> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TagValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<TagValue>> FromIterator<(K, V)> for TagSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut tags = TagSet::new();
        for (key, value) in iter {
            tags.insert(key, value);
        }
        tags
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PixelFormat {
    pub channels: u8,
    pub bit_depth: u8,
}

/// Decoded pixels plus the metadata tags of the file they came from.
#[derive(Debug, Clone)]
pub struct RasterImage {
    pixels: DynamicImage,
    tags: TagSet,
}

impl RasterImage {
    pub fn new(pixels: DynamicImage, tags: TagSet) -> Self {
        Self { pixels, tags }
    }

    /// Wraps an interleaved 8-bit buffer with 1 to 4 channels.
    pub fn from_raw(
        width: u32,
        height: u32,
        channels: u8,
        bytes: Vec<u8>,
        tags: TagSet,
    ) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(channels as usize))
            .ok_or_else(|| {
                ForensicsError::Decode(format!("{width}x{height} raster is too large"))
            })?;

        if !(1..=4).contains(&channels) {
            return Err(ForensicsError::UnsupportedFormat(format!(
                "{channels} channel rasters are not supported"
            )));
        }

        if bytes.len() != expected {
            return Err(ForensicsError::Decode(format!(
                "buffer holds {} bytes but a {width}x{height}x{channels} raster needs {expected}",
                bytes.len()
            )));
        }

        let pixels = match channels {
            1 => GrayImage::from_raw(width, height, bytes).map(DynamicImage::ImageLuma8),
            2 => GrayAlphaImage::from_raw(width, height, bytes).map(DynamicImage::ImageLumaA8),
            3 => RgbImage::from_raw(width, height, bytes).map(DynamicImage::ImageRgb8),
            _ => RgbaImage::from_raw(width, height, bytes).map(DynamicImage::ImageRgba8),
        }
        .ok_or_else(|| ForensicsError::Decode("pixel buffer rejected".into()))?;

        Ok(Self { pixels, tags })
    }

    /// Decodes an encoded image held in memory and collects its EXIF tags,
    /// followed by PNG text chunks when the container is PNG.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let pixels =
            image::load_from_memory(bytes).map_err(|e| ForensicsError::Decode(e.to_string()))?;
        let mut tags = ExifExtractor::extract(bytes);
        let format = image::guess_format(bytes).ok();

        if format == Some(ImageFormat::Png) {
            merge_prefixed(&mut tags, &PngTextExtractor::extract(bytes), "PNG");
        }

        // container format goes last so file tag order is preserved
        if let Some(format) = format {
            tags.insert("Format", format!("{format:?}"));
        }

        Ok(Self { pixels, tags })
    }

    pub fn pixels(&self) -> &DynamicImage {
        &self.pixels
    }

    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn format(&self) -> PixelFormat {
        let color = self.pixels.color();
        let channels = color.channel_count();
        PixelFormat {
            channels,
            bit_depth: (color.bits_per_pixel() / channels as u16) as u8,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::metadata::png_text::tests::png_with_text;

    #[test]
    fn tag_set_keeps_insertion_order_and_replaces_in_place() {
        let mut tags = TagSet::new();
        tags.insert("Software", "Camera FW 1.0");
        tags.insert("Make", "Acme");
        tags.insert("Software", "GIMP 2.10");

        let keys = tags.iter().map(|(k, _)| k).collect::<Vec<_>>();
        assert_eq!(keys, vec!["Software", "Make"]);
        assert_eq!(tags.get("Software"), Some(&TagValue::from("GIMP 2.10")));
    }

    #[test]
    fn binary_values_are_coerced_to_text() {
        let value =
            TagValue::Binary(b"<xmp:CreatorTool>Adobe\0 Photoshop</xmp:CreatorTool>".to_vec());
        assert!(value.as_text().contains("Adobe Photoshop"));

        let garbage = TagValue::Binary(vec![0xff, 0xfe, 0x00, 0x81]);
        assert!(!garbage.as_text().is_empty());
    }

    #[test]
    fn from_raw_checks_buffer_length() {
        let err = RasterImage::from_raw(4, 4, 3, vec![0; 47], TagSet::new()).unwrap_err();
        assert!(matches!(err, ForensicsError::Decode(_)));

        let raster = RasterImage::from_raw(4, 4, 3, vec![0; 48], TagSet::new()).unwrap();
        assert_eq!(raster.dimensions(), (4, 4));
        assert_eq!(
            raster.format(),
            PixelFormat {
                channels: 3,
                bit_depth: 8
            }
        );
    }

    #[test]
    fn from_raw_rejects_odd_channel_counts() {
        let err = RasterImage::from_raw(2, 2, 5, vec![0; 20], TagSet::new()).unwrap_err();
        assert!(matches!(err, ForensicsError::UnsupportedFormat(_)));
    }

    #[test]
    fn decode_reads_encoded_png() {
        let image = DynamicImage::ImageLuma8(GrayImage::from_fn(8, 6, |x, y| {
            image::Luma([(x * 20 + y) as u8])
        }));
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, ImageFormat::Png).unwrap();

        let raster = RasterImage::decode(bytes.get_ref()).unwrap();
        assert_eq!(raster.dimensions(), (8, 6));
        assert_eq!(raster.tags().get("Format"), Some(&TagValue::from("Png")));
    }

    #[test]
    fn decode_collects_png_text_chunks_before_format() {
        let raster = RasterImage::decode(&png_with_text("Adobe Photoshop 24.0")).unwrap();

        let keys = raster.tags().iter().map(|(k, _)| k).collect::<Vec<_>>();
        assert_eq!(keys, vec!["Software", "Comment", "Author", "Format"]);
        assert_eq!(
            raster.tags().get("Software"),
            Some(&TagValue::from("Adobe Photoshop 24.0"))
        );
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = RasterImage::decode(b"definitely not an image").unwrap_err();
        assert!(matches!(err, ForensicsError::Decode(_)));
    }
}
