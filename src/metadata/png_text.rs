use std::io::Cursor;

use log::debug;

use crate::raster::TagSet;

pub struct PngTextExtractor;

impl PngTextExtractor {
    /// Reads the tEXt, zTXt and iTXt chunks that precede the image data.
    /// Non-PNG input or a malformed header yields an empty tag set.
    pub fn extract(bytes: &[u8]) -> TagSet {
        let decoder = png::Decoder::new(Cursor::new(bytes));

        let reader = match decoder.read_info() {
            Ok(reader) => reader,
            Err(err) => {
                debug!("no PNG text chunks: {err}");
                return TagSet::new();
            }
        };

        let info = reader.info();
        let mut tags = TagSet::new();

        for chunk in &info.uncompressed_latin1_text {
            tags.insert(chunk.keyword.clone(), chunk.text.clone());
        }

        for chunk in &info.compressed_latin1_text {
            match chunk.get_text() {
                Ok(text) => tags.insert(chunk.keyword.clone(), text),
                Err(err) => debug!("skipping zTXt chunk {}: {err}", chunk.keyword),
            }
        }

        for chunk in &info.utf8_text {
            match chunk.get_text() {
                Ok(text) => tags.insert(chunk.keyword.clone(), text),
                Err(err) => debug!("skipping iTXt chunk {}: {err}", chunk.keyword),
            }
        }

        debug!("extracted {} PNG text chunks", tags.len());
        tags
    }
}

/// Copies `extra` into `tags`, prefixing keys that are already taken so
/// earlier values are not overwritten.
pub(crate) fn merge_prefixed(tags: &mut TagSet, extra: &TagSet, prefix: &str) {
    for (key, value) in extra.iter() {
        let key = if tags.get(key).is_some() {
            format!("{prefix}.{key}")
        } else {
            key.to_string()
        };
        tags.insert(key, value.clone());
    }
}
